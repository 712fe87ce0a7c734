//! Test-Support Toolkit
//!
//! Three scoped resource managers for integration tests that drive external
//! builds: layered environment resolution, supervised child processes, and
//! throwaway workspaces. Each manager is acquired at test entry and released
//! exactly once at test exit, even when the test fails.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use testbed::{EnvironmentRegistry, ProcessSupervisor, TestbedResult, Workspace};
//!
//! fn build_sample_project() -> TestbedResult<()> {
//!     let registry = EnvironmentRegistry::new();
//!     let environment = registry.get(Some(Path::new("it.properties")))?;
//!
//!     let mut workspace = Workspace::rooted("target/test-workspaces")
//!         .with_identity("SampleBuildTest", "build_sample_project");
//!     workspace.enter()?;
//!     let project = workspace.import_dir("tests/resources/sample-project")?;
//!
//!     let supervisor = ProcessSupervisor::new();
//!     let exit_code = supervisor.launch(
//!         &environment.resolved_env(),
//!         Some(project.as_path()),
//!         "mvn",
//!         ["clean", "verify"],
//!     )?;
//!     assert_eq!(exit_code, 0);
//!
//!     // workspace and supervisor tear down on drop as well
//!     supervisor.terminate_all();
//!     workspace.teardown();
//!     Ok(())
//! }
//! ```

// Core modules
pub mod environment;
pub mod error;
pub mod logging;
pub mod process;
pub mod workspace;

// Main interfaces - re-exported at crate root for convenience
pub use environment::{Environment, EnvironmentRegistry};
pub use error::{TestbedError, TestbedResult};
pub use process::ProcessSupervisor;
pub use workspace::Workspace;
