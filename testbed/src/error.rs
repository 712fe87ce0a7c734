//! Testbed-specific error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestbedError {
    #[error("property '{name}' is required but not set")]
    RequiredProperty { name: String },

    #[error("the workspace directory has not yet been created")]
    WorkspaceNotCreated,

    #[error("failed to start process '{executable}'")]
    Spawn {
        executable: String,
        source: std::io::Error,
    },

    #[error("import source does not exist: {path}")]
    ImportSourceMissing { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TestbedResult<T> = Result<T, TestbedError>;
