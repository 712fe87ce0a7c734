//! External process supervision
//!
//! A [`ProcessSupervisor`] launches child processes for one test scope and
//! guarantees that everything still running is forcibly terminated when the
//! scope ends, whether the test passed or panicked.

use std::collections::{BTreeMap, HashSet};
use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::{TestbedError, TestbedResult};

/// Tracks and tears down the child processes of one test scope.
///
/// `launch` blocks the calling thread until the child exits; the registry
/// only matters when a test fails mid-launch or shares the supervisor across
/// threads. Dropping the supervisor runs [`terminate_all`].
///
/// [`terminate_all`]: ProcessSupervisor::terminate_all
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    registry: ProcessRegistry,
}

impl ProcessSupervisor {
    /// Create a supervisor with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `executable` to completion and return its exit code.
    ///
    /// The child gets exactly `env` as its environment (the ambient
    /// environment is not merged in), the given working directory, a closed
    /// stdin, and the caller's stdout/stderr. A nonzero exit code is data,
    /// not an error; failure to start the process is. A child that dies on a
    /// signal reports `-1`.
    pub fn launch<S, I, A>(
        &self,
        env: &BTreeMap<String, String>,
        working_dir: Option<&Path>,
        executable: S,
        arguments: I,
    ) -> TestbedResult<i32>
    where
        S: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&executable);
        cmd.args(arguments)
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| TestbedError::Spawn {
            executable: executable.as_ref().to_string_lossy().into_owned(),
            source: e,
        })?;

        let pid = child.id();
        self.registry.add(pid);
        debug!("🚀 Launched {:?} (PID: {})", executable.as_ref(), pid);

        let waited = child.wait();
        self.registry.remove(pid);

        let status = waited?;
        let code = status.code().unwrap_or(-1);
        debug!("🏁 Process {} exited with code {}", pid, code);
        Ok(code)
    }

    /// Number of processes currently tracked as live.
    pub fn tracked(&self) -> usize {
        self.registry.len()
    }

    /// Forcibly terminate every tracked process.
    ///
    /// Failures terminating an individual process are logged and skipped;
    /// this never fails and calling it again is a no-op.
    pub fn terminate_all(&self) {
        let pids = self.registry.drain();
        if pids.is_empty() {
            return;
        }

        debug!("🛑 Terminating {} tracked processes", pids.len());
        for pid in pids {
            if let Err(e) = force_kill(pid) {
                warn!("⚠️ Unable to terminate process {} during teardown: {}", pid, e);
            }
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.terminate_all();
    }
}

/// Set of live child PIDs, shared between launching threads and teardown.
#[derive(Debug, Default)]
struct ProcessRegistry {
    live: Mutex<HashSet<u32>>,
}

impl ProcessRegistry {
    fn add(&self, pid: u32) {
        self.lock().insert(pid);
    }

    fn remove(&self, pid: u32) {
        self.lock().remove(&pid);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn drain(&self) -> Vec<u32> {
        self.lock().drain().collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<u32>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Kill `pid` outright. A process that is already gone counts as success.
#[cfg(unix)]
fn force_kill(pid: u32) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(std::io::Error::from_raw_os_error(e as i32)),
    }
}

#[cfg(not(unix))]
fn force_kill(pid: u32) -> std::io::Result<()> {
    warn!("forced termination of process {} is not supported on this platform", pid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_supervisor_starts_empty() {
        let supervisor = ProcessSupervisor::new();
        assert_eq!(supervisor.tracked(), 0);
    }

    #[test]
    fn test_terminate_all_with_nothing_tracked_is_noop() {
        let supervisor = ProcessSupervisor::new();
        supervisor.terminate_all();
        supervisor.terminate_all();
        assert_eq!(supervisor.tracked(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_launch_returns_exit_code_as_data() {
        let supervisor = ProcessSupervisor::new();
        let env = BTreeMap::new();

        let code = supervisor
            .launch(&env, None, "/bin/sh", ["-c", "exit 0"])
            .unwrap();
        assert_eq!(code, 0);

        let code = supervisor
            .launch(&env, None, "/bin/sh", ["-c", "exit 3"])
            .unwrap();
        assert_eq!(code, 3);

        assert_eq!(supervisor.tracked(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_launch_replaces_environment_wholesale() {
        let supervisor = ProcessSupervisor::new();
        let mut env = BTreeMap::new();
        env.insert("ONLY_VAR".to_string(), "1".to_string());

        // PATH is not in the child environment, so plain `env` would see it
        // unset; assert via the variable we did pass.
        let code = supervisor
            .launch(&env, None, "/bin/sh", ["-c", "test \"$ONLY_VAR\" = 1 -a -z \"$PATH\""])
            .unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn test_launch_missing_executable_is_error_and_tracks_nothing() {
        let supervisor = ProcessSupervisor::new();
        let env = BTreeMap::new();

        let result = supervisor.launch(&env, None, "no-such-executable-12345", ["--version"]);
        assert_matches!(result, Err(TestbedError::Spawn { executable, .. }) if executable == "no-such-executable-12345");
        assert_eq!(supervisor.tracked(), 0);
    }
}
