//! Ephemeral filesystem workspaces
//!
//! A [`Workspace`] owns one throwaway directory per test scope. Identity-based
//! workspaces live at `<base>/<TestClass>/<test_method>` and are wiped and
//! recreated on entry, so reruns always start from a clean tree. Anonymous
//! workspaces get a fresh randomly named directory under the platform temp
//! area. Teardown deletes the tree best-effort and never fails the test.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{TestbedError, TestbedResult};

/// Scoped directory manager for a single test.
///
/// Acquire with [`enter`], release with [`teardown`] (also run on drop).
/// All file and directory helpers operate beneath [`root`].
///
/// [`enter`]: Workspace::enter
/// [`teardown`]: Workspace::teardown
/// [`root`]: Workspace::root
#[derive(Debug)]
pub struct Workspace {
    base_dir: Option<PathBuf>,
    identity: Option<PathBuf>,
    delete_on_teardown: bool,
    root: Option<WorkspaceRoot>,
}

#[derive(Debug)]
enum WorkspaceRoot {
    /// Randomly named directory under the temp area, deleted with its guard.
    Temp(TempDir),
    /// Deterministic directory derived from base dir and identity.
    Pinned(PathBuf),
}

impl WorkspaceRoot {
    fn path(&self) -> &Path {
        match self {
            WorkspaceRoot::Temp(temp) => temp.path(),
            WorkspaceRoot::Pinned(dir) => dir,
        }
    }
}

impl Workspace {
    /// Anonymous workspace: a fresh randomly named temp directory.
    pub fn random() -> Self {
        Self {
            base_dir: None,
            identity: None,
            delete_on_teardown: true,
            root: None,
        }
    }

    /// Identity-based workspace rooted under `base_dir`.
    ///
    /// Combine with [`with_identity`] so each test gets its own
    /// deterministic subdirectory.
    ///
    /// [`with_identity`]: Workspace::with_identity
    pub fn rooted(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
            identity: None,
            delete_on_teardown: true,
            root: None,
        }
    }

    /// Derive the workspace subdirectory from the calling test's identity
    /// (fluent API).
    pub fn with_identity(mut self, class_name: &str, method_name: &str) -> Self {
        self.identity = Some(Path::new(class_name).join(method_name));
        self
    }

    /// Leave the tree on disk at teardown (fluent API).
    pub fn keep_on_teardown(mut self) -> Self {
        self.delete_on_teardown = false;
        self
    }

    /// Establish the workspace directory.
    ///
    /// Identity-based roots are deleted first when they already exist, so the
    /// scope always starts with an empty tree. Failures here abort scope
    /// entry.
    pub fn enter(&mut self) -> TestbedResult<()> {
        let root = match &self.base_dir {
            None => {
                let temp = tempfile::Builder::new().prefix("workspace").tempdir()?;
                debug!("📁 Created workspace {}", temp.path().display());
                WorkspaceRoot::Temp(temp)
            }
            Some(base) => {
                let dir = match &self.identity {
                    Some(identity) => base.join(identity),
                    None => base.clone(),
                };
                if dir.exists() {
                    fs::remove_dir_all(&dir)?;
                }
                fs::create_dir_all(&dir)?;
                debug!("📁 Created workspace {}", dir.display());
                WorkspaceRoot::Pinned(dir)
            }
        };
        self.root = Some(root);
        Ok(())
    }

    /// The workspace directory.
    ///
    /// Fails until [`enter`] has established it.
    ///
    /// [`enter`]: Workspace::enter
    pub fn root(&self) -> TestbedResult<&Path> {
        self.root
            .as_ref()
            .map(WorkspaceRoot::path)
            .ok_or(TestbedError::WorkspaceNotCreated)
    }

    /// Create an empty file at `file_name` under root, creating parent
    /// directories as needed.
    pub fn new_file(&self, file_name: impl AsRef<Path>) -> TestbedResult<PathBuf> {
        let file = self.root()?.join(file_name);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::File::create(&file)?;
        Ok(file)
    }

    /// Create a uniquely named empty file directly under root.
    pub fn new_file_unnamed(&self) -> TestbedResult<PathBuf> {
        let temp = tempfile::Builder::new()
            .prefix("file")
            .tempfile_in(self.root()?)?;
        let (_, path) = temp.keep().map_err(|e| TestbedError::Io(e.error))?;
        Ok(path)
    }

    /// Create a nested directory chain under root, one segment per element,
    /// and return the deepest directory. Existing segments are fine.
    pub fn new_dir<I, S>(&self, segments: I) -> TestbedResult<PathBuf>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<Path>,
    {
        let mut dir = self.root()?.to_path_buf();
        for segment in segments {
            dir.push(segment.as_ref());
            match fs::create_dir(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(TestbedError::Io(e)),
            }
        }
        Ok(dir)
    }

    /// Create a uniquely named directory directly under root.
    pub fn new_dir_unnamed(&self) -> TestbedResult<PathBuf> {
        let temp = tempfile::Builder::new()
            .prefix("dir")
            .tempdir_in(self.root()?)?;
        Ok(temp.keep())
    }

    /// Import a file or directory tree, dispatching on the source's type.
    pub fn import(&self, source: impl AsRef<Path>) -> TestbedResult<PathBuf> {
        let source = source.as_ref();
        if source.is_dir() {
            self.import_dir(source)
        } else {
            self.import_file(source)
        }
    }

    /// Copy an external file under root at its own name, replacing any
    /// pre-existing destination.
    pub fn import_file(&self, source: impl AsRef<Path>) -> TestbedResult<PathBuf> {
        let source = source.as_ref();
        let name = source
            .file_name()
            .filter(|_| source.is_file())
            .ok_or_else(|| TestbedError::ImportSourceMissing {
                path: source.to_path_buf(),
            })?;

        let dest = self.root()?.join(name);
        remove_existing(&dest)?;
        fs::copy(source, &dest)?;
        Ok(dest)
    }

    /// Recursively copy an external directory tree under root at its own
    /// name, replacing any pre-existing destination.
    pub fn import_dir(&self, source: impl AsRef<Path>) -> TestbedResult<PathBuf> {
        let source = source.as_ref();
        let name = source
            .file_name()
            .filter(|_| source.is_dir())
            .ok_or_else(|| TestbedError::ImportSourceMissing {
                path: source.to_path_buf(),
            })?;

        let dest = self.root()?.join(name);
        remove_existing(&dest)?;
        copy_dir_recursive(source, &dest)?;
        Ok(dest)
    }

    /// Release the workspace.
    ///
    /// Deletes the whole tree when deletion was requested at construction.
    /// Deletion failures are logged, never propagated; teardown runs during
    /// failure unwinding and must not mask the test's own error.
    pub fn teardown(&mut self) {
        let Some(root) = self.root.take() else {
            return;
        };

        if !self.delete_on_teardown {
            if let WorkspaceRoot::Temp(temp) = root {
                // divorce the directory from its guard so it survives
                let _ = temp.keep();
            }
            return;
        }

        match root {
            WorkspaceRoot::Temp(temp) => {
                let path = temp.path().to_path_buf();
                if let Err(e) = temp.close() {
                    warn!(
                        "⚠️ Unable to delete workspace {} during teardown: {}",
                        path.display(),
                        e
                    );
                }
            }
            WorkspaceRoot::Pinned(dir) => {
                if let Err(e) = fs::remove_dir_all(&dir) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(
                            "⚠️ Unable to delete workspace {} during teardown: {}",
                            dir.display(),
                            e
                        );
                    }
                }
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn remove_existing(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        Ok(())
    }
}

fn copy_dir_recursive(source: &Path, dest: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
