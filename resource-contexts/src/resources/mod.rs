//! Resource adapters built on the context contract.
//!
//! Each adapter performs one stateful acquisition and registers its inverse
//! on the supplied context. Acquisition failures are returned as
//! [`ContextError::Setup`] before anything is registered.

use crate::context::{CleanupAction, Managed};
use crate::errors::ContextError;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use tempfile::NamedTempFile;
use tracing::debug;

resource_fn! {
    /// Creates a temporary directory that is removed, with its contents, at
    /// cleanup.
    pub fn temp_dir(ctx) -> Result<PathBuf, ContextError> {
        let dir = tempfile::tempdir()
            .map_err(|e| ContextError::setup("temporary directory", e))?;
        let path = dir.path().to_path_buf();
        debug!(context_id = %ctx.id(), path = %path.display(), "Created temporary directory");

        ctx.register(
            CleanupAction::close(dir).named(format!("remove {}", path.display())),
        );
        Ok(path)
    }
}

resource_fn! {
    /// Creates a temporary file that is deleted at cleanup.
    pub fn temp_file(ctx) -> Result<Managed<NamedTempFile>, ContextError> {
        let file = NamedTempFile::new()
            .map_err(|e| ContextError::setup("temporary file", e))?;
        debug!(context_id = %ctx.id(), path = %file.path().display(), "Created temporary file");
        Ok(ctx.manage(file))
    }
}

resource_fn! {
    /// Opens `path` for reading; the file is closed at cleanup.
    pub fn open_file(ctx, path: &Path) -> Result<Managed<File>, ContextError> {
        let file = File::open(path)
            .map_err(|e| ContextError::setup(format!("file {}", path.display()), e))?;
        Ok(ctx.manage(file))
    }
}

resource_fn! {
    /// Creates or truncates `path` for writing; the file is closed at
    /// cleanup.
    pub fn create_file(ctx, path: &Path) -> Result<Managed<File>, ContextError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| ContextError::setup(format!("file {}", path.display()), e))?;
        Ok(ctx.manage(file))
    }
}

resource_fn! {
    /// Spawns `command`; cleanup waits for the process to exit and fails if
    /// it exited unsuccessfully.
    pub fn spawn_process(ctx, command: &mut Command) -> Result<Managed<Child>, ContextError> {
        let program = command.get_program().to_string_lossy().into_owned();
        let child = command
            .spawn()
            .map_err(|e| ContextError::setup(format!("process {program}"), e))?;
        debug!(context_id = %ctx.id(), pid = child.id(), %program, "Spawned process");
        Ok(ctx.manage(child))
    }
}
