//! Resources with an inverse "close" operation.

use anyhow::{bail, Context as _};
use std::fs::File;
use std::process::Child;

/// A resource handle whose teardown is a single inverse operation.
///
/// Implementations run on whichever thread performs cleanup, so they must
/// be `Send`.
pub trait Close: Send + 'static {
    /// Releases the resource.
    fn close(self) -> anyhow::Result<()>;
}

impl Close for File {
    fn close(self) -> anyhow::Result<()> {
        drop(self);
        Ok(())
    }
}

impl Close for Child {
    fn close(mut self) -> anyhow::Result<()> {
        let pid = self.id();
        let status = self
            .wait()
            .with_context(|| format!("waiting for process {pid}"))?;
        if !status.success() {
            bail!("process {pid} exited with {status}");
        }
        Ok(())
    }
}

impl Close for tempfile::TempDir {
    fn close(self) -> anyhow::Result<()> {
        let path = self.path().to_path_buf();
        tempfile::TempDir::close(self)
            .with_context(|| format!("removing temporary directory {}", path.display()))
    }
}

impl Close for tempfile::NamedTempFile {
    fn close(self) -> anyhow::Result<()> {
        let path = self.path().to_path_buf();
        tempfile::NamedTempFile::close(self)
            .with_context(|| format!("removing temporary file {}", path.display()))
    }
}
