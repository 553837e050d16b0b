//! File-system capability used by the wrapper generator.

use std::{io, path::Path};

/// The file operations a wrapper batch performs. Implementations must be
/// shareable across the concurrently running writes of one batch.
#[async_trait::async_trait]
pub trait WrapperFs: Send + Sync {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    async fn write(&self, path: &Path, contents: &str) -> io::Result<()>;
    async fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// The default capability, backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFs;

#[async_trait::async_trait]
impl WrapperFs for TokioFs {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        tokio::fs::write(path, contents).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}
