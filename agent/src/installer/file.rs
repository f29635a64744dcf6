//! File-staging update module
//!
//! Streams the payload into a staging file and only moves it to its final
//! destination on commit. A decode aborted mid-stream therefore leaves
//! nothing but a staging file behind, which rollback and cleanup remove.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::errors::AgentError;
use crate::installer::UpdateModule;

/// Update module writing payload files into a target directory
pub struct FileModule {
    payload_type: String,
    staging_dir: PathBuf,
    target_dir: PathBuf,
    current: Option<StagedFile>,
    staged: Vec<StagedFile>,
}

struct StagedFile {
    filename: String,
    staging_path: PathBuf,
    handle: Option<fs::File>,
}

impl FileModule {
    /// Create a module handling `payload_type` payloads
    pub fn new(
        payload_type: impl Into<String>,
        staging_dir: impl Into<PathBuf>,
        target_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            payload_type: payload_type.into(),
            staging_dir: staging_dir.into(),
            target_dir: target_dir.into(),
            current: None,
            staged: Vec::new(),
        }
    }
}

#[async_trait]
impl UpdateModule for FileModule {
    fn payload_type(&self) -> &str {
        &self.payload_type
    }

    async fn stream(
        &mut self,
        filename: &str,
        size: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<(), AgentError> {
        if offset == 0 {
            // Staged files must stay inside the staging directory
            if filename.contains(['/', '\\']) || filename == "." || filename == ".." {
                return Err(AgentError::InstallError(format!(
                    "Invalid payload file name '{}'",
                    filename
                )));
            }
            fs::create_dir_all(&self.staging_dir).await?;
            let staging_path = self.staging_dir.join(filename);
            debug!("Staging '{}' ({} bytes) at {:?}", filename, size, staging_path);
            let handle = fs::File::create(&staging_path).await?;
            if let Some(previous) = self.current.take() {
                self.staged.push(previous);
            }
            self.current = Some(StagedFile {
                filename: filename.to_string(),
                staging_path,
                handle: Some(handle),
            });
        }

        let current = self.current.as_mut().ok_or_else(|| {
            AgentError::InstallError("Payload data received before file start".to_string())
        })?;
        if let Some(handle) = current.handle.as_mut() {
            handle.write_all(data).await?;
            if offset + data.len() as u64 >= size {
                handle.flush().await?;
                current.handle = None;
            }
        }
        Ok(())
    }

    async fn install(&mut self) -> Result<(), AgentError> {
        if let Some(current) = self.current.take() {
            self.staged.push(current);
        }
        if self.staged.iter().any(|f| f.handle.is_some()) {
            return Err(AgentError::InstallError(
                "Payload stream ended before its declared size".to_string(),
            ));
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), AgentError> {
        fs::create_dir_all(&self.target_dir).await?;
        for file in self.staged.drain(..) {
            let target = self.target_dir.join(&file.filename);
            info!("Committing '{}' to {:?}", file.filename, target);
            fs::rename(&file.staging_path, &target).await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), AgentError> {
        if let Some(current) = self.current.take() {
            self.staged.push(current);
        }
        for file in self.staged.drain(..) {
            debug!("Discarding staged file {:?}", file.staging_path);
            let _ = fs::remove_file(&file.staging_path).await;
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<(), AgentError> {
        self.current = None;
        self.staged.clear();
        Ok(())
    }
}
