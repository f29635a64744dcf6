//! Update module registry
//!
//! Installers are polymorphic: the agent streams payload bytes into
//! whichever registered [`UpdateModule`] claims the payload type declared
//! by the artifact header, then drives it through install, commit or
//! rollback, and cleanup.

pub mod file;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::errors::AgentError;

/// A pluggable installer backend for one payload type
#[async_trait]
pub trait UpdateModule: Send {
    /// Payload type this module handles, e.g. `rootfs-image`
    fn payload_type(&self) -> &str;

    /// True when applying this payload requires a system restart
    fn needs_restart(&self) -> bool {
        false
    }

    /// Receive a slice of the payload during download.
    ///
    /// `offset` is the byte position of `data` within the file; the first
    /// call for a file always carries offset zero.
    async fn stream(
        &mut self,
        filename: &str,
        size: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<(), AgentError>;

    /// Apply the fully streamed payload
    async fn install(&mut self) -> Result<(), AgentError>;

    /// Restart into the new payload, when `needs_restart` is true
    async fn reboot(&mut self) -> Result<(), AgentError> {
        Ok(())
    }

    /// Make the installed payload permanent
    async fn commit(&mut self) -> Result<(), AgentError> {
        Ok(())
    }

    /// Discard a partially applied payload
    async fn rollback(&mut self) -> Result<(), AgentError> {
        Ok(())
    }

    /// Release any temporary resources
    async fn cleanup(&mut self) -> Result<(), AgentError> {
        Ok(())
    }
}

/// Receives payload bytes emitted by the artifact decoder
#[async_trait]
pub trait PayloadSink: Send {
    /// Forward one slice of a payload file to its installer
    async fn write(
        &mut self,
        payload_type: &str,
        filename: &str,
        size: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<(), AgentError>;
}

/// Holds the registered update modules and dispatches payload streams
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn UpdateModule>>,
    active_types: Vec<String>,
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an update module for its payload type
    pub fn register(&mut self, module: Box<dyn UpdateModule>) {
        debug!("Registered update module for '{}'", module.payload_type());
        self.modules.push(module);
    }

    /// Payload types that received data during the current deployment
    pub fn active_types(&self) -> &[String] {
        &self.active_types
    }

    /// True when any module exercised by the current deployment requires
    /// a restart to apply its payload
    pub fn needs_restart(&self) -> bool {
        self.modules
            .iter()
            .filter(|m| self.active_types.iter().any(|t| t == m.payload_type()))
            .any(|m| m.needs_restart())
    }

    /// Run `install` on every module exercised by the current deployment
    pub async fn install_active(&mut self) -> Result<(), AgentError> {
        for module in self.active_modules() {
            module.install().await?;
        }
        Ok(())
    }

    /// Run `reboot` on every exercised module that requires a restart
    pub async fn reboot_active(&mut self) -> Result<(), AgentError> {
        let active = self.active_types.clone();
        for module in &mut self.modules {
            if active.iter().any(|t| t == module.payload_type()) && module.needs_restart() {
                module.reboot().await?;
            }
        }
        Ok(())
    }

    /// Run `commit` on every module exercised by the current deployment
    pub async fn commit_active(&mut self) -> Result<(), AgentError> {
        for module in self.active_modules() {
            module.commit().await?;
        }
        Ok(())
    }

    /// Roll back every module exercised by the current deployment.
    ///
    /// Rollback errors are logged and swallowed so every module gets its
    /// chance to discard partial state.
    pub async fn rollback_active(&mut self) {
        for module in self.active_modules() {
            if let Err(e) = module.rollback().await {
                error!("Rollback failed for '{}': {}", module.payload_type(), e);
            }
        }
    }

    /// Run `cleanup` on every exercised module and forget the deployment
    pub async fn cleanup_active(&mut self) {
        for module in self.active_modules() {
            if let Err(e) = module.cleanup().await {
                error!("Cleanup failed for '{}': {}", module.payload_type(), e);
            }
        }
        self.active_types.clear();
    }

    fn active_modules(&mut self) -> impl Iterator<Item = &mut Box<dyn UpdateModule>> {
        let active = self.active_types.clone();
        self.modules
            .iter_mut()
            .filter(move |m| active.iter().any(|t| t == m.payload_type()))
    }
}

#[async_trait]
impl PayloadSink for ModuleRegistry {
    async fn write(
        &mut self,
        payload_type: &str,
        filename: &str,
        size: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<(), AgentError> {
        let module = self
            .modules
            .iter_mut()
            .find(|m| m.payload_type() == payload_type)
            .ok_or_else(|| {
                AgentError::InstallError(format!("Unsupported payload type '{}'", payload_type))
            })?;

        if !self.active_types.iter().any(|t| t == payload_type) {
            self.active_types.push(payload_type.to_string());
        }

        module.stream(filename, size, offset, data).await
    }
}
