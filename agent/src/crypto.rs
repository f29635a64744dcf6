//! Cryptographic seams.
//!
//! The agent consumes signing and verification as opaque operations: the
//! surrounding application decides the algorithms and key storage. These
//! traits are the only contract the core requires.

use crate::errors::AgentError;

/// Signs authentication payloads with the device key
pub trait PayloadSigner: Send + Sync {
    /// Public key in PEM format, sent with authentication requests
    fn public_key_pem(&self) -> Result<String, AgentError>;

    /// Produce a detached signature over `payload`
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, AgentError>;
}

/// Verifies the authenticity of an artifact manifest
pub trait ArtifactVerifier: Send + Sync {
    /// Check `signature` against the exact `manifest` bytes.
    ///
    /// Returns `Ok(())` when the manifest is authentic; any error aborts
    /// the decode before the manifest digests are trusted.
    fn verify(&self, manifest: &[u8], signature: &[u8]) -> Result<(), AgentError>;
}
