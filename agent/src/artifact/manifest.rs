//! Signed manifest and header metadata
//!
//! The manifest lists a SHA-256 digest for every checksummed entry of the
//! container. Its raw bytes are kept verbatim because the accompanying
//! signature is computed over them, not over a re-serialization.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use crate::errors::AgentError;

/// Parsed artifact manifest: entry name to expected SHA-256 (lowercase hex)
#[derive(Debug)]
pub struct Manifest {
    raw: Vec<u8>,
    digests: HashMap<String, String>,
}

impl Manifest {
    /// Parse the manifest body.
    ///
    /// Each line is `<64 hex chars><two spaces><entry name>`; empty lines
    /// are ignored.
    pub fn parse(raw: &[u8]) -> Result<Self, AgentError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| AgentError::MalformedInput("Manifest is not valid UTF-8".to_string()))?;

        let mut digests = HashMap::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let Some((digest, name)) = line.split_once("  ") else {
                return Err(AgentError::MalformedInput(format!(
                    "Malformed manifest line '{}'",
                    line
                )));
            };
            if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(AgentError::MalformedInput(format!(
                    "Malformed manifest digest for entry '{}'",
                    name
                )));
            }
            digests.insert(name.to_string(), digest.to_ascii_lowercase());
        }

        Ok(Self {
            raw: raw.to_vec(),
            digests,
        })
    }

    /// Exact bytes the signature was computed over
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Expected digest for `entry`, when the manifest declares one
    pub fn expected(&self, entry: &str) -> Option<&str> {
        self.digests.get(entry).map(String::as_str)
    }

    /// Number of declared entries
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    /// True when the manifest declares no entries
    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

/// Version marker, the first entry of every artifact
#[derive(Debug, Deserialize)]
pub struct VersionInfo {
    pub format: String,
    pub version: u32,
}

/// Container format identifier expected in the version entry
pub const ARTIFACT_FORMAT: &str = "ota";
/// Container format version this decoder understands
pub const ARTIFACT_VERSION: u32 = 1;

impl VersionInfo {
    /// Parse and validate the version entry body
    pub fn parse(raw: &[u8]) -> Result<Self, AgentError> {
        let info: VersionInfo = serde_json::from_slice(raw)
            .map_err(|_| AgentError::MalformedInput("Malformed version entry".to_string()))?;
        if info.format != ARTIFACT_FORMAT {
            return Err(AgentError::MalformedInput(format!(
                "Unsupported artifact format '{}'",
                info.format
            )));
        }
        if info.version != ARTIFACT_VERSION {
            return Err(AgentError::MalformedInput(format!(
                "Unsupported artifact version {}",
                info.version
            )));
        }
        Ok(info)
    }
}

/// One payload declaration from the header
#[derive(Debug, Clone, Deserialize)]
pub struct PayloadInfo {
    #[serde(rename = "type")]
    pub payload_type: String,
}

/// Parsed `header-info` entry
#[derive(Debug, Deserialize)]
pub struct HeaderInfo {
    /// Declared payloads, in data-section order
    pub payloads: Vec<PayloadInfo>,

    /// Device type the artifact was built for
    pub device_type: String,

    /// Provides metadata carried by the artifact
    #[serde(default)]
    pub artifact_provides: BTreeMap<String, String>,
}

impl HeaderInfo {
    /// Parse and validate the header-info body
    pub fn parse(raw: &[u8]) -> Result<Self, AgentError> {
        let info: HeaderInfo = serde_json::from_slice(raw)
            .map_err(|_| AgentError::MalformedInput("Malformed header-info entry".to_string()))?;
        if info.payloads.is_empty() {
            return Err(AgentError::MalformedInput(
                "Artifact declares no payloads".to_string(),
            ));
        }
        Ok(info)
    }
}
