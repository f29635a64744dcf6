#![allow(dead_code)]

//! Shared fixtures: an artifact builder producing well-formed container
//! streams, keyed test signer/verifier pairs and recording installer
//! doubles.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use otagent::crypto::{ArtifactVerifier, PayloadSigner};
use otagent::errors::AgentError;
use otagent::installer::{PayloadSink, UpdateModule};

pub const BLOCK_SIZE: usize = 512;

pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Keyed test signature: SHA-256 over the key followed by the payload
pub fn test_sign(key: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(payload);
    hasher.finalize().to_vec()
}

/// Verifier accepting only signatures produced by [`test_sign`] with the
/// same key
pub struct TestVerifier {
    pub key: Vec<u8>,
}

impl ArtifactVerifier for TestVerifier {
    fn verify(&self, manifest: &[u8], signature: &[u8]) -> Result<(), AgentError> {
        if signature == test_sign(&self.key, manifest) {
            Ok(())
        } else {
            Err(AgentError::SignatureInvalid(
                "Artifact signature mismatch".to_string(),
            ))
        }
    }
}

/// Signer producing [`test_sign`] signatures and a fixed PEM stand-in
pub struct TestSigner {
    pub key: Vec<u8>,
}

impl PayloadSigner for TestSigner {
    fn public_key_pem(&self) -> Result<String, AgentError> {
        Ok("-----BEGIN PUBLIC KEY-----\ntest\n-----END PUBLIC KEY-----\n".to_string())
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, AgentError> {
        Ok(test_sign(&self.key, payload))
    }
}

/// A 512-byte record header for `name` with a valid checksum
pub fn tar_header(name: &str, size: u64) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    block[..name.len()].copy_from_slice(name.as_bytes());
    let octal = format!("{:011o}", size);
    block[124..135].copy_from_slice(octal.as_bytes());
    block[156] = b'0';
    block[148..156].fill(b' ');
    let sum: u64 = block.iter().map(|b| u64::from(*b)).sum();
    let checksum = format!("{:06o}\0 ", sum);
    block[148..156].copy_from_slice(checksum.as_bytes());
    block
}

/// Append a header block, the content and zero padding to the next block
pub fn write_entry(out: &mut Vec<u8>, name: &str, content: &[u8]) {
    out.extend_from_slice(&tar_header(name, content.len() as u64));
    out.extend_from_slice(content);
    let padding = content.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE - content.len();
    out.extend_from_slice(&vec![0u8; padding]);
}

/// Builds container streams the decoder accepts, with knobs for the
/// malformed variants the tests need
pub struct ArtifactBuilder {
    device_type: String,
    provides: Vec<(String, String)>,
    payloads: Vec<(String, String, Vec<u8>)>,
    corrupt_signature: bool,
    corrupt_payload: bool,
}

impl ArtifactBuilder {
    pub fn new(device_type: &str) -> Self {
        Self {
            device_type: device_type.to_string(),
            provides: Vec::new(),
            payloads: Vec::new(),
            corrupt_signature: false,
            corrupt_payload: false,
        }
    }

    pub fn provide(mut self, key: &str, value: &str) -> Self {
        self.provides.push((key.to_string(), value.to_string()));
        self
    }

    pub fn payload(mut self, payload_type: &str, filename: &str, content: Vec<u8>) -> Self {
        self.payloads
            .push((payload_type.to_string(), filename.to_string(), content));
        self
    }

    /// Flip a bit in the signature entry
    pub fn corrupt_signature(mut self) -> Self {
        self.corrupt_signature = true;
        self
    }

    /// Flip a bit in the first payload byte after the manifest was signed
    pub fn corrupt_payload(mut self) -> Self {
        self.corrupt_payload = true;
        self
    }

    pub fn build(&self, signing_key: &[u8]) -> Vec<u8> {
        let version = br#"{"format":"ota","version":1}"#.to_vec();

        let provides: BTreeMap<&str, &str> = self
            .provides
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let payload_types: Vec<_> = self
            .payloads
            .iter()
            .map(|(t, _, _)| serde_json::json!({ "type": t }))
            .collect();
        let header = serde_json::json!({
            "payloads": payload_types,
            "device_type": self.device_type,
            "artifact_provides": provides,
        })
        .to_string()
        .into_bytes();

        let mut manifest = String::new();
        manifest.push_str(&format!("{}  version\n", sha256_hex(&version)));
        manifest.push_str(&format!("{}  header-info\n", sha256_hex(&header)));
        for (index, (_, filename, content)) in self.payloads.iter().enumerate() {
            manifest.push_str(&format!(
                "{}  data/{:04}/{}\n",
                sha256_hex(content),
                index,
                filename
            ));
        }
        let manifest = manifest.into_bytes();

        let mut signature = test_sign(signing_key, &manifest);
        if self.corrupt_signature {
            signature[0] ^= 0xFF;
        }

        let mut out = Vec::new();
        write_entry(&mut out, "version", &version);
        write_entry(&mut out, "manifest", &manifest);
        write_entry(&mut out, "manifest.sig", &signature);
        write_entry(&mut out, "header-info", &header);
        for (index, (_, filename, content)) in self.payloads.iter().enumerate() {
            let mut content = content.clone();
            if self.corrupt_payload && index == 0 && !content.is_empty() {
                content[0] ^= 0xFF;
            }
            write_entry(&mut out, &format!("data/{:04}/{}", index, filename), &content);
        }
        out.extend_from_slice(&[0u8; BLOCK_SIZE]);
        out.extend_from_slice(&[0u8; BLOCK_SIZE]);
        out
    }
}

/// Payload sink recording every write it receives
#[derive(Default)]
pub struct RecordingSink {
    /// One record per write call: payload type, filename, size, offset, length
    pub writes: Vec<(String, String, u64, u64, usize)>,
    pub bytes: BTreeMap<String, Vec<u8>>,
}

#[async_trait]
impl PayloadSink for RecordingSink {
    async fn write(
        &mut self,
        payload_type: &str,
        filename: &str,
        size: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<(), AgentError> {
        self.writes.push((
            payload_type.to_string(),
            filename.to_string(),
            size,
            offset,
            data.len(),
        ));
        self.bytes
            .entry(filename.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }
}

/// What a [`TestModule`] was asked to do during a deployment
#[derive(Default)]
pub struct ModuleLog {
    pub streamed: BTreeMap<String, Vec<u8>>,
    pub installed: bool,
    pub committed: bool,
    pub rebooted: bool,
    pub rolled_back: bool,
    pub cleaned_up: bool,
}

/// Update module double recording its lifecycle into a shared log
pub struct TestModule {
    pub payload_type: String,
    pub needs_restart: bool,
    pub fail_install: bool,
    pub log: Arc<Mutex<ModuleLog>>,
}

impl TestModule {
    pub fn new(payload_type: &str) -> (Self, Arc<Mutex<ModuleLog>>) {
        let log = Arc::new(Mutex::new(ModuleLog::default()));
        (
            Self {
                payload_type: payload_type.to_string(),
                needs_restart: false,
                fail_install: false,
                log: log.clone(),
            },
            log,
        )
    }
}

#[async_trait]
impl UpdateModule for TestModule {
    fn payload_type(&self) -> &str {
        &self.payload_type
    }

    fn needs_restart(&self) -> bool {
        self.needs_restart
    }

    async fn stream(
        &mut self,
        filename: &str,
        _size: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<(), AgentError> {
        let mut log = self.log.lock().unwrap();
        let file = log.streamed.entry(filename.to_string()).or_default();
        assert_eq!(offset as usize, file.len(), "writes must arrive in order");
        file.extend_from_slice(data);
        Ok(())
    }

    async fn install(&mut self) -> Result<(), AgentError> {
        if self.fail_install {
            return Err(AgentError::InstallError(
                "Install rejected by test module".to_string(),
            ));
        }
        self.log.lock().unwrap().installed = true;
        Ok(())
    }

    async fn reboot(&mut self) -> Result<(), AgentError> {
        self.log.lock().unwrap().rebooted = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), AgentError> {
        self.log.lock().unwrap().committed = true;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), AgentError> {
        self.log.lock().unwrap().rolled_back = true;
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<(), AgentError> {
        self.log.lock().unwrap().cleaned_up = true;
        Ok(())
    }
}
