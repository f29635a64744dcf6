//! Incremental artifact decoder
//!
//! Consumes the downloaded container byte stream in whatever chunk sizes
//! the transport delivers, reconstructs the logical records from a working
//! buffer, and forwards payload bytes to the installer sink. Decoding
//! never assumes a chunk boundary aligns with a record boundary: `feed`
//! consumes every complete record available and leaves the remainder
//! buffered for the next call.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::artifact::buffer::WorkBuffer;
use crate::artifact::manifest::{HeaderInfo, Manifest, VersionInfo};
use crate::crypto::ArtifactVerifier;
use crate::errors::AgentError;
use crate::installer::PayloadSink;
use crate::keyvalue::KeyValueList;

/// Size of one container stream block
pub const BLOCK_SIZE: usize = 512;

/// Default transport receive buffer length used to size the decoder
pub const DEFAULT_RECV_BUF_LENGTH: usize = 4096;

/// Smallest working-buffer capacity able to hold any record spanning two
/// transport deliveries
pub fn min_buffer_capacity(recv_buf_length: usize) -> usize {
    2 * BLOCK_SIZE + recv_buf_length
}

/// Decoder states, advanced strictly in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Awaiting the `version` entry
    Version,
    /// Awaiting the `manifest` entry
    Manifest,
    /// Awaiting the `manifest.sig` entry
    Signature,
    /// Awaiting the `header-info` entry
    Header,
    /// Consuming `data/<n>/<file>` entries
    Data,
    /// Archive fully consumed
    Done,
    /// Decode aborted, context unusable
    Error,
}

struct PayloadTarget {
    payload_type: String,
    filename: String,
}

struct ActiveEntry {
    name: String,
    size: u64,
    written: u64,
    padding: usize,
    digest: Sha256,
    digest_checked: bool,
    payload: Option<PayloadTarget>,
}

/// Decode context for one artifact download.
///
/// Exactly one context lives per connection; the download pipeline creates
/// it on connect and drops it on completion or error.
pub struct ArtifactDecoder {
    state: DecoderState,
    buffer: WorkBuffer,
    entry: Option<ActiveEntry>,
    verifier: Arc<dyn ArtifactVerifier>,
    manifest: Option<Manifest>,
    version_digest: Option<String>,
    header: Option<HeaderInfo>,
    bytes_consumed: u64,
}

impl std::fmt::Debug for ArtifactDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactDecoder")
            .field("state", &self.state)
            .field("bytes_consumed", &self.bytes_consumed)
            .finish_non_exhaustive()
    }
}

impl ArtifactDecoder {
    /// Create a decode context with a working buffer of `capacity` bytes.
    ///
    /// `capacity` must be at least [`min_buffer_capacity`] of
    /// `recv_buf_length`, the largest delivery the transport feeds in one
    /// call; less is a `BufferOverflow` error.
    pub fn new(
        capacity: usize,
        recv_buf_length: usize,
        verifier: Arc<dyn ArtifactVerifier>,
    ) -> Result<Self, AgentError> {
        let buffer = WorkBuffer::new(capacity, min_buffer_capacity(recv_buf_length))?;
        Ok(Self {
            state: DecoderState::Version,
            buffer,
            entry: None,
            verifier,
            manifest: None,
            version_digest: None,
            header: None,
            bytes_consumed: 0,
        })
    }

    /// Current decoder state
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// True once the whole artifact has been consumed and verified
    pub fn is_done(&self) -> bool {
        self.state == DecoderState::Done
    }

    /// Total bytes consumed so far
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    /// Device type declared by the artifact header, once parsed
    pub fn device_type(&self) -> Option<&str> {
        self.header.as_ref().map(|h| h.device_type.as_str())
    }

    /// Payload types declared by the artifact header, once parsed
    pub fn payload_types(&self) -> Vec<&str> {
        self.header
            .as_ref()
            .map(|h| h.payloads.iter().map(|p| p.payload_type.as_str()).collect())
            .unwrap_or_default()
    }

    /// Take the provides metadata declared by the artifact header
    pub fn take_provides(&mut self) -> KeyValueList {
        let mut list = KeyValueList::new();
        if let Some(header) = self.header.as_mut() {
            for (key, value) in std::mem::take(&mut header.artifact_provides) {
                list.push(key, value);
            }
        }
        list
    }

    /// Feed a chunk of downloaded bytes into the decoder.
    ///
    /// Consumes as many complete records as `data` completes, forwarding
    /// payload bytes to `sink`. Any failure is terminal: the context
    /// enters the error state and further calls fail immediately.
    pub async fn feed(
        &mut self,
        data: &[u8],
        sink: &mut dyn PayloadSink,
    ) -> Result<(), AgentError> {
        match self.state {
            DecoderState::Error => {
                return Err(AgentError::Internal(
                    "Artifact decode context already failed".to_string(),
                ));
            }
            // Trailing archive padding after the end marker is ignored
            DecoderState::Done => return Ok(()),
            _ => {}
        }

        self.buffer.extend(data);
        if let Err(e) = self.drain(sink).await {
            self.state = DecoderState::Error;
            self.buffer.release();
            return Err(e);
        }
        Ok(())
    }

    async fn drain(&mut self, sink: &mut dyn PayloadSink) -> Result<(), AgentError> {
        loop {
            if self.state == DecoderState::Done {
                self.buffer.release();
                return Ok(());
            }

            if self.entry.is_none() {
                if self.buffer.len() < BLOCK_SIZE {
                    return Ok(());
                }
                let header = parse_block_header(&self.buffer.as_slice()[..BLOCK_SIZE])?;
                self.buffer.consume(BLOCK_SIZE);
                self.bytes_consumed += BLOCK_SIZE as u64;
                match header {
                    None => {
                        // End marker: only valid once every section was seen
                        if self.state != DecoderState::Data {
                            return Err(AgentError::MalformedInput(
                                "Artifact ended before all sections were decoded".to_string(),
                            ));
                        }
                        debug!("Artifact decoded, {} bytes consumed", self.bytes_consumed);
                        self.state = DecoderState::Done;
                    }
                    Some((name, size)) => self.begin_entry(name, size)?,
                }
                continue;
            }

            let is_payload = self
                .entry
                .as_ref()
                .is_some_and(|e| e.payload.is_some());
            let complete = if is_payload {
                self.drain_payload(sink).await?
            } else {
                self.drain_meta()?
            };
            if !complete {
                return Ok(());
            }
        }
    }

    /// Validate the entry name against the current state and open the entry
    fn begin_entry(&mut self, name: String, size: u64) -> Result<(), AgentError> {
        let expect = |expected: &str, name: &str| -> Result<(), AgentError> {
            if name != expected {
                return Err(AgentError::MalformedInput(format!(
                    "Expected '{}' entry, found '{}'",
                    expected, name
                )));
            }
            Ok(())
        };

        let mut payload = None;
        match self.state {
            DecoderState::Version => expect("version", &name)?,
            DecoderState::Manifest => expect("manifest", &name)?,
            DecoderState::Signature => expect("manifest.sig", &name)?,
            DecoderState::Header => expect("header-info", &name)?,
            DecoderState::Data => {
                payload = Some(self.resolve_payload(&name)?);
            }
            DecoderState::Done | DecoderState::Error => {
                return Err(AgentError::Internal(
                    "Entry started in a terminal decoder state".to_string(),
                ));
            }
        }

        debug!("Decoding entry '{}' ({} bytes)", name, size);
        let padded = size.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64;
        self.entry = Some(ActiveEntry {
            name,
            size,
            written: 0,
            padding: (padded - size) as usize,
            digest: Sha256::new(),
            digest_checked: false,
            payload,
        });
        Ok(())
    }

    fn resolve_payload(&self, name: &str) -> Result<PayloadTarget, AgentError> {
        let rest = name.strip_prefix("data/").ok_or_else(|| {
            AgentError::MalformedInput(format!("Expected data entry, found '{}'", name))
        })?;
        let (index, filename) = rest.split_once('/').ok_or_else(|| {
            AgentError::MalformedInput(format!("Malformed data entry name '{}'", name))
        })?;
        let index: usize = index.parse().map_err(|_| {
            AgentError::MalformedInput(format!("Malformed data entry index in '{}'", name))
        })?;
        if filename.is_empty() {
            return Err(AgentError::MalformedInput(format!(
                "Data entry '{}' lacks a file name",
                name
            )));
        }
        // Bare file names only; installers join these under their own
        // directories, so a separator or parent reference would escape them.
        if filename.contains(['/', '\\']) || filename == "." || filename == ".." {
            return Err(AgentError::MalformedInput(format!(
                "Data entry '{}' names a file outside its payload directory",
                name
            )));
        }

        let header = self
            .header
            .as_ref()
            .expect("header-info parsed before data section");
        let info = header.payloads.get(index).ok_or_else(|| {
            AgentError::MalformedInput(format!(
                "Data entry '{}' references an undeclared payload",
                name
            ))
        })?;

        let manifest = self.manifest.as_ref().expect("manifest parsed before data");
        if manifest.expected(name).is_none() {
            return Err(AgentError::MalformedInput(format!(
                "Data entry '{}' is not listed in the manifest",
                name
            )));
        }

        Ok(PayloadTarget {
            payload_type: info.payload_type.clone(),
            filename: filename.to_string(),
        })
    }

    /// Consume a metadata entry once fully buffered.
    ///
    /// Returns false when more bytes are needed.
    fn drain_meta(&mut self) -> Result<bool, AgentError> {
        let (size, padding) = {
            let entry = self.entry.as_ref().expect("active entry");
            (entry.size as usize, entry.padding)
        };
        if self.buffer.len() < size + padding {
            return Ok(false);
        }

        let content = self.buffer.as_slice()[..size].to_vec();
        self.buffer.consume(size + padding);
        self.bytes_consumed += (size + padding) as u64;
        self.entry = None;
        self.process_meta(&content)
    }

    fn process_meta(&mut self, content: &[u8]) -> Result<bool, AgentError> {
        match self.state {
            DecoderState::Version => {
                VersionInfo::parse(content)?;
                self.version_digest = Some(sha256_hex(content));
                self.state = DecoderState::Manifest;
            }
            DecoderState::Manifest => {
                self.manifest = Some(Manifest::parse(content)?);
                self.state = DecoderState::Signature;
            }
            DecoderState::Signature => {
                let manifest = self.manifest.as_ref().expect("manifest parsed");
                // Authenticity first: no digest in the manifest is trusted
                // until the signature over its bytes checks out.
                self.verifier.verify(manifest.raw(), content)?;
                if let Some(expected) = manifest.expected("version") {
                    if self.version_digest.as_deref() != Some(expected) {
                        return Err(AgentError::ChecksumMismatch {
                            entry: "version".to_string(),
                        });
                    }
                }
                self.state = DecoderState::Header;
            }
            DecoderState::Header => {
                let manifest = self.manifest.as_ref().expect("manifest parsed");
                let expected = manifest.expected("header-info").ok_or_else(|| {
                    AgentError::MalformedInput(
                        "header-info is not listed in the manifest".to_string(),
                    )
                })?;
                if sha256_hex(content) != expected {
                    return Err(AgentError::ChecksumMismatch {
                        entry: "header-info".to_string(),
                    });
                }
                self.header = Some(HeaderInfo::parse(content)?);
                self.state = DecoderState::Data;
            }
            _ => {
                return Err(AgentError::Internal(
                    "Metadata entry in a non-metadata decoder state".to_string(),
                ));
            }
        }
        Ok(true)
    }

    /// Stream available payload bytes to the sink.
    ///
    /// Returns false when more bytes are needed to finish the entry.
    async fn drain_payload(&mut self, sink: &mut dyn PayloadSink) -> Result<bool, AgentError> {
        let Self {
            ref mut buffer,
            ref mut entry,
            ref mut bytes_consumed,
            ref manifest,
            ..
        } = *self;
        let entry = entry.as_mut().expect("active entry");

        while entry.written < entry.size {
            if buffer.is_empty() {
                return Ok(false);
            }
            let remaining = entry.size - entry.written;
            let take = (buffer.len() as u64).min(remaining) as usize;
            let target = entry.payload.as_ref().expect("payload entry");
            let chunk = &buffer.as_slice()[..take];
            entry.digest.update(chunk);
            sink.write(
                &target.payload_type,
                &target.filename,
                entry.size,
                entry.written,
                chunk,
            )
            .await?;
            buffer.consume(take);
            *bytes_consumed += take as u64;
            entry.written += take as u64;
        }

        if !entry.digest_checked {
            let digest = to_hex(&entry.digest.clone().finalize());
            let manifest = manifest.as_ref().expect("manifest parsed before data");
            let expected = manifest
                .expected(&entry.name)
                .expect("listing checked at entry start");
            if digest != expected {
                return Err(AgentError::ChecksumMismatch {
                    entry: entry.name.clone(),
                });
            }
            entry.digest_checked = true;
        }

        while entry.padding > 0 {
            if buffer.is_empty() {
                return Ok(false);
            }
            let take = buffer.len().min(entry.padding);
            buffer.consume(take);
            *bytes_consumed += take as u64;
            entry.padding -= take;
        }

        self.entry = None;
        Ok(true)
    }
}

/// Compute the lowercase hex SHA-256 of `data`
pub(crate) fn sha256_hex(data: &[u8]) -> String {
    to_hex(&Sha256::digest(data))
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parse one 512-byte record header.
///
/// Returns `None` for the all-zero end-of-archive marker.
fn parse_block_header(block: &[u8]) -> Result<Option<(String, u64)>, AgentError> {
    if block.iter().all(|b| *b == 0) {
        return Ok(None);
    }

    // Header checksum is computed with the checksum field itself blanked
    let stored = parse_octal(&block[148..156])?;
    let mut sum: u64 = 0;
    for (index, byte) in block.iter().enumerate() {
        sum += if (148..156).contains(&index) {
            u64::from(b' ')
        } else {
            u64::from(*byte)
        };
    }
    if sum != stored {
        return Err(AgentError::MalformedInput(
            "Record header checksum mismatch".to_string(),
        ));
    }

    let name_len = block[..100].iter().position(|b| *b == 0).unwrap_or(100);
    let name = std::str::from_utf8(&block[..name_len])
        .map_err(|_| AgentError::MalformedInput("Record name is not valid UTF-8".to_string()))?;
    if name.is_empty() {
        return Err(AgentError::MalformedInput(
            "Record header lacks a name".to_string(),
        ));
    }

    let type_flag = block[156];
    if type_flag != b'0' && type_flag != 0 {
        return Err(AgentError::MalformedInput(format!(
            "Unsupported record type '{}'",
            type_flag as char
        )));
    }

    let size = parse_octal(&block[124..136])?;
    Ok(Some((name.to_string(), size)))
}

fn parse_octal(field: &[u8]) -> Result<u64, AgentError> {
    let mut value: u64 = 0;
    let mut seen = false;
    for &byte in field {
        match byte {
            b'0'..=b'7' => {
                value = value * 8 + u64::from(byte - b'0');
                seen = true;
            }
            b' ' | 0 => {
                if seen {
                    break;
                }
            }
            _ => {
                return Err(AgentError::MalformedInput(
                    "Malformed octal field in record header".to_string(),
                ));
            }
        }
    }
    Ok(value)
}
