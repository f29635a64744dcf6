//! Artifact container decoding

pub mod buffer;
pub mod decoder;
pub mod manifest;

pub use decoder::{
    min_buffer_capacity, ArtifactDecoder, DecoderState, BLOCK_SIZE, DEFAULT_RECV_BUF_LENGTH,
};
pub use manifest::{HeaderInfo, Manifest, PayloadInfo, VersionInfo};
