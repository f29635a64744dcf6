//! Download pipeline
//!
//! Adapts transport byte-delivery events into the artifact decoder and
//! decoder outcomes back into an HTTP-level success or failure. The
//! adapter never retries: any decoder failure aborts the connection, and
//! the caller judges completion by the HTTP status code alone.

use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, error};
use url::Url;

use crate::api::client::response_error;
use crate::artifact::{min_buffer_capacity, ArtifactDecoder};
use crate::crypto::ArtifactVerifier;
use crate::errors::AgentError;
use crate::installer::PayloadSink;

/// Events delivered by the transport, in connection order
#[derive(Debug)]
pub enum TransportEvent<'a> {
    /// Connection established, response streaming begins
    Connected,
    /// A chunk of response body bytes arrived
    DataReceived(&'a [u8]),
    /// The connection finished
    Disconnected,
    /// The transport failed mid-stream
    Error,
}

/// Drives the artifact decoder from transport events.
///
/// Owns the single live decode context: created on `Connected`, dropped
/// with the handler. A failure returned from [`DownloadHandler::handle`]
/// must be interpreted by the transport as "abort the connection".
pub struct DownloadHandler {
    verifier: Arc<dyn ArtifactVerifier>,
    recv_buf_length: usize,
    decoder: Option<ArtifactDecoder>,
}

impl DownloadHandler {
    /// Create a handler sized for a transport delivering at most
    /// `recv_buf_length` bytes per event
    pub fn new(verifier: Arc<dyn ArtifactVerifier>, recv_buf_length: usize) -> Self {
        Self {
            verifier,
            recv_buf_length,
            decoder: None,
        }
    }

    /// Consume one transport event
    pub async fn handle(
        &mut self,
        event: TransportEvent<'_>,
        sink: &mut dyn PayloadSink,
    ) -> Result<(), AgentError> {
        match event {
            TransportEvent::Connected => {
                self.decoder = Some(ArtifactDecoder::new(
                    min_buffer_capacity(self.recv_buf_length),
                    self.recv_buf_length,
                    self.verifier.clone(),
                )?);
                Ok(())
            }
            TransportEvent::DataReceived(data) => {
                if data.is_empty() {
                    return Err(AgentError::MalformedInput(
                        "Invalid data received".to_string(),
                    ));
                }
                let decoder = self.decoder.as_mut().ok_or_else(|| {
                    AgentError::Internal("No active artifact decode context".to_string())
                })?;
                decoder.feed(data, sink).await
            }
            TransportEvent::Disconnected => Ok(()),
            TransportEvent::Error => Err(AgentError::ProtocolError(
                "Transport error while downloading artifact".to_string(),
            )),
        }
    }

    /// The live decode context, when one exists
    pub fn decoder(&self) -> Option<&ArtifactDecoder> {
        self.decoder.as_ref()
    }

    /// Take ownership of the decode context
    pub fn into_decoder(self) -> Option<ArtifactDecoder> {
        self.decoder
    }
}

/// Download and decode the artifact at `uri`, streaming payload bytes
/// into `sink`.
///
/// The download is unauthenticated: the URI came pre-signed from the
/// deployment descriptor. Only a 200 response is a success. On success
/// the finished decode context is returned so the caller can inspect the
/// artifact header.
pub async fn download_artifact(
    client: &reqwest::Client,
    uri: &str,
    sink: &mut dyn PayloadSink,
    verifier: Arc<dyn ArtifactVerifier>,
    recv_buf_length: usize,
) -> Result<ArtifactDecoder, AgentError> {
    let url = Url::parse(uri)
        .map_err(|e| AgentError::MalformedInput(format!("Invalid artifact URI: {}", e)))?;

    debug!("GET {}", url);
    let mut response = client.get(url).send().await?;

    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        let msg = response_error(status, (!body.is_empty()).then_some(body.as_str()));
        error!("Unable to download artifact: {}", msg);
        return Err(AgentError::ProtocolError(msg));
    }

    let mut handler = DownloadHandler::new(verifier, recv_buf_length);
    handler.handle(TransportEvent::Connected, sink).await?;

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                handler
                    .handle(TransportEvent::DataReceived(&chunk), sink)
                    .await?;
            }
            Ok(None) => {
                handler.handle(TransportEvent::Disconnected, sink).await?;
                break;
            }
            Err(e) => {
                let _ = handler.handle(TransportEvent::Error, sink).await;
                return Err(e.into());
            }
        }
    }

    let decoder = handler
        .into_decoder()
        .ok_or_else(|| AgentError::Internal("No active artifact decode context".to_string()))?;
    if !decoder.is_done() {
        return Err(AgentError::MalformedInput(
            "Artifact stream ended before decoding completed".to_string(),
        ));
    }
    Ok(decoder)
}
