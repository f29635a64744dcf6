//! Bounded working buffer for incremental decoding
//!
//! Holds the bytes between transport deliveries and logical records. The
//! buffer is created with a minimum capacity of two stream blocks plus the
//! transport receive length, which guarantees that any record spanning two
//! deliveries is representable without reallocation; it may still grow for
//! oversized metadata records.

use crate::errors::AgentError;

/// Growable byte buffer with an enforced minimum initial capacity
#[derive(Debug, Default)]
pub struct WorkBuffer {
    data: Vec<u8>,
}

impl WorkBuffer {
    /// Allocate a buffer of at least `capacity` bytes.
    ///
    /// `minimum` is the smallest capacity the decoder can operate with;
    /// asking for less is a caller error.
    pub fn new(capacity: usize, minimum: usize) -> Result<Self, AgentError> {
        if capacity < minimum {
            return Err(AgentError::BufferOverflow(format!(
                "Working buffer capacity {} is below the required minimum {}",
                capacity, minimum
            )));
        }
        Ok(Self {
            data: Vec::with_capacity(capacity),
        })
    }

    /// Append incoming bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// View of the buffered bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Drop the first `count` bytes
    pub fn consume(&mut self, count: usize) {
        self.data.drain(..count);
    }

    /// Release the backing allocation
    pub fn release(&mut self) {
        self.data = Vec::new();
    }
}
