//! Unique Group Id - Communicator Rendezvous Token
//!
//! A fixed-size opaque token generated by the root and broadcast to every
//! member before handle creation. Members that hold different bytes end up
//! with unusable handles, so the token travels as raw bytes and is never
//! re-encoded.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use core::fmt;

use rand::Rng;

use crate::error::{CommError, Result};

/// Size of a unique group id in bytes.
pub const UNIQUE_ID_BYTES: usize = 128;

/// Opaque identifier of a collective communicator group.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniqueGroupId([u8; UNIQUE_ID_BYTES]);

impl UniqueGroupId {
    /// Wraps raw id bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; UNIQUE_ID_BYTES]) -> Self {
        Self(bytes)
    }

    /// Copies an id out of a slice of exactly [`UNIQUE_ID_BYTES`] bytes.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; UNIQUE_ID_BYTES] = bytes.try_into().map_err(|_| {
            CommError::invalid_group(format!(
                "unique id must be {UNIQUE_ID_BYTES} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Generates a random id.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; UNIQUE_ID_BYTES];
        rand::thread_rng().fill(&mut bytes[..]);
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; UNIQUE_ID_BYTES] {
        &self.0
    }

    /// Consumes the id, returning the raw bytes.
    #[must_use]
    pub const fn into_bytes(self) -> [u8; UNIQUE_ID_BYTES] {
        self.0
    }

    /// Returns a short hex rendering for logs.
    #[must_use]
    pub fn short_hex(&self) -> String {
        self.0[..8].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for UniqueGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UniqueGroupId({}..)", self.short_hex())
    }
}

impl fmt::Display for UniqueGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_hex())
    }
}
