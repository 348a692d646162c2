//! Handoff descriptor carried in the `LISTENER` environment variable.

use serde::{Deserialize, Serialize};
use std::os::unix::io::RawFd;
use thiserror::Error;

/// Environment key holding the serialized descriptor.
pub const LISTENER_ENV: &str = "LISTENER";

/// Inherited fd slot of the listener in the child: right after stdin, stdout
/// and stderr.
pub const LISTENER_SLOT: RawFd = 3;

/// Describes a listening socket passed from a parent to a child process.
///
/// Created right before a spawn, consumed once by the child at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffDescriptor {
    /// Bind address the listener was created for. Used as the identity key.
    #[serde(rename = "addr")]
    pub address: String,
    /// Fd slot the listener occupies in the child.
    #[serde(rename = "fd")]
    pub slot: RawFd,
    /// Human-readable socket name, for diagnostics only.
    #[serde(rename = "filename")]
    pub debug_name: String,
}

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("malformed handoff descriptor: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("handoff descriptor names reserved fd slot {0}")]
    ReservedSlot(RawFd),
}

impl HandoffDescriptor {
    /// Descriptor for a listener that will sit in [`LISTENER_SLOT`].
    pub fn new(address: impl Into<String>, debug_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            slot: LISTENER_SLOT,
            debug_name: debug_name.into(),
        }
    }

    /// Serialize for the environment channel.
    pub fn encode(&self) -> Result<String, DescriptorError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the environment value. Slots 0..=2 belong to the standard
    /// streams and are rejected.
    pub fn decode(raw: &str) -> Result<Self, DescriptorError> {
        let descriptor: Self = serde_json::from_str(raw)?;
        if descriptor.slot < LISTENER_SLOT {
            return Err(DescriptorError::ReservedSlot(descriptor.slot));
        }
        Ok(descriptor)
    }

    /// Whether this descriptor was produced for `address`.
    pub fn matches(&self, address: &str) -> bool {
        self.address == address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let descriptor = HandoffDescriptor::new("127.0.0.1:9000", "tcp:127.0.0.1:9000");
        let raw = descriptor.encode().unwrap();
        assert_eq!(
            raw,
            r#"{"addr":"127.0.0.1:9000","fd":3,"filename":"tcp:127.0.0.1:9000"}"#
        );
        assert_eq!(HandoffDescriptor::decode(&raw).unwrap(), descriptor);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            HandoffDescriptor::decode("not json"),
            Err(DescriptorError::Malformed(_))
        ));
        assert!(matches!(
            HandoffDescriptor::decode(r#"{"addr":"x"}"#),
            Err(DescriptorError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_stdio_slots() {
        let raw = r#"{"addr":"127.0.0.1:9000","fd":1,"filename":"x"}"#;
        assert!(matches!(
            HandoffDescriptor::decode(raw),
            Err(DescriptorError::ReservedSlot(1))
        ));
    }

    #[test]
    fn test_matches_exact_address() {
        let descriptor = HandoffDescriptor::new("127.0.0.1:9000", "");
        assert!(descriptor.matches("127.0.0.1:9000"));
        assert!(!descriptor.matches("127.0.0.1:9001"));
        assert!(!descriptor.matches("localhost:9000"));
    }
}
