//! Opaque binary hardware-location identifier.
//!
//! Entity paths are produced and consumed by the firmware-facing
//! record store and the device-tree resolver. The daemon never
//! interprets the bytes; it only compares them and renders them as
//! hex for logs and snapshot files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed wire size of an entity path.
pub const ENTITY_PATH_LEN: usize = 21;

/// Opaque fixed-format hardware location identifier.
///
/// Used as the stable join key between guard records and isolation
/// entries. Immutable once assigned to a record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityPath([u8; ENTITY_PATH_LEN]);

impl EntityPath {
    pub fn new(raw: [u8; ENTITY_PATH_LEN]) -> Self {
        Self(raw)
    }

    /// Build from a byte slice, zero-padding short input.
    ///
    /// Returns `None` if the slice is longer than the wire size.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > ENTITY_PATH_LEN {
            return None;
        }
        let mut raw = [0u8; ENTITY_PATH_LEN];
        raw[..bytes.len()].copy_from_slice(bytes);
        Some(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; ENTITY_PATH_LEN] {
        &self.0
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityPath({})", self)
    }
}

impl FromStr for EntityPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| format!("invalid hex entity path: {e}"))?;
        Self::from_bytes(&bytes)
            .ok_or_else(|| format!("entity path longer than {ENTITY_PATH_LEN} bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_through_hex() {
        let mut raw = [0u8; ENTITY_PATH_LEN];
        raw[0] = 0x23;
        raw[1] = 0x01;
        raw[20] = 0xff;
        let path = EntityPath::new(raw);

        let rendered = path.to_string();
        let parsed: EntityPath = rendered.parse().unwrap();
        assert_eq!(parsed, path);
    }

    #[test]
    fn test_short_input_is_zero_padded() {
        let path = EntityPath::from_bytes(&[0x23, 0x01]).unwrap();
        assert_eq!(path.as_bytes()[0], 0x23);
        assert_eq!(path.as_bytes()[2], 0x00);
    }

    #[test]
    fn test_oversized_input_rejected() {
        let bytes = [0u8; ENTITY_PATH_LEN + 1];
        assert!(EntityPath::from_bytes(&bytes).is_none());
        assert!("00".repeat(ENTITY_PATH_LEN + 1).parse::<EntityPath>().is_err());
    }

    #[test]
    fn test_bad_hex_rejected() {
        assert!("not hex".parse::<EntityPath>().is_err());
    }
}
