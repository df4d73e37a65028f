//! Binary model artifact format.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ HEADER (128 bytes, fixed)            │
//! │  magic: [u8; 8] = b"URGMODL\0"      │
//! │  version: u32                        │
//! │  flags: u32                          │
//! │  feature_count: u64                  │
//! │  trained_rows: u64                   │
//! │  schema: [u8; 8]                     │
//! │  sha256_payload: [u8; 32]           │
//! │  (padding to 128 bytes)              │
//! ├──────────────────────────────────────┤
//! │ PAYLOAD (variable)                   │
//! │  bincode-serialized UrgencyModel     │
//! └──────────────────────────────────────┘
//! ```

use sha2::{Digest, Sha256};

use crate::features::FEATURE_COLUMNS;

/// Magic bytes identifying a mailtriage model file.
pub const MAGIC: &[u8; 8] = b"URGMODL\0";

/// Current artifact format version.
pub const VERSION: u32 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 128;

/// Serializable artifact header.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ModelHeader {
    /// Magic bytes (must equal [`MAGIC`]).
    pub magic: [u8; 8],
    /// Format version (must equal [`VERSION`]).
    pub version: u32,
    /// Reserved flags (currently unused).
    pub flags: u32,
    /// Width of the transformed feature vector.
    pub feature_count: u64,
    /// Rows the shipped model was refit on.
    pub trained_rows: u64,
    /// Fingerprint of the input column layout, see [`schema_fingerprint`].
    pub schema: [u8; 8],
    /// SHA-256 of the payload bytes.
    pub sha256_payload: [u8; 32],
}

impl ModelHeader {
    /// Validate magic and version.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.magic != *MAGIC {
            return Err("Invalid magic bytes".into());
        }
        if self.version != VERSION {
            return Err(format!(
                "Incompatible version: expected {VERSION}, found {}",
                self.version
            ));
        }
        Ok(())
    }
}

/// Leading 8 bytes of the SHA-256 of the model input column names.
pub fn schema_fingerprint() -> [u8; 8] {
    let mut hasher = Sha256::new();
    for col in FEATURE_COLUMNS {
        hasher.update(col.as_bytes());
        hasher.update([0u8]);
    }
    let digest: [u8; 32] = hasher.finalize().into();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// SHA-256 of a byte slice.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Render a fingerprint as lowercase hex for error messages.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_fits_in_fixed_size() {
        let header = ModelHeader {
            magic: *MAGIC,
            version: VERSION,
            flags: 0,
            feature_count: u64::MAX,
            trained_rows: u64::MAX,
            schema: schema_fingerprint(),
            sha256_payload: [0xff; 32],
        };
        let bytes = bincode::serialize(&header).unwrap();
        assert!(bytes.len() <= HEADER_SIZE);
    }

    #[test]
    fn test_validate_rejects_wrong_version() {
        let header = ModelHeader {
            magic: *MAGIC,
            version: VERSION + 1,
            flags: 0,
            feature_count: 0,
            trained_rows: 0,
            schema: schema_fingerprint(),
            sha256_payload: [0; 32],
        };
        assert!(header.validate().unwrap_err().contains("version"));
    }

    #[test]
    fn test_schema_fingerprint_is_stable() {
        assert_eq!(schema_fingerprint(), schema_fingerprint());
        assert_eq!(hex(&[0x0a, 0xff]), "0aff");
    }
}
