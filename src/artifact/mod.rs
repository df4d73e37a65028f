//! Saving and loading the trained model.
//!
//! The artifact is self-contained: a fixed header followed by the
//! bincode-encoded [`UrgencyModel`]. Loading checks magic, version, payload
//! checksum and the input column fingerprint before anything is scored.

pub mod format;

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{Result, TriageError};
use crate::train::UrgencyModel;

use self::format::{hex, schema_fingerprint, sha256, ModelHeader, HEADER_SIZE, MAGIC, VERSION};

/// Serialize `model` to `path`, returning the number of bytes written.
pub fn save_model(model: &UrgencyModel, path: &Path) -> Result<u64> {
    let invalid = |reason: String| TriageError::InvalidModel {
        path: path.to_path_buf(),
        reason,
    };

    let payload =
        bincode::serialize(model).map_err(|e| invalid(format!("Payload serialization failed: {e}")))?;

    let header = ModelHeader {
        magic: *MAGIC,
        version: VERSION,
        flags: 0,
        feature_count: model.width() as u64,
        trained_rows: model.trained_rows() as u64,
        schema: schema_fingerprint(),
        sha256_payload: sha256(&payload),
    };
    let header_bytes =
        bincode::serialize(&header).map_err(|e| invalid(format!("Header serialization failed: {e}")))?;

    // Pad header to HEADER_SIZE
    let mut padded_header = vec![0u8; HEADER_SIZE];
    let copy_len = header_bytes.len().min(HEADER_SIZE);
    padded_header[..copy_len].copy_from_slice(&header_bytes[..copy_len]);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| TriageError::io(parent, e))?;
    }
    let mut file = File::create(path).map_err(|e| TriageError::io(path, e))?;
    file.write_all(&padded_header)
        .map_err(|e| TriageError::io(path, e))?;
    file.write_all(&payload).map_err(|e| TriageError::io(path, e))?;
    file.flush().map_err(|e| TriageError::io(path, e))?;

    let written = (HEADER_SIZE + payload.len()) as u64;
    info!(path = %path.display(), bytes = written, "Model written");
    Ok(written)
}

/// Load and validate a model artifact.
pub fn load_model(path: &Path) -> Result<UrgencyModel> {
    if !path.exists() {
        return Err(TriageError::ModelNotFound(path.to_path_buf()));
    }
    let data = std::fs::read(path).map_err(|e| TriageError::io(path, e))?;
    let invalid = |reason: String| TriageError::InvalidModel {
        path: path.to_path_buf(),
        reason,
    };

    if data.len() < HEADER_SIZE {
        return Err(invalid(format!("File too small ({} bytes)", data.len())));
    }

    let header: ModelHeader = bincode::deserialize(&data[..HEADER_SIZE])
        .map_err(|e| invalid(format!("Header deserialization failed: {e}")))?;
    header.validate().map_err(invalid)?;

    let current = schema_fingerprint();
    if header.schema != current {
        return Err(TriageError::SchemaMismatch {
            expected: hex(&header.schema),
            found: hex(&current),
        });
    }

    let payload = &data[HEADER_SIZE..];
    if sha256(payload) != header.sha256_payload {
        return Err(invalid("Payload checksum mismatch".into()));
    }

    let model: UrgencyModel = bincode::deserialize(payload)
        .map_err(|e| invalid(format!("Payload deserialization failed: {e}")))?;

    if model.width() as u64 != header.feature_count {
        return Err(invalid(format!(
            "Feature count mismatch: header says {}, model has {}",
            header.feature_count,
            model.width()
        )));
    }

    debug!(
        path = %path.display(),
        features = header.feature_count,
        trained_rows = header.trained_rows,
        "Model loaded"
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;
    use crate::features::FeatureRow;
    use crate::train::{train, Example};

    fn examples() -> Vec<Example> {
        (0..24)
            .map(|i| {
                let urgent = i % 3 == 0;
                Example {
                    features: FeatureRow {
                        subject: if urgent {
                            "urgent approve budget".into()
                        } else {
                            "weekly newsletter".into()
                        },
                        sender_domain: if urgent { "boss.example" } else { "news.example" }.into(),
                        is_primary_recipient: urgent,
                        is_copied_recipient: !urgent,
                        recipient_count: if urgent { 1 } else { 40 },
                    },
                    target: u8::from(urgent),
                }
            })
            .collect()
    }

    fn trained() -> UrgencyModel {
        let cfg = TrainingConfig {
            iterations: 30,
            ..TrainingConfig::default()
        };
        train(&examples(), &cfg).unwrap().model
    }

    #[test]
    fn test_save_then_load_scores_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("urgency.bin");
        let model = trained();
        let written = save_model(&model, &path).unwrap();
        assert_eq!(written, std::fs::metadata(&path).unwrap().len());

        let loaded = load_model(&path).unwrap();
        assert_eq!(loaded.width(), model.width());
        for ex in examples() {
            assert_eq!(
                loaded.predict_proba(&ex.features),
                model.predict_proba(&ex.features)
            );
        }
    }

    #[test]
    fn test_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_model(&dir.path().join("nope.bin")).unwrap_err();
        assert!(matches!(err, TriageError::ModelNotFound(_)));
    }

    #[test]
    fn test_corrupt_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");
        save_model(&trained(), &path).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();
        let err = load_model(&path).unwrap_err();
        assert!(matches!(err, TriageError::InvalidModel { .. }));
    }

    #[test]
    fn test_truncated_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let short = dir.path().join("short.bin");
        std::fs::write(&short, b"URGMODL").unwrap();
        assert!(matches!(
            load_model(&short).unwrap_err(),
            TriageError::InvalidModel { .. }
        ));

        let foreign = dir.path().join("foreign.bin");
        std::fs::write(&foreign, vec![0u8; 512]).unwrap();
        assert!(matches!(
            load_model(&foreign).unwrap_err(),
            TriageError::InvalidModel { .. }
        ));
    }

    #[test]
    fn test_schema_mismatch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");
        save_model(&trained(), &path).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        // schema starts after magic(8) + version(4) + flags(4) + two u64 counts
        bytes[32] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            load_model(&path).unwrap_err(),
            TriageError::SchemaMismatch { .. }
        ));
    }
}
