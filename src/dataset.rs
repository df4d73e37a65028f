//! Dataset builder and the pipe-delimited dataset file.
//!
//! Output is UTF-8 with BOM, `|`-delimited, one header row. Cleaned text
//! never contains the delimiter, so no field ever needs quoting in practice;
//! the `csv` writer still quotes a field if a caller pushes raw text.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use tracing::info;

use crate::error::{Result, TriageError};
use crate::model::record::{MailRecord, COLUMNS};

/// Field delimiter of the dataset file.
pub const DELIMITER: u8 = b'|';

/// UTF-8 byte order mark.
const BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Owns extracted records until they are written out.
#[derive(Debug, Default)]
pub struct DatasetBuilder {
    records: Vec<MailRecord>,
}

impl DatasetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: MailRecord) {
        self.records.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = MailRecord>) {
        self.records.extend(records);
    }

    /// Total records held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[MailRecord] {
        &self.records
    }

    /// Write all records to `path` and return how many were written.
    pub fn write(&self, path: &Path) -> Result<usize> {
        write_records(&self.records, path)?;
        info!(path = %path.display(), records = self.records.len(), "Dataset written");
        Ok(self.records.len())
    }
}

/// Write records with header to `path`, replacing any existing file.
pub fn write_records(records: &[MailRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| TriageError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| TriageError::io(path, e))?;
    let mut out = BufWriter::new(file);
    out.write_all(&BOM).map_err(|e| TriageError::io(path, e))?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .from_writer(out);
    writer
        .write_record(COLUMNS)
        .map_err(|e| csv_to_io(path, e))?;
    for record in records {
        writer.serialize(record).map_err(|e| csv_to_io(path, e))?;
    }
    writer.flush().map_err(|e| TriageError::io(path, e))?;
    Ok(())
}

/// Read the raw bytes of a dataset file with the BOM removed.
pub(crate) fn read_dataset_bytes(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path).map_err(|e| TriageError::DatasetLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .map_err(|e| TriageError::io(path, e))?;
    if data.starts_with(&BOM) {
        data.drain(..BOM.len());
    }
    Ok(data)
}

/// Dataset reader over BOM-stripped bytes.
pub(crate) fn reader(data: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(true)
        .from_reader(data)
}

/// Read a dataset back into records. Every field must be present and valid.
pub fn read_records(path: &Path) -> Result<Vec<MailRecord>> {
    let data = read_dataset_bytes(path)?;
    let mut rdr = reader(&data);
    check_header(&mut rdr, path)?;
    rdr.deserialize()
        .map(|row| {
            row.map_err(|e| TriageError::DatasetLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Fail unless the header holds every dataset column.
pub(crate) fn check_header(rdr: &mut csv::Reader<&[u8]>, path: &Path) -> Result<()> {
    let headers = rdr.headers().map_err(|e| TriageError::DatasetLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let missing: Vec<&str> = COLUMNS
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h == *col))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(TriageError::DatasetLoad {
            path: path.to_path_buf(),
            reason: format!("missing columns: {}", missing.join(", ")),
        })
    }
}

fn csv_to_io(path: &Path, e: csv::Error) -> TriageError {
    TriageError::io(path, std::io::Error::other(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mail::ReadState;
    use crate::model::record::{Label, ObservedAction};

    fn record(subject: &str, label: Label) -> MailRecord {
        MailRecord {
            sender_id: "josé@correo.example".into(),
            sender_domain: "correo.example".into(),
            display_name: "José Núñez".into(),
            subject: subject.into(),
            body_snippet: "Cuerpo del mensaje, con acentos: áéíóú".into(),
            is_primary_recipient: true,
            is_copied_recipient: false,
            recipient_count: 3,
            origin_folder: "Bandeja de entrada".into(),
            read_state: ReadState::Unread,
            observed_action: ObservedAction::None,
            label,
        }
    }

    #[test]
    fn test_header_and_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        write_records(&[record("Hola", Label::Informational)], &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(&BOM));
        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Remitente_ID|Dominio|Nombre_Mostrar|Asunto|Cuerpo_Snippet|Estoy_En_To|Estoy_En_CC|Total_Destinatarios|Carpeta_Origen|Estado_Lectura|Accion_Detectada|TARGET_IA"
        );
        assert_eq!(
            lines.next().unwrap(),
            "josé@correo.example|correo.example|José Núñez|Hola|Cuerpo del mensaje, con acentos: áéíóú|1|0|3|Bandeja de entrada|No Leído|Ninguna|1"
        );
    }

    #[test]
    fn test_roundtrip_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.csv");
        let mut builder = DatasetBuilder::new();
        builder.push(record("Primero", Label::Ignored));
        builder.push(record("", Label::Actioned));
        builder.push(record("Tercero", Label::Informational));
        assert_eq!(builder.write(&path).unwrap(), 3);

        let back = read_records(&path).unwrap();
        assert_eq!(back, builder.records());
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let err = read_records(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, TriageError::DatasetLoad { .. }));
    }

    #[test]
    fn test_missing_column_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "Asunto|Dominio\nhola|x.example\n").unwrap();
        let err = read_records(&path).unwrap_err();
        assert!(err.to_string().contains("missing columns"));
    }
}
