// Upload ingestion: file bytes -> raw cells -> typed, schema-annotated table.
// Parsing and inference are pure; loading into DuckDB lives in `db::loader`.
pub mod csv;
pub mod excel;
pub mod inference;
pub mod schema;

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Uploaded table has no rows or columns")]
    EmptyTable,
    #[error("File too large: {0}")]
    FileTooLarge(String),
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("Parsing error: {0}")]
    Parse(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Header names plus rows of raw cells; `None` marks a missing cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    /// Pads short rows with missing cells and drops overflow cells beyond the header width
    pub fn normalize_width(&mut self) {
        let width = self.headers.len();
        for row in &mut self.rows {
            row.resize(width, None);
        }
    }
}

pub trait TableParser: Send + Sync {
    /// Parses at most `row_limit` data rows; callers pass one more than they accept
    /// so oversize inputs can be detected without reading them completely.
    fn parse(&self, bytes: &[u8], row_limit: usize) -> Result<RawTable, IngestError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Csv,
    Tsv,
    Excel,
}

pub struct IngestManager {
    csv_parser: csv::CsvParser,
    tsv_parser: csv::CsvParser,
    excel_parser: excel::ExcelParser,
    max_file_size_bytes: u64,
}

impl IngestManager {
    pub fn new(max_file_size_bytes: u64) -> Self {
        Self {
            csv_parser: csv::CsvParser::new(),
            tsv_parser: csv::CsvParser::with_delimiter(b'\t'),
            excel_parser: excel::ExcelParser::new(),
            max_file_size_bytes,
        }
    }

    /// Checks the byte size, picks a parser from the file name and parses up to `row_limit` rows.
    pub fn parse_upload(&self, bytes: &[u8], filename: &str, row_limit: usize) -> Result<RawTable, IngestError> {
        let size = bytes.len() as u64;
        if size > self.max_file_size_bytes {
            return Err(IngestError::FileTooLarge(format!(
                "{:.1}MB > {}MB",
                size as f64 / (1024.0 * 1024.0),
                self.max_file_size_bytes / (1024 * 1024)
            )));
        }
        if bytes.is_empty() {
            return Err(IngestError::EmptyTable);
        }

        let format = detect_format(bytes, filename)?;
        tracing::debug!("Parsing upload '{}' ({} bytes) as {:?}", filename, size, format);

        let mut table = match format {
            FileFormat::Csv => self.csv_parser.parse(bytes, row_limit)?,
            FileFormat::Tsv => self.tsv_parser.parse(bytes, row_limit)?,
            FileFormat::Excel => self.excel_parser.parse(bytes, row_limit)?,
        };
        table.normalize_width();
        Ok(table)
    }
}

fn detect_format(bytes: &[u8], filename: &str) -> Result<FileFormat, IngestError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    match extension.as_deref() {
        Some("csv") | Some("txt") => Ok(FileFormat::Csv),
        Some("tsv") => Ok(FileFormat::Tsv),
        Some("xlsx") | Some("xlsm") | Some("xls") | Some("ods") => Ok(FileFormat::Excel),
        // Unknown or missing extension: accept anything that decodes as text
        other => {
            if std::str::from_utf8(bytes).is_ok() {
                Ok(FileFormat::Csv)
            } else {
                Err(IngestError::UnsupportedFormat(
                    other.unwrap_or("no extension").to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_oversized_bytes_before_parsing() {
        let manager = IngestManager::new(8);
        let err = manager.parse_upload(b"a,b\n1,2\n3,4\n", "t.csv", 10).unwrap_err();
        assert!(matches!(err, IngestError::FileTooLarge(_)));
    }

    #[test]
    fn test_unknown_binary_is_unsupported() {
        let manager = IngestManager::new(1024);
        let err = manager.parse_upload(&[0xff, 0xfe, 0x00, 0x9f], "blob.bin", 10).unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat(ext) if ext == "bin"));
    }

    #[test]
    fn test_unknown_text_falls_back_to_csv() {
        let manager = IngestManager::new(1024);
        let table = manager.parse_upload(b"x,y\n1,2\n", "upload", 10).unwrap();
        assert_eq!(table.headers, vec!["x", "y"]);
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_tsv_extension_uses_tab_delimiter() {
        let manager = IngestManager::new(1024);
        let table = manager.parse_upload(b"a\tb\n1\t2\n", "t.tsv", 10).unwrap();
        assert_eq!(table.headers, vec!["a", "b"]);
        assert_eq!(table.rows[0], vec![Some("1".to_string()), Some("2".to_string())]);
    }

    #[test]
    fn test_short_rows_are_padded() {
        let manager = IngestManager::new(1024);
        let table = manager.parse_upload(b"a,b,c\n1,2\n", "t.csv", 10).unwrap();
        assert_eq!(table.rows[0].len(), 3);
        assert_eq!(table.rows[0][2], None);
    }
}
