use std::borrow::Cow;

use crate::ingest::{IngestError, RawTable, TableParser};

const SNIFF_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

pub struct CsvParser {
    /// Fixed delimiter; sniffed from the header line when unset
    delimiter: Option<u8>,
}

impl CsvParser {
    pub fn new() -> Self {
        Self { delimiter: None }
    }

    pub fn with_delimiter(delimiter: u8) -> Self {
        Self {
            delimiter: Some(delimiter),
        }
    }

    /// Decodes UTF-8 (BOM stripped), falling back to Latin-1 so that legacy exports still load.
    fn decode(bytes: &[u8]) -> Cow<'_, str> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        match std::str::from_utf8(bytes) {
            Ok(text) => Cow::Borrowed(text),
            Err(_) => {
                tracing::debug!("Upload is not valid UTF-8, decoding as Latin-1");
                Cow::Owned(bytes.iter().map(|&b| b as char).collect())
            }
        }
    }

    fn sniff_delimiter(text: &str) -> u8 {
        let header = text.lines().next().unwrap_or_default();
        SNIFF_DELIMITERS
            .iter()
            .copied()
            .max_by_key(|d| header.bytes().filter(|b| b == d).count())
            .filter(|d| header.bytes().any(|b| b == *d))
            .unwrap_or(b',')
    }
}

impl Default for CsvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TableParser for CsvParser {
    fn parse(&self, bytes: &[u8], row_limit: usize) -> Result<RawTable, IngestError> {
        let text = Self::decode(bytes);
        let delimiter = self.delimiter.unwrap_or_else(|| Self::sniff_delimiter(&text));

        let mut reader = ::csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| IngestError::Parse(e.to_string()))?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            if rows.len() >= row_limit {
                break;
            }
            let record = record.map_err(|e| IngestError::Parse(e.to_string()))?;
            let row = record
                .iter()
                .map(|cell| {
                    if cell.trim().is_empty() {
                        None
                    } else {
                        Some(cell.to_string())
                    }
                })
                .collect();
            rows.push(row);
        }

        Ok(RawTable { headers, rows })
    }
}
