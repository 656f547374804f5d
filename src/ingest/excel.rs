use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use crate::ingest::{IngestError, RawTable, TableParser};

/// Reads the first worksheet of an xlsx/xlsm/xls/ods workbook.
pub struct ExcelParser;

impl ExcelParser {
    pub fn new() -> Self {
        Self
    }

    fn cell_to_string(cell: &Data) -> Option<String> {
        match cell {
            Data::Empty | Data::Error(_) => None,
            Data::String(s) if s.trim().is_empty() => None,
            Data::String(s) => Some(s.clone()),
            Data::Int(i) => Some(i.to_string()),
            // Whole floats come back from spreadsheets for integer cells
            Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
            Data::Float(f) => Some(f.to_string()),
            Data::Bool(b) => Some(b.to_string()),
            Data::DateTime(dt) => dt.as_datetime().map(|ts| {
                if ts.time() == chrono::NaiveTime::MIN {
                    ts.format("%Y-%m-%d").to_string()
                } else {
                    ts.format("%Y-%m-%d %H:%M:%S").to_string()
                }
            }),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
        }
    }
}

impl Default for ExcelParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TableParser for ExcelParser {
    fn parse(&self, bytes: &[u8], row_limit: usize) -> Result<RawTable, IngestError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
            .map_err(|e| IngestError::Parse(format!("Could not open workbook: {}", e)))?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or(IngestError::EmptyTable)?
            .map_err(|e| IngestError::Parse(format!("Could not read first sheet: {}", e)))?;

        let mut rows_iter = range.rows();
        let headers: Vec<String> = match rows_iter.next() {
            Some(header_row) => header_row
                .iter()
                .map(|cell| Self::cell_to_string(cell).unwrap_or_default())
                .collect(),
            None => return Err(IngestError::EmptyTable),
        };

        let rows = rows_iter
            .take(row_limit)
            .map(|row| row.iter().map(Self::cell_to_string).collect())
            .collect();

        Ok(RawTable { headers, rows })
    }
}
