//! CSV row source over a normalized, plain UTF-8 file.
//!
//! Records are read as raw bytes so a single bad row becomes a
//! `RowParseError` instead of aborting the slice. After every record the
//! reader position is exposed as a `Checkpoint` for direct seeking.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{ByteRecord, Position, Reader, ReaderBuilder};

use crate::domain::row::normalize_header;
use crate::domain::{Checkpoint, RawRow, RowParseError};
use crate::ports::{RowSource, RowSourceFactory, SourceError, SourceRow};

/// Header and data row count of a CSV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvSummary {
    /// Normalized header names; empty when the file has no header line.
    pub headers: Vec<String>,
    pub rows: u64,
}

fn reader_builder() -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder.has_headers(true).flexible(true);
    builder
}

fn open_file(path: &Path) -> Result<File, SourceError> {
    File::open(path).map_err(|source| SourceError::Open {
        path: path.to_path_buf(),
        source,
    })
}

fn read_headers(reader: &mut Reader<File>, path: &Path) -> Result<Vec<String>, SourceError> {
    let headers = reader.byte_headers().map_err(|source| SourceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(headers
        .iter()
        .map(|h| normalize_header(&String::from_utf8_lossy(h)))
        .collect())
}

/// Read the header and count data rows.
pub fn summarize(path: &Path) -> Result<CsvSummary, SourceError> {
    let mut reader = reader_builder().from_reader(open_file(path)?);
    let headers = read_headers(&mut reader, path)?;
    let mut record = ByteRecord::new();
    let mut rows = 0u64;
    while reader
        .read_byte_record(&mut record)
        .map_err(|source| SourceError::Read {
            path: path.to_path_buf(),
            source,
        })?
    {
        rows += 1;
    }
    Ok(CsvSummary { headers, rows })
}

/// Resumable reader over one normalized CSV file.
pub struct CsvRowSource {
    path: PathBuf,
    reader: Reader<File>,
    headers: Vec<String>,
    /// Position right after the header line.
    data_start: Position,
    /// Data rows consumed so far.
    consumed: u64,
}

impl CsvRowSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let mut reader = reader_builder().from_reader(open_file(path)?);
        let headers = read_headers(&mut reader, path)?;
        let data_start = reader.position().clone();
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            headers,
            data_start,
            consumed: 0,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn read_error(&self, source: csv::Error) -> SourceError {
        SourceError::Read {
            path: self.path.clone(),
            source,
        }
    }

    fn seek_to(&mut self, pos: Position, consumed: u64) -> Result<(), SourceError> {
        self.reader.seek(pos).map_err(|e| self.read_error(e))?;
        self.consumed = consumed;
        Ok(())
    }

    fn decode(&self, row: u64, record: &ByteRecord) -> Result<RawRow, RowParseError> {
        if record.len() != self.headers.len() {
            return Err(RowParseError::FieldCount {
                row,
                expected: self.headers.len(),
                found: record.len(),
            });
        }
        let mut fields = HashMap::with_capacity(record.len());
        for (name, raw) in self.headers.iter().zip(record.iter()) {
            let value = std::str::from_utf8(raw).map_err(|_| RowParseError::Encoding { row })?;
            fields.insert(name.clone(), value.to_string());
        }
        Ok(RawRow::new(row, fields))
    }

    fn checkpoint(&self) -> Checkpoint {
        let pos = self.reader.position();
        Checkpoint {
            byte: pos.byte(),
            line: pos.line(),
            record: self.consumed,
        }
    }
}

impl RowSource for CsvRowSource {
    fn seek(&mut self, cursor: u64, checkpoint: Option<Checkpoint>) -> Result<(), SourceError> {
        if cursor == self.consumed {
            return Ok(());
        }

        match checkpoint {
            Some(cp) if cp.record == cursor => {
                let mut pos = Position::new();
                // header line counts as a csv record
                pos.set_byte(cp.byte).set_line(cp.line).set_record(cp.record + 1);
                return self.seek_to(pos, cursor);
            }
            _ => {}
        }

        if cursor < self.consumed {
            let start = self.data_start.clone();
            self.seek_to(start, 0)?;
        }

        let mut record = ByteRecord::new();
        while self.consumed < cursor {
            let more = self
                .reader
                .read_byte_record(&mut record)
                .map_err(|e| self.read_error(e))?;
            if !more {
                break;
            }
            self.consumed += 1;
        }
        Ok(())
    }

    fn read_next(&mut self, n: usize) -> Result<Vec<SourceRow>, SourceError> {
        let mut rows = Vec::with_capacity(n);
        let mut record = ByteRecord::new();
        while rows.len() < n {
            let more = self
                .reader
                .read_byte_record(&mut record)
                .map_err(|e| self.read_error(e))?;
            if !more {
                break;
            }
            self.consumed += 1;
            let row = self.decode(self.consumed, &record);
            rows.push(SourceRow {
                end: self.checkpoint(),
                row,
            });
        }
        Ok(rows)
    }
}

/// Opens `CsvRowSource`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvSourceFactory;

impl RowSourceFactory for CsvSourceFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn RowSource>, SourceError> {
        Ok(Box::new(CsvRowSource::open(path)?))
    }
}
