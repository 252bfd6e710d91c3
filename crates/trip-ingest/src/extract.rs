//! Field extraction from delimited trip feeds
//!
//! Wraps a [`csv::Reader`] and yields one [`RawRecord`] per source row without
//! loading the file into memory. Rows are not interpreted here; the header row
//! becomes a [`HeaderMap`] shared by every record of the file.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, warn};

use crate::error::ExtractError;

/// Column name to field index for one source file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    columns: HashMap<String, usize>,
}

impl HeaderMap {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut columns = HashMap::new();
        for (idx, name) in names.into_iter().enumerate() {
            // First occurrence wins for repeated header names
            columns.entry(name.as_ref().trim().to_string()).or_insert(idx);
        }
        Self { columns }
    }

    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.get(column).copied()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// One source row as ordered string fields
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// 1-based line number in the source, for diagnostics
    pub line: u64,
    pub fields: Vec<String>,
    headers: Arc<HeaderMap>,
}

impl RawRecord {
    pub fn new(line: u64, fields: Vec<String>, headers: Arc<HeaderMap>) -> Self {
        Self {
            line,
            fields,
            headers,
        }
    }

    /// Field value for a named column, `None` if the column is unknown or
    /// the row is too short
    pub fn get(&self, column: &str) -> Option<&str> {
        self.headers
            .index_of(column)
            .and_then(|idx| self.fields.get(idx))
            .map(String::as_str)
    }
}

/// Lazy reader over a delimited trip feed
pub struct FieldExtractor<R: Read> {
    reader: csv::Reader<R>,
    headers: Arc<HeaderMap>,
    buffer: StringRecord,
    finished: bool,
}

impl FieldExtractor<File> {
    /// Open a CSV file and read its header row
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ExtractError> {
        let path = path.as_ref();
        let reader = builder()
            .from_path(path)
            .map_err(|source| ExtractError::SourceUnavailable {
                path: path.to_path_buf(),
                source,
            })?;

        Self::with_reader(reader).map_err(|e| match e {
            ExtractError::Read(source) => ExtractError::SourceUnavailable {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }
}

impl<R: Read> FieldExtractor<R> {
    /// Build an extractor over any byte source (stdin, in-memory buffers)
    pub fn from_reader(rdr: R) -> Result<Self, ExtractError> {
        Self::with_reader(builder().from_reader(rdr))
    }

    fn with_reader(mut reader: csv::Reader<R>) -> Result<Self, ExtractError> {
        let headers = HeaderMap::from_names(reader.headers()?.iter());
        if headers.is_empty() {
            warn!("Source has no header row; no field can be resolved");
        } else {
            debug!(columns = headers.len(), "Read source header");
        }

        Ok(Self {
            reader,
            headers: Arc::new(headers),
            buffer: StringRecord::new(),
            finished: false,
        })
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

fn builder() -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    // Short rows surface as missing fields in the transformer, not as read errors
    builder.has_headers(true).flexible(true);
    builder
}

impl<R: Read> Iterator for FieldExtractor<R> {
    type Item = Result<RawRecord, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.reader.read_record(&mut self.buffer) {
            Ok(true) => {
                let line = self.buffer.position().map(|p| p.line()).unwrap_or(0);
                let fields = self.buffer.iter().map(str::to_string).collect();
                Some(Ok(RawRecord::new(line, fields, Arc::clone(&self.headers))))
            },
            Ok(false) => {
                self.finished = true;
                None
            },
            Err(e) => {
                self.finished = true;
                Some(Err(ExtractError::Read(e)))
            },
        }
    }
}
