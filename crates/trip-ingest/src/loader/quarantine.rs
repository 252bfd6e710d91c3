//! Export destination for rows excluded as duplicates
//!
//! One header line per run, then one line per duplicate in canonical column
//! order. Values are joined with `,` and any `,` inside a value becomes `.`;
//! the output is never quoted.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use csv::{QuoteStyle, Writer, WriterBuilder};

use crate::record::{TripRecord, TRIP_COLUMNS};

/// Append-only sink for quarantined trips
pub trait QuarantineSink: Send {
    /// Empty the sink and write the header line. Called once per run.
    fn reset(&mut self) -> io::Result<()>;

    /// Append one line per trip
    fn append(&mut self, records: &[TripRecord]) -> io::Result<()>;
}

/// Header line shared by every sink
pub fn header_line() -> String {
    TRIP_COLUMNS.join(",")
}

/// Export values of one trip with embedded commas replaced
pub fn export_fields(record: &TripRecord) -> [String; 9] {
    record.export_values().map(|value| value.replace(',', "."))
}

/// Render one quarantined trip
pub fn format_line(record: &TripRecord) -> String {
    export_fields(record).join(",")
}

fn writer_builder() -> WriterBuilder {
    let mut builder = WriterBuilder::new();
    builder.has_headers(false).quote_style(QuoteStyle::Never);
    builder
}

/// Quarantine file on local disk
pub struct FileQuarantine {
    path: PathBuf,
    writer: Option<Writer<File>>,
}

impl FileQuarantine {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> io::Result<&mut Writer<File>> {
        if self.writer.is_none() {
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            self.writer = Some(writer_builder().from_writer(file));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::other("quarantine writer unavailable"))
    }
}

impl QuarantineSink for FileQuarantine {
    fn reset(&mut self) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.writer = None;

        let mut writer = writer_builder().from_path(&self.path)?;
        writer.write_record(TRIP_COLUMNS)?;
        writer.flush()?;
        self.writer = Some(writer);
        Ok(())
    }

    fn append(&mut self, records: &[TripRecord]) -> io::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let writer = self.writer()?;
        for record in records {
            writer.write_record(export_fields(record))?;
        }
        writer.flush()
    }
}

/// In-memory sink; clones share the same lines
#[derive(Clone, Default)]
pub struct MemoryQuarantine {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryQuarantine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every line written so far, header included
    pub fn lines(&self) -> io::Result<Vec<String>> {
        self.with_lines(|lines| lines.clone())
    }

    fn with_lines<T>(&self, f: impl FnOnce(&mut Vec<String>) -> T) -> io::Result<T> {
        let mut lines = self
            .lines
            .lock()
            .map_err(|_| io::Error::other("quarantine lock poisoned"))?;
        Ok(f(&mut lines))
    }
}

impl QuarantineSink for MemoryQuarantine {
    fn reset(&mut self) -> io::Result<()> {
        self.with_lines(|lines| {
            lines.clear();
            lines.push(header_line());
        })
    }

    fn append(&mut self, records: &[TripRecord]) -> io::Result<()> {
        self.with_lines(|lines| lines.extend(records.iter().map(format_line)))
    }
}
