//! Session event log on disk.
//!
//! One JSON line per datagram, appended as packets arrive. The record format
//! itself lives in [`oscsync_core::event`]; this module owns the file handle.

use log::{debug, info, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use oscsync_core::event::{decode_log, encode_record, Event};

/// File name of the event log inside a session directory.
pub const UDP_LOG_FILE: &str = "udp.jsonl";

/// Append-only writer for one session log.
pub struct EventLogWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    records: u64,
}

impl EventLogWriter {
    /// Open `path` for appending, creating it if needed.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        debug!("Event log opened: {}", path.display());

        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_owned(),
            records: 0,
        })
    }

    /// Write one record and flush it.
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        let line =
            encode_record(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.records += 1;
        Ok(())
    }

    /// Flush and sync to disk.
    pub fn close(mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        debug!(
            "Event log closed: {} ({} records)",
            self.path.display(),
            self.records
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written through this writer.
    pub fn records(&self) -> u64 {
        self.records
    }
}

/// Read a whole log, sorted by time.
///
/// Lines that do not decode are skipped; only a missing or unreadable file is
/// an error.
pub fn load_all(path: &Path) -> io::Result<Vec<Event>> {
    let bytes = fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes);
    let log = decode_log(&content);

    if log.skipped > 0 {
        warn!(
            "Skipped {} malformed line(s) in {}",
            log.skipped,
            path.display()
        );
    }
    info!("Loaded {} events from {}", log.events.len(), path.display());

    Ok(log.events)
}
