// ── Card log ──
//
// Append-only record of every card read, one JSON object per line and one
// file per calendar day. The same format is read back by replay.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use oolive_api::CardReaderEntry;

#[derive(Debug, Clone)]
pub struct CardLog {
    dir: PathBuf,
}

impl CardLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Log file for `date`: `cardreader-YYYY-MM-DD.log`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("cardreader-{}.log", date.format("%Y-%m-%d")))
    }

    /// Append to today's log. Returns the file written.
    pub fn append(&self, entry: &CardReaderEntry) -> io::Result<PathBuf> {
        self.append_on(Local::now().date_naive(), entry)
    }

    pub fn append_on(&self, date: NaiveDate, entry: &CardReaderEntry) -> io::Result<PathBuf> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let path = self.path_for(date);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&line)?;
        Ok(path)
    }
}
