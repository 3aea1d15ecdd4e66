use crate::api::Record;
use crate::error::FormatError;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    fs::create_dir_all(path.as_ref()).with_context(|| format!("create_dir_all {}", path.as_ref().display()))
}

pub fn open_writer(path: impl AsRef<Path>) -> Result<BufWriter<File>> {
    if let Some(parent) = path.as_ref().parent() {
        ensure_dir(parent)?;
    }
    let file = File::create(path.as_ref()).with_context(|| format!("create {}", path.as_ref().display()))?;
    Ok(BufWriter::new(file))
}

pub fn open_reader(path: impl AsRef<Path>) -> Result<BufReader<File>> {
    let file = File::open(path.as_ref()).with_context(|| format!("open {}", path.as_ref().display()))?;
    Ok(BufReader::new(file))
}

pub fn file_len(path: impl AsRef<Path>) -> Result<u64> {
    Ok(fs::metadata(path.as_ref()).with_context(|| format!("metadata {}", path.as_ref().display()))?.len())
}

/// Parses one `key value` line. The key is everything before the first space.
pub fn parse_record(line: &str) -> Option<Record> {
    let (key, value) = line.split_once(' ')?;
    let value = value.trim().parse::<i64>().ok()?;
    Some(Record { key: key.to_string(), value })
}

// Streaming reader over a record file; holds at most one parsed record ahead.
pub struct RecordReader {
    path: PathBuf,
    reader: BufReader<File>,
    line: String,
    peeked: Option<Record>,
}

impl RecordReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let reader = open_reader(path.as_ref())?;
        Ok(Self { path: path.as_ref().to_path_buf(), reader, line: String::new(), peeked: None })
    }

    pub fn next_record(&mut self) -> Result<Option<Record>> {
        if let Some(r) = self.peeked.take() { return Ok(Some(r)); }
        self.read_one()
    }

    pub fn peek(&mut self) -> Result<Option<&Record>> {
        if self.peeked.is_none() { self.peeked = self.read_one()?; }
        Ok(self.peeked.as_ref())
    }

    pub fn is_exhausted(&mut self) -> Result<bool> { Ok(self.peek()?.is_none()) }

    fn read_one(&mut self) -> Result<Option<Record>> {
        loop {
            self.line.clear();
            let n = self.reader.read_line(&mut self.line).with_context(|| format!("read {}", self.path.display()))?;
            if n == 0 { return Ok(None); }
            let line = self.line.trim_end_matches(['\n', '\r']);
            if line.is_empty() { continue; }
            return match parse_record(line) {
                Some(r) => Ok(Some(r)),
                None => Err(FormatError::MalformedRecord { path: self.path.clone(), line: line.to_string() }.into()),
            };
        }
    }
}

impl Iterator for RecordReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> { self.next_record().transpose() }
}

// Newline-separated `key value` lines with no trailing newline after the last record.
pub struct RecordWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
}

impl RecordWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let writer = open_writer(path.as_ref())?;
        Ok(Self { path: path.as_ref().to_path_buf(), writer, records: 0 })
    }

    pub fn write(&mut self, record: &Record) -> Result<()> {
        if record.key.bytes().any(|b| b.is_ascii_whitespace()) {
            return Err(FormatError::MalformedRecord { path: self.path.clone(), line: record.to_string() }.into());
        }
        if self.records > 0 { self.writer.write_all(b"\n").with_context(|| format!("write {}", self.path.display()))?; }
        write!(self.writer, "{} {}", record.key, record.value).with_context(|| format!("write {}", self.path.display()))?;
        self.records += 1;
        Ok(())
    }

    /// Flushes and closes the file, returning the number of records written.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush().with_context(|| format!("flush {}", self.path.display()))?;
        Ok(self.records)
    }
}
