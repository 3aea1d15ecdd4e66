//! Local sort + aggregate for a single mapper file.
//!
//! The default strategy is a two-tape natural merge sort: the file is split
//! run by run onto tapes B and C, the tapes are merged back into the file
//! one pair of runs at a time, and the pair of passes repeats until the file is a single run. Memory use
//! is one record per open file regardless of file size.

use crate::api::{Combiner, Record};
use crate::constants::{AGGREGATE_SUFFIX, TAPE_B_SUFFIX, TAPE_C_SUFFIX};
use crate::error::FormatError;
use crate::io::{RecordReader, RecordWriter};
use crate::workspace::scratch_path;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// Counts run boundaries (a key strictly less than its predecessor) in a key stream.
#[derive(Clone, Debug, Default)]
pub struct RunTracker {
    prev: Option<String>,
    boundaries: u64,
}

impl RunTracker {
    pub fn new() -> Self { Self::default() }

    /// Returns `true` when `key` starts a new run.
    pub fn observe(&mut self, key: &str) -> bool {
        let boundary = matches!(&self.prev, Some(p) if key < p.as_str());
        if boundary { self.boundaries += 1; }
        match &mut self.prev {
            Some(p) => { p.clear(); p.push_str(key); }
            None => self.prev = Some(key.to_string()),
        }
        boundary
    }

    /// Whether `key` would extend the current run rather than start a new one.
    pub fn continues(&self, key: &str) -> bool {
        match &self.prev {
            Some(p) => key >= p.as_str(),
            None => true,
        }
    }

    pub fn boundaries(&self) -> u64 { self.boundaries }

    pub fn runs(&self) -> u64 { if self.prev.is_some() { self.boundaries + 1 } else { 0 } }
}

pub fn count_runs(path: impl AsRef<Path>) -> Result<u64> {
    let mut tracker = RunTracker::new();
    for rec in RecordReader::open(path)? { tracker.observe(&rec?.key); }
    Ok(tracker.runs())
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SortOutcome {
    pub records: u64,
    pub initial_runs: u64,
    pub passes: u64,
}

/// Sorts a record file by key in place.
pub trait ExternalSort: Send + Sync {
    fn sort(&self, path: &Path) -> Result<SortOutcome>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Distribution {
    pub records: u64,
    pub boundaries: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TwoTapeSort;

impl TwoTapeSort {
    /// Streams `file` onto the tapes, switching tape at every run boundary.
    /// The first run always lands on `tape_b`.
    pub fn distribute(file: &Path, tape_b: &Path, tape_c: &Path) -> Result<Distribution> {
        let mut reader = RecordReader::open(file)?;
        let mut b = RecordWriter::create(tape_b)?;
        let mut c = RecordWriter::create(tape_c)?;
        let mut tracker = RunTracker::new();
        let mut records = 0u64;
        while let Some(rec) = reader.next_record()? {
            tracker.observe(&rec.key);
            if tracker.boundaries() % 2 == 0 { b.write(&rec)?; } else { c.write(&rec)?; }
            records += 1;
        }
        b.finish()?;
        c.finish()?;
        Ok(Distribution { records, boundaries: tracker.boundaries() })
    }

    /// Overwrites `file` with the merge of both tapes, run by run: run k of `tape_b`
    /// is merged with run k of `tape_c`, so each pass roughly halves the run count.
    /// Equal keys come from `tape_b` first.
    pub fn merge(file: &Path, tape_b: &Path, tape_c: &Path) -> Result<u64> {
        let mut b = RecordReader::open(tape_b)?;
        let mut c = RecordReader::open(tape_c)?;
        let mut out = RecordWriter::create(file)?;
        while !(b.is_exhausted()? && c.is_exhausted()?) {
            let mut run_b = RunTracker::new();
            let mut run_c = RunTracker::new();
            loop {
                let b_live = run_continues(&mut b, &run_b)?;
                let c_live = run_continues(&mut c, &run_c)?;
                let take_b = match (b_live, c_live) {
                    (true, true) => matches!((b.peek()?, c.peek()?), (Some(x), Some(y)) if x.key <= y.key),
                    (true, false) => true,
                    (false, true) => false,
                    (false, false) => break,
                };
                let (reader, run) = if take_b { (&mut b, &mut run_b) } else { (&mut c, &mut run_c) };
                if let Some(rec) = reader.next_record()? {
                    run.observe(&rec.key);
                    out.write(&rec)?;
                }
            }
        }
        out.finish()
    }
}

// True when the tape's next record belongs to the run being merged.
fn run_continues(reader: &mut RecordReader, run: &RunTracker) -> Result<bool> {
    Ok(match reader.peek()? {
        Some(rec) => run.continues(&rec.key),
        None => false,
    })
}

impl ExternalSort for TwoTapeSort {
    fn sort(&self, path: &Path) -> Result<SortOutcome> {
        let tape_b = scratch_path(path, TAPE_B_SUFFIX);
        let tape_c = scratch_path(path, TAPE_C_SUFFIX);
        let mut outcome = SortOutcome::default();
        loop {
            let dist = Self::distribute(path, &tape_b, &tape_c)?;
            if outcome.passes == 0 {
                outcome.records = dist.records;
                outcome.initial_runs = if dist.records == 0 { 0 } else { dist.boundaries + 1 };
            }
            if dist.boundaries == 0 { break; }
            Self::merge(path, &tape_b, &tape_c)?;
            outcome.passes += 1;
        }
        remove_if_exists(&tape_b)?;
        remove_if_exists(&tape_c)?;
        Ok(outcome)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AggregateOutcome {
    pub records_in: u64,
    pub records_out: u64,
}

/// Collapses adjacent records with equal keys into one, summing their counts,
/// then replaces `path` with the result.
pub fn aggregate(path: &Path) -> Result<AggregateOutcome> {
    let scratch = scratch_path(path, AGGREGATE_SUFFIX);
    let mut out = RecordWriter::create(&scratch)?;
    let mut current: Option<Record> = None;
    let mut records_in = 0u64;
    for rec in RecordReader::open(path)? {
        let rec = rec?;
        records_in += 1;
        match current.as_mut() {
            Some(cur) if cur.key == rec.key => {
                cur.value = cur.value.checked_add(rec.value).ok_or_else(|| FormatError::CountOverflow { key: cur.key.clone() })?;
            }
            _ => {
                if let Some(done) = current.replace(rec) { out.write(&done)?; }
            }
        }
    }
    if let Some(done) = current { out.write(&done)?; }
    let records_out = out.finish()?;
    fs::rename(&scratch, path).with_context(|| format!("rename {} -> {}", scratch.display(), path.display()))?;
    Ok(AggregateOutcome { records_in, records_out })
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e).with_context(|| format!("remove {}", path.display())),
        _ => Ok(()),
    }
}

/// Default combiner: external sort followed by aggregation.
#[derive(Clone, Debug, Default)]
pub struct SortAggregateCombiner<S = TwoTapeSort> {
    sorter: S,
}

impl<S: ExternalSort> SortAggregateCombiner<S> {
    pub fn new(sorter: S) -> Self { Self { sorter } }
}

impl<S: ExternalSort> Combiner for SortAggregateCombiner<S> {
    fn combine(&self, path: &Path, worker: usize) -> Result<()> {
        let start = Instant::now();
        let sorted = self.sorter.sort(path)?;
        let agg = aggregate(path)?;
        debug!(
            worker, records_in = agg.records_in, records_out = agg.records_out,
            initial_runs = sorted.initial_runs, passes = sorted.passes,
            wall_ms = start.elapsed().as_millis() as u64,
            "combine complete"
        );
        Ok(())
    }
}
