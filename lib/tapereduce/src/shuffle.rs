use crate::api::Record;
use crate::config::ShufflePolicy;
use crate::error::FormatError;
use crate::io::{file_len, RecordReader, RecordWriter};
use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Clone, Debug, Default, Serialize)]
pub struct ShuffleOutcome {
    pub inputs: usize,
    pub pacing_input: usize,
    pub rounds: u64,
    pub records_in: u64,
    pub records_out: u64,
    pub partition_records: Vec<u64>,
    /// Inputs that still held records when reading stopped.
    pub lagging_inputs: usize,
}

// Sends each emitted record to the next partition in turn.
struct RoundRobin {
    writers: Vec<RecordWriter>,
    next: usize,
}

impl RoundRobin {
    fn emit(&mut self, key: String, value: i64) -> Result<()> {
        self.writers[self.next].write(&Record { key, value })?;
        self.next = (self.next + 1) % self.writers.len();
        Ok(())
    }

    fn finish(self) -> Result<Vec<u64>> {
        self.writers.into_iter().map(|w| w.finish()).collect()
    }
}

/// Merges sorted, per-key-aggregated mapper files into `outputs.len()` sorted,
/// key-disjoint partitions of near-equal record count.
///
/// Every live input contributes one record per round and the smallest pending key
/// is emitted once per round. Reading stops according to `policy`; whatever is still
/// pending afterwards is emitted in key order.
pub fn shuffle(inputs: &[PathBuf], outputs: &[PathBuf], policy: ShufflePolicy) -> Result<ShuffleOutcome> {
    if outputs.is_empty() { bail!("shuffle needs at least one output partition"); }

    let mut pacing_input = 0usize;
    let mut pacing_len = 0u64;
    for (i, p) in inputs.iter().enumerate() {
        let len = file_len(p)?;
        if i == 0 || len > pacing_len { pacing_input = i; pacing_len = len; }
    }

    let mut readers = inputs.iter().map(RecordReader::open).collect::<Result<Vec<_>>>()?;
    let writers = outputs.iter().map(RecordWriter::create).collect::<Result<Vec<_>>>()?;
    let mut sink = RoundRobin { writers, next: 0 };
    let mut pending: BTreeMap<String, i64> = BTreeMap::new();
    let mut outcome = ShuffleOutcome { inputs: inputs.len(), pacing_input, ..Default::default() };

    loop {
        let keep_reading = match policy {
            _ if readers.is_empty() => false,
            ShufflePolicy::Paced => !readers[pacing_input].is_exhausted()?,
            ShufflePolicy::DrainAll => count_live(&mut readers)? > 0,
        };
        if !keep_reading { break; }
        outcome.rounds += 1;
        for reader in readers.iter_mut() {
            if let Some(rec) = reader.next_record()? {
                outcome.records_in += 1;
                match pending.get_mut(&rec.key) {
                    Some(sum) => {
                        *sum = sum.checked_add(rec.value).ok_or_else(|| FormatError::CountOverflow { key: rec.key.clone() })?;
                    }
                    None => { pending.insert(rec.key, rec.value); }
                }
            }
        }
        if let Some((key, value)) = pending.pop_first() {
            sink.emit(key, value)?;
            outcome.records_out += 1;
        }
    }

    outcome.lagging_inputs = count_live(&mut readers)?;
    if outcome.lagging_inputs > 0 {
        warn!(
            lagging_inputs = outcome.lagging_inputs, pacing_input,
            "pacing file exhausted while other mapper files still hold records; those records are not shuffled"
        );
    }

    // The round-robin pointer carries on from the read loop rather than restarting at
    // partition 0, keeping partition sizes within one record of each other.
    while let Some((key, value)) = pending.pop_first() {
        sink.emit(key, value)?;
        outcome.records_out += 1;
    }
    outcome.partition_records = sink.finish()?;
    debug!(rounds = outcome.rounds, records_in = outcome.records_in, records_out = outcome.records_out, "shuffle merged");
    Ok(outcome)
}

fn count_live(readers: &mut [RecordReader]) -> Result<usize> {
    let mut live = 0;
    for r in readers.iter_mut() {
        if !r.is_exhausted()? { live += 1; }
    }
    Ok(live)
}
