use crate::api::{Combiner, Mapper, Record, Reducer};
use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::io::{file_len, open_writer, RecordReader, RecordWriter};
use crate::plan::{plan_blocks, Block};
use crate::shuffle::shuffle;
use crate::sort::{SortAggregateCombiner, TwoTapeSort};
use crate::stats::{MapStats, MapTaskStats, ReduceStats, ReduceTaskStats, RunReport, ShuffleStats};
use crate::workspace::Workspace;
use anyhow::{anyhow, Context, Result};
use memchr::memchr;
use std::fmt::Display;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Runs map -> combine -> shuffle -> reduce over one input file.
///
/// Map workers and reduce workers are OS threads joined at phase barriers; they
/// communicate only through files in a per-run [`Workspace`].
pub struct Engine {
    config: EngineConfig,
    mapper: Option<Box<dyn Mapper>>,
    combiner: Box<dyn Combiner>,
    reducer: Option<Box<dyn Reducer>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, mapper: None, combiner: Box::new(SortAggregateCombiner::<TwoTapeSort>::default()), reducer: None })
    }

    pub fn with_workers(mappers: usize, reducers: usize) -> Result<Self> { Self::new(EngineConfig::new(mappers, reducers)) }

    pub fn set_mapper(&mut self, mapper: impl Mapper + 'static) { self.mapper = Some(Box::new(mapper)); }

    pub fn set_combiner(&mut self, combiner: impl Combiner + 'static) { self.combiner = Box::new(combiner); }

    pub fn set_reducer(&mut self, reducer: impl Reducer + 'static) { self.reducer = Some(Box::new(reducer)); }

    /// Executes one full pass. When every reducer call accepts its record, `output`
    /// is written with `tag` as its only line; otherwise `output` is left untouched.
    pub fn run(&self, input: impl AsRef<Path>, output: impl AsRef<Path>, tag: impl Display) -> Result<RunReport> {
        let input = input.as_ref();
        let output = output.as_ref();
        let mapper = self.mapper.as_deref().ok_or(ConfigError::MissingCallback("mapper"))?;
        let reducer = self.reducer.as_deref().ok_or(ConfigError::MissingCallback("reducer"))?;
        let combiner = &*self.combiner;
        let (num_mappers, num_reducers) = (self.config.mappers, self.config.reducers);

        let blocks = plan_blocks(input, num_mappers)?;
        if blocks.is_empty() {
            error!(input = %input.display(), "no blocks planned");
            return Err(ConfigError::MissingInput(input.to_path_buf()).into());
        }

        let workspace = Workspace::create(&self.config.workspace_root, self.config.keep_intermediates)?;
        let fd_limit = get_fd_soft_limit();
        info!(
            input = %input.display(), run_dir = %workspace.root().display(),
            mappers = num_mappers, reducers = num_reducers, fd_soft_limit = fd_limit.unwrap_or(0),
            "starting map phase"
        );
        if let Some(limit) = fd_limit {
            // shuffle holds every mapper and reducer file open at once
            let needed = (num_mappers + num_reducers) as u64;
            if needed >= limit { warn!(needed, limit, "shuffle may exceed the open file limit"); }
        }

        // Map (+ combine, inline on each worker)
        let map_start = Instant::now();
        let mapper_files: Vec<PathBuf> = (0..num_mappers).map(|i| workspace.mapper_file(i)).collect();
        let map_tasks = thread::scope(|s| {
            let handles = blocks.iter().enumerate()
                .map(|(i, &block)| {
                    let path = mapper_files[i].as_path();
                    spawn_worker(s, "map", i, move || run_map_task(input, block, path, i, mapper, combiner))
                })
                .collect::<Result<Vec<_>>>()?;
            join_all(handles, "map")
        })?;
        let map = MapStats::from_tasks(&map_tasks, map_start.elapsed().as_millis() as u64);
        info!(phase = "map",
              tasks = map.tasks, total_lines = map.total_lines, total_bytes_in = map.total_bytes_in,
              total_combined_bytes = map.total_combined_bytes,
              min_task_ms = map.min_task_ms, max_task_ms = map.max_task_ms, wall_ms = map.wall_ms,
              "Map phase complete");

        // Shuffle, single-threaded after the map barrier
        let shuffle_start = Instant::now();
        let reducer_files: Vec<PathBuf> = (0..num_reducers).map(|j| workspace.reducer_file(j)).collect();
        let outcome = shuffle(&mapper_files, &reducer_files, self.config.shuffle_policy)?;
        let shuffle_stats = ShuffleStats { outcome, wall_ms: shuffle_start.elapsed().as_millis() as u64 };
        info!(phase = "shuffle",
              pacing_input = shuffle_stats.outcome.pacing_input, rounds = shuffle_stats.outcome.rounds,
              records_in = shuffle_stats.outcome.records_in, records_out = shuffle_stats.outcome.records_out,
              lagging_inputs = shuffle_stats.outcome.lagging_inputs, wall_ms = shuffle_stats.wall_ms,
              "Shuffle phase complete");

        // Reduce
        let reduce_start = Instant::now();
        let reduce_tasks = thread::scope(|s| {
            let handles = reducer_files.iter().enumerate()
                .map(|(j, path)| {
                    let path = path.as_path();
                    spawn_worker(s, "reduce", j, move || run_reduce_task(path, j, reducer))
                })
                .collect::<Result<Vec<_>>>()?;
            join_all(handles, "reduce")
        })?;
        let reduce = ReduceStats::from_tasks(&reduce_tasks, reduce_start.elapsed().as_millis() as u64);
        let success = reduce.rejected_partitions.is_empty();
        info!(phase = "reduce",
              reducers = reduce.reducers, total_records_seen = reduce.total_records_seen,
              rejected = reduce.rejected_partitions.len(),
              min_reducer_ms = reduce.min_reducer_ms, max_reducer_ms = reduce.max_reducer_ms, wall_ms = reduce.wall_ms,
              "Reduce phase complete");

        let report = RunReport { tag: tag.to_string(), success, map, shuffle: shuffle_stats, reduce };
        if success {
            let mut w = open_writer(output)?;
            w.write_all(report.tag.as_bytes()).with_context(|| format!("write {}", output.display()))?;
            w.flush().with_context(|| format!("flush {}", output.display()))?;
            info!(output = %output.display(), tag = %report.tag, "all reducers accepted; output written");
        } else {
            info!(tag = %report.tag, rejected = ?report.reduce.rejected_partitions, "reducer rejected a record; no output");
        }
        if workspace.keeps_intermediates() {
            report.write_json(workspace.report_file())?;
        }
        Ok(report)
    }
}

fn spawn_worker<'scope, 'env, T, F>(s: &'scope Scope<'scope, 'env>, phase: &str, id: usize, f: F) -> Result<ScopedJoinHandle<'scope, Result<T>>>
where
    F: FnOnce() -> Result<T> + Send + 'scope,
    T: Send + 'scope,
{
    thread::Builder::new()
        .name(format!("{}-{}", phase, id))
        .spawn_scoped(s, f)
        .with_context(|| format!("spawn {} worker {}", phase, id))
}

// Joins every handle before reporting, so no worker outlives its phase.
fn join_all<T>(handles: Vec<ScopedJoinHandle<'_, Result<T>>>, phase: &str) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(handles.len());
    let mut first_err: Option<anyhow::Error> = None;
    for (id, h) in handles.into_iter().enumerate() {
        let err = match h.join() {
            Ok(Ok(v)) => { out.push(v); continue; }
            Ok(Err(e)) => e,
            Err(_) => anyhow!("{} worker {} panicked", phase, id),
        };
        error!(phase, worker = id, "worker failed: {:#}", err);
        if first_err.is_none() { first_err = Some(err); }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

fn run_map_task(input: &Path, block: Block, out_path: &Path, worker: usize, mapper: &dyn Mapper, combiner: &dyn Combiner) -> Result<MapTaskStats> {
    let task_start = Instant::now();
    debug!(worker, from = block.from, to = block.to, "map task starting");

    let mut buf = vec![0u8; block.len() as usize];
    if !block.is_empty() {
        let mut file = File::open(input).with_context(|| format!("open {}", input.display()))?;
        file.seek(SeekFrom::Start(block.from)).with_context(|| format!("seek {}", input.display()))?;
        file.read_exact(&mut buf).with_context(|| format!("read block {}..{} of {}", block.from, block.to, input.display()))?;
    }

    let mut writer = RecordWriter::create(out_path)?;
    let mut offset = 0usize;
    while offset < buf.len() {
        let nl = memchr(b'\n', &buf[offset..]).map(|i| offset + i).unwrap_or(buf.len());
        let mut line = &buf[offset..nl];
        if let Some((&b'\r', rest)) = line.split_last() { line = rest; }
        let record: Record = mapper.map(&String::from_utf8_lossy(line));
        writer.write(&record)?;
        offset = nl + 1;
    }
    let lines = writer.finish()?;
    let map_ms = task_start.elapsed().as_millis() as u64;

    let combine_start = Instant::now();
    combiner.combine(out_path, worker).with_context(|| format!("combine {}", out_path.display()))?;
    let combine_ms = combine_start.elapsed().as_millis() as u64;

    let stats = MapTaskStats {
        worker,
        block_bytes: block.len(),
        lines,
        combined_bytes: file_len(out_path)?,
        map_ms,
        combine_ms,
        wall_ms: task_start.elapsed().as_millis() as u64,
    };
    debug!(worker, lines, combined_bytes = stats.combined_bytes, wall_ms = stats.wall_ms, "map task complete");
    Ok(stats)
}

fn run_reduce_task(path: &Path, partition: usize, reducer: &dyn Reducer) -> Result<ReduceTaskStats> {
    let start = Instant::now();
    let mut stats = ReduceTaskStats { partition, records_seen: 0, accepted: true, wall_ms: 0 };
    if file_len(path)? > 0 {
        for rec in RecordReader::open(path)? {
            let rec = rec?;
            stats.records_seen += 1;
            if !reducer.reduce(&rec) {
                debug!(partition, key = %rec.key, value = rec.value, "reducer rejected record");
                stats.accepted = false;
                break;
            }
        }
    }
    stats.wall_ms = start.elapsed().as_millis() as u64;
    Ok(stats)
}

#[cfg(target_os = "linux")]
fn get_fd_soft_limit() -> Option<u64> {
    use libc::{getrlimit, rlimit, RLIMIT_NOFILE};
    let mut lim = rlimit { rlim_cur: 0, rlim_max: 0 };
    let rc = unsafe { getrlimit(RLIMIT_NOFILE, &mut lim as *mut rlimit) };
    if rc == 0 { Some(lim.rlim_cur as u64) } else { None }
}

#[cfg(not(target_os = "linux"))]
fn get_fd_soft_limit() -> Option<u64> { None }

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn first_char(line: &str) -> Record { Record::new(line.chars().take(1).collect::<String>(), 1) }

    #[test]
    fn map_task_splits_lines_and_combines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("in.txt");
        fs::write(&input, "bb\r\naa\n\nab\n")?;
        let out = dir.path().join("mapper0.txt");
        let block = Block { from: 0, to: file_len(&input)? };
        let stats = run_map_task(&input, block, &out, 0, &first_char, &SortAggregateCombiner::<TwoTapeSort>::default())?;
        assert_eq!(stats.lines, 4);
        assert_eq!(fs::read_to_string(&out)?, " 1\na 2\nb 1");
        Ok(())
    }

    #[test]
    fn empty_block_gives_empty_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("in.txt");
        fs::write(&input, "x")?;
        let out = dir.path().join("mapper1.txt");
        let stats = run_map_task(&input, Block { from: 1, to: 1 }, &out, 1, &first_char, &SortAggregateCombiner::<TwoTapeSort>::default())?;
        assert_eq!(stats.lines, 0);
        assert_eq!(file_len(&out)?, 0);
        Ok(())
    }

    #[test]
    fn reduce_task_stops_at_first_rejection() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let p = dir.path().join("reducer0.txt");
        fs::write(&p, "a 1\nb 2\nc 1")?;
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let reducer = move |r: &Record| { seen.fetch_add(1, Ordering::SeqCst); r.value == 1 };
        let stats = run_reduce_task(&p, 0, &reducer)?;
        assert!(!stats.accepted);
        assert_eq!(stats.records_seen, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn empty_partition_accepts_without_calls() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let p = dir.path().join("reducer0.txt");
        fs::write(&p, "")?;
        let stats = run_reduce_task(&p, 0, &|_: &Record| -> bool { panic!("reducer called on empty partition") })?;
        assert!(stats.accepted);
        assert_eq!(stats.records_seen, 0);
        Ok(())
    }

    #[test]
    fn join_all_reports_worker_errors_after_joining_everyone() {
        let finished = AtomicUsize::new(0);
        let res: Result<Vec<u32>> = thread::scope(|s| {
            let handles = (0..4)
                .map(|i| {
                    let finished = &finished;
                    spawn_worker(s, "test", i, move || {
                        finished.fetch_add(1, Ordering::SeqCst);
                        if i == 1 { Err(anyhow!("boom")) } else { Ok(i as u32) }
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            join_all(handles, "test")
        });
        assert!(res.is_err());
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn missing_callbacks_are_configuration_errors() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("in.txt");
        fs::write(&input, "a")?;
        let engine = Engine::new(EngineConfig::new(1, 1).with_workspace_root(dir.path().join("runs")))?;
        let err = engine.run(&input, dir.path().join("out.txt"), 1).unwrap_err();
        assert!(matches!(err.downcast_ref::<ConfigError>(), Some(ConfigError::MissingCallback("mapper"))));
        Ok(())
    }
}
