use anyhow::Result;
use std::fmt;
use std::path::Path;

/// A single `(key, count)` pair. Keys never contain whitespace or newlines.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Record {
    pub key: String,
    pub value: i64,
}

impl Record {
    pub fn new(key: impl Into<String>, value: i64) -> Self { Self { key: key.into(), value } }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{} {}", self.key, self.value) }
}

// ========== Callbacks ==========

/// Turns one input line into one record.
pub trait Mapper: Send + Sync {
    fn map(&self, line: &str) -> Record;
}

/// Sorts and aggregates a mapper's output file in place.
/// `worker` is the index of the map worker that owns `path`.
pub trait Combiner: Send + Sync {
    fn combine(&self, path: &Path, worker: usize) -> Result<()>;
}

/// Inspects one shuffled record; returning `false` stops the calling reduce worker.
pub trait Reducer: Send + Sync {
    fn reduce(&self, record: &Record) -> bool;
}

impl<F> Mapper for F
where
    F: Fn(&str) -> Record + Send + Sync,
{
    fn map(&self, line: &str) -> Record { self(line) }
}

impl<F> Combiner for F
where
    F: Fn(&Path, usize) -> Result<()> + Send + Sync,
{
    fn combine(&self, path: &Path, worker: usize) -> Result<()> { self(path, worker) }
}

impl<F> Reducer for F
where
    F: Fn(&Record) -> bool + Send + Sync,
{
    fn reduce(&self, record: &Record) -> bool { self(record) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_act_as_callbacks() {
        let mapper = |line: &str| Record::new(&line[..1], 1);
        let reducer = |r: &Record| r.value == 1;
        assert_eq!(Mapper::map(&mapper, "apple"), Record::new("a", 1));
        assert!(Reducer::reduce(&reducer, &Record::new("a", 1)));
        assert!(!Reducer::reduce(&reducer, &Record::new("a", 2)));
    }

    #[test]
    fn display_is_wire_format() {
        assert_eq!(Record::new("app", 3).to_string(), "app 3");
    }
}
