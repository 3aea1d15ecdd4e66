pub mod api;
pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod plan;
pub mod runtime;
pub mod shuffle;
pub mod sort;
pub mod stats;
pub mod utils;
pub mod workspace;

pub use api::{Combiner, Mapper, Record, Reducer};
pub use config::{EngineConfig, ShufflePolicy};
pub use error::{ConfigError, FormatError};
pub use runtime::Engine;
pub use sort::{SortAggregateCombiner, TwoTapeSort};
pub use stats::RunReport;
