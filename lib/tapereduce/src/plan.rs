use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Half-open byte range `[from, to)` of the input handled by one map worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Block {
    pub from: u64,
    pub to: u64,
}

impl Block {
    pub fn len(&self) -> u64 { self.to - self.from }

    pub fn is_empty(&self) -> bool { self.to == self.from }
}

/// Splits `path` into `n` line-aligned blocks, reading only the bytes near each boundary.
/// Returns no blocks when the file is absent or empty. Trailing blocks may be empty when
/// the file has fewer lines than workers.
pub fn plan_blocks(path: impl AsRef<Path>, n: usize) -> Result<Vec<Block>> {
    let path = path.as_ref();
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("open {}", path.display())),
    };
    let size = file.metadata().with_context(|| format!("metadata {}", path.display()))?.len();
    if size == 0 || n == 0 { return Ok(Vec::new()); }

    let interval = size.div_ceil(n as u64);
    let mut blocks = Vec::with_capacity(n);
    let mut from = 0u64;
    for i in 0..n {
        let to = if i + 1 == n {
            size
        } else {
            // a previous probe may have run past this block's ideal end
            let ideal = (interval * (i as u64 + 1)).max(from);
            line_end_from(&mut file, ideal, size).with_context(|| format!("probe {}", path.display()))?
        };
        blocks.push(Block { from, to });
        from = to;
    }
    debug!(path = %path.display(), size, blocks = blocks.len(), "planned blocks");
    Ok(blocks)
}

// Offset just past the first newline at or after `pos`, or `size` if there is none.
fn line_end_from(file: &mut File, mut pos: u64, size: u64) -> std::io::Result<u64> {
    let mut byte = [0u8; 1];
    while pos < size {
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut byte)?;
        if byte[0] == b'\n' { return Ok(pos + 1); }
        pos += 1;
    }
    Ok(size)
}
