use crate::constants::{MAP_OUT_DIR, RUN_REPORT_FILE, SHUFFLE_OUT_DIR};
use crate::io::ensure_dir;
use crate::utils::local_run_id;
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Directory owned by a single `run`. Every intermediate path the engine
/// touches lives below it, so independent runs never share a file name.
pub struct Workspace {
    root: PathBuf,
    keep: bool,
}

impl Workspace {
    pub fn create(parent: impl AsRef<Path>, keep: bool) -> Result<Self> {
        let root = parent.as_ref().join(local_run_id());
        ensure_dir(root.join(MAP_OUT_DIR))?;
        ensure_dir(root.join(SHUFFLE_OUT_DIR))?;
        debug!(root = %root.display(), "workspace created");
        Ok(Self { root, keep })
    }

    pub fn root(&self) -> &Path { &self.root }

    pub fn mapper_file(&self, worker: usize) -> PathBuf {
        self.root.join(MAP_OUT_DIR).join(format!("mapper{}.txt", worker))
    }

    pub fn reducer_file(&self, partition: usize) -> PathBuf {
        self.root.join(SHUFFLE_OUT_DIR).join(format!("reducer{}.txt", partition))
    }

    pub fn report_file(&self) -> PathBuf { self.root.join(RUN_REPORT_FILE) }

    pub fn keeps_intermediates(&self) -> bool { self.keep }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.keep { return; }
        if let Err(e) = fs::remove_dir_all(&self.root) {
            error!("remove workspace {}: {}", self.root.display(), e);
        }
    }
}

/// Sibling scratch file: `dir/mapper0.txt` + `b` -> `dir/mapper0.txt.b`.
pub fn scratch_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_namespaced_per_run() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = Workspace::create(dir.path(), false)?;
        let b = Workspace::create(dir.path(), false)?;
        assert_ne!(a.mapper_file(0), b.mapper_file(0));
        assert!(a.mapper_file(1).starts_with(a.root()));
        assert!(a.reducer_file(0).ends_with("shuffle_out/reducer0.txt"));
        Ok(())
    }

    #[test]
    fn dropped_unless_kept() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let gone = Workspace::create(dir.path(), false)?;
        let gone_root = gone.root().to_path_buf();
        drop(gone);
        assert!(!gone_root.exists());

        let kept = Workspace::create(dir.path(), true)?;
        let kept_root = kept.root().to_path_buf();
        drop(kept);
        assert!(kept_root.join("map_out").is_dir());
        Ok(())
    }

    #[test]
    fn scratch_path_appends_suffix() {
        let p = Path::new("/tmp/run/map_out/mapper3.txt");
        assert_eq!(scratch_path(p, "b"), PathBuf::from("/tmp/run/map_out/mapper3.txt.b"));
    }
}
