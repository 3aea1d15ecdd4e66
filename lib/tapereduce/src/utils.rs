use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static RUN_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Unique per process and per call, so engines running side by side never share a directory.
pub fn local_run_id() -> String {
    let pid = std::process::id();
    let ts = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    let seq = RUN_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("local-{}-{}-{}", pid, ts, seq)
}

pub fn env_var_truthy(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => is_truthy(&v),
        Err(_) => false,
    }
}

pub fn env_var_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<usize>().ok())
}

fn is_truthy(v: &str) -> bool {
    let v = v.to_ascii_lowercase();
    v == "1" || v == "true" || v == "yes" || v == "on"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_distinct() {
        let a = local_run_id();
        let b = local_run_id();
        assert_ne!(a, b);
        assert!(a.starts_with("local-"));
    }

    #[test]
    fn truthy_values() {
        for v in ["1", "true", "YES", "On"] { assert!(is_truthy(v), "{}", v); }
        for v in ["0", "false", "", "nope"] { assert!(!is_truthy(v), "{}", v); }
    }
}
