//! Process-name resolution for switch records
//!
//! Switch rows may omit the task name. The resolver keeps the last observed
//! name per pid and answers later lookups from that cache: the most recent
//! non-empty name wins and entries are never invalidated. An optional side
//! table (CSV `pid,comm,cmdline`) can enrich the args of closing markers with
//! the full invocation; it never changes matching behavior.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

/// Fallback name for a pid that was never seen with a non-empty name.
pub const UNKNOWN_COMM: &str = "Unknown";

/// One row of the optional side table.
#[derive(Debug, Deserialize)]
struct CommRow {
    pid: i64,
    #[serde(default)]
    comm: String,
    #[serde(default)]
    cmdline: String,
}

#[derive(Debug, Default)]
pub struct CommResolver {
    cache: HashMap<i64, String>,
    table: HashMap<i64, (String, String)>,
}

impl CommResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a resolver backed by a `pid,comm,cmdline` side table.
    pub fn with_table(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;
        let mut table = HashMap::new();
        for row in reader.deserialize() {
            let row: CommRow = row?;
            table.insert(row.pid, (row.comm, row.cmdline));
        }
        Ok(Self {
            cache: HashMap::new(),
            table,
        })
    }

    /// Resolve a pid to its textual name. A non-empty observed name (after
    /// trimming) updates the cache and wins; otherwise the last cached name,
    /// falling back to `"Unknown"`.
    pub fn resolve(&mut self, pid: i64, observed: &str) -> String {
        let observed = observed.trim();
        if !observed.is_empty() {
            self.cache.insert(pid, observed.to_string());
            return observed.to_string();
        }
        self.cache
            .get(&pid)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_COMM.to_string())
    }

    /// Side-table lookup. Both fields must be non-empty to count, mirroring
    /// empty CSV cells.
    pub fn augment(&self, pid: i64) -> Option<(&str, &str)> {
        self.table.get(&pid).and_then(|(comm, cmdline)| {
            if comm.is_empty() || cmdline.is_empty() {
                None
            } else {
                Some((comm.as_str(), cmdline.as_str()))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_observed_name_wins_and_is_cached() {
        let mut resolver = CommResolver::new();
        assert_eq!(resolver.resolve(100, "bpftrace       "), "bpftrace");
        assert_eq!(resolver.resolve(100, ""), "bpftrace");
    }

    #[test]
    fn test_unknown_fallback_then_cache_update() {
        // unseen pid with an empty name resolves to the literal fallback
        let mut resolver = CommResolver::new();
        assert_eq!(resolver.resolve(42, ""), UNKNOWN_COMM);
        // a later non-empty observation updates the cache
        assert_eq!(resolver.resolve(42, "tee"), "tee");
        // and a subsequent empty-name row resolves to the new name
        assert_eq!(resolver.resolve(42, "  "), "tee");
    }

    #[test]
    fn test_cache_is_per_pid() {
        let mut resolver = CommResolver::new();
        resolver.resolve(1, "fzf");
        assert_eq!(resolver.resolve(2, ""), UNKNOWN_COMM);
        assert_eq!(resolver.resolve(1, ""), "fzf");
    }

    #[test]
    fn test_augment_from_side_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pid,comm,cmdline").unwrap();
        writeln!(file, "4922,fzf,fzf --height 40%").unwrap();
        writeln!(file, "27077,tmux,").unwrap();
        file.flush().unwrap();

        let resolver = CommResolver::with_table(file.path()).unwrap();
        assert_eq!(resolver.augment(4922), Some(("fzf", "fzf --height 40%")));
        // an empty cmdline cell disables enrichment for that pid
        assert_eq!(resolver.augment(27077), None);
        assert_eq!(resolver.augment(1), None);
    }

    #[test]
    fn test_augment_without_table() {
        let resolver = CommResolver::new();
        assert_eq!(resolver.augment(4922), None);
    }
}
