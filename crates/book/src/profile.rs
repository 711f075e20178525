use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fingerprint of a reader app catalog's bulk content.
///
/// When the profile of the live catalog equals the one stored next to a
/// snapshot, the snapshot's booklist can be used without rescanning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentProfile {
    /// MD5 over every (title, author) pair, in catalog order.
    pub content_hash: String,
    /// Size reported by the device for the small-cover folder.
    pub covers_size: u64,
    /// Row count per catalog table.
    pub table_counts: BTreeMap<String, u64>,
}

/// Per-key outcome of comparing a current profile against a stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKeyStatus {
    Matched,
    Mismatch,
    Missing,
}

/// Key-by-key comparison, keyed the same way as [`ContentProfile::entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileComparison {
    pub keys: BTreeMap<String, (ProfileKeyStatus, Option<String>, String)>,
}

impl ProfileComparison {
    pub fn is_match(&self) -> bool {
        self.keys.values().all(|(status, _, _)| *status == ProfileKeyStatus::Matched)
    }

    /// Log every key, flagged `matched`, `mismatch` or `missing`.
    pub fn log_mismatches(&self) {
        for (key, (status, stored, current)) in &self.keys {
            let status = match status {
                ProfileKeyStatus::Matched => "matched",
                ProfileKeyStatus::Mismatch => "mismatch",
                ProfileKeyStatus::Missing => "missing",
            };
            tracing::info!(key, status, stored = stored.as_deref().unwrap_or(""), current, "Content profile key");
        }
    }
}

impl ContentProfile {
    /// Flattened `key -> value` view used for comparison and logging.
    pub fn entries(&self) -> BTreeMap<String, String> {
        let mut entries = BTreeMap::new();
        entries.insert("content_hash".to_string(), self.content_hash.clone());
        entries.insert("covers_size".to_string(), self.covers_size.to_string());
        for (table, count) in &self.table_counts {
            entries.insert(table.clone(), count.to_string());
        }
        entries
    }

    /// Compare `self` (the live catalog) against a `stored` profile.
    ///
    /// Only keys of the current profile are considered; a key the stored
    /// profile lacks is `Missing` and fails the match.
    pub fn compare(&self, stored: &ContentProfile) -> ProfileComparison {
        let stored = stored.entries();
        let keys = self
            .entries()
            .into_iter()
            .map(|(key, current)| {
                let previous = stored.get(&key).cloned();
                let status = match &previous {
                    None => ProfileKeyStatus::Missing,
                    Some(v) if *v == current => ProfileKeyStatus::Matched,
                    Some(_) => ProfileKeyStatus::Mismatch,
                };
                (key, (status, previous, current))
            })
            .collect();
        ProfileComparison { keys }
    }
}
