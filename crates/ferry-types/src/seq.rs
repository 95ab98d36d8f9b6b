//! Correlation sequence generator.
//!
//! Every forwarded request gets a sequence string built from a monotonically
//! increasing counter and the generator's name, e.g. `gateway[42]`, optionally
//! wrapped by caller-supplied prefixes: `sess-1@7>gateway[42]`. The string is
//! for diagnostics and correlation only.

use std::path::Path;
use std::sync::Mutex;

/// Generates process-unique sequence strings.
///
/// Build one per peer (or per process) and share it by handle; every call to
/// [`SeqGenerator::next`] observes a distinct counter value.
#[derive(Debug)]
pub struct SeqGenerator {
    name: String,
    counter: Mutex<u64>,
}

impl SeqGenerator {
    /// Create a generator whose sequences are tagged with `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counter: Mutex::new(0),
        }
    }

    /// Create a generator named after the running executable.
    pub fn for_process() -> Self {
        Self::new(process_name())
    }

    /// The tag used in generated sequences.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Produce the next sequence string.
    ///
    /// Prefixes are trimmed and empty ones skipped. Each prefix wraps the
    /// result so far, so with `["a", "b"]` the output is `b>a>name[n]`.
    pub fn next(&self, prefixes: &[&str]) -> String {
        let n = {
            let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
            let n = *counter;
            *counter = counter.wrapping_add(1);
            n
        };
        let mut seq = format!("{}[{}]", self.name, n);
        for prefix in prefixes {
            let prefix = prefix.trim();
            if prefix.is_empty() {
                continue;
            }
            seq = format!("{prefix}>{seq}");
        }
        seq
    }
}

/// File stem of the current executable, or `"ferry"` if it can't be read.
pub fn process_name() -> String {
    std::env::args()
        .next()
        .as_deref()
        .and_then(|arg0| Path::new(arg0).file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "ferry".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_counter_format() {
        let seqs = SeqGenerator::new("node");
        assert_eq!(seqs.next(&[]), "node[0]");
        assert_eq!(seqs.next(&[]), "node[1]");
    }

    #[test]
    fn test_prefixes_trimmed_and_skipped() {
        let seqs = SeqGenerator::new("node");
        assert_eq!(seqs.next(&["  sess@3 "]), "sess@3>node[0]");
        assert_eq!(seqs.next(&["", "   "]), "node[1]");
        assert_eq!(seqs.next(&["a", "b"]), "b>a>node[2]");
    }

    #[test]
    fn test_independent_generators() {
        let a = SeqGenerator::new("x");
        let b = SeqGenerator::new("x");
        assert_eq!(a.next(&[]), b.next(&[]));
    }

    #[test]
    fn test_concurrent_sequences_are_distinct() {
        let seqs = Arc::new(SeqGenerator::new("node"));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let seqs = Arc::clone(&seqs);
                std::thread::spawn(move || {
                    let prefix = format!("s{t}");
                    (0..250)
                        .map(|_| seqs.next(&[prefix.as_str()]))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counters = HashSet::new();
        for handle in handles {
            for seq in handle.join().unwrap() {
                // Strip the prefix: the counter part alone must be unique.
                let tail = seq.rsplit('>').next().unwrap().to_string();
                assert!(counters.insert(tail), "duplicate sequence {seq}");
            }
        }
        assert_eq!(counters.len(), 2000);
    }

    #[test]
    fn test_process_name_not_empty() {
        assert!(!process_name().is_empty());
        assert!(!SeqGenerator::for_process().name().is_empty());
    }
}
