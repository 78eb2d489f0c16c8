//! Shared table of 1:1 key modifications
//!
//! Control-plane callers (the control socket, startup configuration) write
//! the table from arbitrary threads while the remapping engine reads it on the
//! device event path, so it carries its own lock independent of the
//! grabber's serialization context.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::key_code::KeyCode;

/// Cheaply cloneable handle to the shared from -> to table.
#[derive(Debug, Clone, Default)]
pub struct SimpleModifications {
    table: Arc<Mutex<HashMap<KeyCode, KeyCode>>>,
}

impl SimpleModifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.table.lock().clear();
    }

    /// Map `from` to `to`, replacing any existing mapping for `from`.
    pub fn set(&self, from: KeyCode, to: KeyCode) {
        self.table.lock().insert(from, to);
    }

    /// Replacement for `from`, if one is configured.
    pub fn get(&self, from: KeyCode) -> Option<KeyCode> {
        self.table.lock().get(&from).copied()
    }

    /// Apply the table to `key`, returning the key itself when unmapped.
    pub fn apply(&self, key: KeyCode) -> KeyCode {
        self.get(key).unwrap_or(key)
    }

    /// Copy of every entry, sorted by source key.
    pub fn snapshot(&self) -> Vec<(KeyCode, KeyCode)> {
        let mut entries: Vec<_> = self
            .table
            .lock()
            .iter()
            .map(|(from, to)| (*from, *to))
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const K1: KeyCode = KeyCode(0x04);
    const K2: KeyCode = KeyCode(0x05);
    const K3: KeyCode = KeyCode(0x06);

    #[test]
    fn test_clear_then_add() {
        let table = SimpleModifications::new();
        table.set(K3, K3);
        table.clear();
        table.set(K1, K2);
        assert_eq!(table.snapshot(), vec![(K1, K2)]);
    }

    #[test]
    fn test_last_write_wins() {
        let table = SimpleModifications::new();
        table.set(K1, K2);
        table.set(K1, K3);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(K1), Some(K3));
    }

    #[test]
    fn test_apply_passes_unmapped_keys_through() {
        let table = SimpleModifications::new();
        table.set(K1, K2);
        assert_eq!(table.apply(K1), K2);
        assert_eq!(table.apply(K3), K3);
    }

    #[test]
    fn test_clones_share_state() {
        let table = SimpleModifications::new();
        let other = table.clone();
        other.set(K1, K2);
        assert_eq!(table.get(K1), Some(K2));
    }

    #[test]
    fn test_concurrent_writers_never_corrupt() {
        let table = SimpleModifications::new();

        std::thread::scope(|scope| {
            for writer in 0..4u32 {
                let table = table.clone();
                scope.spawn(move || {
                    for i in 0..500u32 {
                        if i % 97 == 0 {
                            table.clear();
                        }
                        table.set(KeyCode(0x04 + (i % 8)), KeyCode(0x100 + writer));
                    }
                });
            }
        });

        // Every surviving entry is one some writer actually stored, and the
        // map never holds two entries for one source key.
        let entries = table.snapshot();
        assert!(entries.len() <= 8);
        for (from, to) in &entries {
            assert!((0x04..0x0C).contains(&from.0));
            assert!((0x100..0x104).contains(&to.0));
        }
        let mut sources: Vec<_> = entries.iter().map(|(from, _)| *from).collect();
        sources.dedup();
        assert_eq!(sources.len(), entries.len());
    }
}
