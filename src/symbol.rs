//! # Symbol
//!
//! The process-wide symbol intern table. Every symbol name maps to a small
//! integer id; all attribute and global dispatch happens on ids, never on
//! strings. Ids are assigned once and never change, and the table never
//! shrinks.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

pub type SymId = u32;

struct InternTable {
    ids: HashMap<String, SymId>,
    names: Vec<String>,
}

static INTERN: Lazy<Mutex<InternTable>> = Lazy::new(|| {
    Mutex::new(InternTable {
        ids: HashMap::new(),
        names: Vec::new(),
    })
});

/// Intern a name, returning its id. Re-interning the same name returns the
/// same id on every thread.
pub fn intern(name: &str) -> SymId {
    let mut table = INTERN.lock();
    if let Some(id) = table.ids.get(name) {
        return *id;
    }
    let id = table.names.len() as SymId;
    table.names.push(name.to_owned());
    table.ids.insert(name.to_owned(), id);
    id
}

/// Look up the name of an assigned id.
pub fn name_of(id: SymId) -> Option<String> {
    INTERN.lock().names.get(id as usize).cloned()
}

/// Like [`name_of`], but always printable. Unassigned ids only show up when
/// bytecode was corrupted or produced by another process.
pub fn name_or_placeholder(id: SymId) -> String {
    name_of(id).unwrap_or_else(|| format!("#<sym:{id}>"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let a = intern("interned-once");
        let b = intern("interned-once");
        assert_eq!(a, b);
    }

    #[test]
    fn test_name_round_trip() {
        let id = intern("round-trip-name");
        assert_eq!(name_of(id), Some("round-trip-name".to_owned()));
        assert_eq!(intern(&name_of(id).unwrap()), id);
    }

    #[test]
    fn test_distinct_names_get_distinct_ids() {
        assert_ne!(intern("left-name"), intern("right-name"));
    }

    #[test]
    fn test_concurrent_intern_agrees() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| intern("shared-across-threads")))
            .collect();
        let ids: Vec<SymId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }
}
