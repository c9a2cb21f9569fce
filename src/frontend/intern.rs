use std::sync::{Arc, PoisonError, RwLock};

use hashbrown::HashMap;
use once_cell::sync::Lazy;

/// Process-wide table of identifier strings.
///
/// Strings are leaked on insertion so that an [`InternedSymbol`] can hand out
/// `&'static str` without holding the lock. Identifiers are few and short, so
/// the leak is bounded by the vocabulary of the compiled sources.
#[derive(Debug, Default)]
pub struct InterningTable {
    inner: RwLock<InterningTableInner>,
}

#[derive(Debug, Default)]
struct InterningTableInner {
    strings: Vec<&'static str>,
    indices: HashMap<&'static str, u32>,
}

pub static INTERNING_TABLE: Lazy<Arc<InterningTable>> = Lazy::new(Default::default);

impl InterningTable {
    pub fn get(&self, index: u32) -> Option<&'static str> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        inner.strings.get(index as usize).copied()
    }

    pub fn insert_if_absent(&self, string: &str) -> u32 {
        if let Some(index) = self.index_of(string) {
            return index;
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        // Another thread may have won the race between the two locks
        if let Some(index) = inner.indices.get(string) {
            return *index;
        }

        let leaked: &'static str = Box::leak(string.to_owned().into_boxed_str());
        let index = inner.strings.len() as u32;

        inner.strings.push(leaked);
        inner.indices.insert(leaked, index);

        index
    }

    pub fn index_of(&self, string: &str) -> Option<u32> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        inner.indices.get(string).copied()
    }
}

/// An index into the string interning table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InternedSymbol(u32);

impl InternedSymbol {
    pub fn new(value: &str) -> Self {
        let index = INTERNING_TABLE.insert_if_absent(value);

        Self(index)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn value(&self) -> &'static str {
        // Entries are never removed, so every handed out index stays valid
        INTERNING_TABLE.get(self.0).unwrap_or("<invalid symbol>")
    }
}

impl core::fmt::Debug for InternedSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("InternedSymbol")
            .field(&self.0)
            .field(&self.value())
            .finish()
    }
}

impl core::fmt::Display for InternedSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let a = InternedSymbol::new("stable_name");
        let b = InternedSymbol::new("stable_name");
        let c = InternedSymbol::new("other_name");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.value(), "stable_name");
        assert_eq!(c.to_string(), "other_name");
    }
}
