//! Last-writer-wins replicated map

use crate::id::Stamp;
use crdts::LWWReg;
use std::collections::BTreeMap;

/// Map of independently replicated registers
///
/// Each key converges to the value written with the greatest [`Stamp`].
/// Keys are never removed; a register may hold a "cleared" value instead.
#[derive(Debug, Clone)]
pub struct ReplicatedMap<V> {
    entries: BTreeMap<String, LWWReg<V, Stamp>>,
}

impl<V> Default for ReplicatedMap<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V: Clone + PartialEq> ReplicatedMap<V> {
    /// Empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value for `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key).map(|reg| &reg.val)
    }

    /// Stamp of the winning write for `key`
    #[must_use]
    pub fn stamp(&self, key: &str) -> Option<&Stamp> {
        self.entries.get(key).map(|reg| &reg.marker)
    }

    /// Iterate keys and current values
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, reg)| (k.as_str(), &reg.val))
    }

    /// Number of keys ever written
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key was ever written
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offer a write; returns `true` if it won
    pub(crate) fn apply(&mut self, key: String, value: V, stamp: Stamp) -> bool {
        match self.entries.get_mut(&key) {
            None => {
                self.entries.insert(
                    key,
                    LWWReg {
                        val: value,
                        marker: stamp,
                    },
                );
                true
            }
            Some(reg) => {
                if reg.marker >= stamp {
                    return false;
                }
                reg.update(value, stamp);
                true
            }
        }
    }
}
