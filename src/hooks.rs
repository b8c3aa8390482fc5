// src/hooks.rs

//! Interception plumbing for callbacks that carry no user data.
//!
//! Toolkit flush callbacks and host entry-point hooks are plain `fn` pointers,
//! so they cannot close over the object they belong to. Two small tables stand
//! in for the usual "global pointer to the instance" trick:
//!
//! - `InstanceRegistry`: key (a display handle, a hooked symbol) -> weak
//!   reference to the live object. Populated at initialization, cleared at
//!   teardown, so "nobody home" is an explicit branch.
//! - `HookTable`: hooked symbol -> (original, replacement) pair, so a
//!   replacement can forward to the function it displaced.

use log::{debug, trace};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::error::OverlayError;

/// Non-owning map from callback identity to the object that serves it.
pub struct InstanceRegistry<K, T: ?Sized> {
    slots: Mutex<HashMap<K, Weak<T>>>,
}

impl<K, T> InstanceRegistry<K, T>
where
    K: Eq + Hash + Copy + std::fmt::Debug,
    T: ?Sized,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<K, Weak<T>>> {
        // A panic while holding this lock cannot leave the map half-updated.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Binds `key` to `instance`. A key still bound to a live instance is
    /// refused; one whose instance is gone is silently reused.
    pub fn register(&self, key: K, instance: &Arc<T>) -> Result<(), OverlayError> {
        let mut slots = self.slots();
        if slots.get(&key).is_some_and(|weak| weak.strong_count() > 0) {
            return Err(OverlayError::AlreadyRegistered(format!("{key:?}")));
        }
        slots.insert(key, Arc::downgrade(instance));
        debug!("InstanceRegistry: registered {:?}", key);
        Ok(())
    }

    pub fn unregister(&self, key: K) {
        if self.slots().remove(&key).is_some() {
            debug!("InstanceRegistry: unregistered {:?}", key);
        }
    }

    /// The live instance for `key`, if any. Callbacks that can simply do
    /// nothing when their owner is gone use this.
    pub fn lookup(&self, key: K) -> Option<Arc<T>> {
        let instance = self.slots().get(&key).and_then(Weak::upgrade);
        if instance.is_none() {
            trace!("InstanceRegistry: no live instance for {:?}", key);
        }
        instance
    }

    /// The live instance for `key`, or `NoLiveInstance`. For hooks that cannot
    /// produce a meaningful result without one.
    pub fn require(&self, key: K) -> Result<Arc<T>, OverlayError> {
        self.lookup(key)
            .ok_or_else(|| OverlayError::NoLiveInstance(format!("{key:?}")))
    }

    pub fn is_registered(&self, key: K) -> bool {
        self.lookup(key).is_some()
    }
}

impl<K, T> Default for InstanceRegistry<K, T>
where
    K: Eq + Hash + Copy + std::fmt::Debug,
    T: ?Sized,
{
    fn default() -> Self {
        Self::new()
    }
}

/// The function a hook displaced and the one now installed in its place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookEntry<F> {
    pub original: F,
    pub replacement: F,
}

/// Hooked symbols, each with its original and replacement callables.
pub struct HookTable<F: Copy> {
    entries: Mutex<HashMap<&'static str, HookEntry<F>>>,
}

impl<F: Copy> HookTable<F> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<&'static str, HookEntry<F>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a hook on `symbol`. Hooking the same symbol twice would lose
    /// the real original, so it is refused.
    pub fn install(&self, symbol: &'static str, original: F, replacement: F) -> Result<(), OverlayError> {
        let mut entries = self.entries();
        if entries.contains_key(symbol) {
            return Err(OverlayError::AlreadyRegistered(symbol.to_string()));
        }
        entries.insert(
            symbol,
            HookEntry {
                original,
                replacement,
            },
        );
        debug!("HookTable: installed hook on '{}'", symbol);
        Ok(())
    }

    pub fn uninstall(&self, symbol: &'static str) -> Option<HookEntry<F>> {
        let entry = self.entries().remove(symbol);
        if entry.is_some() {
            debug!("HookTable: removed hook on '{}'", symbol);
        }
        entry
    }

    pub fn entry(&self, symbol: &'static str) -> Option<HookEntry<F>> {
        self.entries().get(symbol).copied()
    }

    pub fn original(&self, symbol: &'static str) -> Option<F> {
        self.entry(symbol).map(|e| e.original)
    }

    pub fn replacement(&self, symbol: &'static str) -> Option<F> {
        self.entry(symbol).map(|e| e.replacement)
    }
}

impl<F: Copy> Default for HookTable<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_follows_the_instance_lifetime() {
        let registry: InstanceRegistry<u32, String> = InstanceRegistry::new();
        let owner = Arc::new("renderer".to_string());
        registry.register(7, &owner).unwrap();
        assert_eq!(registry.lookup(7).as_deref(), Some(&"renderer".to_string()));

        drop(owner);
        assert!(registry.lookup(7).is_none());
        assert_eq!(
            registry.require(7).unwrap_err(),
            OverlayError::NoLiveInstance("7".into())
        );
    }

    #[test]
    fn live_keys_cannot_be_rebound_but_dead_ones_can() {
        let registry: InstanceRegistry<u32, u8> = InstanceRegistry::new();
        let first = Arc::new(1u8);
        registry.register(1, &first).unwrap();
        assert!(registry.register(1, &Arc::new(2u8)).is_err());

        drop(first);
        let second = Arc::new(3u8);
        registry.register(1, &second).unwrap();
        assert_eq!(registry.require(1).map(|v| *v), Ok(3));

        registry.unregister(1);
        assert!(!registry.is_registered(1));
    }

    #[test]
    fn unsized_instances_are_supported() {
        trait Named: Send + Sync {
            fn name(&self) -> &'static str;
        }
        struct Pen;
        impl Named for Pen {
            fn name(&self) -> &'static str {
                "pen"
            }
        }

        let registry: InstanceRegistry<&'static str, dyn Named> = InstanceRegistry::new();
        let pen: Arc<dyn Named> = Arc::new(Pen);
        registry.register("pen", &pen).unwrap();
        assert_eq!(registry.require("pen").unwrap().name(), "pen");
    }

    fn answer() -> u32 {
        42
    }

    fn doubled() -> u32 {
        answer() * 2
    }

    #[test]
    fn hook_table_keeps_original_and_replacement() {
        let table: HookTable<fn() -> u32> = HookTable::new();
        table.install("answer", answer, doubled).unwrap();

        assert_eq!(table.original("answer").map(|f| f()), Some(42));
        assert_eq!(table.replacement("answer").map(|f| f()), Some(84));
        assert!(table.install("answer", answer, answer).is_err());

        assert!(table.uninstall("answer").is_some());
        assert!(table.entry("answer").is_none());
    }
}
