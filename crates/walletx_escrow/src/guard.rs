use std::collections::HashSet;

use parking_lot::Mutex;

/// Tracks operations currently in flight, keyed by caller-chosen strings.
#[derive(Debug, Default)]
pub struct InFlight {
    active: Mutex<HashSet<String>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, or `None` if another operation holds it. The key is
    /// released when the returned slot is dropped.
    pub fn try_acquire(&self, key: impl Into<String>) -> Option<InFlightSlot<'_>> {
        let key = key.into();
        if self.active.lock().insert(key.clone()) {
            Some(InFlightSlot { owner: self, key })
        } else {
            None
        }
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.active.lock().contains(key)
    }
}

/// Held for the duration of one operation.
#[derive(Debug)]
pub struct InFlightSlot<'a> {
    owner: &'a InFlight,
    key: String,
}

impl InFlightSlot<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.owner.active.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_until_release() {
        let guard = InFlight::new();
        let slot = guard.try_acquire("settle:42").unwrap();
        assert_eq!(slot.key(), "settle:42");
        assert!(guard.try_acquire("settle:42").is_none());
        assert!(guard.try_acquire("settle:43").is_some());

        drop(slot);
        assert!(!guard.is_active("settle:42"));
        assert!(guard.try_acquire("settle:42").is_some());
    }
}
