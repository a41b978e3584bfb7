//! Process-wide record of which physical cameras have an open session.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock, PoisonError};

fn claimed() -> &'static Mutex<HashSet<String>> {
    static CLAIMED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    CLAIMED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Exclusive claim on a device's unique name, released on drop.
#[derive(Debug)]
pub(crate) struct DeviceClaim {
    name: String,
}

impl DeviceClaim {
    /// Claims `name`, or returns `None` if another session holds it.
    pub(crate) fn acquire(name: &str) -> Option<Self> {
        let mut set = claimed().lock().unwrap_or_else(PoisonError::into_inner);
        set.insert(name.to_string()).then(|| Self {
            name: name.to_string(),
        })
    }

    /// Whether `name` is currently claimed.
    pub(crate) fn is_claimed(name: &str) -> bool {
        claimed()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        claimed()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive_until_dropped() {
        let name = "claim-test DMK 33UJ003";
        let first = DeviceClaim::acquire(name).unwrap();
        assert!(DeviceClaim::acquire(name).is_none());
        assert!(DeviceClaim::is_claimed(name));

        drop(first);
        assert!(!DeviceClaim::is_claimed(name));
        assert!(DeviceClaim::acquire(name).is_some());
    }
}
