//! Control-plane flag store.
//!
//! Small in-process key-value store for the operator-facing switches the
//! capture loop and alert engine poll: is the camera supposed to run, are
//! notifications enabled, should frames be saved, is training capture on.
//! Toggled through the HTTP API, read everywhere else.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const CAPTURE_ENABLED: &str = "capture_enabled";
pub const NOTIFICATIONS_ENABLED: &str = "notifications_enabled";
pub const SAVING_ENABLED: &str = "saving_enabled";
pub const TRAINING_ENABLED: &str = "training_enabled";
pub const SENSORS_ENABLED: &str = "sensors_enabled";
/// "Who is home" auto-detection; read by external presence tooling.
pub const AUTO_DETECT_ENABLED: &str = "auto_detect_enabled";

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlValue {
    Flag(bool),
    Count(i64),
}

/// Clone-cheap shared store. All readers see a write immediately.
#[derive(Clone, Default)]
pub struct ControlStore {
    values: Arc<Mutex<HashMap<String, ControlValue>>>,
}

impl ControlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store prepopulated with the daemon's standard switches: capture
    /// off, notifications and saving on.
    pub fn with_defaults() -> Self {
        let store = Self::new();
        store.set_flag(CAPTURE_ENABLED, false);
        store.set_flag(NOTIFICATIONS_ENABLED, true);
        store.set_flag(SAVING_ENABLED, true);
        store.set_flag(TRAINING_ENABLED, false);
        store.set_flag(SENSORS_ENABLED, false);
        store.set_flag(AUTO_DETECT_ENABLED, false);
        store
    }

    pub fn set_flag(&self, key: &str, value: bool) {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), ControlValue::Flag(value));
    }

    /// Read a boolean switch. Unset or non-flag keys read as false.
    pub fn flag(&self, key: &str) -> bool {
        matches!(
            self.values
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(key),
            Some(ControlValue::Flag(true))
        )
    }

    pub fn set_count(&self, key: &str, value: i64) {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), ControlValue::Count(value));
    }

    pub fn count(&self, key: &str) -> i64 {
        match self
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
        {
            Some(ControlValue::Count(n)) => *n,
            _ => 0,
        }
    }

    /// Snapshot of every flag, for the status endpoint.
    pub fn flags_snapshot(&self) -> Vec<(String, bool)> {
        let mut flags: Vec<(String, bool)> = self
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(|(k, v)| match v {
                ControlValue::Flag(b) => Some((k.clone(), *b)),
                ControlValue::Count(_) => None,
            })
            .collect();
        flags.sort();
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_flag_reads_false() {
        let store = ControlStore::new();
        assert!(!store.flag(CAPTURE_ENABLED));
    }

    #[test]
    fn writes_are_visible_to_clones() {
        let store = ControlStore::new();
        let reader = store.clone();
        store.set_flag(CAPTURE_ENABLED, true);
        assert!(reader.flag(CAPTURE_ENABLED));
        store.set_flag(CAPTURE_ENABLED, false);
        assert!(!reader.flag(CAPTURE_ENABLED));
    }

    #[test]
    fn defaults_leave_capture_off() {
        let store = ControlStore::with_defaults();
        assert!(!store.flag(CAPTURE_ENABLED));
        assert!(store.flag(NOTIFICATIONS_ENABLED));
        assert!(store.flag(SAVING_ENABLED));
    }

    #[test]
    fn counts_and_flags_do_not_collide() {
        let store = ControlStore::new();
        store.set_count("restarts", 3);
        assert_eq!(store.count("restarts"), 3);
        assert!(!store.flag("restarts"));
    }
}
