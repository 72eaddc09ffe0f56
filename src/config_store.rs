//! Config Store: global compatibility mode plus per-subject overrides

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::compatibility::CompatibilityMode;

#[derive(Debug, Default)]
pub struct ConfigStore {
    global: RwLock<CompatibilityMode>,
    overrides: DashMap<String, CompatibilityMode>,
}

impl ConfigStore {
    pub fn new(global: CompatibilityMode) -> Self {
        Self {
            global: RwLock::new(global),
            overrides: DashMap::new(),
        }
    }

    pub fn get_global(&self) -> CompatibilityMode {
        *self.global.read()
    }

    pub fn set_global(&self, mode: CompatibilityMode) {
        *self.global.write() = mode;
    }

    /// The subject's own override, without falling back to the global mode
    pub fn subject_override(&self, subject: &str) -> Option<CompatibilityMode> {
        self.overrides.get(subject).map(|mode| *mode)
    }

    pub fn set_subject(&self, subject: &str, mode: CompatibilityMode) {
        self.overrides.insert(subject.to_string(), mode);
    }

    /// Remove an override, returning it
    pub fn delete_subject(&self, subject: &str) -> Option<CompatibilityMode> {
        self.overrides.remove(subject).map(|(_, mode)| mode)
    }

    /// Override if present, otherwise the global mode
    pub fn effective(&self, subject: &str) -> CompatibilityMode {
        self.subject_override(subject).unwrap_or_else(|| self.get_global())
    }

    /// All overrides, sorted by subject
    pub fn overrides(&self) -> Vec<(String, CompatibilityMode)> {
        let mut all: Vec<_> = self
            .overrides
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_defaults_to_none() {
        assert_eq!(ConfigStore::default().get_global(), CompatibilityMode::None);
    }

    #[test]
    fn test_override_wins_over_global() {
        let store = ConfigStore::new(CompatibilityMode::Full);
        assert_eq!(store.effective("s"), CompatibilityMode::Full);
        assert_eq!(store.subject_override("s"), None);

        store.set_subject("s", CompatibilityMode::BackwardTransitive);
        assert_eq!(store.effective("s"), CompatibilityMode::BackwardTransitive);
        assert_eq!(store.effective("other"), CompatibilityMode::Full);

        store.set_global(CompatibilityMode::Forward);
        assert_eq!(store.effective("s"), CompatibilityMode::BackwardTransitive);

        assert_eq!(store.delete_subject("s"), Some(CompatibilityMode::BackwardTransitive));
        assert_eq!(store.effective("s"), CompatibilityMode::Forward);
    }
}
