//! UI preference storage (theme and locale).

use std::sync::Arc;
use tracing::warn;

use crate::storage::{StorageAdapter, KEY_LOCALE, KEY_THEME};

const DEFAULT_THEME: &str = "light";
const DEFAULT_LOCALE: &str = "en";

pub struct Preferences {
    storage: Arc<dyn StorageAdapter>,
}

impl Preferences {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self { storage }
    }

    pub fn theme(&self) -> String {
        self.storage
            .get(KEY_THEME)
            .unwrap_or_else(|| DEFAULT_THEME.to_string())
    }

    pub fn set_theme(&self, theme: &str) {
        if let Err(e) = self.storage.set(KEY_THEME, theme) {
            warn!(error = %e, "prefs: failed to persist theme");
        }
    }

    pub fn locale(&self) -> String {
        self.storage
            .get(KEY_LOCALE)
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string())
    }

    pub fn set_locale(&self, locale: &str) {
        if let Err(e) = self.storage.set(KEY_LOCALE, locale) {
            warn!(error = %e, "prefs: failed to persist locale");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_defaults_and_roundtrip() {
        let prefs = Preferences::new(Arc::new(MemoryStorage::new()));
        assert_eq!(prefs.theme(), "light");
        assert_eq!(prefs.locale(), "en");

        prefs.set_theme("dark");
        prefs.set_locale("el");
        assert_eq!(prefs.theme(), "dark");
        assert_eq!(prefs.locale(), "el");
    }
}
