//! Per-contact suppression of automated replies.

use std::{
    collections::{HashMap, HashSet},
    sync::RwLock,
};

/// Normalized words that lift a pause. The triggering message is not
/// swallowed; it continues to the rule engine.
pub const UNPAUSE_WORDS: [&str; 7] = [
    "menu", "ajuda", "inicio", "start", "voltar", "sair", "opcoes",
];

/// Per-account sets of paused contact addresses.
#[derive(Default)]
pub struct PauseRegistry {
    inner: RwLock<HashMap<String, HashSet<String>>>,
}

impl PauseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self, account_id: &str, address: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .get(account_id)
            .is_some_and(|set| set.contains(address))
    }

    /// Idempotent insert.
    pub fn pause(&self, account_id: &str, address: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .entry(account_id.to_string())
            .or_default()
            .insert(address.to_string());
    }

    /// Lift the pause when `normalized_message` is one of the unpause words.
    /// Returns true when the pause was cleared.
    pub fn try_unpause(&self, account_id: &str, address: &str, normalized_message: &str) -> bool {
        if !UNPAUSE_WORDS.contains(&normalized_message) {
            return false;
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(set) = inner.get_mut(account_id) {
            set.remove(address);
        }
        true
    }

    /// Drop all pause state for an account (session teardown).
    pub fn remove_account(&self, account_id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.remove(account_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zapflow_common::text::normalize;

    #[test]
    fn pause_is_idempotent_and_scoped_per_account() {
        let reg = PauseRegistry::new();
        reg.pause("a", "555@c.us");
        reg.pause("a", "555@c.us");
        assert!(reg.is_paused("a", "555@c.us"));
        assert!(!reg.is_paused("b", "555@c.us"));
    }

    #[test]
    fn vocabulary_word_clears_pause() {
        let reg = PauseRegistry::new();
        reg.pause("a", "555@c.us");
        assert!(reg.try_unpause("a", "555@c.us", &normalize("MENU")));
        assert!(!reg.is_paused("a", "555@c.us"));
    }

    #[test]
    fn accented_vocabulary_forms_clear_pause() {
        let reg = PauseRegistry::new();
        for word in ["Opções", "Início", "AJUDA"] {
            reg.pause("a", "555@c.us");
            assert!(reg.try_unpause("a", "555@c.us", &normalize(word)), "{word}");
            assert!(!reg.is_paused("a", "555@c.us"));
        }
    }

    #[test]
    fn non_vocabulary_word_keeps_pause() {
        let reg = PauseRegistry::new();
        reg.pause("a", "555@c.us");
        assert!(!reg.try_unpause("a", "555@c.us", &normalize("preço")));
        assert!(reg.is_paused("a", "555@c.us"));
    }

    #[test]
    fn remove_account_clears_all_contacts() {
        let reg = PauseRegistry::new();
        reg.pause("a", "1");
        reg.pause("a", "2");
        reg.remove_account("a");
        assert!(!reg.is_paused("a", "1"));
        assert!(!reg.is_paused("a", "2"));
    }
}
