//! Keyword rule engine.
//!
//! Pure evaluation of an ordered rule list against one inbound message.
//! The engine is total: it always produces a reply (falling back to the
//! configured default, then to a generic string) and never errors on a
//! well-formed config. Side effects requested by a match (pausing the
//! contact, state transitions) are carried in the outcome and applied by
//! the caller.

use {
    serde::{Deserialize, Serialize},
    tracing::warn,
};

use zapflow_common::{MediaRef, text::normalize};

/// Reply used when no rule matches and no default reply is configured.
pub const GENERIC_FALLBACK: &str = "Desculpe, nao entendi. Digite *menu* para ver as opcoes.";

/// One ordered keyword rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Keywords that trigger this rule. Matched as substrings of the
    /// normalized message; the set is a logical OR.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Reply text sent when the rule matches.
    pub reply: String,
    /// Optional media attachment for the reply.
    #[serde(default)]
    pub media: Option<MediaRef>,
    /// Suppress further automated replies to this contact after replying.
    #[serde(default)]
    pub pause_after_reply: bool,
    /// Conversation state label to move the contact to.
    #[serde(default)]
    pub next_state: Option<String>,
}

/// Ordered rule set plus fallback for one account.
///
/// `rules` is kept as raw JSON: configs are written by the dashboard and may
/// be malformed, and a bad config must degrade to the default reply instead
/// of taking the conversational path down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicConfig {
    pub id: String,
    #[serde(default)]
    pub rules: serde_json::Value,
    #[serde(default)]
    pub default_reply: Option<String>,
    /// Augment fallback replies through the AI completion collaborator.
    #[serde(default)]
    pub ai_fallback: bool,
    /// System instruction handed to the AI collaborator on fallback.
    #[serde(default)]
    pub ai_instruction: Option<String>,
}

/// Result of evaluating one message.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub reply: String,
    pub media: Option<MediaRef>,
    pub pause_after_reply: bool,
    pub next_state: Option<String>,
    /// False when the outcome is the default/generic fallback.
    pub matched: bool,
}

impl RuleOutcome {
    fn fallback(config: &LogicConfig) -> Self {
        Self {
            reply: config
                .default_reply
                .clone()
                .unwrap_or_else(|| GENERIC_FALLBACK.to_string()),
            media: None,
            pause_after_reply: false,
            next_state: None,
            matched: false,
        }
    }
}

/// Evaluate a message against a logic config.
///
/// Rules are consulted in declared order; the first rule with any matching
/// keyword wins and later rules are never consulted. A keyword matches when
/// its normalized form is a substring of the normalized message.
pub fn evaluate(message: &str, config: &LogicConfig) -> RuleOutcome {
    let rules: Vec<Rule> = match serde_json::from_value(config.rules.clone()) {
        Ok(rules) => rules,
        Err(e) => {
            warn!(config_id = %config.id, error = %e, "malformed rule list, using default reply");
            return RuleOutcome::fallback(config);
        },
    };

    let normalized = normalize(message);

    for rule in &rules {
        let hit = rule.keywords.iter().any(|kw| {
            let kw = normalize(kw);
            !kw.is_empty() && normalized.contains(&kw)
        });
        if hit {
            return RuleOutcome {
                reply: rule.reply.clone(),
                media: rule.media.clone(),
                pause_after_reply: rule.pause_after_reply,
                next_state: rule.next_state.clone(),
                matched: true,
            };
        }
    }

    RuleOutcome::fallback(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(rules: serde_json::Value, default_reply: Option<&str>) -> LogicConfig {
        LogicConfig {
            id: "cfg1".into(),
            rules,
            default_reply: default_reply.map(String::from),
            ai_fallback: false,
            ai_instruction: None,
        }
    }

    #[test]
    fn substring_match_wins() {
        let c = cfg(
            serde_json::json!([{ "keywords": ["oi"], "reply": "Hello" }]),
            Some("Bye"),
        );
        let out = evaluate("Oi, tudo bem?", &c);
        assert_eq!(out.reply, "Hello");
        assert!(out.matched);
    }

    #[test]
    fn no_match_falls_back_to_default() {
        let c = cfg(
            serde_json::json!([{ "keywords": ["oi"], "reply": "Hello" }]),
            Some("Bye"),
        );
        let out = evaluate("xyz", &c);
        assert_eq!(out.reply, "Bye");
        assert!(!out.matched);
    }

    #[test]
    fn first_match_wins_over_later_rules() {
        let c = cfg(
            serde_json::json!([
                { "keywords": ["preco"], "reply": "first" },
                { "keywords": ["preco", "valor"], "reply": "second" },
            ]),
            None,
        );
        assert_eq!(evaluate("qual o preço e o valor?", &c).reply, "first");
    }

    #[test]
    fn keywords_normalized_like_message() {
        let c = cfg(
            serde_json::json!([{ "keywords": ["PREÇO"], "reply": "tabela" }]),
            None,
        );
        assert_eq!(evaluate("me passa o preco ai", &c).reply, "tabela");
    }

    #[test]
    fn malformed_rules_degrade_to_default() {
        let c = cfg(serde_json::json!({ "not": "a list" }), Some("Bye"));
        let out = evaluate("oi", &c);
        assert_eq!(out.reply, "Bye");
        assert!(!out.matched);
        assert!(!out.pause_after_reply);
    }

    #[test]
    fn missing_default_uses_generic_fallback() {
        let c = cfg(serde_json::json!([]), None);
        assert_eq!(evaluate("anything", &c).reply, GENERIC_FALLBACK);
    }

    #[test]
    fn empty_keyword_never_matches() {
        // An empty keyword would be a substring of everything.
        let c = cfg(
            serde_json::json!([{ "keywords": [""], "reply": "oops" }]),
            Some("Bye"),
        );
        assert_eq!(evaluate("hello", &c).reply, "Bye");
    }

    #[test]
    fn match_carries_side_effect_flags() {
        let c = cfg(
            serde_json::json!([{
                "keywords": ["atendente"],
                "reply": "Transferindo...",
                "pause_after_reply": true,
                "next_state": "human",
                "media": { "url": "https://cdn.example/wait.png", "mime_type": "image/png" },
            }]),
            None,
        );
        let out = evaluate("quero falar com um ATENDENTE", &c);
        assert!(out.pause_after_reply);
        assert_eq!(out.next_state.as_deref(), Some("human"));
        assert_eq!(
            out.media,
            Some(MediaRef {
                url: "https://cdn.example/wait.png".into(),
                mime_type: "image/png".into(),
            })
        );
    }
}
