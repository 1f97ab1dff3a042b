//! Live dialogue sessions: who we are talking to, and when we may reply.

use agora_core::{ActionCandidate, Perception};
use std::collections::{HashMap, HashSet};

pub const FALLBACK_REPLY: &str =
    "Te escucho. Dame un minuto y te respondo bien, quiero seguir esta conversación contigo.";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub last_response_at: Option<i64>,
    pub last_outgoing: Option<String>,
    pub last_incoming: Option<String>,
    /// Incoming text already answered; a second delivery is ignored.
    pub last_handled: Option<String>,
    pub repeat_count: u32,
    /// Incoming text the fallback reply was last sent for.
    pub last_fallback_for: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationTracker {
    by_other: HashMap<String, String>,
    sessions: HashMap<String, SessionState>,
    cooldown_ms: i64,
}

impl ConversationTracker {
    pub fn new(cooldown_ms: i64) -> Self {
        Self {
            cooldown_ms: cooldown_ms.max(0),
            ..Self::default()
        }
    }

    pub fn started(&mut self, other_id: &str, conversation_id: &str) {
        self.by_other
            .insert(other_id.to_string(), conversation_id.to_string());
    }

    pub fn ended(&mut self, conversation_id: &str) {
        self.by_other.retain(|_, cid| cid != conversation_id);
        self.sessions.remove(conversation_id);
    }

    pub fn conversation_with(&self, other_id: &str) -> Option<&str> {
        self.by_other.get(other_id).map(String::as_str)
    }

    pub fn is_tracking(&self, other_id: &str) -> bool {
        self.by_other.contains_key(other_id)
    }

    pub fn is_empty(&self) -> bool {
        self.by_other.is_empty()
    }

    /// Counterpart id to conversation id.
    pub fn mapping(&self) -> &HashMap<String, String> {
        &self.by_other
    }

    pub fn session(&self, conversation_id: &str) -> Option<&SessionState> {
        self.sessions.get(conversation_id)
    }

    /// Reply only after the cooldown, and never twice to the same text.
    pub fn should_reply(&self, conversation_id: &str, incoming: &str, now_ms: i64) -> bool {
        let Some(session) = self.sessions.get(conversation_id) else {
            return true;
        };
        if self.cooldown_ms > 0 {
            if let Some(at) = session.last_response_at {
                if now_ms - at < self.cooldown_ms {
                    return false;
                }
            }
        }
        session.last_handled.as_deref() != Some(incoming)
    }

    pub fn record_reply(&mut self, conversation_id: &str, incoming: &str, outgoing: Option<&str>, now_ms: i64) {
        let session = self.sessions.entry(conversation_id.to_string()).or_default();
        session.last_response_at = Some(now_ms);
        session.last_handled = Some(incoming.to_string());
        session.last_incoming = Some(incoming.to_string());
        if let Some(text) = outgoing {
            if session.last_outgoing.as_deref() == Some(text) {
                session.repeat_count += 1;
            } else {
                session.repeat_count = 0;
            }
            session.last_outgoing = Some(text.to_string());
        }
    }

    /// Forget the last response time so the next message retries at once.
    pub fn clear_response_stamp(&mut self, conversation_id: &str) {
        if let Some(session) = self.sessions.get_mut(conversation_id) {
            session.last_response_at = None;
        }
    }

    /// Deterministic reply into `conversation_id`, unless its latest
    /// incoming text was already handled or already got a fallback. A
    /// returned reply is marked so the same text never gets a second one.
    pub fn fallback_reply(
        &mut self,
        perception: &Perception,
        conversation_id: &str,
        agent_id: &str,
    ) -> Option<ActionCandidate> {
        let conversation = perception
            .own_live_conversations(agent_id)
            .into_iter()
            .find(|c| c.id == conversation_id)?;
        let incoming = conversation.latest_incoming(agent_id)?;
        let text = incoming.message.trim();
        if text.is_empty() {
            return None;
        }
        if let Some(session) = self.sessions.get(conversation_id) {
            let handled = session.last_incoming.as_deref() == Some(text)
                && session.last_handled.as_deref() == Some(text);
            if handled || session.last_fallback_for.as_deref() == Some(text) {
                return None;
            }
        }
        let reply = ActionCandidate::conversation_message(conversation_id, FALLBACK_REPLY).ok()?;
        self.sessions
            .entry(conversation_id.to_string())
            .or_default()
            .last_fallback_for = Some(text.to_string());
        Some(reply)
    }

    /// Drop mappings whose conversation is no longer reported live.
    pub fn retain_active(&mut self, active_ids: &HashSet<&str>) {
        let before = self.by_other.len();
        self.by_other.retain(|_, cid| active_ids.contains(cid.as_str()));
        self.sessions.retain(|cid, _| active_ids.contains(cid.as_str()));
        let dropped = before - self.by_other.len();
        if dropped > 0 {
            tracing::debug!(dropped, "conversation mappings purged");
        }
    }
}

/// Conversations quiet for longer than `stale_ms`.
pub fn stale_conversation_ids(perception: &Perception, now_ms: i64, stale_ms: i64) -> Vec<String> {
    perception
        .conversations
        .iter()
        .filter(|c| !c.id.is_empty())
        .filter(|c| match c.last_seen_ms() {
            Some(at) => now_ms - at > stale_ms,
            None => false,
        })
        .map(|c| c.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{ConversationLine, ConversationView};

    fn conversation(id: &str, lines: &[(&str, &str, i64)], last_activity: i64) -> ConversationView {
        ConversationView {
            id: id.into(),
            participants: vec!["me".into(), "a2".into()],
            messages: lines
                .iter()
                .map(|(from, message, timestamp)| ConversationLine {
                    from: Some(from.to_string()),
                    message: message.to_string(),
                    timestamp: *timestamp,
                })
                .collect(),
            active: true,
            last_activity: Some(last_activity),
            started_at: None,
        }
    }

    #[test]
    fn test_same_text_is_answered_once() {
        let mut tracker = ConversationTracker::new(0);
        assert!(tracker.should_reply("c1", "hola", 1_000));
        tracker.record_reply("c1", "hola", Some("¡Hola! ¿Qué tal?"), 1_000);
        assert!(!tracker.should_reply("c1", "hola", 1_500));
        assert!(tracker.should_reply("c1", "¿vamos al café?", 2_000));
    }

    #[test]
    fn test_cooldown_blocks_quick_replies() {
        let mut tracker = ConversationTracker::new(5_000);
        tracker.record_reply("c1", "hola", Some("hola"), 10_000);
        assert!(!tracker.should_reply("c1", "otra cosa", 12_000));
        assert!(tracker.should_reply("c1", "otra cosa", 15_000));
        tracker.clear_response_stamp("c1");
        assert!(tracker.should_reply("c1", "otra cosa", 10_001));
    }

    #[test]
    fn test_repeat_count_tracks_identical_outgoing() {
        let mut tracker = ConversationTracker::new(0);
        tracker.record_reply("c1", "a", Some("vale"), 1);
        tracker.record_reply("c1", "b", Some("vale"), 2);
        assert_eq!(tracker.session("c1").unwrap().repeat_count, 1);
        tracker.record_reply("c1", "c", Some("de acuerdo"), 3);
        assert_eq!(tracker.session("c1").unwrap().repeat_count, 0);
    }

    #[test]
    fn test_fallback_is_not_repeated_for_same_text() {
        let mut tracker = ConversationTracker::new(0);
        let perception = Perception {
            conversations: vec![conversation("c1", &[("a2", "¿me ayudas?", 5)], 5)],
            ..Default::default()
        };
        let action = tracker.fallback_reply(&perception, "c1", "me").unwrap();
        assert_eq!(action.target(), Some("c1"));
        assert!(tracker.fallback_reply(&perception, "c1", "me").is_none());
    }

    #[test]
    fn test_fallback_answers_the_requested_conversation() {
        let mut tracker = ConversationTracker::new(0);
        let perception = Perception {
            conversations: vec![
                conversation("c1", &[("a2", "¿me oyes?", 50)], 50),
                conversation("c2", &[("a3", "hola", 5)], 5),
            ],
            ..Default::default()
        };
        let action = tracker.fallback_reply(&perception, "c2", "me").unwrap();
        assert_eq!(action.target(), Some("c2"));
        assert_eq!(tracker.session("c2").unwrap().last_fallback_for.as_deref(), Some("hola"));
        assert!(tracker.session("c1").is_none());
        assert!(tracker.fallback_reply(&perception, "c1", "me").is_some());
    }

    #[test]
    fn test_mappings_follow_live_sessions() {
        let mut tracker = ConversationTracker::new(0);
        tracker.started("a2", "c1");
        tracker.started("a3", "c2");
        let live: HashSet<&str> = ["c2"].into_iter().collect();
        tracker.retain_active(&live);
        assert!(!tracker.is_tracking("a2"));
        assert_eq!(tracker.conversation_with("a3"), Some("c2"));
        tracker.ended("c2");
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_stale_detection() {
        let perception = Perception {
            conversations: vec![
                conversation("old", &[], 0),
                conversation("fresh", &[], 100_000),
            ],
            ..Default::default()
        };
        assert_eq!(stale_conversation_ids(&perception, 130_000, 120_000), vec!["old"]);
    }
}
