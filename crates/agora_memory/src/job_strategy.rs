//! Job-progression breaker.
//!
//! Classifies apply/vote results and blocks further attempts for a
//! cooldown that depends on the failure class.

use agora_core::Reply;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

const MIN_BLOCK_MS: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockCode {
    InsufficientTrust,
    InsufficientReputation,
    AlreadyAppliedOrVoted,
    ForbiddenPolicy,
    InvalidJobTransition,
    JobProgressBlocked,
}

impl BlockCode {
    /// First match wins: message substrings, then status codes.
    pub fn classify(error: &str, status: Option<u16>) -> Self {
        let error = error.to_lowercase();
        if error.contains("not enough trust") {
            BlockCode::InsufficientTrust
        } else if error.contains("insufficient reputation") {
            BlockCode::InsufficientReputation
        } else if error.contains("already") {
            BlockCode::AlreadyAppliedOrVoted
        } else if status == Some(403) {
            BlockCode::ForbiddenPolicy
        } else if status == Some(400) {
            BlockCode::InvalidJobTransition
        } else {
            BlockCode::JobProgressBlocked
        }
    }

    pub fn cooldown(&self) -> Duration {
        let secs = match self {
            BlockCode::InsufficientTrust => 180,
            BlockCode::InsufficientReputation => 240,
            BlockCode::AlreadyAppliedOrVoted => 120,
            BlockCode::ForbiddenPolicy => 240,
            BlockCode::InvalidJobTransition => 120,
            BlockCode::JobProgressBlocked => 90,
        };
        Duration::from_secs(secs)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockCode::InsufficientTrust => "INSUFFICIENT_TRUST",
            BlockCode::InsufficientReputation => "INSUFFICIENT_REPUTATION",
            BlockCode::AlreadyAppliedOrVoted => "ALREADY_APPLIED_OR_VOTED",
            BlockCode::ForbiddenPolicy => "FORBIDDEN_POLICY",
            BlockCode::InvalidJobTransition => "INVALID_JOB_TRANSITION",
            BlockCode::JobProgressBlocked => "JOB_PROGRESS_BLOCKED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Apply,
    Vote,
}

/// Result of feeding one reply to the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Cleared,
    Blocked(BlockCode),
}

/// Success test for ambiguous replies.
///
/// An error means failure; otherwise an explicit `success` flag decides;
/// otherwise a status below 400 is success; with none of these the reply
/// counts as a success.
pub fn reply_succeeded(reply: &Reply) -> bool {
    let (status, error) = reply_status_and_error(reply);
    if error.is_some() {
        return false;
    }
    if let Some(flag) = reply.body.get("success").and_then(Value::as_bool) {
        return flag;
    }
    match status {
        Some(status) => status < 400,
        None => true,
    }
}

// Bodies may wrap the outcome as `{success, result: {...}}`.
fn reply_status_and_error(reply: &Reply) -> (Option<u16>, Option<String>) {
    let nested = reply.body.get("result").filter(|v| v.is_object());
    let lookup = |key: &str| {
        nested
            .and_then(|n| n.get(key))
            .or_else(|| reply.body.get(key))
            .cloned()
    };
    let status = reply
        .status
        .or_else(|| lookup("status").and_then(|v| v.as_u64()).map(|s| s as u16));
    let error = reply
        .error
        .clone()
        .or_else(|| lookup("error").and_then(|v| v.as_str().map(str::to_string)))
        .filter(|e| !e.is_empty());
    (status, error)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobStrategyState {
    pub blocked: bool,
    pub code: Option<BlockCode>,
    pub message: Option<String>,
    pub target_job_id: Option<String>,
    pub last_failure_at_ms: Option<i64>,
    pub blocked_until_ms: i64,
    pub last_apply_at_ms: Option<i64>,
    pub last_vote_at_ms: Option<i64>,
}

impl JobStrategyState {
    pub fn is_blocked(&self, now_ms: i64) -> bool {
        now_ms < self.blocked_until_ms
    }

    pub fn clear(&mut self) {
        self.blocked = false;
        self.code = None;
        self.message = None;
        self.blocked_until_ms = 0;
    }

    fn block(&mut self, code: BlockCode, message: String, target_job_id: Option<&str>, now_ms: i64) {
        let cooldown = (code.cooldown().as_millis() as i64).max(MIN_BLOCK_MS);
        self.blocked = true;
        self.code = Some(code);
        self.message = Some(message);
        self.target_job_id = target_job_id.map(str::to_string);
        self.last_failure_at_ms = Some(now_ms);
        self.blocked_until_ms = now_ms + cooldown;
    }

    /// Record the outcome of an apply or vote call.
    pub fn register_feedback(
        &mut self,
        action: JobAction,
        reply: &Reply,
        target_job_id: Option<&str>,
        now_ms: i64,
    ) -> Feedback {
        match action {
            JobAction::Apply => self.last_apply_at_ms = Some(now_ms),
            JobAction::Vote => self.last_vote_at_ms = Some(now_ms),
        }

        if reply_succeeded(reply) {
            if action == JobAction::Apply {
                self.target_job_id = target_job_id.map(str::to_string);
            }
            self.clear();
            return Feedback::Cleared;
        }

        let (status, error) = reply_status_and_error(reply);
        let code = BlockCode::classify(error.as_deref().unwrap_or(""), status);
        let message = error.unwrap_or_else(|| "job progression blocked".to_string());
        tracing::info!(
            stage = "job_blocked",
            code = code.as_str(),
            status = status.unwrap_or(0),
            message = %message,
            retry_after_ms = code.cooldown().as_millis() as u64,
            "job progression blocked"
        );
        self.block(code, message, target_job_id, now_ms);
        Feedback::Blocked(code)
    }

    /// Local rejection for an apply attempt while blocked. `None` means
    /// the caller may go to the network.
    pub fn gate(&self, now_ms: i64) -> Option<Reply> {
        if !self.is_blocked(now_ms) {
            return None;
        }
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| "job action cooling down".to_string());
        Some(Reply {
            status: Some(429),
            error: Some(message),
            body: json!({
                "code": self.code.map(|c| c.as_str()),
                "retryAfterMs": self.blocked_until_ms,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_order() {
        assert_eq!(
            BlockCode::classify("Not enough trust to apply", Some(403)),
            BlockCode::InsufficientTrust
        );
        assert_eq!(
            BlockCode::classify("Insufficient reputation", None),
            BlockCode::InsufficientReputation
        );
        assert_eq!(
            BlockCode::classify("Agent already applied", Some(400)),
            BlockCode::AlreadyAppliedOrVoted
        );
        assert_eq!(BlockCode::classify("denied", Some(403)), BlockCode::ForbiddenPolicy);
        assert_eq!(
            BlockCode::classify("bad", Some(400)),
            BlockCode::InvalidJobTransition
        );
        assert_eq!(BlockCode::classify("", Some(500)), BlockCode::JobProgressBlocked);
    }

    #[test]
    fn test_success_policy() {
        assert!(reply_succeeded(&Reply::ok(json!({}))));
        assert!(!reply_succeeded(&Reply::ok(json!({"success": false}))));
        assert!(!reply_succeeded(&Reply::ok(json!({"result": {"error": "nope"}}))));
        assert!(reply_succeeded(&Reply::ok(json!({"status": 201}))));
        assert!(!reply_succeeded(&Reply::failed(409, "already voted")));
    }

    #[test]
    fn test_block_then_gate_then_expire() {
        let mut s = JobStrategyState::default();
        let fb = s.register_feedback(
            JobAction::Apply,
            &Reply::failed(400, "already applied"),
            Some("j1"),
            1_000,
        );
        assert_eq!(fb, Feedback::Blocked(BlockCode::AlreadyAppliedOrVoted));
        let gated = s.gate(1_000 + 119_999).unwrap();
        assert_eq!(gated.status, Some(429));
        assert_eq!(gated.body["code"], "ALREADY_APPLIED_OR_VOTED");
        assert!(s.gate(1_000 + 120_000).is_none());
        assert_eq!(s.last_apply_at_ms, Some(1_000));
    }

    #[test]
    fn test_success_clears_any_block() {
        let mut s = JobStrategyState::default();
        s.register_feedback(JobAction::Vote, &Reply::failed(403, "denied"), Some("j2"), 0);
        assert!(s.blocked);
        let fb = s.register_feedback(JobAction::Apply, &Reply::ok(json!({"ok": true})), Some("j3"), 10);
        assert_eq!(fb, Feedback::Cleared);
        assert!(!s.blocked);
        assert!(!s.is_blocked(10));
        assert_eq!(s.code, None);
        assert_eq!(s.target_job_id.as_deref(), Some("j3"));
        assert_eq!(s.last_vote_at_ms, Some(0));
    }
}
