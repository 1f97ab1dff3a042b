use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Raw frame on the event stream: `{"event": name, "data": payload}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Serialize an outbound frame.
pub fn frame(event: &str, data: Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}

/// Inbound events the client reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Carries the initial world snapshot when the server sends one.
    Registered { agent_id: String, snapshot: Option<Value> },
    AuthRotated { api_key: String },
    PerceptionUpdate(Value),
    Speech { from: String, message: String },
    ConversationStarted { id: String, participants: Vec<String> },
    ConversationMessage {
        conversation_id: String,
        from_id: String,
        message: String,
    },
    ConversationEnded { conversation_id: String },
    Goal(Value),
    Error { message: String },
    Other(String),
}

fn text(data: &Value, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

impl ServerEvent {
    pub fn parse(raw: &str) -> Option<Self> {
        let frame: Frame = serde_json::from_str(raw).ok()?;
        Some(Self::from_frame(frame))
    }

    pub fn from_frame(frame: Frame) -> Self {
        let data = frame.data;
        match frame.event.as_str() {
            "agent:registered" => ServerEvent::Registered {
                agent_id: text(&data, "agentId"),
                snapshot: data.get("worldState").filter(|v| v.is_object()).cloned(),
            },
            "auth:rotated" => ServerEvent::AuthRotated {
                api_key: text(&data, "apiKey"),
            },
            "perception:update" => ServerEvent::PerceptionUpdate(data),
            "perception:speech" => ServerEvent::Speech {
                from: text(&data, "from"),
                message: text(&data, "message"),
            },
            "conversation:started" => ServerEvent::ConversationStarted {
                id: text(&data, "id"),
                participants: data
                    .get("participants")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            "conversation:message" => {
                let inner = data.get("message").cloned().unwrap_or(Value::Null);
                let from_id = match text(&inner, "fromId") {
                    id if !id.is_empty() => id,
                    _ => text(&inner, "from"),
                };
                let message = match &inner {
                    Value::String(s) => s.clone(),
                    other => text(other, "message"),
                };
                ServerEvent::ConversationMessage {
                    conversation_id: text(&data, "conversationId"),
                    from_id,
                    message,
                }
            }
            "conversation:ended" => ServerEvent::ConversationEnded {
                conversation_id: text(&data, "conversationId"),
            },
            "agent:goal" => ServerEvent::Goal(data),
            "error" => ServerEvent::Error {
                message: text(&data, "message"),
            },
            other => ServerEvent::Other(other.to_string()),
        }
    }

    /// The server refuses the credentials; reconnecting will not help.
    pub fn is_revocation(&self) -> bool {
        matches!(self, ServerEvent::Error { message } if message.contains("API key revoked"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registered_and_rotation() {
        let ev = ServerEvent::parse(r#"{"event":"agent:registered","data":{"agentId":"a-7","position":{"x":1,"y":2}}}"#);
        assert_eq!(
            ev,
            Some(ServerEvent::Registered {
                agent_id: "a-7".into(),
                snapshot: None,
            })
        );
        let ev = ServerEvent::parse(r#"{"event":"auth:rotated","data":{"apiKey":"k2"}}"#);
        assert_eq!(ev, Some(ServerEvent::AuthRotated { api_key: "k2".into() }));
    }

    #[test]
    fn test_conversation_message_accepts_either_sender_field() {
        let a = ServerEvent::parse(
            r#"{"event":"conversation:message","data":{"conversationId":"c1","message":{"fromId":"b","message":"hola"}}}"#,
        );
        let b = ServerEvent::parse(
            r#"{"event":"conversation:message","data":{"conversationId":"c1","message":{"from":"b","message":"hola"}}}"#,
        );
        let expected = ServerEvent::ConversationMessage {
            conversation_id: "c1".into(),
            from_id: "b".into(),
            message: "hola".into(),
        };
        assert_eq!(a, Some(expected.clone()));
        assert_eq!(b, Some(expected));
    }

    #[test]
    fn test_started_participants_and_unknown_events() {
        let ev = ServerEvent::parse(
            r#"{"event":"conversation:started","data":{"id":"c9","participants":["me","you"]}}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            ServerEvent::ConversationStarted {
                id: "c9".into(),
                participants: vec!["me".into(), "you".into()],
            }
        );
        assert_eq!(
            ServerEvent::parse(r#"{"event":"world:tick"}"#),
            Some(ServerEvent::Other("world:tick".into()))
        );
        assert_eq!(ServerEvent::parse("not json"), None);
    }

    #[test]
    fn test_revocation_detection() {
        let ev = ServerEvent::parse(r#"{"event":"error","data":{"message":"API key revoked"}}"#).unwrap();
        assert!(ev.is_revocation());
        let ev = ServerEvent::parse(r#"{"event":"error","data":{"message":"rate limited"}}"#).unwrap();
        assert!(!ev.is_revocation());
    }

    #[test]
    fn test_outbound_frame_shape() {
        let raw = frame("agent:speak", json!({ "message": "hola" }));
        let parsed: Frame = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.event, "agent:speak");
        assert_eq!(parsed.data["message"], "hola");
    }
}
