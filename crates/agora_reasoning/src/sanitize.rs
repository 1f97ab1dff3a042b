//! Parse and validate generated actions.
//!
//! Generated JSON is turned into a typed [`ActionCandidate`] or rejected
//! with a [`Rejection`]; nothing is guessed past the aliases listed here.

use agora_core::{ActionCandidate, Building, Position, Rejection, RoleSlot};
use agora_memory::motivation::SOCIAL_STEPS;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::extraction::extract_object;
use crate::hotspots::named_place;

const TARGET_KEYS: &[&str] = &["target_id", "targetId", "target", "to", "otherId"];

/// World knowledge needed to resolve references in generated actions.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub nearby_buildings: &'a [Building],
    /// Counterpart id to live conversation id.
    pub conversations: &'a HashMap<String, String>,
    /// Conversation a forced reply must address when it names none.
    pub forced_conversation_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAction {
    pub action: ActionCandidate,
    /// Deferred `nextStep`, kept only for conversational actions.
    pub followup: Option<ActionCandidate>,
}

fn text<'v>(params: &'v Map<String, Value>, keys: &[&str]) -> Option<&'v str> {
    keys.iter()
        .filter_map(|k| params.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn number(params: &Map<String, Value>, key: &str) -> Option<i64> {
    params.get(key).and_then(Value::as_f64).map(|f| f as i64)
}

fn point(params: &Map<String, Value>, x: &str, y: &str) -> Option<Position> {
    Some(Position {
        x: number(params, x)?,
        y: number(params, y)?,
    })
}

fn missing(kind: &'static str, field: &'static str) -> Rejection {
    Rejection::MissingField { kind, field }
}

/// Parse generated text into an action.
pub fn parse_generated(raw: &str, ctx: &ParseContext<'_>) -> Result<ParsedAction, Rejection> {
    let object = extract_object(raw).ok_or(Rejection::NotJson)?;
    parse_action(&object, ctx)
}

/// Parse a forced conversation reply; anything but a reply is rejected.
pub fn parse_conversation_reply(raw: &str, ctx: &ParseContext<'_>) -> Result<ParsedAction, Rejection> {
    let parsed = parse_generated(raw, ctx)?;
    if !parsed.action.is_conversation_reply() {
        return Err(Rejection::NotAConversationReply(parsed.action.kind()));
    }
    Ok(parsed)
}

pub fn parse_action(object: &Map<String, Value>, ctx: &ParseContext<'_>) -> Result<ParsedAction, Rejection> {
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(Rejection::MissingType)?;
    let empty = Map::new();
    let params = object
        .get("params")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let action = match kind {
        "move_to" => parse_move(params, ctx)?,
        "enter_building" => ActionCandidate::enter_building(text(params, &["building_id", "buildingId"]).unwrap_or(""))?,
        "speak" => ActionCandidate::speak(text(params, &["message"]).unwrap_or(""))?,
        "start_conversation" => {
            let target = text(params, TARGET_KEYS).unwrap_or("");
            let message = match text(params, &["message", "text"]) {
                Some(m) => m.to_string(),
                None => match text(params, &["purpose"]) {
                    Some(purpose) => format!("Oye, {}", purpose),
                    None => String::new(),
                },
            };
            ActionCandidate::start_conversation(target, &message)?
        }
        "conversation_message" => {
            let message = text(params, &["message", "text"]).unwrap_or("");
            let conversation = text(params, &["conversation_id", "conversationId"])
                .map(str::to_string)
                .or_else(|| ctx.forced_conversation_id.map(str::to_string))
                .or_else(|| {
                    text(params, TARGET_KEYS).and_then(|t| ctx.conversations.get(t).cloned())
                })
                .ok_or(missing("conversation_message", "conversation_id"))?;
            ActionCandidate::conversation_message(&conversation, message)?
        }
        "end_conversation" => {
            let conversation = text(params, &["conversation_id", "conversationId"])
                .or(ctx.forced_conversation_id)
                .unwrap_or("");
            ActionCandidate::end_conversation(conversation)?
        }
        "apply_job" => ActionCandidate::apply_job(text(params, &["job_id", "jobId"]).unwrap_or(""))?,
        "buy_property" => {
            ActionCandidate::buy_property(text(params, &["property_id", "propertyId"]).unwrap_or(""))?
        }
        "vote_job" => ActionCandidate::vote_job(
            text(params, &["applicant_id", "applicantId"]).unwrap_or(""),
            text(params, &["job_id", "jobId"]).unwrap_or(""),
        )?,
        "create_event" => parse_create_event(params)?,
        "join_event" => ActionCandidate::join_event(text(params, &["event_id", "eventId"]).unwrap_or(""))?,
        "coord_create_proposal" => parse_create_proposal(params)?,
        "coord_join" => ActionCandidate::CoordJoin {
            proposal_id: proposal_id("coord_join", params)?,
            role: text(params, &["role"]).unwrap_or("participant").to_string(),
        },
        "coord_commit" => ActionCandidate::CoordCommit {
            proposal_id: proposal_id("coord_commit", params)?,
            task: text(params, &["task"]).unwrap_or("support_proposal").to_string(),
            role: text(params, &["role"]).unwrap_or("participant").to_string(),
        },
        "coord_update_commit" => ActionCandidate::CoordUpdateCommit {
            proposal_id: proposal_id("coord_update_commit", params)?,
            commitment_id: text(params, &["commitment_id", "commitmentId"])
                .ok_or(missing("coord_update_commit", "commitment_id"))?
                .to_string(),
            status: text(params, &["status"]).unwrap_or("in_progress").to_string(),
            progress: number(params, "progress").unwrap_or(0).clamp(0, 100) as u8,
            notes: text(params, &["notes"]).unwrap_or("").to_string(),
        },
        "coord_set_status" => ActionCandidate::CoordSetStatus {
            proposal_id: proposal_id("coord_set_status", params)?,
            status: text(params, &["status"]).unwrap_or("done").to_string(),
            summary: text(params, &["summary"]).unwrap_or("").to_string(),
        },
        "wait" => ActionCandidate::wait(),
        other => return Err(Rejection::UnknownType(other.to_string())),
    };

    let followup = match &action {
        ActionCandidate::StartConversation { .. } | ActionCandidate::ConversationMessage { .. } => object
            .get("nextStep")
            .and_then(Value::as_object)
            .and_then(parse_followup),
        _ => None,
    };
    Ok(ParsedAction { action, followup })
}

fn proposal_id(kind: &'static str, params: &Map<String, Value>) -> Result<String, Rejection> {
    text(params, &["proposal_id", "proposalId"])
        .map(str::to_string)
        .ok_or(missing(kind, "proposal_id"))
}

fn parse_move(params: &Map<String, Value>, ctx: &ParseContext<'_>) -> Result<ActionCandidate, Rejection> {
    let nested = |key: &str| {
        params
            .get(key)
            .and_then(Value::as_object)
            .and_then(|p| point(p, "x", "y"))
    };
    let direct = point(params, "x", "y")
        .or_else(|| nested("position"))
        .or_else(|| nested("targetPosition"))
        .or_else(|| point(params, "targetX", "targetY"))
        .or_else(|| text(params, &["location"]).and_then(named_place));
    if let Some(target) = direct {
        return Ok(ActionCandidate::move_to(target));
    }

    let raw = text(
        params,
        &["targetId", "target_id", "target", "building_id", "buildingId"],
    )
    .ok_or(missing("move_to", "x"))?;
    let wanted = raw.to_lowercase();
    let nearby = ctx.nearby_buildings.iter().find(|b| {
        b.id.to_lowercase() == wanted
            || b.name
                .as_deref()
                .map(|n| n.to_lowercase() == wanted)
                .unwrap_or(false)
    });
    match nearby.and_then(|b| b.position) {
        Some(position) => Ok(ActionCandidate::move_to(position)),
        None => ActionCandidate::move_to_building(raw),
    }
}

fn parse_create_event(params: &Map<String, Value>) -> Result<ActionCandidate, Rejection> {
    let name = text(params, &["name"]).ok_or(missing("create_event", "name"))?;
    let location = params
        .get("location")
        .filter(|v| v.is_object())
        .cloned()
        .unwrap_or_else(|| json!({}));
    Ok(ActionCandidate::CreateEvent {
        name: name.to_string(),
        kind: text(params, &["type"]).unwrap_or("assembly").to_string(),
        start_at: params.get("startAt").filter(|v| !v.is_null()).cloned(),
        end_at: params.get("endAt").filter(|v| !v.is_null()).cloned(),
        location,
        description: text(params, &["description"]).unwrap_or("").to_string(),
        goal_scope: text(params, &["goalScope"]).unwrap_or("radius").to_string(),
    })
}

fn parse_create_proposal(params: &Map<String, Value>) -> Result<ActionCandidate, Rejection> {
    let title = text(params, &["title"]).ok_or(missing("coord_create_proposal", "title"))?;
    let required_roles: Vec<RoleSlot> = params
        .get("required_roles")
        .or_else(|| params.get("requiredRoles"))
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    Ok(ActionCandidate::CoordCreateProposal {
        title: title.to_string(),
        description: text(params, &["description"]).unwrap_or("").to_string(),
        category: text(params, &["category"]).unwrap_or("community").to_string(),
        required_roles,
    })
}

/// A deferred step: only movement, entering, joining an event or waiting.
pub fn parse_followup(object: &Map<String, Value>) -> Option<ActionCandidate> {
    let empty = Map::new();
    let params = object
        .get("params")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    match object.get("type").and_then(Value::as_str)? {
        "move_to" => point(params, "x", "y").map(ActionCandidate::move_to),
        "enter_building" => {
            ActionCandidate::enter_building(text(params, &["building_id", "buildingId", "target"])?).ok()
        }
        "join_event" => ActionCandidate::join_event(text(params, &["event_id", "eventId"])?).ok(),
        "wait" => Some(ActionCandidate::wait()),
        _ => None,
    }
}

/// Reject structurally incoherent pairings, such as buying property while
/// the current step is about social bonding or votes.
pub fn check_step(action: &ActionCandidate, step_id: Option<&str>) -> Result<(), Rejection> {
    let Some(step) = step_id else {
        return Ok(());
    };
    if matches!(action, ActionCandidate::BuyProperty { .. }) && SOCIAL_STEPS.contains(&step) {
        tracing::info!(
            stage = "validate_rejected",
            step,
            action = action.kind(),
            "economic action on social step"
        );
        return Err(Rejection::StepConflict {
            kind: action.kind(),
            step: step.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with<'a>(
        buildings: &'a [Building],
        conversations: &'a HashMap<String, String>,
        forced: Option<&'a str>,
    ) -> ParseContext<'a> {
        ParseContext {
            nearby_buildings: buildings,
            conversations,
            forced_conversation_id: forced,
        }
    }

    fn parse(raw: &str) -> Result<ParsedAction, Rejection> {
        let convs = HashMap::new();
        parse_generated(raw, &with(&[], &convs, None))
    }

    #[test]
    fn test_move_aliases() {
        let expected = ActionCandidate::MoveTo { x: 3, y: 4 };
        for raw in [
            r#"{"type":"move_to","params":{"x":3,"y":4.7}}"#,
            r#"{"type":"move_to","params":{"position":{"x":3,"y":4}}}"#,
            r#"{"type":"move_to","params":{"targetX":3,"targetY":4}}"#,
        ] {
            assert_eq!(parse(raw).unwrap().action, expected, "{raw}");
        }
        let plaza = parse(r#"{"type":"move_to","params":{"location":"Plaza"}}"#).unwrap();
        assert_eq!(plaza.action, ActionCandidate::MoveTo { x: 16, y: 18 });
    }

    #[test]
    fn test_move_to_named_building() {
        let buildings = vec![Building {
            id: "b7".into(),
            name: Some("Panadería".into()),
            position: Some(Position { x: 9, y: 9 }),
            ..Default::default()
        }];
        let convs = HashMap::new();
        let ctx = with(&buildings, &convs, None);
        let near = parse_generated(r#"{"type":"move_to","params":{"target":"panadería"}}"#, &ctx).unwrap();
        assert_eq!(near.action, ActionCandidate::MoveTo { x: 9, y: 9 });
        let far = parse_generated(r#"{"type":"move_to","params":{"buildingId":"townhall"}}"#, &ctx).unwrap();
        assert_eq!(
            far.action,
            ActionCandidate::MoveToBuilding {
                building_id: "townhall".into()
            }
        );
    }

    #[test]
    fn test_rejections() {
        assert_eq!(parse("nada"), Err(Rejection::NotJson));
        assert_eq!(parse(r#"{"params":{}}"#), Err(Rejection::MissingType));
        assert_eq!(
            parse(r#"{"type":"teleport"}"#),
            Err(Rejection::UnknownType("teleport".into()))
        );
        assert_eq!(
            parse(r#"{"type":"start_conversation","params":{"target_id":"a2","message":"Soy una IA"}}"#),
            Err(Rejection::MetaContent)
        );
        assert!(matches!(
            parse(r#"{"type":"apply_job","params":{}}"#),
            Err(Rejection::MissingField { .. })
        ));
    }

    #[test]
    fn test_purpose_becomes_opener_and_followup_kept() {
        let parsed = parse(
            r#"{"type":"start_conversation","params":{"to":"a2","purpose":"¿me ayudas con la tienda?"},
                "nextStep":{"type":"move_to","params":{"x":30,"y":14}}}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.action,
            ActionCandidate::StartConversation {
                target_id: "a2".into(),
                message: "Oye, ¿me ayudas con la tienda?".into()
            }
        );
        assert_eq!(parsed.followup, Some(ActionCandidate::MoveTo { x: 30, y: 14 }));
    }

    #[test]
    fn test_conversation_reply_resolution() {
        let mut convs = HashMap::new();
        convs.insert("a2".to_string(), "c9".to_string());
        let ctx = with(&[], &convs, None);
        let by_target = parse_generated(
            r#"{"type":"conversation_message","params":{"target":"a2","message":"Claro"}}"#,
            &ctx,
        )
        .unwrap();
        assert_eq!(by_target.action.target(), Some("c9"));

        let forced = with(&[], &convs, Some("c1"));
        let filled = parse_conversation_reply(
            r#"{"type":"conversation_message","params":{"message":"Vale"}}"#,
            &forced,
        )
        .unwrap();
        assert_eq!(filled.action.target(), Some("c1"));

        assert_eq!(
            parse_conversation_reply(r#"{"type":"wait"}"#, &forced),
            Err(Rejection::NotAConversationReply("wait"))
        );
    }

    #[test]
    fn test_step_conflict() {
        let buy = ActionCandidate::buy_property("p1").unwrap();
        assert!(check_step(&buy, Some("help_citizens")).is_err());
        assert!(check_step(&buy, Some("buy_house")).is_ok());
        assert!(check_step(&buy, None).is_ok());
        assert!(check_step(&ActionCandidate::wait(), Some("win_votes")).is_ok());
    }

    #[test]
    fn test_coordination_verbs() {
        let parsed = parse(
            r#"{"type":"coord_update_commit","params":{"proposal_id":"p1","commitment_id":"k1","progress":140}}"#,
        )
        .unwrap();
        match parsed.action {
            ActionCandidate::CoordUpdateCommit { progress, status, .. } => {
                assert_eq!(progress, 100);
                assert_eq!(status, "in_progress");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
