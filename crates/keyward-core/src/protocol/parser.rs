//! NDJSON framing for page and surface frames.
//!
//! Implements tolerant reader pattern: unknown fields ignored, unknown
//! surface actions passed through as `Unknown`.

use serde::Serialize;
use serde_json::Value;

use super::types::{
    PageEnvelope, Params, RequestKind, SessionEvent, StateKey, SurfaceMessage, SurfaceReply,
};
use crate::error::{Error, Result};

/// Parse a single page frame.
pub fn parse_page_line(line: &str) -> Result<PageEnvelope> {
    let raw: Value = serde_json::from_str(line)?;
    parse_page_value(&raw)
}

/// Parse a JSON value into a page envelope.
pub fn parse_page_value(raw: &Value) -> Result<PageEnvelope> {
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Protocol("Missing 'id' field".into()))?
        .to_string();

    let action: RequestKind = raw
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Protocol("Missing 'action' field".into()))?
        .parse()?;

    let params = match raw.get("params") {
        Some(Value::Object(map)) => map.clone(),
        None | Some(Value::Null) => Params::new(),
        Some(_) => return Err(Error::Protocol("'params' must be an object".into())),
    };

    Ok(PageEnvelope { id, action, params })
}

/// Parse a single line written by the approver surface.
pub fn parse_surface_line(line: &str) -> Result<SurfaceMessage> {
    let raw: Value = serde_json::from_str(line)?;
    parse_surface_value(raw)
}

/// Parse a JSON value into a surface message.
pub fn parse_surface_value(raw: Value) -> Result<SurfaceMessage> {
    let Value::Object(mut map) = raw else {
        return Err(Error::Protocol("Surface frame must be an object".into()));
    };

    let action = match map.remove("action") {
        Some(Value::String(action)) => action,
        _ => return Err(Error::Protocol("Missing 'action' field".into())),
    };

    match action.as_str() {
        "lock" => return Ok(SurfaceMessage::Session(SessionEvent::Lock)),
        "unlock" => return Ok(SurfaceMessage::Session(SessionEvent::Unlock)),
        "activity" => return Ok(SurfaceMessage::Session(SessionEvent::Activity)),
        "stateUpdate" => return parse_state_update(&mut map),
        _ => {}
    }

    let Some(kind) = RequestKind::from_reply_action(&action) else {
        return Ok(SurfaceMessage::Unknown {
            action,
            payload: Value::Object(map),
        });
    };

    let request_id = match map.remove("requestId") {
        Some(Value::String(id)) => Some(id),
        _ => None,
    };

    Ok(SurfaceMessage::Reply(SurfaceReply {
        kind,
        request_id,
        payload: map,
    }))
}

fn parse_state_update(map: &mut Params) -> Result<SurfaceMessage> {
    let key: StateKey = map
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Protocol("Missing 'key' field".into()))?
        .parse()?;
    let value = map.remove("value").unwrap_or(Value::Null);
    Ok(SurfaceMessage::StateUpdate { key, value })
}

/// Serialize a frame as a single NDJSON line (without the newline).
pub fn encode_line<T: Serialize>(frame: &T) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::Decision;

    #[test]
    fn parses_page_frame() {
        let env = parse_page_line(
            r#"{"id":"c-1","action":"signMessage","params":{"message":"hi","domain":"a.com"},"extra":1}"#,
        )
        .unwrap();
        assert_eq!(env.id, "c-1");
        assert_eq!(env.action, RequestKind::SignMessage);
        assert_eq!(env.params["message"], "hi");
    }

    #[test]
    fn page_frame_without_params_has_empty_map() {
        let env = parse_page_line(r#"{"id":"c-2","action":"getBalance"}"#).unwrap();
        assert!(env.params.is_empty());
    }

    #[test]
    fn rejects_page_frame_without_id() {
        let err = parse_page_line(r#"{"action":"getBalance"}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn rejects_unknown_page_action() {
        let err = parse_page_line(r#"{"id":"x","action":"stealKeys"}"#).unwrap_err();
        assert!(err.to_string().contains("stealKeys"));
    }

    #[test]
    fn page_cannot_send_surface_replies() {
        assert!(parse_page_line(r#"{"id":"x","action":"connectResponse"}"#).is_err());
    }

    #[test]
    fn parses_connect_decision() {
        let msg = parse_surface_line(
            r#"{"action":"connectResponse","requestId":"r-1","decision":"approved","pubKeys":{"identityPubKey":"02ab"}}"#,
        )
        .unwrap();
        let SurfaceMessage::Reply(reply) = msg else {
            panic!("expected reply, got {msg:?}");
        };
        assert_eq!(reply.kind, RequestKind::Connect);
        assert_eq!(reply.request_id.as_deref(), Some("r-1"));
        assert_eq!(reply.decision(), Some(Decision::Approved));
        assert!(!reply.payload.contains_key("action"));
    }

    #[test]
    fn parses_broadcast_failure() {
        let msg =
            parse_surface_line(r#"{"action":"broadcastResponse","error":"txn-mempool-conflict"}"#)
                .unwrap();
        let SurfaceMessage::Reply(reply) = msg else {
            panic!("expected reply");
        };
        assert_eq!(reply.error(), Some("txn-mempool-conflict"));
    }

    #[test]
    fn parses_session_events_and_state_updates() {
        assert_eq!(
            parse_surface_line(r#"{"action":"unlock"}"#).unwrap(),
            SurfaceMessage::Session(SessionEvent::Unlock)
        );
        let msg = parse_surface_line(
            r#"{"action":"stateUpdate","key":"appState","value":{"balance":{"bsv":1}}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            SurfaceMessage::StateUpdate {
                key: StateKey::AppState,
                ..
            }
        ));
    }

    #[test]
    fn unknown_surface_action_is_tolerated() {
        let msg = parse_surface_line(r#"{"action":"navigate","to":"home"}"#).unwrap();
        assert!(matches!(msg, SurfaceMessage::Unknown { ref action, .. } if action == "navigate"));
    }
}
