//! Unit tests for the envelope parser
//!
//! Tests the parsing of raw envelopes into typed inbound messages

use character_session_engine::types::FinishFlags;
use character_session_engine::{CharacterId, Envelope, InboundMessage, parse_envelope};
use serde_json::{Value, json};

fn envelope(name: &str, data: Value) -> Envelope {
    Envelope {
        character_id: Some(CharacterId::new(1)),
        message_code: 0,
        message_name: name.to_string(),
        data,
    }
}

#[test]
fn test_parse_bare_triggers() {
    let cases = [
        ("heartbeat", InboundMessage::Heartbeat),
        ("connectionInit", InboundMessage::ConnectionInit),
        ("onestep", InboundMessage::OneStep),
        ("new_day", InboundMessage::NewDay),
        ("reflect", InboundMessage::Reflect),
    ];
    for (name, expected) in cases {
        assert_eq!(parse_envelope(&envelope(name, json!({}))).unwrap(), expected);
    }
}

#[test]
fn test_parse_failed_action() {
    let data = json!({ "result": false, "action": { "verb": "buy", "item": "bread" }, "msg": "no money" });

    match parse_envelope(&envelope("actionresult", data)).unwrap() {
        InboundMessage::ActionFailed(failed) => {
            assert_eq!(failed.action["verb"], "buy");
            assert_eq!(failed.message, "no money");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_parse_successful_action_with_vitals() {
    let data = json!({ "result": true, "vitals": { "energy": 40 } });

    match parse_envelope(&envelope("actionresult", data)).unwrap() {
        InboundMessage::ActionSucceeded { vitals } => {
            assert_eq!(vitals.and_then(|v| v.get("energy").cloned()), Some(json!(40)));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_parse_game_time() {
    let message = parse_envelope(&envelope("gameTime", json!({ "time": "2026-03-01 08:15:00" })))
        .unwrap();
    match message {
        InboundMessage::GameTime(time) => {
            assert_eq!(time.to_string(), "2026-03-01 08:15:00");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(message_is_conversation("gameTime", json!({ "time": "2026-03-01 08:15" })));
}

#[test]
fn test_parse_to_agent() {
    let data = json!({
        "from": 2,
        "to": 1,
        "content": "hello",
        "startTime": "2026-03-01 09:00:00",
        "finishFlags": [true, false],
    });

    match parse_envelope(&envelope("to_agent", data)).unwrap() {
        InboundMessage::ToAgent(message) => {
            assert_eq!(message.from, CharacterId::new(2));
            assert_eq!(message.finish_flags, FinishFlags::FIRST);
            assert!(!message.finish_flags.is_complete());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_parse_read_only_defaults_messages() {
    let data = json!({ "participants": [1, 2], "startTime": "2026-03-01 09:00:00" });

    match parse_envelope(&envelope("read_only", data)).unwrap() {
        InboundMessage::ReadOnly(record) => {
            assert!(record.messages.is_empty());
            assert_eq!(record.partner_of(CharacterId::new(1)), CharacterId::new(2));
            assert_eq!(record.key().0, "1:2");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_parse_invalid_messages() {
    assert!(parse_envelope(&envelope("invalid_type", json!({}))).is_err());
    assert!(parse_envelope(&envelope("actionresult", json!({ "msg": "?" }))).is_err());
    assert!(parse_envelope(&envelope("gameTime", json!({ "time": "tea time" }))).is_err());
    assert!(parse_envelope(&envelope("to_agent", json!({ "from": 2 }))).is_err());
}

#[test]
fn test_envelope_wire_names() {
    let raw = r#"{"characterId":5,"messageCode":0,"messageName":"heartbeat"}"#;
    let env: Envelope = serde_json::from_str(raw).unwrap();
    assert_eq!(env.character_id, Some(CharacterId::new(5)));
    assert_eq!(env.data, json!({}));

    let out: Value = serde_json::from_str(&Envelope::heartbeat_ok(CharacterId::new(5)).to_json().unwrap())
        .unwrap();
    assert_eq!(out["messageName"], "heartbeat");
    assert_eq!(out["data"]["status"], "ok");
}

fn message_is_conversation(name: &str, data: Value) -> bool {
    parse_envelope(&envelope(name, data)).is_ok_and(|m| m.is_conversation())
}
