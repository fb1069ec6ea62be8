use std::collections::HashSet;
use std::str::FromStr;
use webos_types::{AppId, Error, InstanceId, MessageId, WindowId};

// ── AppId ────────────────────────────────────────────────────────

#[test]
fn app_id_parse_accepts_plain_ids() {
    let id = AppId::parse("calculator").unwrap();
    assert_eq!(id.as_str(), "calculator");
    assert_eq!(id.to_string(), "calculator");
}

#[test]
fn app_id_parse_rejects_empty_and_whitespace() {
    assert!(AppId::parse("").is_err());
    assert!(AppId::parse("text editor").is_err());
    assert!(AppId::from_str(" ").is_err());
}

#[test]
fn app_id_new_skips_validation() {
    let id = AppId::new("");
    assert!(!id.is_valid());
}

#[test]
fn app_id_serializes_transparently() {
    let id = AppId::from("terminal");
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"terminal\"");
}

#[test]
fn app_id_lookup_by_str() {
    let mut set = HashSet::new();
    set.insert(AppId::from("calc"));
    assert!(set.contains("calc"));
}

// ── WindowId ─────────────────────────────────────────────────────

#[test]
fn window_id_is_opaque_string() {
    let id = WindowId::from("win-1");
    assert_eq!(id.as_str(), "win-1");
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"win-1\"");
}

// ── InstanceId / MessageId ───────────────────────────────────────

#[test]
fn instance_ids_are_unique() {
    assert_ne!(InstanceId::new(), InstanceId::new());
}

#[test]
fn message_ids_are_unique() {
    assert_ne!(MessageId::new(), MessageId::new());
}

#[test]
fn message_id_display_and_parse() {
    let id = MessageId::new();
    let parsed = MessageId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
    assert!(MessageId::from_str("garbage").is_err());
}

#[test]
fn parse_errors_use_crate_error() {
    assert!(matches!(MessageId::parse("not-a-uuid"), Err(Error::InvalidUuid(_))));
    assert!(matches!(AppId::parse(""), Err(Error::InvalidId(_))));
}
