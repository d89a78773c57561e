//! Per-chat conversation state.
//!
//! State lives behind the `SessionStore` seam — get/set/delete with a
//! per-key TTL — so a deployment can point it at any external key-value
//! store. Every entry expires after the retention window even if a flow is
//! abandoned mid-way, which bounds growth from dead sessions.
//! `MemorySessionStore` is the in-process default.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;

use crate::config::DB_DATETIME_FORMAT;
use crate::models::enums::{OperatorStep, UserStep};

/// Keyed string store with per-key TTL. Values are simple scalars (step
/// tags, timestamps, short strings, integers).
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str, ttl: Duration);
    fn delete(&self, key: &str);
}

/// In-memory `SessionStore` with lazy expiry: entries past their deadline
/// are dropped on access, and a sweep runs opportunistically on writes.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((_, deadline)) if *deadline <= Instant::now() => {
                entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, (_, deadline)| *deadline > now);
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
    }

    fn delete(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }
}

/// Typed view over one chat's namespaced session keys. Every write
/// refreshes the TTL, so an active dialog never expires mid-step.
pub struct ConversationSession<'a> {
    store: &'a dyn SessionStore,
    chat_id: i64,
    ttl: Duration,
}

const FIELDS: &[&str] = &[
    "step",
    "op_step",
    "date",
    "name",
    "phone",
    "message_id",
    "history_page",
    "client",
];

impl<'a> ConversationSession<'a> {
    pub fn new(store: &'a dyn SessionStore, chat_id: i64, ttl: Duration) -> Self {
        Self { store, chat_id, ttl }
    }

    fn key(&self, field: &str) -> String {
        format!("booking:{}:{}", self.chat_id, field)
    }

    fn set_field(&self, field: &str, value: &str) {
        self.store.set(&self.key(field), value, self.ttl);
    }

    fn get_field(&self, field: &str) -> Option<String> {
        self.store.get(&self.key(field))
    }

    fn clear_field(&self, field: &str) {
        self.store.delete(&self.key(field));
    }

    // ── Steps ────────────────────────────────────────────────

    pub fn user_step(&self) -> Option<UserStep> {
        let tag = self.get_field("step")?;
        match UserStep::from_str(&tag) {
            Ok(step) => Some(step),
            Err(_) => {
                tracing::warn!(chat_id = self.chat_id, tag, "unknown user step in session");
                None
            }
        }
    }

    pub fn set_user_step(&self, step: UserStep) {
        self.set_field("step", step.as_str());
    }

    pub fn operator_step(&self) -> Option<OperatorStep> {
        let tag = self.get_field("op_step")?;
        match OperatorStep::from_str(&tag) {
            Ok(step) => Some(step),
            Err(_) => {
                tracing::warn!(chat_id = self.chat_id, tag, "unknown operator step in session");
                None
            }
        }
    }

    pub fn set_operator_step(&self, step: OperatorStep) {
        self.set_field("op_step", step.as_str());
    }

    pub fn clear_operator_step(&self) {
        self.clear_field("op_step");
    }

    // ── Pending fields ───────────────────────────────────────

    pub fn pending_date(&self) -> Option<NaiveDateTime> {
        let raw = self.get_field("date")?;
        NaiveDateTime::parse_from_str(&raw, DB_DATETIME_FORMAT).ok()
    }

    pub fn set_pending_date(&self, value: NaiveDateTime) {
        self.set_field("date", &value.format(DB_DATETIME_FORMAT).to_string());
    }

    pub fn clear_pending_date(&self) {
        self.clear_field("date");
    }

    pub fn pending_name(&self) -> Option<String> {
        self.get_field("name")
    }

    pub fn set_pending_name(&self, value: &str) {
        self.set_field("name", value);
    }

    pub fn pending_phone(&self) -> Option<String> {
        self.get_field("phone")
    }

    pub fn set_pending_phone(&self, value: &str) {
        self.set_field("phone", value);
    }

    pub fn pending_message_id(&self) -> Option<i64> {
        self.get_field("message_id")?.parse().ok()
    }

    pub fn set_pending_message_id(&self, value: i64) {
        self.set_field("message_id", &value.to_string());
    }

    pub fn history_page(&self) -> usize {
        self.get_field("history_page")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0)
    }

    pub fn set_history_page(&self, page: usize) {
        self.set_field("history_page", &page.to_string());
    }

    pub fn pending_client(&self) -> Option<i64> {
        self.get_field("client")?.parse().ok()
    }

    pub fn set_pending_client(&self, chat_id: i64) {
        self.set_field("client", &chat_id.to_string());
    }

    /// Drop every key of this chat: flow completed, abandoned, or failed.
    pub fn clear(&self) {
        for field in FIELDS {
            self.clear_field(field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn set_get_delete_roundtrip() {
        let store = MemorySessionStore::new();
        store.set("k", "v", TTL);
        assert_eq!(store.get("k").as_deref(), Some("v"));
        store.delete("k");
        assert!(store.get("k").is_none());
    }

    #[test]
    fn entries_expire_after_ttl() {
        let store = MemorySessionStore::new();
        store.set("k", "v", Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));
        assert!(store.get("k").is_none());
    }

    #[test]
    fn write_refreshes_ttl() {
        let store = MemorySessionStore::new();
        store.set("k", "v1", Duration::from_millis(5));
        store.set("k", "v2", Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.get("k").as_deref(), Some("v2"));
    }

    #[test]
    fn session_fields_are_namespaced_per_chat() {
        let store = MemorySessionStore::new();
        let alice = ConversationSession::new(&store, 1, TTL);
        let bob = ConversationSession::new(&store, 2, TTL);

        alice.set_user_step(UserStep::AwaitingName);
        assert_eq!(alice.user_step(), Some(UserStep::AwaitingName));
        assert!(bob.user_step().is_none());
    }

    #[test]
    fn pending_date_roundtrip() {
        let store = MemorySessionStore::new();
        let session = ConversationSession::new(&store, 1, TTL);
        let slot = NaiveDate::from_ymd_opt(2026, 9, 7)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();

        session.set_pending_date(slot);
        assert_eq!(session.pending_date(), Some(slot));
    }

    #[test]
    fn clear_drops_every_field() {
        let store = MemorySessionStore::new();
        let session = ConversationSession::new(&store, 1, TTL);
        session.set_user_step(UserStep::AwaitingPhone);
        session.set_operator_step(OperatorStep::AwaitingClient);
        session.set_pending_name("Anna");
        session.set_pending_phone("+79160000001");
        session.set_pending_message_id(42);
        session.set_history_page(3);
        session.set_pending_client(200);

        session.clear();

        assert!(session.user_step().is_none());
        assert!(session.operator_step().is_none());
        assert!(session.pending_name().is_none());
        assert!(session.pending_phone().is_none());
        assert!(session.pending_message_id().is_none());
        assert_eq!(session.history_page(), 0);
        assert!(session.pending_client().is_none());
    }
}
