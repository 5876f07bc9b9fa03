//! Per-turn chat flow.
//!
//! Composes identity, admission, transcripts, the optional passcode gate
//! and the dialogue engine. Only an unreachable engine fails a turn;
//! storage problems are logged and the user still gets a reply.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::Database;
use crate::dialogue::{fragment_text, text_fragment, DialogueEngine, DialogueError, ReplyFragment};
use crate::identity::{extract_document_ids, looks_like_phone_number, normalize_phone};
use crate::models::Role;
use crate::otp::{is_valid_code, OtpError, OtpVerifier, MSG_VERIFIED};
use crate::slots::SlotController;

pub const GREETING: [&str; 3] = [
    "Hello! I'm your PAN and TAN assistant.",
    "By continuing, you agree that we may store your phone number and this conversation to help with your request.",
    "Please share your 10-digit mobile number to get started.",
];

pub const WAITING_MESSAGE: &str =
    "All our agents are currently busy. Please hold on, you'll be connected shortly.";

pub const RETRY_MESSAGE: &str =
    "We couldn't start your chat right now. Please try again in a moment.";

const OTP_UNAVAILABLE: &str =
    "We couldn't process your verification right now. Please try again shortly.";

pub fn acknowledgment(phone_number: &str) -> String {
    format!("Got your number: {}.", phone_number)
}

/// Inbound chat turn.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    pub text: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub new_session: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub sender_id: String,
    pub session_id: String,
    pub replies: Vec<ReplyFragment>,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Upstream(#[from] DialogueError),
}

pub struct ChatOrchestrator {
    db: Arc<Mutex<Database>>,
    engine: Arc<dyn DialogueEngine>,
    slots: SlotController,
    otp: OtpVerifier,
    otp_gate: bool,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

impl ChatOrchestrator {
    pub fn new(
        db: Arc<Mutex<Database>>,
        engine: Arc<dyn DialogueEngine>,
        slots: SlotController,
        otp: OtpVerifier,
    ) -> Self {
        Self {
            db,
            engine,
            slots,
            otp,
            otp_gate: false,
        }
    }

    /// Require a verified passcode before turns are forwarded.
    pub fn with_otp_gate(mut self, enabled: bool) -> Self {
        self.otp_gate = enabled;
        self
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn handle_turn(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        self.handle_turn_at(request, Utc::now()).await
    }

    pub async fn handle_turn_at(
        &self,
        request: ChatRequest,
        now: DateTime<Utc>,
    ) -> Result<ChatResponse, ChatError> {
        let supplied_session = non_empty(request.session_id.as_deref()).map(str::to_string);
        let mut session_id = match &supplied_session {
            Some(id) if !request.new_session => id.clone(),
            _ => new_session_id(),
        };

        let Some(raw_phone) = non_empty(request.phone_number.as_deref()) else {
            let sender_id = self.sender_for(&request, &session_id);
            let replies = GREETING.iter().map(|line| text_fragment(*line)).collect();
            return Ok(ChatResponse {
                sender_id,
                session_id,
                replies,
            });
        };

        // A bare number as the message text starts over with that number.
        let text_is_phone = looks_like_phone_number(&request.text);
        let phone = if text_is_phone {
            normalize_phone(&request.text)
        } else {
            normalize_phone(raw_phone)
        };
        let previous_session = if text_is_phone {
            session_id = new_session_id();
            supplied_session.clone()
        } else {
            None
        };
        let sender_id = self.sender_for(&request, &session_id);
        let respond = |replies: Vec<ReplyFragment>| ChatResponse {
            sender_id: sender_id.clone(),
            session_id: session_id.clone(),
            replies,
        };

        {
            let db = self.db();

            if let Err(e) = db.ensure_phone_owner(&phone, now) {
                tracing::warn!(phone = %phone, error = %e, "failed to ensure phone owner");
            }
            if let Some(previous) = previous_session.as_deref() {
                if let Err(e) = self.slots.release(&db, previous) {
                    tracing::warn!(session_id = %previous, error = %e, "failed to release previous slot");
                }
            }

            let admission = match self.slots.acquire_at(&db, &session_id, now) {
                Ok(admission) => admission,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "slot admission failed");
                    return Ok(respond(vec![text_fragment(RETRY_MESSAGE)]));
                }
            };
            if admission.waiting {
                return Ok(respond(vec![text_fragment(WAITING_MESSAGE)]));
            }

            let first_message = text_is_phone
                || match db.get_session_transcript(&session_id) {
                    Ok(transcript) => transcript.map_or(true, |t| t.is_blank()),
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "failed to read transcript");
                        true
                    }
                };

            if first_message {
                let ack = acknowledgment(&phone);
                let lines = [Role::User.line(&request.text), Role::Bot.line(&ack)];
                self.append_transcripts(&db, &session_id, &phone, &lines, now);
                return Ok(respond(vec![text_fragment(ack)]));
            }

            if self.otp_gate {
                if let Some(replies) = self.gate(&db, &session_id, &phone, &request.text, now) {
                    return Ok(respond(replies));
                }
            }
        }

        let replies = self.engine.send(&sender_id, &request.text).await?;
        tracing::debug!(session_id = %session_id, fragments = replies.len(), "engine replied");

        {
            let db = self.db();
            self.record_exchange(&db, &session_id, &phone, &request.text, &replies, now);
        }

        Ok(respond(replies))
    }

    /// Release the session's slot. Never fails; storage errors read as false.
    pub fn release(&self, session_id: &str) -> bool {
        let session_id = session_id.trim();
        let db = self.db();
        match self.slots.release(&db, session_id) {
            Ok(released) => released,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "failed to release slot");
                false
            }
        }
    }

    fn sender_for(&self, request: &ChatRequest, session_id: &str) -> String {
        non_empty(request.sender_id.as_deref())
            .unwrap_or(session_id)
            .to_string()
    }

    /// Passcode exchange for unverified phones. None lets the turn through.
    fn gate(
        &self,
        db: &Database,
        session_id: &str,
        phone: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Option<Vec<ReplyFragment>> {
        match self.otp.is_verified_at(db, phone, now) {
            Ok(true) => return None,
            Ok(false) => {}
            Err(e) => tracing::warn!(phone = %phone, error = %e, "failed to read otp state"),
        }

        let mut messages: Vec<String> = Vec::new();
        let mut restored = None;
        let code = text.trim();

        if is_valid_code(code) {
            match self.otp.verify_at(db, phone, code, now) {
                Ok(_) => {
                    messages.push(MSG_VERIFIED.to_string());
                    restored = match db.get_phone_transcript(phone) {
                        Ok(t) => t.filter(|t| !t.is_blank()).map(|t| t.history),
                        Err(e) => {
                            tracing::warn!(phone = %phone, error = %e, "failed to read phone transcript");
                            None
                        }
                    };
                }
                Err(OtpError::Storage(e)) => {
                    tracing::warn!(phone = %phone, error = %e, "otp verification failed");
                    messages.push(OTP_UNAVAILABLE.to_string());
                }
                Err(e) => {
                    messages.push(e.to_string());
                    if e.requires_reissue() {
                        match self.otp.issue_at(db, phone, now) {
                            Ok(issued) => messages.push(issued.message),
                            Err(e) => tracing::warn!(phone = %phone, error = %e, "failed to issue otp"),
                        }
                    }
                }
            }
        } else {
            match self.otp.issue_at(db, phone, now) {
                Ok(issued) => messages.push(issued.message),
                Err(e) => {
                    tracing::warn!(phone = %phone, error = %e, "failed to issue otp");
                    messages.push(OTP_UNAVAILABLE.to_string());
                }
            }
        }

        let mut lines = vec![Role::User.line(text)];
        lines.extend(messages.iter().map(|m| Role::Bot.line(m)));
        self.append_transcripts(db, session_id, phone, &lines, now);

        let mut replies: Vec<ReplyFragment> = messages.into_iter().map(text_fragment).collect();
        if let Some(history) = restored {
            replies.push(text_fragment(format!(
                "Welcome back! Here is your previous conversation:\n{}",
                history
            )));
        }
        Some(replies)
    }

    fn append_transcripts(
        &self,
        db: &Database,
        session_id: &str,
        phone: &str,
        lines: &[String],
        now: DateTime<Utc>,
    ) {
        for line in lines {
            if let Err(e) = db.append_session_transcript(session_id, Some(phone), line, now) {
                tracing::warn!(session_id, error = %e, "failed to append session transcript");
            }
            if let Err(e) = db.append_phone_transcript(phone, line, now) {
                tracing::warn!(phone = %phone, error = %e, "failed to append phone transcript");
            }
        }
    }

    fn record_message(&self, db: &Database, phone: &str, role: Role, message: &str, now: DateTime<Utc>) {
        if let Err(e) = db.insert_conversation(phone, role, message, now) {
            tracing::warn!(phone = %phone, error = %e, "failed to save conversation");
        }
    }

    /// Persist a forwarded turn and pick up any document ids the user typed.
    fn record_exchange(
        &self,
        db: &Database,
        session_id: &str,
        phone: &str,
        text: &str,
        replies: &[ReplyFragment],
        now: DateTime<Utc>,
    ) {
        self.append_transcripts(db, session_id, phone, &[Role::User.line(text)], now);
        self.record_message(db, phone, Role::User, text, now);

        for (kind, id) in extract_document_ids(text) {
            match db.record_document_id(phone, kind, &id, now) {
                Ok(_) => tracing::info!(phone = %phone, kind = kind.label(), "document id recorded"),
                Err(e) => tracing::warn!(phone = %phone, error = %e, "failed to record document id"),
            }
        }

        for reply in replies.iter().filter_map(fragment_text) {
            self.append_transcripts(db, session_id, phone, &[Role::Bot.line(reply)], now);
            self.record_message(db, phone, Role::Bot, reply, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::FixedCode;
    use async_trait::async_trait;
    use chrono::Duration;
    use serde_json::{json, Value};

    const PHONE: &str = "9876543210";

    /// Records every forwarded message and answers with canned fragments.
    struct StubEngine {
        calls: Mutex<Vec<(String, String)>>,
        replies: Vec<ReplyFragment>,
        fail: bool,
    }

    impl StubEngine {
        fn replying(replies: Value) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                replies: serde_json::from_value(replies).unwrap(),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                replies: Vec::new(),
                fail: true,
            })
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DialogueEngine for StubEngine {
        async fn send(&self, sender: &str, message: &str) -> Result<Vec<ReplyFragment>, DialogueError> {
            self.calls
                .lock()
                .unwrap()
                .push((sender.to_string(), message.to_string()));
            if self.fail {
                return Err(DialogueError::UpstreamUnavailable("connection refused".to_string()));
            }
            Ok(self.replies.clone())
        }

        async fn health(&self) -> Result<Value, DialogueError> {
            Ok(json!({"status": "ok"}))
        }
    }

    fn setup(engine: Arc<StubEngine>, pool_size: u32) -> (ChatOrchestrator, Arc<Mutex<Database>>) {
        let db = Arc::new(Mutex::new(Database::open_memory().unwrap()));
        let otp = OtpVerifier::new(Duration::minutes(5), 3, Arc::new(FixedCode("000000".to_string())));
        let orchestrator = ChatOrchestrator::new(
            Arc::clone(&db),
            engine,
            SlotController::new(pool_size, Duration::minutes(15)),
            otp,
        );
        (orchestrator, db)
    }

    fn turn(text: &str, phone: Option<&str>, session: Option<&str>) -> ChatRequest {
        ChatRequest {
            text: text.to_string(),
            sender_id: None,
            phone_number: phone.map(str::to_string),
            session_id: session.map(str::to_string),
            new_session: false,
        }
    }

    fn texts(response: &ChatResponse) -> Vec<&str> {
        response.replies.iter().filter_map(fragment_text).collect()
    }

    #[tokio::test]
    async fn test_greeting_without_phone() {
        let engine = StubEngine::replying(json!([]));
        let (chat, db) = setup(Arc::clone(&engine), 10);

        let resp = chat.handle_turn(turn("hello", None, None)).await.unwrap();
        assert_eq!(texts(&resp), GREETING.to_vec());
        assert_eq!(resp.sender_id, resp.session_id);
        assert!(Uuid::parse_str(&resp.session_id).is_ok());

        assert!(engine.calls().is_empty());
        let db = db.lock().unwrap();
        assert!(db.list_slots().unwrap().is_empty());
        assert!(db.get_session_transcript(&resp.session_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_phone_number_text_starts_fresh_session() {
        let engine = StubEngine::replying(json!([{"text": "unused"}]));
        let (chat, db) = setup(Arc::clone(&engine), 10);

        let resp = chat
            .handle_turn(turn("5550100100", Some("+1 555-0100"), Some("existing")))
            .await
            .unwrap();

        assert_eq!(texts(&resp), vec!["Got your number: 5550100100."]);
        assert_ne!(resp.session_id, "existing");
        assert!(engine.calls().is_empty());

        let db = db.lock().unwrap();
        assert!(db.get_phone_owner("5550100100").unwrap().is_some());
        let session = db.get_session_transcript(&resp.session_id).unwrap().unwrap();
        assert_eq!(session.history, "User: 5550100100\nBot: Got your number: 5550100100.");
        assert_eq!(session.phone_number.as_deref(), Some("5550100100"));
        assert!(db.get_session_transcript("existing").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_turn_is_forwarded() {
        let engine = StubEngine::replying(json!([
            {"recipient_id": "u1", "text": "Hello there"},
            {"image": "https://example.com/pan.png"}
        ]));
        let (chat, db) = setup(Arc::clone(&engine), 10);

        let mut first = turn("hello", Some(PHONE), Some("s1"));
        first.sender_id = Some("u1".to_string());
        let resp = chat.handle_turn(first).await.unwrap();
        assert_eq!(texts(&resp), vec!["Got your number: 9876543210."]);
        assert!(engine.calls().is_empty());

        let mut second = turn("hi", Some(PHONE), Some("s1"));
        second.sender_id = Some("u1".to_string());
        let resp = chat.handle_turn(second).await.unwrap();

        assert_eq!(engine.calls(), vec![("u1".to_string(), "hi".to_string())]);
        assert_eq!(resp.session_id, "s1");
        assert_eq!(resp.replies.len(), 2);
        assert_eq!(resp.replies[1].get("image"), Some(&json!("https://example.com/pan.png")));

        let db = db.lock().unwrap();
        let session = db.get_session_transcript("s1").unwrap().unwrap();
        assert!(session.history.ends_with("User: hi\nBot: Hello there"));
        let phone = db.get_phone_transcript(PHONE).unwrap().unwrap();
        assert_eq!(phone.lines().count(), 4);

        let log = db.list_conversations(PHONE).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!((log[0].role, log[0].message.as_str()), (Role::User, "hi"));
        assert_eq!((log[1].role, log[1].message.as_str()), (Role::Bot, "Hello there"));
    }

    #[tokio::test]
    async fn test_waiting_when_pool_is_full() {
        let engine = StubEngine::replying(json!([]));
        let (chat, db) = setup(Arc::clone(&engine), 1);

        chat.handle_turn(turn("hello", Some(PHONE), Some("s1"))).await.unwrap();
        let resp = chat
            .handle_turn(turn("hello", Some("9123456780"), Some("s2")))
            .await
            .unwrap();

        assert_eq!(texts(&resp), vec![WAITING_MESSAGE]);
        assert!(db.lock().unwrap().get_session_transcript("s2").unwrap().is_none());

        assert!(chat.release("s1"));
        let resp = chat
            .handle_turn(turn("hello", Some("9123456780"), Some("s2")))
            .await
            .unwrap();
        assert_eq!(texts(&resp), vec!["Got your number: 9123456780."]);
    }

    #[tokio::test]
    async fn test_slot_storage_failure_gets_retry_reply() {
        let engine = StubEngine::replying(json!([{"text": "unused"}]));
        let (chat, db) = setup(Arc::clone(&engine), 10);
        db.lock().unwrap().execute_raw("DROP TABLE session_slots;").unwrap();

        let resp = chat.handle_turn(turn("hello", Some(PHONE), Some("s1"))).await.unwrap();

        assert_eq!(texts(&resp), vec![RETRY_MESSAGE]);
        assert_eq!(resp.session_id, "s1");
        assert!(engine.calls().is_empty());
        assert!(db.lock().unwrap().get_session_transcript("s1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_owner_failure_still_acknowledges() {
        let engine = StubEngine::replying(json!([]));
        let (chat, db) = setup(Arc::clone(&engine), 10);
        db.lock().unwrap().execute_raw("DROP TABLE phone_owners;").unwrap();

        let resp = chat.handle_turn(turn("hello", Some(PHONE), Some("s1"))).await.unwrap();

        assert_eq!(texts(&resp), vec!["Got your number: 9876543210."]);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_transcript_failure_still_forwards() {
        let engine = StubEngine::replying(json!([{"text": "Hello there"}]));
        let (chat, db) = setup(Arc::clone(&engine), 10);

        chat.handle_turn(turn("hello", Some(PHONE), Some("s1"))).await.unwrap();
        db.lock().unwrap().execute_raw("DROP TABLE phone_transcripts;").unwrap();

        let resp = chat.handle_turn(turn("hi", Some(PHONE), Some("s1"))).await.unwrap();

        assert_eq!(texts(&resp), vec!["Hello there"]);
        assert_eq!(engine.calls().len(), 1);
        let db = db.lock().unwrap();
        assert!(db.get_session_transcript("s1").unwrap().unwrap().history.ends_with("Bot: Hello there"));
        assert_eq!(db.list_conversations(PHONE).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_engine_failure_persists_nothing() {
        let engine = StubEngine::failing();
        let (chat, db) = setup(Arc::clone(&engine), 10);

        chat.handle_turn(turn("hello", Some(PHONE), Some("s1"))).await.unwrap();
        let before = db.lock().unwrap().get_session_transcript("s1").unwrap().unwrap();

        let err = chat
            .handle_turn(turn("hi", Some(PHONE), Some("s1")))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Upstream(_)));

        let db = db.lock().unwrap();
        assert_eq!(db.get_session_transcript("s1").unwrap().unwrap().history, before.history);
        assert!(db.list_conversations(PHONE).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_document_ids_are_extracted() {
        let engine = StubEngine::replying(json!([{"text": "Thanks, checking."}]));
        let (chat, db) = setup(Arc::clone(&engine), 10);

        chat.handle_turn(turn("hello", Some(PHONE), Some("s1"))).await.unwrap();
        chat.handle_turn(turn("my pan is abcde1234f please check", Some(PHONE), Some("s1")))
            .await
            .unwrap();

        let owner = db.lock().unwrap().get_phone_owner(PHONE).unwrap().unwrap();
        assert_eq!(owner.pan_number.as_deref(), Some("ABCDE1234F"));
        assert!(owner.tan_number.is_none());
    }

    #[tokio::test]
    async fn test_new_session_flag_mints_id() {
        let engine = StubEngine::replying(json!([]));
        let (chat, _db) = setup(engine, 10);

        let mut request = turn("hello", Some(PHONE), Some("s1"));
        request.new_session = true;
        let resp = chat.handle_turn(request).await.unwrap();
        assert_ne!(resp.session_id, "s1");
        assert_eq!(resp.sender_id, resp.session_id);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let engine = StubEngine::replying(json!([]));
        let (chat, _db) = setup(engine, 10);

        chat.handle_turn(turn("hello", Some(PHONE), Some("s1"))).await.unwrap();
        assert!(chat.release(" s1 "));
        assert!(!chat.release("s1"));
        assert!(!chat.release("unknown"));
    }

    #[tokio::test]
    async fn test_otp_gate_flow() {
        let engine = StubEngine::replying(json!([{"text": "How can I help?"}]));
        let (chat, _db) = setup(Arc::clone(&engine), 10);
        let chat = chat.with_otp_gate(true);
        let now = Utc::now();

        chat.handle_turn_at(turn("hello", Some(PHONE), Some("s1")), now)
            .await
            .unwrap();

        let resp = chat
            .handle_turn_at(turn("hi", Some(PHONE), Some("s1")), now)
            .await
            .unwrap();
        assert_eq!(
            texts(&resp),
            vec!["OTP sent successfully. Please enter the 6-digit code. (For testing: 000000)"]
        );

        let resp = chat
            .handle_turn_at(turn("123456", Some(PHONE), Some("s1")), now)
            .await
            .unwrap();
        assert_eq!(texts(&resp), vec!["Invalid OTP. 2 attempts remaining."]);

        let resp = chat
            .handle_turn_at(turn("000000", Some(PHONE), Some("s1")), now)
            .await
            .unwrap();
        let replies = texts(&resp);
        assert_eq!(replies[0], MSG_VERIFIED);
        assert!(replies[1].contains("User: hello"));
        assert!(engine.calls().is_empty());

        let resp = chat
            .handle_turn_at(turn("hi again", Some(PHONE), Some("s1")), now)
            .await
            .unwrap();
        assert_eq!(texts(&resp), vec!["How can I help?"]);
        assert_eq!(engine.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_otp_gate_reissues_after_expiry() {
        let engine = StubEngine::replying(json!([]));
        let (chat, _db) = setup(engine, 10);
        let chat = chat.with_otp_gate(true);
        let now = Utc::now();

        chat.handle_turn_at(turn("hello", Some(PHONE), Some("s1")), now)
            .await
            .unwrap();
        chat.handle_turn_at(turn("hi", Some(PHONE), Some("s1")), now)
            .await
            .unwrap();

        let later = now + Duration::minutes(6);
        let resp = chat
            .handle_turn_at(turn("000000", Some(PHONE), Some("s1")), later)
            .await
            .unwrap();
        assert_eq!(
            texts(&resp),
            vec![
                "OTP has expired. Please request a new OTP.",
                "OTP sent successfully. Please enter the 6-digit code. (For testing: 000000)",
            ]
        );
    }
}
