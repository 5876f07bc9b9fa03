pub const SCHEMA_VERSION: i32 = 2;

pub const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
);

-- Owner records keyed by digits-only phone number
CREATE TABLE IF NOT EXISTS phone_owners (
    phone_number TEXT PRIMARY KEY,
    pan_number TEXT,
    tan_number TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_owner_pan ON phone_owners(pan_number);
CREATE INDEX IF NOT EXISTS idx_owner_tan ON phone_owners(tan_number);

-- One-time passcodes; only the newest row per phone is authoritative
CREATE TABLE IF NOT EXISTS otp_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    phone_number TEXT NOT NULL,
    code TEXT NOT NULL,
    is_verified INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    verified_at TEXT,
    FOREIGN KEY (phone_number) REFERENCES phone_owners(phone_number)
);

CREATE INDEX IF NOT EXISTS idx_otp_phone ON otp_records(phone_number, id);

-- Fixed admission pool
CREATE TABLE IF NOT EXISTS session_slots (
    slot_number INTEGER PRIMARY KEY,
    is_busy INTEGER NOT NULL DEFAULT 0,
    session_id TEXT,
    assigned_at TEXT
);

-- A session may hold at most one slot
CREATE UNIQUE INDEX IF NOT EXISTS idx_slot_session
    ON session_slots(session_id) WHERE session_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS session_transcripts (
    session_id TEXT PRIMARY KEY,
    phone_number TEXT,
    history TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (phone_number) REFERENCES phone_owners(phone_number)
);

CREATE INDEX IF NOT EXISTS idx_session_transcript_phone ON session_transcripts(phone_number);
CREATE INDEX IF NOT EXISTS idx_session_transcript_updated ON session_transcripts(updated_at);

CREATE TABLE IF NOT EXISTS phone_transcripts (
    phone_number TEXT PRIMARY KEY,
    history TEXT NOT NULL DEFAULT '',
    updated_at TEXT NOT NULL,
    FOREIGN KEY (phone_number) REFERENCES phone_owners(phone_number)
);

-- Consolidated role/message log
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    phone_number TEXT NOT NULL,
    role TEXT NOT NULL CHECK(role IN ('user', 'bot')),
    message TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (phone_number) REFERENCES phone_owners(phone_number)
);

CREATE INDEX IF NOT EXISTS idx_conversation_phone ON conversations(phone_number, id);
"#;

/// V2 migration: consent records per phone and purpose
pub const MIGRATION_V2: &str = r#"
CREATE TABLE IF NOT EXISTS consents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    phone_number TEXT NOT NULL,
    purpose TEXT NOT NULL,
    consent_version TEXT NOT NULL,
    granted INTEGER NOT NULL DEFAULT 0,
    granted_at TEXT,
    revoked_at TEXT,
    consent_text TEXT NOT NULL,
    ip_address TEXT,
    user_agent TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (phone_number) REFERENCES phone_owners(phone_number)
);

CREATE INDEX IF NOT EXISTS idx_consent_phone_purpose ON consents(phone_number, purpose);
"#;
