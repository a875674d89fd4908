//! SQL schema for the Tollgate SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Entitlement rows are never deleted; closed rows persist for audit.
-- The single-active-window rule is enforced at activation, not here.
CREATE TABLE IF NOT EXISTS entitlements (
    id              TEXT PRIMARY KEY,
    device_key      TEXT NOT NULL,
    owner_id        TEXT,
    start_at        TEXT NOT NULL,   -- ISO 8601 UTC
    end_at          TEXT NOT NULL,
    status          TEXT NOT NULL,   -- 'active' | 'expired' | 'cancelled'
    source          TEXT NOT NULL,   -- 'payment' | 'voucher' | 'free_trial'
    source_ref      TEXT NOT NULL,
    access_state    TEXT NOT NULL,   -- 'not_granted' | 'granted' | 'revoke_pending' | 'revoked'
    revoke_attempts INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    UNIQUE (source, source_ref)      -- dedup backstop for retried events
);

CREATE TABLE IF NOT EXISTS devices (
    device_key TEXT PRIMARY KEY,
    address    TEXT,
    last_seen  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS checkouts (
    checkout_ref  TEXT PRIMARY KEY,
    device_key    TEXT NOT NULL,
    owner_id      TEXT,
    duration_secs INTEGER NOT NULL,
    amount_cents  INTEGER NOT NULL,
    status        TEXT NOT NULL,     -- 'pending' | 'paid' | 'failed'
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS vouchers (
    code           TEXT PRIMARY KEY,
    duration_secs  INTEGER NOT NULL,
    uses_remaining INTEGER NOT NULL,
    created_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS trial_claims (
    device_key TEXT PRIMARY KEY,
    claimed_at TEXT NOT NULL
);

-- Strictly append-only; consumed by the admin dashboard, never by the engine.
CREATE TABLE IF NOT EXISTS access_audit (
    id             TEXT PRIMARY KEY,
    entitlement_id TEXT,
    device_key     TEXT NOT NULL,
    action         TEXT NOT NULL,    -- 'grant' | 'revoke'
    outcome        TEXT NOT NULL,    -- 'ok' | 'failed'
    attempts       INTEGER NOT NULL,
    latency_ms     INTEGER NOT NULL,
    detail         TEXT,
    recorded_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS entitlements_device_idx ON entitlements(device_key);
CREATE INDEX IF NOT EXISTS entitlements_open_idx   ON entitlements(status, end_at);
CREATE INDEX IF NOT EXISTS audit_device_idx        ON access_audit(device_key, recorded_at);

PRAGMA user_version = 1;
";
