//! SQL schema for the dexsync SQLite store.
//!
//! Executed once at connection startup. Future migrations of the table layout
//! will be gated on `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// `synchronous = FULL` makes a returned COMMIT durable across power loss,
/// which the checkpoint protocol relies on.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = FULL;
PRAGMA foreign_keys = ON;

-- Latest committed payload per species.
CREATE TABLE IF NOT EXISTS payloads (
    species_id      TEXT PRIMARY KEY,   -- zero-padded dex number
    tidbit_revision INTEGER NOT NULL,
    payload_json    TEXT NOT NULL,
    content_hash    TEXT NOT NULL,      -- canonical JSON SHA-256
    dataset_version TEXT NOT NULL,      -- release the payload arrived with
    committed_at    TEXT NOT NULL
);

-- At most one in-progress sync.
CREATE TABLE IF NOT EXISTS sync_checkpoint (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    version     TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    timestamp   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS local_version (
    id              INTEGER PRIMARY KEY CHECK (id = 1),
    current_version TEXT NOT NULL
);

-- Append-only.
CREATE TABLE IF NOT EXISTS version_history (
    seq              INTEGER PRIMARY KEY AUTOINCREMENT,
    version          TEXT NOT NULL,
    timestamp        TEXT NOT NULL,
    total_entities   INTEGER NOT NULL,
    sync_duration_ms INTEGER NOT NULL
);

PRAGMA user_version = 1;
";
