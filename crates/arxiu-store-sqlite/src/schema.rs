//! SQL schema for the Arxiu SQLite store.
//!
//! Executed once at connection startup. Timestamps are fixed-width RFC 3339
//! UTC strings so that text comparison orders them correctly.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL UNIQUE,
    email         TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password_hash TEXT NOT NULL,
    role          TEXT NOT NULL DEFAULT 'user',  -- 'user' | 'moderator' | 'admin'
    created_at    TEXT NOT NULL
);

-- ── Trees ──────────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS trees (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    visibility  TEXT NOT NULL,
    status      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS persons (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    tree_id     INTEGER NOT NULL REFERENCES trees(id) ON DELETE CASCADE,
    external_id TEXT,
    given       TEXT NOT NULL DEFAULT '',
    surname1    TEXT NOT NULL DEFAULT '',
    surname2    TEXT NOT NULL DEFAULT '',
    full_name   TEXT NOT NULL DEFAULT '',
    sex         TEXT NOT NULL DEFAULT 'unset',
    birth_date  TEXT,
    birth_place TEXT,
    death_date  TEXT,
    death_place TEXT,
    visibility  TEXT NOT NULL DEFAULT 'visible',
    status      TEXT NOT NULL DEFAULT 'active',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

-- Non-empty external IDs are unique per tree.
CREATE UNIQUE INDEX IF NOT EXISTS persons_external_idx
    ON persons(tree_id, external_id)
    WHERE external_id IS NOT NULL AND external_id != '';

CREATE TABLE IF NOT EXISTS relations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    tree_id     INTEGER NOT NULL REFERENCES trees(id) ON DELETE CASCADE,
    from_id     INTEGER NOT NULL REFERENCES persons(id) ON DELETE CASCADE,
    to_id       INTEGER NOT NULL REFERENCES persons(id) ON DELETE CASCADE,
    role        TEXT NOT NULL,   -- 'father' | 'mother' | 'parent' | 'child' | 'spouse'
    created_at  TEXT NOT NULL,
    UNIQUE (tree_id, from_id, to_id, role)
);

-- ── Imports ────────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS import_sources (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id          INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    source_type       TEXT NOT NULL,
    original_filename TEXT NOT NULL,
    storage_path      TEXT NOT NULL,
    size_bytes        INTEGER NOT NULL,
    checksum          TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    UNIQUE (owner_id, checksum)
);

CREATE TABLE IF NOT EXISTS external_connections (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    tree_id       INTEGER NOT NULL REFERENCES trees(id) ON DELETE CASCADE,
    base_url      TEXT NOT NULL,
    username      TEXT,
    token_sealed  TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'connected',
    last_sync_at  TEXT,
    last_error    TEXT,
    failures      INTEGER NOT NULL DEFAULT 0,
    next_sync_at  TEXT,
    created_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS external_connections_tree_idx ON external_connections(tree_id);

CREATE TABLE IF NOT EXISTS sync_log (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    connection_id INTEGER NOT NULL REFERENCES external_connections(id) ON DELETE CASCADE,
    message       TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS import_jobs (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id       INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    tree_id        INTEGER NOT NULL REFERENCES trees(id) ON DELETE CASCADE,
    source_id      INTEGER REFERENCES import_sources(id) ON DELETE SET NULL,
    connection_id  INTEGER REFERENCES external_connections(id) ON DELETE SET NULL,
    job_type       TEXT NOT NULL,
    mode           TEXT NOT NULL,
    status         TEXT NOT NULL DEFAULT 'queued',
    progress_done  INTEGER NOT NULL DEFAULT 0,
    progress_total INTEGER NOT NULL DEFAULT 0,
    error_message  TEXT,
    summary_json   TEXT,
    created_by     INTEGER NOT NULL REFERENCES users(id),
    created_at     TEXT NOT NULL,
    started_at     TEXT,
    finished_at    TEXT
);

CREATE INDEX IF NOT EXISTS import_jobs_status_idx ON import_jobs(status, created_at);

-- ── Search index ───────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS archival_records (
    id                INTEGER PRIMARY KEY,
    book_id           INTEGER,
    municipality_id   INTEGER,
    municipality_name TEXT,
    year              INTEGER,
    given             TEXT NOT NULL DEFAULT '',
    surname1          TEXT NOT NULL DEFAULT '',
    surname2          TEXT NOT NULL DEFAULT '',
    relations_json    TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS search_docs (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type        TEXT NOT NULL,
    entity_id          INTEGER NOT NULL,
    person_norm        TEXT NOT NULL,
    person_tokens_json TEXT NOT NULL,
    given_norm         TEXT NOT NULL,
    surname_norm       TEXT NOT NULL,
    surname_canon      TEXT NOT NULL,
    year               INTEGER,
    municipality_id    INTEGER,
    municipality_name  TEXT,
    relations_json     TEXT NOT NULL DEFAULT '[]',
    UNIQUE (entity_type, entity_id)
);

CREATE INDEX IF NOT EXISTS search_docs_year_idx ON search_docs(year);
CREATE INDEX IF NOT EXISTS search_docs_muni_idx ON search_docs(municipality_id);

CREATE TABLE IF NOT EXISTS search_tokens (
    token   TEXT NOT NULL,
    doc_id  INTEGER NOT NULL REFERENCES search_docs(id) ON DELETE CASCADE,
    PRIMARY KEY (token, doc_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS search_tokens_doc_idx ON search_tokens(doc_id);

-- ── Matches ────────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS matches (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    tree_id     INTEGER NOT NULL REFERENCES trees(id) ON DELETE CASCADE,
    person_id   INTEGER NOT NULL REFERENCES persons(id) ON DELETE CASCADE,
    target_type TEXT NOT NULL,
    target_id   INTEGER NOT NULL,
    score       REAL NOT NULL,
    reason_json TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE (owner_id, person_id, target_type, target_id)
);

CREATE INDEX IF NOT EXISTS matches_owner_idx ON matches(owner_id, tree_id, status);

CREATE TABLE IF NOT EXISTS match_decisions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id    INTEGER NOT NULL REFERENCES matches(id) ON DELETE CASCADE,
    user_id     INTEGER NOT NULL REFERENCES users(id),
    from_status TEXT NOT NULL,
    to_status   TEXT NOT NULL,
    decided_at  TEXT NOT NULL
);

-- ── Groups ─────────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS research_groups (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id    INTEGER NOT NULL REFERENCES research_groups(id) ON DELETE CASCADE,
    user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role        TEXT NOT NULL,   -- 'viewer' | 'member' | 'admin' | 'owner'
    status      TEXT NOT NULL,   -- 'invited' | 'active' | 'removed'
    invited_by  INTEGER REFERENCES users(id),
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE (group_id, user_id)
);

CREATE TABLE IF NOT EXISTS group_trees (
    group_id    INTEGER NOT NULL REFERENCES research_groups(id) ON DELETE CASCADE,
    tree_id     INTEGER NOT NULL REFERENCES trees(id) ON DELETE CASCADE,
    linked_by   INTEGER NOT NULL REFERENCES users(id),
    status      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (group_id, tree_id)
);

CREATE TABLE IF NOT EXISTS group_conflicts (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id      INTEGER NOT NULL REFERENCES research_groups(id) ON DELETE CASCADE,
    tree_id       INTEGER NOT NULL,
    conflict_type TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'pending',
    summary       TEXT NOT NULL,
    detail_json   TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    resolved_by   INTEGER REFERENCES users(id),
    resolved_at   TEXT
);

-- Append-only: no UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS group_changes (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id     INTEGER NOT NULL REFERENCES research_groups(id) ON DELETE CASCADE,
    actor_id     INTEGER NOT NULL REFERENCES users(id),
    action       TEXT NOT NULL,
    object_type  TEXT NOT NULL,
    object_id    INTEGER,
    payload_json TEXT NOT NULL DEFAULT '{}',
    created_at   TEXT NOT NULL
);

-- ── Notifications ──────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS notifications (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    kind        TEXT NOT NULL,
    title       TEXT NOT NULL,
    body        TEXT NOT NULL,
    url         TEXT,
    status      TEXT NOT NULL DEFAULT 'unread',
    tree_id     INTEGER,
    group_id    INTEGER,
    object_id   INTEGER,
    dedupe_key  TEXT,
    created_at  TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS notifications_dedupe_idx
    ON notifications(user_id, dedupe_key)
    WHERE dedupe_key IS NOT NULL;

CREATE TABLE IF NOT EXISTS notification_prefs (
    user_id            INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    frequency          TEXT NOT NULL,
    enabled_kinds_json TEXT            -- NULL means every kind
);

-- ── Moderated content ──────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS moderated_entities (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    kind               TEXT NOT NULL,
    current_version_id INTEGER,
    created_by         INTEGER NOT NULL REFERENCES users(id),
    created_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS draft_versions (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id        INTEGER NOT NULL REFERENCES moderated_entities(id) ON DELETE CASCADE,
    status           TEXT NOT NULL DEFAULT 'draft',
    content_kind     TEXT NOT NULL,
    content_json     TEXT NOT NULL,
    created_by       INTEGER NOT NULL REFERENCES users(id),
    lock_version     INTEGER NOT NULL DEFAULT 0,
    moderator_id     INTEGER REFERENCES users(id),
    moderated_at     TEXT,
    moderation_notes TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS draft_versions_entity_idx ON draft_versions(entity_id, status);

-- ── Credits ────────────────────────────────────────────────────────────────

-- Append-only; a balance is SUM(delta).
CREATE TABLE IF NOT EXISTS credit_ledger (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    delta       INTEGER NOT NULL,
    reason      TEXT NOT NULL,
    ref_type    TEXT,
    ref_id      INTEGER,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS credit_ledger_user_idx ON credit_ledger(user_id);

CREATE TABLE IF NOT EXISTS points_ledger (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    delta       INTEGER NOT NULL,
    reason      TEXT NOT NULL,
    ref_id      INTEGER,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS points_ledger_user_idx ON points_ledger(user_id);

CREATE TABLE IF NOT EXISTS media_grants (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id       INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    item_id       INTEGER NOT NULL,
    token         TEXT NOT NULL UNIQUE,
    expires_at    TEXT NOT NULL,
    credits_spent INTEGER NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS media_grants_lookup_idx ON media_grants(user_id, item_id, expires_at);

-- ── Site settings ──────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS maintenance_banner (
    id           INTEGER PRIMARY KEY CHECK (id = 1),
    message      TEXT NOT NULL,
    level        TEXT NOT NULL,
    active_until TEXT
);

PRAGMA user_version = 1;
";
