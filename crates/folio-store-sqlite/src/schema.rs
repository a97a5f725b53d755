//! SQL schema for the Folio SQLite store.
//!
//! Applied in full every time a connection opens; `PRAGMA user_version`
//! records the schema revision so later migrations know where to start.

/// Complete schema DDL. Safe to re-run: everything is `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS loans (
    loan_id                  TEXT PRIMARY KEY,
    book_id                  TEXT NOT NULL,
    lender_id                TEXT NOT NULL,
    borrower_id              TEXT NOT NULL,
    -- 'pending' | 'active' | 'returned' | 'revoked' | 'expired'
    -- | 'rejected' | 'cancelled'
    status                   TEXT NOT NULL,
    message                  TEXT,
    duration_days            INTEGER NOT NULL,
    grace_days               INTEGER NOT NULL,
    can_add_highlights       INTEGER NOT NULL,
    can_edit_highlights      INTEGER NOT NULL,
    can_add_notes            INTEGER NOT NULL,
    can_edit_notes           INTEGER NOT NULL,
    -- 'private' | 'shared_with_lender'
    annotation_visibility    TEXT NOT NULL,
    share_lender_annotations INTEGER NOT NULL,
    created_access_on_accept INTEGER NOT NULL DEFAULT 0,
    requested_at             TEXT NOT NULL,   -- RFC 3339 UTC, like all times here
    accepted_at              TEXT,
    due_at                   TEXT,
    returned_at              TEXT,
    revoked_at               TEXT,
    expired_at               TEXT,
    export_available_until   TEXT,
    due_soon_notified_at     TEXT,
    overdue_notified_at      TEXT
);

-- Storage-level backstops for the concurrency invariants: at most one
-- active and one pending loan per (book, lender, borrower).
CREATE UNIQUE INDEX IF NOT EXISTS loans_one_active_per_triple
    ON loans(book_id, lender_id, borrower_id) WHERE status = 'active';
CREATE UNIQUE INDEX IF NOT EXISTS loans_one_pending_per_triple
    ON loans(book_id, lender_id, borrower_id) WHERE status = 'pending';

CREATE INDEX IF NOT EXISTS loans_borrower_idx ON loans(borrower_id, status);
CREATE INDEX IF NOT EXISTS loans_lender_idx   ON loans(lender_id, status);
CREATE INDEX IF NOT EXISTS loans_book_idx     ON loans(book_id, status);

-- Shared with the purchase/upload subsystem; the engine only ever deletes
-- rows it created itself (source = 'loan', flagged on the loan).
CREATE TABLE IF NOT EXISTS library_access (
    user_id    TEXT NOT NULL,
    book_id    TEXT NOT NULL,
    source     TEXT NOT NULL,   -- 'purchase' | 'upload' | 'loan'
    created_at TEXT NOT NULL,
    deleted_at TEXT,            -- set = in trash, recoverable
    PRIMARY KEY (user_id, book_id)
);

CREATE TABLE IF NOT EXISTS renewal_requests (
    renewal_id           TEXT PRIMARY KEY,
    loan_id              TEXT NOT NULL REFERENCES loans(loan_id),
    -- 'pending' | 'approved' | 'denied' | 'cancelled' | 'expired'
    status               TEXT NOT NULL,
    requested_extra_days INTEGER NOT NULL,
    previous_due_at      TEXT NOT NULL,
    proposed_due_at      TEXT NOT NULL,
    requester_user_id    TEXT NOT NULL,
    reviewer_user_id     TEXT,
    requested_at         TEXT NOT NULL,
    decided_at           TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS renewals_one_pending_per_loan
    ON renewal_requests(loan_id) WHERE status = 'pending';
CREATE INDEX IF NOT EXISTS renewals_loan_idx ON renewal_requests(loan_id);

CREATE TABLE IF NOT EXISTS annotations (
    annotation_id TEXT PRIMARY KEY,
    book_id       TEXT NOT NULL,
    author_id     TEXT NOT NULL,
    kind          TEXT NOT NULL,   -- 'highlight' | 'note'
    value_json    TEXT NOT NULL,   -- JSON payload (inner data only)
    -- 'owner' | 'lender_visible' | 'private_borrower'; stamped at write
    -- time, never recomputed
    scope         TEXT NOT NULL,
    revision      INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS annotations_book_idx
    ON annotations(book_id, created_at);
CREATE INDEX IF NOT EXISTS annotations_author_idx
    ON annotations(author_id, book_id);

-- Audit events are strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS audit_events (
    event_id       TEXT PRIMARY KEY,
    loan_id        TEXT NOT NULL REFERENCES loans(loan_id),
    actor_user_id  TEXT,            -- NULL for engine-initiated transitions
    target_user_id TEXT,
    action         TEXT NOT NULL,   -- discriminant of AuditAction variant
    details        TEXT NOT NULL DEFAULT '{}',
    recorded_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS audit_loan_idx
    ON audit_events(loan_id, recorded_at);

PRAGMA user_version = 1;
";
