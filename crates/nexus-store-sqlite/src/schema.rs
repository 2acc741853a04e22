//! Numbered schema migrations, gated on `PRAGMA user_version`.
//!
//! On startup every migration above the stored version is applied in
//! ascending order inside one transaction, then the version is bumped.

/// `MIGRATIONS[n]` migrates from version `n` to `n + 1`.
pub const MIGRATIONS: &[&str] = &[
  // ── 0 → 1: the initial schema ──────────────────────────────────────────
  "
CREATE TABLE nexus_users (
    username      TEXT PRIMARY KEY,
    password_hash TEXT NOT NULL,      -- argon2 PHC string
    superuser     INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE bank_connections (
    name            TEXT PRIMARY KEY,
    connection_type TEXT NOT NULL,    -- 'ebics'
    dialect         TEXT NOT NULL,    -- 'h004' | 'h005'
    owner           TEXT NOT NULL REFERENCES nexus_users(username)
);

-- One-to-one with a bank_connections row of type 'ebics'.
-- Bank keys stay NULL until HPB succeeds.
CREATE TABLE ebics_subscribers (
    connection TEXT PRIMARY KEY
        REFERENCES bank_connections(name) ON DELETE CASCADE,
    url        TEXT NOT NULL,
    host_id    TEXT NOT NULL,
    partner_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    system_id  TEXT,
    signature_private_key          BLOB NOT NULL,  -- PKCS#8 DER
    authentication_private_key     BLOB NOT NULL,
    encryption_private_key         BLOB NOT NULL,
    bank_authentication_public_key BLOB,           -- SPKI DER
    bank_encryption_public_key     BLOB,
    ini_state      TEXT NOT NULL DEFAULT 'not_sent',
    hia_state      TEXT NOT NULL DEFAULT 'not_sent',
    next_order_seq INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE offered_bank_accounts (
    offered_account_id TEXT NOT NULL,
    connection         TEXT NOT NULL
        REFERENCES bank_connections(name) ON DELETE CASCADE,
    iban           TEXT NOT NULL,
    bank_code      TEXT NOT NULL,
    account_holder TEXT NOT NULL,
    imported       TEXT,              -- bank_accounts.label once bound
    PRIMARY KEY (offered_account_id, connection)
);

CREATE TABLE bank_accounts (
    label              TEXT PRIMARY KEY,
    account_holder     TEXT NOT NULL,
    iban               TEXT NOT NULL,
    bank_code          TEXT NOT NULL,
    default_connection TEXT REFERENCES bank_connections(name),
    last_report_timestamp          TEXT,
    last_statement_timestamp       TEXT,
    last_notification_timestamp    TEXT,
    highest_seen_message_serial_id INTEGER NOT NULL DEFAULT 0,
    pain001_counter                INTEGER NOT NULL DEFAULT 0
);

-- Raw response bodies; immutable except for the errors flag.
CREATE TABLE bank_messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    connection  TEXT NOT NULL
        REFERENCES bank_connections(name) ON DELETE CASCADE,
    fetch_level TEXT NOT NULL,
    message_id  TEXT,
    content     BLOB NOT NULL,
    errors      INTEGER NOT NULL DEFAULT 0
);

-- Ledger rows are append-only; a status change arrives as a new row and
-- the old one points at it through updated_by. Dedup on
-- (bank_account, transaction_id) is enforced by the ingest logic so the
-- superseding row may reuse the transaction id.
CREATE TABLE bank_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bank_account   TEXT NOT NULL REFERENCES bank_accounts(label),
    transaction_id TEXT NOT NULL,     -- 'AcctSvcrRef:<ref>'
    credit_debit_indicator TEXT NOT NULL,
    currency   TEXT NOT NULL,
    amount     TEXT NOT NULL,
    status     TEXT NOT NULL,
    entry_json TEXT NOT NULL,
    updated_by INTEGER REFERENCES bank_transactions(id)
);

CREATE TABLE payment_initiations (
    id               TEXT PRIMARY KEY,
    bank_account     TEXT NOT NULL REFERENCES bank_accounts(label),
    preparation_date TEXT NOT NULL,
    submission_date  TEXT,
    amount        TEXT NOT NULL,      -- 'CURRENCY:VALUE'
    subject       TEXT NOT NULL,
    creditor_iban TEXT NOT NULL,
    creditor_bic  TEXT,
    creditor_name TEXT NOT NULL,
    message_id             TEXT NOT NULL,
    payment_information_id TEXT NOT NULL,
    end_to_end_id          TEXT NOT NULL,
    instruction_id         TEXT NOT NULL,
    submitted INTEGER NOT NULL DEFAULT 0,
    invalid   INTEGER NOT NULL DEFAULT 0,
    confirmation_transaction_id INTEGER REFERENCES bank_transactions(id),
    client_uid TEXT,
    UNIQUE (bank_account, client_uid),
    UNIQUE (bank_account, payment_information_id)
);

CREATE TABLE scheduled_tasks (
    resource_type TEXT NOT NULL,      -- 'bank-account'
    resource_id   TEXT NOT NULL,
    task_name     TEXT NOT NULL,
    task_type     TEXT NOT NULL,      -- 'fetch' | 'submit'
    cron_spec     TEXT NOT NULL,
    params        TEXT NOT NULL DEFAULT 'null',
    next_scheduled_execution_sec INTEGER,
    prev_scheduled_execution_sec INTEGER,
    PRIMARY KEY (resource_id, task_name)
);

CREATE INDEX bank_transactions_account_idx
    ON bank_transactions(bank_account, transaction_id);
CREATE INDEX payment_initiations_account_idx
    ON payment_initiations(bank_account, submitted);
CREATE INDEX bank_messages_connection_idx ON bank_messages(connection);
",
];

/// Statements applied to every fresh connection, before migrations.
pub const CONNECTION_SETUP: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
";
