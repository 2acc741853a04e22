//! [`SqliteStore`] — the SQLite implementation of
//! [`nexus_core::store::NexusStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use nexus_core::{
  account::{BankAccount, OfferedBankAccount},
  connection::{BankConnection, EbicsSubscriber, KeyState},
  initiation::{PaymentIdentifiers, PaymentInitiation, PaymentInitiationData},
  message::{BankMessage, FetchLevel},
  store::{IngestOutcome, NexusStore, NexusUser},
  task::ScheduledTask,
  transaction::{BankTransactionEntry, CamtEntry, EntryStatus},
};

use crate::{
  Error, Result,
  encode::{
    RawAccount, RawConnection, RawInitiation, RawTask, RawTransaction,
    decode_fetch_level, decode_key_state, encode_connection_type,
    encode_credit_debit, encode_dialect, encode_dt, encode_entry_status,
    encode_fetch_level, encode_key_state, encode_resource_type,
    encode_task_type,
  },
  schema::{CONNECTION_SETUP, MIGRATIONS},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Nexus store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and apply pending migrations.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.migrate().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.migrate().await?;
    Ok(store)
  }

  /// Apply every unapplied migration in ascending order.
  async fn migrate(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(CONNECTION_SETUP)?;
        let mut version: i64 =
          conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        while (version as usize) < MIGRATIONS.len() {
          let tx = conn.transaction()?;
          tx.execute_batch(MIGRATIONS[version as usize])?;
          version += 1;
          tx.pragma_update(None, "user_version", version)?;
          tx.commit()?;
        }
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Drop every table and reapply the schema (the `reset-tables` CLI).
  pub async fn reset_tables(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(
          "
          PRAGMA foreign_keys = OFF;
          DROP TABLE IF EXISTS scheduled_tasks;
          DROP TABLE IF EXISTS payment_initiations;
          DROP TABLE IF EXISTS bank_transactions;
          DROP TABLE IF EXISTS bank_messages;
          DROP TABLE IF EXISTS bank_accounts;
          DROP TABLE IF EXISTS offered_bank_accounts;
          DROP TABLE IF EXISTS ebics_subscribers;
          DROP TABLE IF EXISTS bank_connections;
          DROP TABLE IF EXISTS nexus_users;
          PRAGMA user_version = 0;
          PRAGMA foreign_keys = ON;
          ",
        )?;
        Ok(())
      })
      .await?;
    self.migrate().await
  }
}

fn status_rank(status: EntryStatus) -> u8 {
  match status {
    EntryStatus::Info => 0,
    EntryStatus::Pdng => 1,
    EntryStatus::Book => 2,
  }
}

// ─── NexusStore impl ─────────────────────────────────────────────────────────

impl NexusStore for SqliteStore {
  type Error = Error;

  // ── Users ─────────────────────────────────────────────────────────────

  async fn upsert_user(&self, user: NexusUser) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO nexus_users (username, password_hash, superuser)
           VALUES (?1, ?2, ?3)
           ON CONFLICT(username) DO UPDATE
             SET password_hash = excluded.password_hash,
                 superuser     = excluded.superuser",
          rusqlite::params![user.username, user.password_hash, user.superuser],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_user(&self, username: &str) -> Result<Option<NexusUser>> {
    let username = username.to_owned();
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(
            conn
              .query_row(
                "SELECT username, password_hash, superuser
                 FROM nexus_users WHERE username = ?1",
                rusqlite::params![username],
                |row| {
                  Ok(NexusUser {
                    username:      row.get(0)?,
                    password_hash: row.get(1)?,
                    superuser:     row.get(2)?,
                  })
                },
              )
              .optional()?,
          )
        })
        .await?,
    )
  }

  // ── Bank connections and subscribers ──────────────────────────────────

  async fn create_connection(
    &self,
    connection: BankConnection,
    subscriber: EbicsSubscriber,
  ) -> Result<()> {
    let name = connection.name.clone();
    let conn_type = encode_connection_type(connection.connection_type);
    let dialect = encode_dialect(connection.dialect);
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO bank_connections (name, connection_type, dialect, owner)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![connection.name, conn_type, dialect, connection.owner],
        )?;
        tx.execute(
          "INSERT INTO ebics_subscribers (
             connection, url, host_id, partner_id, user_id, system_id,
             signature_private_key, authentication_private_key,
             encryption_private_key, ini_state, hia_state, next_order_seq
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
          rusqlite::params![
            subscriber.connection,
            subscriber.url,
            subscriber.host_id,
            subscriber.partner_id,
            subscriber.user_id,
            subscriber.system_id,
            subscriber.signature_private_key,
            subscriber.authentication_private_key,
            subscriber.encryption_private_key,
            encode_key_state(subscriber.ini_state),
            encode_key_state(subscriber.hia_state),
            subscriber.next_order_seq,
          ],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await
      .map_err(|e| Error::from(e).on_conflict(&format!("connection {name}")))
  }

  async fn get_connection(&self, name: &str) -> Result<Option<BankConnection>> {
    let name = name.to_owned();
    let raw: Option<RawConnection> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT name, connection_type, dialect, owner
               FROM bank_connections WHERE name = ?1",
              rusqlite::params![name],
              |row| {
                Ok(RawConnection {
                  name:            row.get(0)?,
                  connection_type: row.get(1)?,
                  dialect:         row.get(2)?,
                  owner:           row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawConnection::into_connection).transpose()
  }

  async fn list_connections(&self) -> Result<Vec<BankConnection>> {
    let raws: Vec<RawConnection> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT name, connection_type, dialect, owner
           FROM bank_connections ORDER BY name",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawConnection {
              name:            row.get(0)?,
              connection_type: row.get(1)?,
              dialect:         row.get(2)?,
              owner:           row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawConnection::into_connection).collect()
  }

  async fn delete_connection(&self, name: &str) -> Result<()> {
    let name_owned = name.to_owned();
    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM bank_connections WHERE name = ?1",
          rusqlite::params![name_owned],
        )?)
      })
      .await?;
    if deleted == 0 {
      return Err(Error::NotFound(format!("connection {name}")));
    }
    Ok(())
  }

  async fn get_subscriber(
    &self,
    connection: &str,
  ) -> Result<Option<EbicsSubscriber>> {
    struct Raw {
      subscriber: EbicsSubscriber,
      ini_state:  String,
      hia_state:  String,
    }

    let connection = connection.to_owned();
    let raw: Option<Raw> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT connection, url, host_id, partner_id, user_id,
                      system_id, signature_private_key,
                      authentication_private_key, encryption_private_key,
                      bank_authentication_public_key,
                      bank_encryption_public_key, ini_state, hia_state,
                      next_order_seq
               FROM ebics_subscribers WHERE connection = ?1",
              rusqlite::params![connection],
              |row| {
                Ok(Raw {
                  subscriber: EbicsSubscriber {
                    connection: row.get(0)?,
                    url: row.get(1)?,
                    host_id: row.get(2)?,
                    partner_id: row.get(3)?,
                    user_id: row.get(4)?,
                    system_id: row.get(5)?,
                    signature_private_key: row.get(6)?,
                    authentication_private_key: row.get(7)?,
                    encryption_private_key: row.get(8)?,
                    bank_authentication_public_key: row.get(9)?,
                    bank_encryption_public_key: row.get(10)?,
                    ini_state: KeyState::NotSent,
                    hia_state: KeyState::NotSent,
                    next_order_seq: row.get(13)?,
                  },
                  ini_state:  row.get(11)?,
                  hia_state:  row.get(12)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw
      .map(|raw| {
        let mut subscriber = raw.subscriber;
        subscriber.ini_state = decode_key_state(&raw.ini_state)?;
        subscriber.hia_state = decode_key_state(&raw.hia_state)?;
        Ok(subscriber)
      })
      .transpose()
  }

  async fn update_subscriber_states(
    &self,
    connection: &str,
    ini: Option<KeyState>,
    hia: Option<KeyState>,
  ) -> Result<()> {
    let connection = connection.to_owned();
    self
      .conn
      .call(move |conn| {
        if let Some(state) = ini {
          conn.execute(
            "UPDATE ebics_subscribers SET ini_state = ?2 WHERE connection = ?1",
            rusqlite::params![connection, encode_key_state(state)],
          )?;
        }
        if let Some(state) = hia {
          conn.execute(
            "UPDATE ebics_subscribers SET hia_state = ?2 WHERE connection = ?1",
            rusqlite::params![connection, encode_key_state(state)],
          )?;
        }
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn update_bank_keys(
    &self,
    connection: &str,
    bank_authentication_public_key: Vec<u8>,
    bank_encryption_public_key: Vec<u8>,
  ) -> Result<()> {
    let connection = connection.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE ebics_subscribers
           SET bank_authentication_public_key = ?2,
               bank_encryption_public_key     = ?3
           WHERE connection = ?1",
          rusqlite::params![
            connection,
            bank_authentication_public_key,
            bank_encryption_public_key
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn next_order_seq(&self, connection: &str) -> Result<i64> {
    let connection_owned = connection.to_owned();
    let seq: Option<i64> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "UPDATE ebics_subscribers
               SET next_order_seq = next_order_seq + 1
               WHERE connection = ?1
               RETURNING next_order_seq - 1",
              rusqlite::params![connection_owned],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    seq.ok_or_else(|| Error::NotFound(format!("subscriber for {connection}")))
  }

  // ── Offered and imported bank accounts ────────────────────────────────

  async fn upsert_offered_account(
    &self,
    offered: OfferedBankAccount,
  ) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO offered_bank_accounts (
             offered_account_id, connection, iban, bank_code, account_holder
           ) VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(offered_account_id, connection) DO UPDATE
             SET iban = excluded.iban,
                 bank_code = excluded.bank_code,
                 account_holder = excluded.account_holder",
          rusqlite::params![
            offered.offered_account_id,
            offered.connection,
            offered.iban,
            offered.bank_code,
            offered.account_holder,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_offered_accounts(
    &self,
    connection: &str,
  ) -> Result<Vec<OfferedBankAccount>> {
    let connection = connection.to_owned();
    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare(
            "SELECT offered_account_id, connection, iban, bank_code,
                    account_holder, imported
             FROM offered_bank_accounts WHERE connection = ?1
             ORDER BY offered_account_id",
          )?;
          let rows = stmt
            .query_map(rusqlite::params![connection], |row| {
              Ok(OfferedBankAccount {
                offered_account_id: row.get(0)?,
                connection:         row.get(1)?,
                iban:               row.get(2)?,
                bank_code:          row.get(3)?,
                account_holder:     row.get(4)?,
                imported:           row.get(5)?,
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(rows)
        })
        .await?,
    )
  }

  async fn import_account(
    &self,
    connection: &str,
    offered_account_id: &str,
    label: &str,
  ) -> Result<BankAccount> {
    let connection = connection.to_owned();
    let offered_id = offered_account_id.to_owned();
    let label_owned = label.to_owned();

    enum Imported {
      Done(BankAccount),
      NoOffer,
      LabelTaken,
    }

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let offered: Option<(String, String, String)> = tx
          .query_row(
            "SELECT iban, bank_code, account_holder
             FROM offered_bank_accounts
             WHERE offered_account_id = ?1 AND connection = ?2",
            rusqlite::params![offered_id, connection],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
          )
          .optional()?;
        let Some((iban, bank_code, account_holder)) = offered else {
          return Ok(Imported::NoOffer);
        };

        let taken: bool = tx
          .query_row(
            "SELECT 1 FROM bank_accounts WHERE label = ?1",
            rusqlite::params![label_owned],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if taken {
          return Ok(Imported::LabelTaken);
        }

        tx.execute(
          "INSERT INTO bank_accounts (
             label, account_holder, iban, bank_code, default_connection
           ) VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![label_owned, account_holder, iban, bank_code, connection],
        )?;
        tx.execute(
          "UPDATE offered_bank_accounts SET imported = ?3
           WHERE offered_account_id = ?1 AND connection = ?2",
          rusqlite::params![offered_id, connection, label_owned],
        )?;
        tx.commit()?;

        Ok(Imported::Done(BankAccount {
          label: label_owned,
          account_holder,
          iban,
          bank_code,
          default_connection: Some(connection),
          last_report_timestamp: None,
          last_statement_timestamp: None,
          last_notification_timestamp: None,
          highest_seen_message_serial_id: 0,
          pain001_counter: 0,
        }))
      })
      .await?;

    match outcome {
      Imported::Done(account) => Ok(account),
      Imported::NoOffer => {
        Err(Error::NotFound(format!("offered account {offered_account_id}")))
      }
      Imported::LabelTaken => {
        Err(Error::AlreadyExists(format!("bank account {label}")))
      }
    }
  }

  async fn get_account(&self, label: &str) -> Result<Option<BankAccount>> {
    let label = label.to_owned();
    let raw: Option<RawAccount> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT label, account_holder, iban, bank_code,
                      default_connection, last_report_timestamp,
                      last_statement_timestamp, last_notification_timestamp,
                      highest_seen_message_serial_id, pain001_counter
               FROM bank_accounts WHERE label = ?1",
              rusqlite::params![label],
              |row| {
                Ok(RawAccount {
                  label:              row.get(0)?,
                  account_holder:     row.get(1)?,
                  iban:               row.get(2)?,
                  bank_code:          row.get(3)?,
                  default_connection: row.get(4)?,
                  last_report:        row.get(5)?,
                  last_statement:     row.get(6)?,
                  last_notification:  row.get(7)?,
                  highest_serial:     row.get(8)?,
                  pain001_counter:    row.get(9)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawAccount::into_account).transpose()
  }

  async fn list_accounts(&self) -> Result<Vec<BankAccount>> {
    let raws: Vec<RawAccount> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT label, account_holder, iban, bank_code, default_connection,
                  last_report_timestamp, last_statement_timestamp,
                  last_notification_timestamp, highest_seen_message_serial_id,
                  pain001_counter
           FROM bank_accounts ORDER BY label",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawAccount {
              label:              row.get(0)?,
              account_holder:     row.get(1)?,
              iban:               row.get(2)?,
              bank_code:          row.get(3)?,
              default_connection: row.get(4)?,
              last_report:        row.get(5)?,
              last_statement:     row.get(6)?,
              last_notification:  row.get(7)?,
              highest_serial:     row.get(8)?,
              pain001_counter:    row.get(9)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawAccount::into_account).collect()
  }

  async fn update_watermark(
    &self,
    label: &str,
    level: FetchLevel,
    seen: DateTime<Utc>,
  ) -> Result<()> {
    let column = match level {
      FetchLevel::Report => "last_report_timestamp",
      FetchLevel::Statement => "last_statement_timestamp",
      FetchLevel::Notification => "last_notification_timestamp",
      // `All` is expanded by the caller; it has no single watermark.
      FetchLevel::All => return Ok(()),
    };
    let label = label.to_owned();
    let seen_str = encode_dt(seen);
    // The fixed-width encoding makes the string comparison chronological,
    // so the watermark only ever moves forward.
    let sql = format!(
      "UPDATE bank_accounts
       SET {column} = CASE
         WHEN {column} IS NULL OR {column} < ?2 THEN ?2 ELSE {column}
       END
       WHERE label = ?1"
    );
    self
      .conn
      .call(move |conn| {
        conn.execute(&sql, rusqlite::params![label, seen_str])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn update_message_serial(&self, label: &str, serial: i64) -> Result<()> {
    let label = label.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE bank_accounts
           SET highest_seen_message_serial_id = max(
             highest_seen_message_serial_id, ?2)
           WHERE label = ?1",
          rusqlite::params![label, serial],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn next_pain001_counter(&self, label: &str) -> Result<i64> {
    let label_owned = label.to_owned();
    let counter: Option<i64> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "UPDATE bank_accounts
               SET pain001_counter = pain001_counter + 1
               WHERE label = ?1
               RETURNING pain001_counter",
              rusqlite::params![label_owned],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    counter.ok_or_else(|| Error::NotFound(format!("bank account {label}")))
  }

  // ── Raw bank messages ─────────────────────────────────────────────────

  async fn insert_message(
    &self,
    connection: &str,
    fetch_level: FetchLevel,
    message_id: Option<String>,
    content: Vec<u8>,
  ) -> Result<i64> {
    let connection = connection.to_owned();
    let level = encode_fetch_level(fetch_level);
    Ok(
      self
        .conn
        .call(move |conn| {
          conn.execute(
            "INSERT INTO bank_messages (connection, fetch_level, message_id, content)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![connection, level, message_id, content],
          )?;
          Ok(conn.last_insert_rowid())
        })
        .await?,
    )
  }

  async fn list_messages(&self, connection: &str) -> Result<Vec<BankMessage>> {
    let connection = connection.to_owned();
    let raws: Vec<(i64, String, String, Option<String>, bool)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, connection, fetch_level, message_id, errors
           FROM bank_messages WHERE connection = ?1 ORDER BY id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![connection], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(id, connection, level, message_id, errors)| {
        Ok(BankMessage {
          id,
          connection,
          fetch_level: decode_fetch_level(&level)?,
          message_id,
          content: Vec::new(),
          errors,
        })
      })
      .collect()
  }

  async fn get_message(
    &self,
    connection: &str,
    id: i64,
  ) -> Result<Option<BankMessage>> {
    let connection = connection.to_owned();
    let raw: Option<(i64, String, String, Option<String>, Vec<u8>, bool)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT id, connection, fetch_level, message_id, content, errors
               FROM bank_messages WHERE connection = ?1 AND id = ?2",
              rusqlite::params![connection, id],
              |row| {
                Ok((
                  row.get(0)?,
                  row.get(1)?,
                  row.get(2)?,
                  row.get(3)?,
                  row.get(4)?,
                  row.get(5)?,
                ))
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw
      .map(|(id, connection, level, message_id, content, errors)| {
        Ok(BankMessage {
          id,
          connection,
          fetch_level: decode_fetch_level(&level)?,
          message_id,
          content,
          errors,
        })
      })
      .transpose()
  }

  async fn mark_message_errors(&self, id: i64) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE bank_messages SET errors = 1 WHERE id = ?1",
          rusqlite::params![id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Ledger ────────────────────────────────────────────────────────────

  async fn ingest_entry(
    &self,
    bank_account: &str,
    entry: CamtEntry,
  ) -> Result<IngestOutcome> {
    let account = bank_account.to_owned();
    let transaction_id = entry.transaction_id();
    let direction = encode_credit_debit(entry.credit_debit_indicator);
    let status = encode_entry_status(entry.status);
    let new_rank = status_rank(entry.status);
    let amount = entry.amount.clone();
    let currency = entry.currency.clone();
    let entry_json = serde_json::to_string(&entry)?;

    enum Row {
      New(i64),
      Duplicate,
      Superseded(i64),
    }

    let row = {
      let account = account.clone();
      let transaction_id = transaction_id.clone();
      self
        .conn
        .call(move |conn| {
          let tx = conn.transaction()?;

          // Only the head row (not itself superseded) counts for dedup.
          let existing: Option<(i64, String)> = tx
            .query_row(
              "SELECT id, status FROM bank_transactions
               WHERE bank_account = ?1 AND transaction_id = ?2
                 AND updated_by IS NULL",
              rusqlite::params![account, transaction_id],
              |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

          let insert = |tx: &rusqlite::Transaction<'_>| -> rusqlite::Result<i64> {
            tx.execute(
              "INSERT INTO bank_transactions (
                 bank_account, transaction_id, credit_debit_indicator,
                 currency, amount, status, entry_json
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
              rusqlite::params![
                account,
                transaction_id,
                direction,
                currency,
                amount,
                status,
                entry_json
              ],
            )?;
            Ok(tx.last_insert_rowid())
          };

          let outcome = match existing {
            None => Row::New(insert(&tx)?),
            Some((old_id, old_status)) => {
              let old_rank: u8 = match old_status.as_str() {
                "INFO" => 0,
                "PDNG" => 1,
                _ => 2,
              };
              if new_rank > old_rank {
                let new_id = insert(&tx)?;
                tx.execute(
                  "UPDATE bank_transactions SET updated_by = ?2 WHERE id = ?1",
                  rusqlite::params![old_id, new_id],
                )?;
                Row::Superseded(new_id)
              } else {
                Row::Duplicate
              }
            }
          };
          tx.commit()?;
          Ok(outcome)
        })
        .await?
    };

    let build = |id: i64| BankTransactionEntry {
      id,
      bank_account: account.clone(),
      transaction_id: transaction_id.clone(),
      credit_debit_indicator: entry.credit_debit_indicator,
      currency: entry.currency.clone(),
      amount: entry.amount.clone(),
      status: entry.status,
      entry: entry.clone(),
      updated_by: None,
    };

    Ok(match row {
      Row::New(id) => IngestOutcome::New(build(id)),
      Row::Duplicate => IngestOutcome::Duplicate,
      Row::Superseded(id) => IngestOutcome::StatusUpdated(build(id)),
    })
  }

  async fn list_transactions(
    &self,
    bank_account: &str,
  ) -> Result<Vec<BankTransactionEntry>> {
    let account = bank_account.to_owned();
    let raws: Vec<RawTransaction> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, bank_account, transaction_id, credit_debit_indicator,
                  currency, amount, status, entry_json, updated_by
           FROM bank_transactions WHERE bank_account = ?1 ORDER BY id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![account], |row| {
            Ok(RawTransaction {
              id:             row.get(0)?,
              bank_account:   row.get(1)?,
              transaction_id: row.get(2)?,
              credit_debit:   row.get(3)?,
              currency:       row.get(4)?,
              amount:         row.get(5)?,
              status:         row.get(6)?,
              entry_json:     row.get(7)?,
              updated_by:     row.get(8)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawTransaction::into_entry).collect()
  }

  // ── Payment initiations ───────────────────────────────────────────────

  async fn create_initiation(
    &self,
    data: PaymentInitiationData,
    identifiers: PaymentIdentifiers,
    preparation_date: DateTime<Utc>,
  ) -> Result<PaymentInitiation> {
    let initiation = PaymentInitiation {
      id: Uuid::new_v4(),
      bank_account: data.bank_account,
      preparation_date,
      submission_date: None,
      amount: data.amount,
      subject: data.subject,
      creditor: data.creditor,
      identifiers,
      submitted: false,
      invalid: false,
      confirmation_transaction_id: None,
      client_uid: data.client_uid,
    };

    let row = initiation.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO payment_initiations (
             id, bank_account, preparation_date, amount, subject,
             creditor_iban, creditor_bic, creditor_name,
             message_id, payment_information_id, end_to_end_id,
             instruction_id, submitted, invalid, client_uid
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, 0, ?13)",
          rusqlite::params![
            row.id.hyphenated().to_string(),
            row.bank_account,
            encode_dt(row.preparation_date),
            row.amount.to_string(),
            row.subject,
            row.creditor.iban,
            row.creditor.bic,
            row.creditor.name,
            row.identifiers.message_id,
            row.identifiers.payment_information_id,
            row.identifiers.end_to_end_id,
            row.identifiers.instruction_id,
            row.client_uid,
          ],
        )?;
        Ok(())
      })
      .await
      .map_err(|e| Error::from(e).on_conflict("payment initiation"))?;

    Ok(initiation)
  }

  async fn get_initiation(&self, id: Uuid) -> Result<Option<PaymentInitiation>> {
    let raw = self
      .fetch_initiations(InitiationFilter::ById(id.hyphenated().to_string()))
      .await?
      .pop();
    Ok(raw)
  }

  async fn get_initiation_by_uid(
    &self,
    bank_account: &str,
    client_uid: &str,
  ) -> Result<Option<PaymentInitiation>> {
    let raw = self
      .fetch_initiations(InitiationFilter::ByUid(
        bank_account.to_owned(),
        client_uid.to_owned(),
      ))
      .await?
      .pop();
    Ok(raw)
  }

  async fn list_initiations(
    &self,
    bank_account: &str,
  ) -> Result<Vec<PaymentInitiation>> {
    self
      .fetch_initiations(InitiationFilter::ByAccount(bank_account.to_owned()))
      .await
  }

  async fn list_unsubmitted_initiations(
    &self,
    bank_account: &str,
  ) -> Result<Vec<PaymentInitiation>> {
    self
      .fetch_initiations(InitiationFilter::Unsubmitted(bank_account.to_owned()))
      .await
  }

  async fn mark_initiation_submitted(
    &self,
    id: Uuid,
    submission_date: DateTime<Utc>,
  ) -> Result<()> {
    let id_str = id.hyphenated().to_string();
    let date = encode_dt(submission_date);
    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE payment_initiations
           SET submitted = 1, submission_date = ?2 WHERE id = ?1",
          rusqlite::params![id_str, date],
        )?)
      })
      .await?;
    if updated == 0 {
      return Err(Error::NotFound(format!("initiation {id}")));
    }
    Ok(())
  }

  async fn mark_initiation_invalid(&self, id: Uuid) -> Result<()> {
    let id_str = id.hyphenated().to_string();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE payment_initiations SET invalid = 1 WHERE id = ?1",
          rusqlite::params![id_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn confirm_initiation(
    &self,
    bank_account: &str,
    payment_information_id: &str,
    transaction_row_id: i64,
  ) -> Result<bool> {
    let account = bank_account.to_owned();
    let pmtinf = payment_information_id.to_owned();
    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE payment_initiations
           SET confirmation_transaction_id = ?3
           WHERE bank_account = ?1 AND payment_information_id = ?2
             AND confirmation_transaction_id IS NULL",
          rusqlite::params![account, pmtinf, transaction_row_id],
        )?)
      })
      .await?;
    Ok(updated > 0)
  }

  // ── Scheduled tasks ───────────────────────────────────────────────────

  async fn create_task(&self, task: ScheduledTask) -> Result<()> {
    let name = format!("{}/{}", task.resource_id, task.task_name);
    let params = serde_json::to_string(&task.params)?;
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO scheduled_tasks (
             resource_type, resource_id, task_name, task_type, cron_spec,
             params, next_scheduled_execution_sec, prev_scheduled_execution_sec
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            encode_resource_type(task.resource_type),
            task.resource_id,
            task.task_name,
            encode_task_type(task.task_type),
            task.cron_spec,
            params,
            task.next_scheduled_execution_sec,
            task.prev_scheduled_execution_sec,
          ],
        )?;
        Ok(())
      })
      .await
      .map_err(|e| Error::from(e).on_conflict(&format!("task {name}")))
  }

  async fn get_task(
    &self,
    resource_id: &str,
    task_name: &str,
  ) -> Result<Option<ScheduledTask>> {
    let raw = self
      .fetch_tasks(TaskFilter::One(
        resource_id.to_owned(),
        task_name.to_owned(),
      ))
      .await?
      .pop();
    Ok(raw)
  }

  async fn list_tasks(&self, resource_id: &str) -> Result<Vec<ScheduledTask>> {
    self
      .fetch_tasks(TaskFilter::ForResource(resource_id.to_owned()))
      .await
  }

  async fn delete_task(&self, resource_id: &str, task_name: &str) -> Result<()> {
    let resource = resource_id.to_owned();
    let name = task_name.to_owned();
    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM scheduled_tasks
           WHERE resource_id = ?1 AND task_name = ?2",
          rusqlite::params![resource, name],
        )?)
      })
      .await?;
    if deleted == 0 {
      return Err(Error::NotFound(format!("task {resource_id}/{task_name}")));
    }
    Ok(())
  }

  async fn due_tasks(&self, now_sec: i64) -> Result<Vec<ScheduledTask>> {
    self.fetch_tasks(TaskFilter::Due(now_sec)).await
  }

  async fn update_task_times(
    &self,
    resource_id: &str,
    task_name: &str,
    prev_sec: i64,
    next_sec: i64,
  ) -> Result<()> {
    let resource = resource_id.to_owned();
    let name = task_name.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE scheduled_tasks
           SET prev_scheduled_execution_sec = ?3,
               next_scheduled_execution_sec = ?4
           WHERE resource_id = ?1 AND task_name = ?2",
          rusqlite::params![resource, name, prev_sec, next_sec],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Query helpers ───────────────────────────────────────────────────────────

/// Owned filter values, so they can move into the connection closure.
enum InitiationFilter {
  ById(String),
  ByUid(String, String),
  ByAccount(String),
  Unsubmitted(String),
}

enum TaskFilter {
  One(String, String),
  ForResource(String),
  Due(i64),
}

impl SqliteStore {
  async fn fetch_initiations(
    &self,
    filter: InitiationFilter,
  ) -> Result<Vec<PaymentInitiation>> {
    let raws: Vec<RawInitiation> = self
      .conn
      .call(move |conn| {
        let (clause, params) = match &filter {
          InitiationFilter::ById(id) => {
            ("id = ?1", rusqlite::params![*id].to_vec())
          }
          InitiationFilter::ByUid(account, uid) => (
            "bank_account = ?1 AND client_uid = ?2",
            rusqlite::params![*account, *uid].to_vec(),
          ),
          InitiationFilter::ByAccount(account) => {
            ("bank_account = ?1", rusqlite::params![*account].to_vec())
          }
          InitiationFilter::Unsubmitted(account) => (
            "bank_account = ?1 AND submitted = 0 AND invalid = 0",
            rusqlite::params![*account].to_vec(),
          ),
        };
        let sql = format!(
          "SELECT id, bank_account, preparation_date, submission_date,
                  amount, subject, creditor_iban, creditor_bic, creditor_name,
                  message_id, payment_information_id, end_to_end_id,
                  instruction_id, submitted, invalid,
                  confirmation_transaction_id, client_uid
           FROM payment_initiations WHERE {clause}
           ORDER BY preparation_date"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(&params[..], |row| {
            Ok(RawInitiation {
              id:               row.get(0)?,
              bank_account:     row.get(1)?,
              preparation_date: row.get(2)?,
              submission_date:  row.get(3)?,
              amount:           row.get(4)?,
              subject:          row.get(5)?,
              creditor_iban:    row.get(6)?,
              creditor_bic:     row.get(7)?,
              creditor_name:    row.get(8)?,
              message_id:       row.get(9)?,
              payment_information_id: row.get(10)?,
              end_to_end_id:    row.get(11)?,
              instruction_id:   row.get(12)?,
              submitted:        row.get(13)?,
              invalid:          row.get(14)?,
              confirmation_transaction_id: row.get(15)?,
              client_uid:       row.get(16)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawInitiation::into_initiation).collect()
  }

  async fn fetch_tasks(&self, filter: TaskFilter) -> Result<Vec<ScheduledTask>> {
    let raws: Vec<RawTask> = self
      .conn
      .call(move |conn| {
        let (clause, params) = match &filter {
          TaskFilter::One(resource, name) => (
            "resource_id = ?1 AND task_name = ?2",
            rusqlite::params![*resource, *name].to_vec(),
          ),
          TaskFilter::ForResource(resource) => {
            ("resource_id = ?1", rusqlite::params![*resource].to_vec())
          }
          TaskFilter::Due(now_sec) => (
            "next_scheduled_execution_sec IS NULL
               OR next_scheduled_execution_sec <= ?1",
            rusqlite::params![*now_sec].to_vec(),
          ),
        };
        let sql = format!(
          "SELECT resource_type, resource_id, task_name, task_type, cron_spec,
                  params, next_scheduled_execution_sec,
                  prev_scheduled_execution_sec
           FROM scheduled_tasks WHERE {clause}
           ORDER BY resource_id, task_name"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(&params[..], |row| {
            Ok(RawTask {
              resource_type: row.get(0)?,
              resource_id:   row.get(1)?,
              task_name:     row.get(2)?,
              task_type:     row.get(3)?,
              cron_spec:     row.get(4)?,
              params:        row.get(5)?,
              next_sec:      row.get(6)?,
              prev_sec:      row.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawTask::into_task).collect()
  }
}
