//! SQLite-backed job and account storage

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::{AccountStore, JobStore};
use crate::models::{
    Account, AccountSyncJob, AccountSyncStatus, EmailSyncJob, EmailSyncStatus, JobId, JobKind,
    SyncType, UnknownStatus,
};
use crate::state::{JobNotFound, JobState, validate_transition};

/// Database migrations
///
/// Each migration is applied in order; `user_version` tracks progress.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: jobs and accounts
        M::up(
            r#"
            CREATE TABLE account (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                access_token TEXT,
                refresh_token TEXT,
                access_token_expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- One onboarding job per account
            CREATE TABLE account_sync_job (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                processed_at TEXT
            );

            CREATE INDEX idx_account_sync_job_ready
                ON account_sync_job(status, created_at);

            -- Many historical rows per account are allowed
            CREATE TABLE email_sync_job (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                sync_type TEXT NOT NULL,
                emails_fetched INTEGER NOT NULL DEFAULT 0,
                page_token TEXT,
                last_synced_at TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                processed_at TEXT
            );

            CREATE INDEX idx_email_sync_job_ready
                ON email_sync_job(status, last_synced_at, created_at);
            CREATE INDEX idx_email_sync_job_account
                ON email_sync_job(account_id);
            "#,
        ),
    ])
}

const ACCOUNT_JOB_COLUMNS: &str =
    "id, account_id, status, attempts, last_error, created_at, updated_at, processed_at";

const EMAIL_JOB_COLUMNS: &str = "id, account_id, status, sync_type, emails_fetched, page_token, \
     last_synced_at, attempts, last_error, created_at, updated_at, processed_at";

const ACCOUNT_COLUMNS: &str = "id, user_id, access_token, refresh_token, access_token_expires_at, \
     created_at, updated_at";

/// Fixed-width UTC text, so string order in SQL equals time order
fn to_db_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_db_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_db_time(idx, &raw)
}

fn optional_time_column(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| parse_db_time(idx, &raw)).transpose()
}

fn parsed_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = UnknownStatus>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn account_job_from_row(row: &Row) -> rusqlite::Result<AccountSyncJob> {
    Ok(AccountSyncJob {
        id: JobId::new(row.get::<_, String>(0)?),
        account_id: row.get(1)?,
        status: parsed_column(row, 2)?,
        attempts: row.get(3)?,
        last_error: row.get(4)?,
        created_at: time_column(row, 5)?,
        updated_at: time_column(row, 6)?,
        processed_at: optional_time_column(row, 7)?,
    })
}

fn email_job_from_row(row: &Row) -> rusqlite::Result<EmailSyncJob> {
    Ok(EmailSyncJob {
        id: JobId::new(row.get::<_, String>(0)?),
        account_id: row.get(1)?,
        status: parsed_column(row, 2)?,
        sync_type: parsed_column(row, 3)?,
        emails_fetched: row.get(4)?,
        page_token: row.get(5)?,
        last_synced_at: optional_time_column(row, 6)?,
        attempts: row.get(7)?,
        last_error: row.get(8)?,
        created_at: time_column(row, 9)?,
        updated_at: time_column(row, 10)?,
        processed_at: optional_time_column(row, 11)?,
    })
}

fn account_from_row(row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        user_id: row.get(1)?,
        access_token: row.get(2)?,
        refresh_token: row.get(3)?,
        access_token_expires_at: optional_time_column(row, 4)?,
        created_at: time_column(row, 5)?,
        updated_at: time_column(row, 6)?,
    })
}

/// SQLite implementation of [`JobStore`] and [`AccountStore`]
///
/// A single connection behind a mutex; the watcher is single threaded,
/// the mutex only makes the store `Sync`.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::with_connection(conn)
    }

    /// A private in-memory database, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        // WAL keeps readers (dashboards, the sign-up flow) unblocked while
        // the watcher writes; busy_timeout absorbs their short write locks.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Shared validated status write for both job tables
    fn transition<S>(
        &self,
        table: &str,
        id: &JobId,
        status: S,
        last_error: Option<&str>,
    ) -> Result<()>
    where
        S: JobState + FromStr<Err = UnknownStatus>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let current: Option<String> = tx
            .query_row(
                &format!("SELECT status FROM {table} WHERE id = ?"),
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Err(JobNotFound {
                kind: S::KIND,
                job_id: id.clone(),
            }
            .into());
        };
        let current: S = current.parse()?;
        validate_transition(id, current, status)?;

        let now = Utc::now();
        let processed_at = status.is_processed().then(|| to_db_time(now));
        tx.execute(
            &format!(
                "UPDATE {table}
                 SET status = ?1, last_error = COALESCE(?2, last_error),
                     updated_at = ?3, processed_at = ?4
                 WHERE id = ?5"
            ),
            params![
                status.to_string(),
                last_error,
                to_db_time(now),
                processed_at,
                id.as_str()
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn increment_attempts(&self, table: &str, kind: JobKind, id: &JobId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            &format!("UPDATE {table} SET attempts = attempts + 1, updated_at = ? WHERE id = ?"),
            params![to_db_time(Utc::now()), id.as_str()],
        )?;
        if changed == 0 {
            return Err(JobNotFound {
                kind,
                job_id: id.clone(),
            }
            .into());
        }
        Ok(())
    }
}

impl JobStore for SqliteJobStore {
    fn create_account_sync_job(&self, account_id: &str) -> Result<AccountSyncJob> {
        let job = AccountSyncJob::new(account_id);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO account_sync_job
             (id, account_id, status, attempts, created_at, updated_at)
             VALUES (?, ?, ?, 0, ?, ?)",
            params![
                job.id.as_str(),
                job.account_id,
                job.status.as_str(),
                to_db_time(job.created_at),
                to_db_time(job.updated_at),
            ],
        )
        .with_context(|| format!("Failed to enqueue account sync job for {}", account_id))?;
        Ok(job)
    }

    fn get_account_sync_job(&self, id: &JobId) -> Result<Option<AccountSyncJob>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!("SELECT {ACCOUNT_JOB_COLUMNS} FROM account_sync_job WHERE id = ?"),
                [id.as_str()],
                account_job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    fn list_account_sync_jobs(
        &self,
        status: AccountSyncStatus,
        limit: usize,
        attempts_below: Option<u32>,
    ) -> Result<Vec<AccountSyncJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCOUNT_JOB_COLUMNS} FROM account_sync_job
             WHERE status = ?1 AND (?2 IS NULL OR attempts < ?2)
             ORDER BY created_at ASC, id ASC
             LIMIT ?3"
        ))?;

        let jobs = stmt
            .query_map(
                params![status.as_str(), attempts_below, limit as i64],
                account_job_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to query account sync jobs")?;

        Ok(jobs)
    }

    fn transition_account_sync_job(
        &self,
        id: &JobId,
        status: AccountSyncStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        self.transition("account_sync_job", id, status, last_error)
    }

    fn increment_account_sync_attempts(&self, id: &JobId) -> Result<()> {
        self.increment_attempts("account_sync_job", JobKind::AccountSync, id)
    }

    fn create_email_sync_job(&self, account_id: &str, sync_type: SyncType) -> Result<EmailSyncJob> {
        let job = EmailSyncJob::new(account_id, sync_type);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO email_sync_job
             (id, account_id, status, sync_type, emails_fetched, attempts, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, 0, ?, ?)",
            params![
                job.id.as_str(),
                job.account_id,
                job.status.as_str(),
                job.sync_type.as_str(),
                to_db_time(job.created_at),
                to_db_time(job.updated_at),
            ],
        )
        .with_context(|| format!("Failed to create email sync job for {}", account_id))?;
        Ok(job)
    }

    fn get_email_sync_job(&self, id: &JobId) -> Result<Option<EmailSyncJob>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!("SELECT {EMAIL_JOB_COLUMNS} FROM email_sync_job WHERE id = ?"),
                [id.as_str()],
                email_job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    fn list_email_sync_jobs(
        &self,
        status: EmailSyncStatus,
        limit: usize,
        attempts_below: Option<u32>,
    ) -> Result<Vec<EmailSyncJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EMAIL_JOB_COLUMNS} FROM email_sync_job
             WHERE status = ?1 AND (?2 IS NULL OR attempts < ?2)
             ORDER BY last_synced_at IS NOT NULL, last_synced_at ASC, created_at ASC, id ASC
             LIMIT ?3"
        ))?;

        let jobs = stmt
            .query_map(
                params![status.as_str(), attempts_below, limit as i64],
                email_job_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to query email sync jobs")?;

        Ok(jobs)
    }

    fn transition_email_sync_job(
        &self,
        id: &JobId,
        status: EmailSyncStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        self.transition("email_sync_job", id, status, last_error)
    }

    fn increment_email_sync_attempts(&self, id: &JobId) -> Result<()> {
        self.increment_attempts("email_sync_job", JobKind::EmailSync, id)
    }

    fn update_email_progress(
        &self,
        id: &JobId,
        emails_fetched: u32,
        page_token: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = to_db_time(Utc::now());
        let changed = conn.execute(
            "UPDATE email_sync_job
             SET emails_fetched = ?1, page_token = ?2, last_synced_at = ?3, updated_at = ?3
             WHERE id = ?4",
            params![emails_fetched, page_token, now, id.as_str()],
        )?;
        if changed == 0 {
            return Err(JobNotFound {
                kind: JobKind::EmailSync,
                job_id: id.clone(),
            }
            .into());
        }
        Ok(())
    }
}

impl AccountStore for SqliteJobStore {
    fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        let account = conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE id = ?"),
                [id],
                account_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to load account {}", id))?;
        Ok(account)
    }

    fn upsert_account(&self, account: Account) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO account
             (id, user_id, access_token, refresh_token, access_token_expires_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                access_token_expires_at = excluded.access_token_expires_at,
                updated_at = excluded.updated_at",
            params![
                account.id,
                account.user_id,
                account.access_token,
                account.refresh_token,
                account.access_token_expires_at.map(to_db_time),
                to_db_time(account.created_at),
                to_db_time(account.updated_at),
            ],
        )?;
        Ok(())
    }

    fn update_tokens(
        &self,
        id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE account
             SET access_token = ?1, refresh_token = ?2, access_token_expires_at = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                access_token,
                refresh_token,
                to_db_time(expires_at),
                to_db_time(Utc::now()),
                id
            ],
        )?;
        if changed == 0 {
            bail!("account {} not found", id);
        }
        Ok(())
    }
}
