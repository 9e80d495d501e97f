use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dirs::home_dir;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use crate::types::{
    now_ts, AttachmentRecord, ClientRecord, Direction, FolderKind, FolderRecord, MailAccount,
    MessageRecord, Priority, RuleAction, RuleCondition, RuleRecord, SyncStatusRecord, TaskRecord,
    ThreadRecord, MESSAGE_SYNC_STATUS_SYNCED,
};

const DB_FILE_NAME: &str = "asemail.db";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl Database {
    pub async fn new_default() -> Result<Self> {
        Self::new_named(DB_FILE_NAME).await
    }

    pub async fn new_named(file_name: &str) -> Result<Self> {
        let base = default_data_dir()?;
        let db_path = base.join(file_name);
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory {}", parent.display()))?;
        }

        let pool = SqlitePool::connect(&url)
            .await
            .with_context(|| format!("connecting to sqlite at {}", db_path.display()))?;

        let db = Database {
            pool,
            path: Some(db_path),
        };
        db.migrate().await?;
        Ok(db)
    }

    /// Single-connection in-memory store for tests.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("connecting to in-memory sqlite")?;
        let db = Database { pool, path: None };
        db.migrate().await?;
        Ok(db)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&self.pool)
            .await
            .context("enabling foreign keys")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mail_accounts (
                org_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                address TEXT NOT NULL,
                access_token TEXT,
                refresh_token TEXT,
                token_expires_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (org_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS folders (
                org_id TEXT NOT NULL,
                remote_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                parent_remote_id TEXT,
                kind TEXT NOT NULL,
                sync_enabled INTEGER NOT NULL DEFAULT 0,
                message_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (org_id, remote_id)
            );
            CREATE INDEX IF NOT EXISTS idx_folders_org ON folders(org_id);

            CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                subject TEXT NOT NULL,
                priority TEXT NOT NULL DEFAULT 'normal',
                tags TEXT NOT NULL DEFAULT '[]',
                client_id TEXT,
                latest_message_id TEXT,
                last_message_at INTEGER,
                message_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (org_id, subject)
            );

            CREATE TABLE IF NOT EXISTS messages (
                org_id TEXT NOT NULL,
                remote_id TEXT NOT NULL,
                folder_remote_id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                direction TEXT NOT NULL,
                from_address TEXT,
                to_addresses TEXT NOT NULL DEFAULT '[]',
                cc_addresses TEXT NOT NULL DEFAULT '[]',
                bcc_addresses TEXT NOT NULL DEFAULT '[]',
                subject TEXT,
                body_text TEXT,
                body_html TEXT,
                received_at INTEGER,
                sent_at INTEGER,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_flagged INTEGER NOT NULL DEFAULT 0,
                has_attachments INTEGER NOT NULL DEFAULT 0,
                sync_status TEXT NOT NULL DEFAULT 'synced',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (org_id, remote_id)
            );
            CREATE INDEX IF NOT EXISTS idx_messages_org_received ON messages(org_id, received_at DESC);
            CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);

            CREATE TABLE IF NOT EXISTS attachments (
                org_id TEXT NOT NULL,
                message_remote_id TEXT NOT NULL,
                remote_id TEXT NOT NULL,
                name TEXT NOT NULL,
                content_type TEXT,
                size_bytes INTEGER,
                downloaded INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (org_id, message_remote_id, remote_id)
            );

            CREATE TABLE IF NOT EXISTS rules (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                conditions TEXT NOT NULL DEFAULT '[]',
                actions TEXT NOT NULL DEFAULT '[]',
                execution_count INTEGER NOT NULL DEFAULT 0,
                last_executed_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rules_org_created ON rules(org_id, created_at);

            CREATE TABLE IF NOT EXISTS sync_status (
                org_id TEXT NOT NULL,
                folder_remote_id TEXT NOT NULL,
                last_synced_at INTEGER,
                status TEXT NOT NULL,
                synced_count INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (org_id, folder_remote_id)
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                message_remote_id TEXT,
                thread_id TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS clients (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                name TEXT NOT NULL,
                email TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_clients_org ON clients(org_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("running migrations")?;

        Ok(())
    }

    // ----- mail accounts -----

    pub async fn save_mail_account(&self, account: &MailAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mail_accounts (org_id, user_id, address, access_token, refresh_token, token_expires_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(org_id, user_id) DO UPDATE SET
                address = excluded.address,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                token_expires_at = excluded.token_expires_at,
                updated_at = excluded.updated_at;
            "#,
        )
        .bind(&account.org_id)
        .bind(&account.user_id)
        .bind(&account.address)
        .bind(&account.access_token)
        .bind(&account.refresh_token)
        .bind(account.token_expires_at)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .context("upserting mail account")?;
        Ok(())
    }

    pub async fn load_mail_account(
        &self,
        org_id: &str,
        user_id: &str,
    ) -> Result<Option<MailAccount>> {
        let row = sqlx::query(
            r#"
            SELECT address, access_token, refresh_token, token_expires_at, created_at, updated_at
            FROM mail_accounts
            WHERE org_id = ?1 AND user_id = ?2;
            "#,
        )
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("loading mail account")?;

        Ok(row.map(|row| MailAccount {
            org_id: org_id.to_string(),
            user_id: user_id.to_string(),
            address: row.get(0),
            access_token: row.get(1),
            refresh_token: row.get(2),
            token_expires_at: row.get(3),
            created_at: row.get(4),
            updated_at: row.get(5),
        }))
    }

    pub async fn update_mail_account_tokens(
        &self,
        org_id: &str,
        user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        token_expires_at: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE mail_accounts
            SET access_token = ?1,
                refresh_token = COALESCE(?2, refresh_token),
                token_expires_at = ?3,
                updated_at = ?4
            WHERE org_id = ?5 AND user_id = ?6;
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(token_expires_at)
        .bind(now_ts())
        .bind(org_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("updating mail account tokens")?;
        Ok(())
    }

    // ----- folders -----

    /// Upsert keyed by remote folder id. `sync_enabled` is only applied on
    /// first insert so an operator's opt-in/out survives later sync passes.
    pub async fn upsert_folder(&self, folder: &FolderRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO folders (org_id, remote_id, display_name, parent_remote_id, kind, sync_enabled, message_count, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(org_id, remote_id) DO UPDATE SET
                display_name = excluded.display_name,
                parent_remote_id = excluded.parent_remote_id,
                kind = excluded.kind,
                message_count = excluded.message_count,
                updated_at = excluded.updated_at;
            "#,
        )
        .bind(&folder.org_id)
        .bind(&folder.remote_id)
        .bind(&folder.display_name)
        .bind(&folder.parent_remote_id)
        .bind(folder.kind.as_str())
        .bind(if folder.sync_enabled { 1 } else { 0 })
        .bind(folder.message_count)
        .bind(folder.created_at)
        .bind(folder.updated_at)
        .execute(&self.pool)
        .await
        .context("upserting folder")?;
        Ok(())
    }

    pub async fn load_folder(
        &self,
        org_id: &str,
        remote_id: &str,
    ) -> Result<Option<FolderRecord>> {
        let row = sqlx::query(
            r#"
            SELECT remote_id, display_name, parent_remote_id, kind, sync_enabled, message_count, created_at, updated_at
            FROM folders
            WHERE org_id = ?1 AND remote_id = ?2;
            "#,
        )
        .bind(org_id)
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await
        .context("loading folder")?;

        Ok(row.map(|row| folder_from_row(org_id, &row)))
    }

    /// Folders flagged for sync, in remote listing order (insertion order).
    pub async fn list_sync_enabled_folders(&self, org_id: &str) -> Result<Vec<FolderRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT remote_id, display_name, parent_remote_id, kind, sync_enabled, message_count, created_at, updated_at
            FROM folders
            WHERE org_id = ?1 AND sync_enabled = 1
            ORDER BY rowid ASC;
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .context("loading sync-enabled folders")?;

        Ok(rows.iter().map(|row| folder_from_row(org_id, row)).collect())
    }

    // ----- sync status -----

    pub async fn load_sync_status(
        &self,
        org_id: &str,
        folder_remote_id: &str,
    ) -> Result<Option<SyncStatusRecord>> {
        let row = sqlx::query(
            r#"
            SELECT last_synced_at, status, synced_count, updated_at
            FROM sync_status
            WHERE org_id = ?1 AND folder_remote_id = ?2;
            "#,
        )
        .bind(org_id)
        .bind(folder_remote_id)
        .fetch_optional(&self.pool)
        .await
        .context("loading sync status")?;

        Ok(row.map(|row| SyncStatusRecord {
            org_id: org_id.to_string(),
            folder_remote_id: folder_remote_id.to_string(),
            last_synced_at: row.get(0),
            status: row.get(1),
            synced_count: row.get(2),
            updated_at: row.get(3),
        }))
    }

    /// Checkpoint writes never move `last_synced_at` backwards; a `None`
    /// timestamp leaves the stored checkpoint untouched.
    pub async fn update_sync_status(
        &self,
        org_id: &str,
        folder_remote_id: &str,
        status: &str,
        synced_count: i64,
        last_synced_at: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_status (org_id, folder_remote_id, last_synced_at, status, synced_count, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(org_id, folder_remote_id) DO UPDATE SET
                last_synced_at = CASE
                    WHEN excluded.last_synced_at IS NULL THEN sync_status.last_synced_at
                    WHEN sync_status.last_synced_at IS NULL THEN excluded.last_synced_at
                    WHEN excluded.last_synced_at > sync_status.last_synced_at THEN excluded.last_synced_at
                    ELSE sync_status.last_synced_at
                END,
                status = excluded.status,
                synced_count = excluded.synced_count,
                updated_at = excluded.updated_at;
            "#,
        )
        .bind(org_id)
        .bind(folder_remote_id)
        .bind(last_synced_at)
        .bind(status)
        .bind(synced_count)
        .bind(now_ts())
        .execute(&self.pool)
        .await
        .context("upserting sync status")?;
        Ok(())
    }

    // ----- threads / messages / attachments -----

    /// Stores one normalized message: resolves or creates its thread by
    /// exact subject, upserts the message and attachment metadata, and bumps
    /// the thread's latest-message pointer — all inside one transaction so a
    /// crash cannot leave a thread referencing a missing message.
    ///
    /// Returns the thread id. The caller supplies `message.thread_id` empty;
    /// it is filled in here.
    pub async fn upsert_normalized_message(
        &self,
        message: &MessageRecord,
        attachments: &[AttachmentRecord],
    ) -> Result<String> {
        let now = now_ts();
        let subject_key = message.subject.clone().unwrap_or_default();

        let mut tx = self.pool.begin().await.context("beginning message tx")?;

        let existing: Option<String> =
            sqlx::query("SELECT id FROM threads WHERE org_id = ?1 AND subject = ?2;")
                .bind(&message.org_id)
                .bind(&subject_key)
                .fetch_optional(&mut *tx)
                .await
                .context("resolving thread by subject")?
                .map(|row| row.get(0));

        let thread_id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO threads (id, org_id, subject, priority, tags, created_at, updated_at)
                    VALUES (?1, ?2, ?3, 'normal', '[]', ?4, ?5);
                    "#,
                )
                .bind(&id)
                .bind(&message.org_id)
                .bind(&subject_key)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .context("creating thread")?;
                id
            }
        };

        sqlx::query(
            r#"
            INSERT INTO messages (
                org_id, remote_id, folder_remote_id, thread_id, direction,
                from_address, to_addresses, cc_addresses, bcc_addresses,
                subject, body_text, body_html, received_at, sent_at,
                is_read, is_flagged, has_attachments, sync_status,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
            ON CONFLICT(org_id, remote_id) DO UPDATE SET
                folder_remote_id = excluded.folder_remote_id,
                thread_id = excluded.thread_id,
                direction = excluded.direction,
                from_address = excluded.from_address,
                to_addresses = excluded.to_addresses,
                cc_addresses = excluded.cc_addresses,
                bcc_addresses = excluded.bcc_addresses,
                subject = excluded.subject,
                body_text = excluded.body_text,
                body_html = excluded.body_html,
                received_at = excluded.received_at,
                sent_at = excluded.sent_at,
                is_read = excluded.is_read,
                is_flagged = excluded.is_flagged,
                has_attachments = excluded.has_attachments,
                sync_status = excluded.sync_status,
                updated_at = excluded.updated_at;
            "#,
        )
        .bind(&message.org_id)
        .bind(&message.remote_id)
        .bind(&message.folder_remote_id)
        .bind(&thread_id)
        .bind(message.direction.as_str())
        .bind(&message.from_address)
        .bind(serde_json::to_string(&message.to_addresses).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&message.cc_addresses).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&message.bcc_addresses).unwrap_or_else(|_| "[]".into()))
        .bind(&message.subject)
        .bind(&message.body_text)
        .bind(&message.body_html)
        .bind(message.received_at)
        .bind(message.sent_at)
        .bind(if message.is_read { 1 } else { 0 })
        .bind(if message.is_flagged { 1 } else { 0 })
        .bind(if message.has_attachments { 1 } else { 0 })
        .bind(MESSAGE_SYNC_STATUS_SYNCED)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("upserting message")?;

        for attachment in attachments {
            sqlx::query(
                r#"
                INSERT INTO attachments (org_id, message_remote_id, remote_id, name, content_type, size_bytes, downloaded, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(org_id, message_remote_id, remote_id) DO UPDATE SET
                    name = excluded.name,
                    content_type = excluded.content_type,
                    size_bytes = excluded.size_bytes;
                "#,
            )
            .bind(&attachment.org_id)
            .bind(&attachment.message_remote_id)
            .bind(&attachment.remote_id)
            .bind(&attachment.name)
            .bind(&attachment.content_type)
            .bind(attachment.size_bytes)
            .bind(if attachment.downloaded { 1 } else { 0 })
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("upserting attachment")?;
        }

        sqlx::query(
            r#"
            UPDATE threads
            SET latest_message_id = ?1,
                last_message_at = ?2,
                message_count = (SELECT COUNT(*) FROM messages WHERE thread_id = ?3),
                updated_at = ?4
            WHERE id = ?3;
            "#,
        )
        .bind(&message.remote_id)
        .bind(message.received_at)
        .bind(&thread_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("updating thread pointer")?;

        tx.commit().await.context("committing message tx")?;
        Ok(thread_id)
    }

    pub async fn load_message(
        &self,
        org_id: &str,
        remote_id: &str,
    ) -> Result<Option<MessageRecord>> {
        let row = sqlx::query(
            r#"
            SELECT remote_id, folder_remote_id, thread_id, direction, from_address,
                   to_addresses, cc_addresses, bcc_addresses, subject, body_text, body_html,
                   received_at, sent_at, is_read, is_flagged, has_attachments, sync_status,
                   created_at, updated_at
            FROM messages
            WHERE org_id = ?1 AND remote_id = ?2;
            "#,
        )
        .bind(org_id)
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await
        .context("loading message")?;

        Ok(row.map(|row| message_from_row(org_id, &row)))
    }

    /// Most-recently-received synced messages, used by the rule processor
    /// when no specific message id is given.
    pub async fn load_recent_synced_messages(
        &self,
        org_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT remote_id, folder_remote_id, thread_id, direction, from_address,
                   to_addresses, cc_addresses, bcc_addresses, subject, body_text, body_html,
                   received_at, sent_at, is_read, is_flagged, has_attachments, sync_status,
                   created_at, updated_at
            FROM messages
            WHERE org_id = ?1 AND sync_status = ?2
            ORDER BY received_at DESC NULLS LAST
            LIMIT ?3;
            "#,
        )
        .bind(org_id)
        .bind(MESSAGE_SYNC_STATUS_SYNCED)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("loading recent synced messages")?;

        Ok(rows.iter().map(|row| message_from_row(org_id, row)).collect())
    }

    pub async fn count_messages(&self, org_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM messages WHERE org_id = ?1;")
            .bind(org_id)
            .fetch_one(&self.pool)
            .await
            .context("counting messages")?;
        Ok(row.get(0))
    }

    pub async fn list_attachments(
        &self,
        org_id: &str,
        message_remote_id: &str,
    ) -> Result<Vec<AttachmentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT remote_id, name, content_type, size_bytes, downloaded
            FROM attachments
            WHERE org_id = ?1 AND message_remote_id = ?2
            ORDER BY remote_id ASC;
            "#,
        )
        .bind(org_id)
        .bind(message_remote_id)
        .fetch_all(&self.pool)
        .await
        .context("loading attachments")?;

        Ok(rows
            .into_iter()
            .map(|row| AttachmentRecord {
                org_id: org_id.to_string(),
                message_remote_id: message_remote_id.to_string(),
                remote_id: row.get(0),
                name: row.get(1),
                content_type: row.get(2),
                size_bytes: row.get(3),
                downloaded: row.get::<i64, _>(4) == 1,
            })
            .collect())
    }

    pub async fn load_thread(&self, org_id: &str, thread_id: &str) -> Result<Option<ThreadRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, subject, priority, tags, client_id, latest_message_id, last_message_at,
                   message_count, created_at, updated_at
            FROM threads
            WHERE org_id = ?1 AND id = ?2;
            "#,
        )
        .bind(org_id)
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
        .context("loading thread")?;

        Ok(row.map(|row| thread_from_row(org_id, &row)))
    }

    pub async fn load_thread_by_subject(
        &self,
        org_id: &str,
        subject: &str,
    ) -> Result<Option<ThreadRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, subject, priority, tags, client_id, latest_message_id, last_message_at,
                   message_count, created_at, updated_at
            FROM threads
            WHERE org_id = ?1 AND subject = ?2;
            "#,
        )
        .bind(org_id)
        .bind(subject)
        .fetch_optional(&self.pool)
        .await
        .context("loading thread by subject")?;

        Ok(row.map(|row| thread_from_row(org_id, &row)))
    }

    pub async fn set_thread_client(&self, thread_id: &str, client_id: &str) -> Result<()> {
        sqlx::query("UPDATE threads SET client_id = ?1, updated_at = ?2 WHERE id = ?3;")
            .bind(client_id)
            .bind(now_ts())
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .context("assigning thread client")?;
        Ok(())
    }

    pub async fn set_thread_priority(&self, thread_id: &str, priority: Priority) -> Result<()> {
        sqlx::query("UPDATE threads SET priority = ?1, updated_at = ?2 WHERE id = ?3;")
            .bind(priority.as_str())
            .bind(now_ts())
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .context("setting thread priority")?;
        Ok(())
    }

    /// Merges tags into the thread's tag set, preserving order of first
    /// appearance and dropping duplicates.
    pub async fn add_thread_tags(&self, thread_id: &str, tags: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("beginning tag tx")?;

        let raw: Option<String> = sqlx::query("SELECT tags FROM threads WHERE id = ?1;")
            .bind(thread_id)
            .fetch_optional(&mut *tx)
            .await
            .context("loading thread tags")?
            .map(|row| row.get(0));
        let Some(raw) = raw else {
            anyhow::bail!("thread {thread_id} not found");
        };

        let mut merged: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
        for tag in tags {
            if !merged.iter().any(|existing| existing == tag) {
                merged.push(tag.clone());
            }
        }

        sqlx::query("UPDATE threads SET tags = ?1, updated_at = ?2 WHERE id = ?3;")
            .bind(serde_json::to_string(&merged).unwrap_or_else(|_| "[]".into()))
            .bind(now_ts())
            .bind(thread_id)
            .execute(&mut *tx)
            .await
            .context("updating thread tags")?;

        tx.commit().await.context("committing tag tx")?;
        Ok(())
    }

    // ----- clients / tasks -----

    pub async fn client_exists(&self, org_id: &str, client_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM clients WHERE org_id = ?1 AND id = ?2;")
            .bind(org_id)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .context("checking client")?;
        Ok(row.is_some())
    }

    pub async fn insert_client(&self, client: &ClientRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO clients (id, org_id, name, email, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email;
            "#,
        )
        .bind(&client.id)
        .bind(&client.org_id)
        .bind(&client.name)
        .bind(&client.email)
        .bind(client.created_at)
        .execute(&self.pool)
        .await
        .context("upserting client")?;
        Ok(())
    }

    pub async fn insert_task(&self, task: &TaskRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, org_id, title, description, message_remote_id, thread_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);
            "#,
        )
        .bind(&task.id)
        .bind(&task.org_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.message_remote_id)
        .bind(&task.thread_id)
        .bind(task.created_at)
        .execute(&self.pool)
        .await
        .context("inserting task")?;
        Ok(())
    }

    pub async fn list_tasks(&self, org_id: &str) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, description, message_remote_id, thread_id, created_at
            FROM tasks
            WHERE org_id = ?1
            ORDER BY created_at ASC;
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .context("loading tasks")?;

        Ok(rows
            .into_iter()
            .map(|row| TaskRecord {
                id: row.get(0),
                org_id: org_id.to_string(),
                title: row.get(1),
                description: row.get(2),
                message_remote_id: row.get(3),
                thread_id: row.get(4),
                created_at: row.get(5),
            })
            .collect())
    }

    // ----- rules -----

    pub async fn save_rule(&self, rule: &RuleRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rules (id, org_id, user_id, name, active, conditions, actions, execution_count, last_executed_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                active = excluded.active,
                conditions = excluded.conditions,
                actions = excluded.actions,
                updated_at = excluded.updated_at;
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.org_id)
        .bind(&rule.user_id)
        .bind(&rule.name)
        .bind(if rule.active { 1 } else { 0 })
        .bind(serde_json::to_string(&rule.conditions).context("encoding rule conditions")?)
        .bind(serde_json::to_string(&rule.actions).context("encoding rule actions")?)
        .bind(rule.execution_count)
        .bind(rule.last_executed_at)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await
        .context("upserting rule")?;
        Ok(())
    }

    /// Active rules in creation order: earliest-created rules evaluate
    /// first, which acts as the implicit priority between matching rules.
    pub async fn list_active_rules(&self, org_id: &str) -> Result<Vec<RuleRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, name, active, conditions, actions, execution_count, last_executed_at, created_at, updated_at
            FROM rules
            WHERE org_id = ?1 AND active = 1
            ORDER BY created_at ASC, rowid ASC;
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .context("loading active rules")?;

        let mut out = Vec::new();
        for row in rows {
            let conditions: Vec<RuleCondition> =
                serde_json::from_str(&row.get::<String, _>(4)).unwrap_or_default();
            let actions: Vec<RuleAction> = match serde_json::from_str(&row.get::<String, _>(5)) {
                Ok(actions) => actions,
                Err(e) => {
                    let id: String = row.get(0);
                    warn!(rule = %id, error = %e, "Skipping rule with undecodable actions");
                    continue;
                }
            };
            out.push(RuleRecord {
                id: row.get(0),
                org_id: org_id.to_string(),
                user_id: row.get(1),
                name: row.get(2),
                active: row.get::<i64, _>(3) == 1,
                conditions,
                actions,
                execution_count: row.get(6),
                last_executed_at: row.get(7),
                created_at: row.get(8),
                updated_at: row.get(9),
            });
        }
        Ok(out)
    }

    pub async fn load_rule(&self, org_id: &str, rule_id: &str) -> Result<Option<RuleRecord>> {
        let rules = self.list_active_rules(org_id).await?;
        Ok(rules.into_iter().find(|rule| rule.id == rule_id))
    }

    pub async fn record_rule_execution(&self, rule_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE rules
            SET execution_count = execution_count + 1,
                last_executed_at = ?1,
                updated_at = ?1
            WHERE id = ?2;
            "#,
        )
        .bind(now_ts())
        .bind(rule_id)
        .execute(&self.pool)
        .await
        .context("recording rule execution")?;
        Ok(())
    }
}

fn folder_from_row(org_id: &str, row: &sqlx::sqlite::SqliteRow) -> FolderRecord {
    FolderRecord {
        org_id: org_id.to_string(),
        remote_id: row.get(0),
        display_name: row.get(1),
        parent_remote_id: row.get(2),
        kind: FolderKind::from_str(&row.get::<String, _>(3)),
        sync_enabled: row.get::<i64, _>(4) == 1,
        message_count: row.get(5),
        created_at: row.get(6),
        updated_at: row.get(7),
    }
}

fn thread_from_row(org_id: &str, row: &sqlx::sqlite::SqliteRow) -> ThreadRecord {
    ThreadRecord {
        id: row.get(0),
        org_id: org_id.to_string(),
        subject: row.get(1),
        priority: Priority::from_str(&row.get::<String, _>(2)),
        tags: serde_json::from_str(&row.get::<String, _>(3)).unwrap_or_default(),
        client_id: row.get(4),
        latest_message_id: row.get(5),
        last_message_at: row.get(6),
        message_count: row.get(7),
        created_at: row.get(8),
        updated_at: row.get(9),
    }
}

fn message_from_row(org_id: &str, row: &sqlx::sqlite::SqliteRow) -> MessageRecord {
    MessageRecord {
        remote_id: row.get(0),
        org_id: org_id.to_string(),
        folder_remote_id: row.get(1),
        thread_id: row.get(2),
        direction: Direction::from_str(&row.get::<String, _>(3)),
        from_address: row.get(4),
        to_addresses: serde_json::from_str(&row.get::<String, _>(5)).unwrap_or_default(),
        cc_addresses: serde_json::from_str(&row.get::<String, _>(6)).unwrap_or_default(),
        bcc_addresses: serde_json::from_str(&row.get::<String, _>(7)).unwrap_or_default(),
        subject: row.get(8),
        body_text: row.get(9),
        body_html: row.get(10),
        received_at: row.get(11),
        sent_at: row.get(12),
        is_read: row.get::<i64, _>(13) == 1,
        is_flagged: row.get::<i64, _>(14) == 1,
        has_attachments: row.get::<i64, _>(15) == 1,
        sync_status: row.get(16),
        created_at: row.get(17),
        updated_at: row.get(18),
    }
}

pub(crate) fn default_data_dir() -> Result<PathBuf> {
    if let Ok(custom) = env::var("ASEMAIL_DATA_DIR") {
        let path = PathBuf::from(custom);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("creating ASEMAIL_DATA_DIR at {}", path.display()))?;
        return Ok(path);
    }

    if let Some(home) = home_dir() {
        let path = home.join("asemail");
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        } else {
            warn!(
                "Unable to create {}/asemail; falling back to workspace-local storage",
                home.display()
            );
        }
    }

    let cwd = env::current_dir().context("determining current directory")?;
    let path = cwd.join("asemail-data");
    std::fs::create_dir_all(&path)
        .with_context(|| format!("creating fallback data directory {}", path.display()))?;
    Ok(path)
}
