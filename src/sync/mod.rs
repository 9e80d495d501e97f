use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::errors::{AppError, AppResult};
use crate::graph::{parse_graph_ts, MailProvider, RemoteFolder, RemoteMessage};
use crate::storage::Database;
use crate::types::{
    now_ts, AttachmentRecord, Direction, FolderKind, FolderRecord, MessageRecord,
    MESSAGE_SYNC_STATUS_SYNCED, SYNC_PHASE_COMPLETED, SYNC_PHASE_ERROR, SYNC_PHASE_SYNCING,
};

const TEXT_RENDER_WIDTH: usize = 80;

// Folders synced by default when first discovered. Everything else stays
// disabled until an operator opts it in.
const DEFAULT_SYNC_FOLDERS: [&str; 3] = ["Inbox", "Sent Items", "Drafts"];

#[derive(Clone, Debug, Deserialize)]
pub struct SyncRequest {
    pub org_id: String,
    pub user_id: String,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub full_sync: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SyncOutcome {
    pub folders_processed: u64,
    pub synced_messages: u64,
}

/// Folder and message synchronization for one Outlook account. Collaborators
/// are injected so tests can run the full pipeline against an in-memory
/// store and a fake provider.
pub struct SyncEngine {
    db: Arc<Database>,
    provider: Arc<dyn MailProvider>,
    auth: Arc<Authenticator>,
}

impl SyncEngine {
    pub fn new(db: Arc<Database>, provider: Arc<dyn MailProvider>, auth: Arc<Authenticator>) -> Self {
        Self { db, provider, auth }
    }

    /// Runs one sync pass: refresh the folder list, then pull messages for
    /// either the requested folder or every sync-enabled folder. The first
    /// provider or storage failure aborts the pass.
    pub async fn run(&self, request: &SyncRequest) -> AppResult<SyncOutcome> {
        let access_token = self
            .auth
            .resolve_access_token(&self.db, &request.org_id, &request.user_id)
            .await?;

        self.sync_folders(&request.org_id, &access_token).await?;

        let folders = match &request.folder_id {
            Some(remote_id) => {
                let folder = self
                    .db
                    .load_folder(&request.org_id, remote_id)
                    .await
                    .map_err(AppError::db)?
                    .ok_or_else(|| {
                        AppError::Unexpected(format!("unknown folder {remote_id}"))
                    })?;
                vec![folder]
            }
            None => self
                .db
                .list_sync_enabled_folders(&request.org_id)
                .await
                .map_err(AppError::db)?,
        };

        let mut outcome = SyncOutcome::default();
        for folder in &folders {
            let synced = self
                .sync_folder_messages(request, &access_token, folder)
                .await?;
            outcome.folders_processed += 1;
            outcome.synced_messages += synced;
        }

        info!(
            org = %request.org_id,
            user = %request.user_id,
            folders = outcome.folders_processed,
            messages = outcome.synced_messages,
            "Sync pass complete"
        );
        Ok(outcome)
    }

    /// Mirrors the remote folder list into the store. Newly discovered
    /// folders get the default sync flag; known folders keep whatever an
    /// operator set.
    async fn sync_folders(&self, org_id: &str, access_token: &str) -> AppResult<()> {
        let remote_folders = self
            .provider
            .list_folders(access_token)
            .await
            .map_err(AppError::provider)?;

        debug!(org = %org_id, count = remote_folders.len(), "Fetched remote folder list");
        let now = now_ts();
        for remote in &remote_folders {
            let record = folder_record(org_id, remote, now);
            self.db.upsert_folder(&record).await.map_err(AppError::db)?;
        }
        Ok(())
    }

    /// Pulls every page of messages for one folder, normalizing and storing
    /// each. Checkpoints advance to the newest receivedDateTime seen, so the
    /// next incremental pass asks only for strictly newer mail.
    async fn sync_folder_messages(
        &self,
        request: &SyncRequest,
        access_token: &str,
        folder: &FolderRecord,
    ) -> AppResult<u64> {
        let org_id = &request.org_id;
        let since = if request.full_sync {
            None
        } else {
            self.db
                .load_sync_status(org_id, &folder.remote_id)
                .await
                .map_err(AppError::db)?
                .and_then(|status| status.last_synced_at)
        };

        info!(
            org = %org_id,
            folder = %folder.display_name,
            since = ?since,
            "Syncing folder"
        );

        let mut synced: u64 = 0;
        let mut newest_received: Option<i64> = None;
        let mut page_link: Option<String> = None;

        loop {
            let page = match self
                .provider
                .list_messages(access_token, &folder.remote_id, since, page_link.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    self.mark_folder_errored(org_id, &folder.remote_id, synced).await;
                    return Err(AppError::provider(e));
                }
            };

            for remote in &page.value {
                let (message, attachments) = normalize_message(org_id, folder, remote)?;
                if let Some(received) = message.received_at {
                    if newest_received.map_or(true, |ts| received > ts) {
                        newest_received = Some(received);
                    }
                }
                self.db
                    .upsert_normalized_message(&message, &attachments)
                    .await
                    .map_err(AppError::db)?;
                synced += 1;
            }

            self.db
                .update_sync_status(
                    org_id,
                    &folder.remote_id,
                    SYNC_PHASE_SYNCING,
                    synced as i64,
                    None,
                )
                .await
                .map_err(AppError::db)?;

            match page.next_link {
                Some(next) => page_link = Some(next),
                None => break,
            }
        }

        self.db
            .update_sync_status(
                org_id,
                &folder.remote_id,
                SYNC_PHASE_COMPLETED,
                synced as i64,
                newest_received,
            )
            .await
            .map_err(AppError::db)?;

        Ok(synced)
    }

    /// Best-effort status write on a provider failure; the original error is
    /// what the caller sees.
    async fn mark_folder_errored(&self, org_id: &str, folder_remote_id: &str, synced: u64) {
        if let Err(e) = self
            .db
            .update_sync_status(org_id, folder_remote_id, SYNC_PHASE_ERROR, synced as i64, None)
            .await
        {
            warn!(folder = %folder_remote_id, error = %e, "Failed to record sync error status");
        }
    }
}

fn folder_record(org_id: &str, remote: &RemoteFolder, now: i64) -> FolderRecord {
    FolderRecord {
        org_id: org_id.to_string(),
        remote_id: remote.id.clone(),
        display_name: remote.display_name.clone(),
        parent_remote_id: remote.parent_folder_id.clone(),
        kind: FolderKind::from_display_name(&remote.display_name),
        sync_enabled: default_sync_enabled(&remote.display_name),
        message_count: remote.total_item_count.unwrap_or(0),
        created_at: now,
        updated_at: now,
    }
}

fn default_sync_enabled(display_name: &str) -> bool {
    DEFAULT_SYNC_FOLDERS
        .iter()
        .any(|name| name.eq_ignore_ascii_case(display_name.trim()))
}

/// Maps a raw Graph message onto the stored shape. A message without a
/// remote id cannot be keyed and fails the folder.
fn normalize_message(
    org_id: &str,
    folder: &FolderRecord,
    remote: &RemoteMessage,
) -> AppResult<(MessageRecord, Vec<AttachmentRecord>)> {
    let remote_id = remote
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            AppError::Unexpected(format!(
                "message without id in folder {}",
                folder.display_name
            ))
        })?;

    let direction = match folder.kind {
        FolderKind::Sent => Direction::Sent,
        FolderKind::Drafts => Direction::Draft,
        _ if remote.is_draft.unwrap_or(false) => Direction::Draft,
        _ => Direction::Received,
    };

    let (body_text, body_html) = normalize_body(remote);

    let is_flagged = remote
        .flag
        .as_ref()
        .and_then(|flag| flag.flag_status.as_deref())
        .map(|status| status.eq_ignore_ascii_case("flagged"))
        .unwrap_or(false);

    let attachments: Vec<AttachmentRecord> = remote
        .attachments
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|remote_att| {
            let att_id = remote_att.id.clone().filter(|id| !id.is_empty())?;
            Some(AttachmentRecord {
                org_id: org_id.to_string(),
                message_remote_id: remote_id.clone(),
                remote_id: att_id,
                name: remote_att.name.clone().unwrap_or_else(|| "unnamed".into()),
                content_type: remote_att.content_type.clone(),
                size_bytes: remote_att.size,
                downloaded: false,
            })
        })
        .collect();

    let now = now_ts();
    let message = MessageRecord {
        remote_id,
        org_id: org_id.to_string(),
        folder_remote_id: folder.remote_id.clone(),
        thread_id: String::new(),
        direction,
        from_address: remote
            .from
            .as_ref()
            .and_then(|r| r.address())
            .map(str::to_string),
        to_addresses: recipient_addresses(remote.to_recipients.as_deref()),
        cc_addresses: recipient_addresses(remote.cc_recipients.as_deref()),
        bcc_addresses: recipient_addresses(remote.bcc_recipients.as_deref()),
        subject: remote.subject.clone(),
        body_text,
        body_html,
        received_at: remote.received_date_time.as_deref().and_then(parse_graph_ts),
        sent_at: remote.sent_date_time.as_deref().and_then(parse_graph_ts),
        is_read: remote.is_read.unwrap_or(false),
        is_flagged,
        has_attachments: remote.has_attachments.unwrap_or(false) || !attachments.is_empty(),
        sync_status: MESSAGE_SYNC_STATUS_SYNCED.to_string(),
        created_at: now,
        updated_at: now,
    };

    Ok((message, attachments))
}

fn recipient_addresses(recipients: Option<&[crate::graph::RemoteRecipient]>) -> Vec<String> {
    recipients
        .unwrap_or_default()
        .iter()
        .filter_map(|r| r.address())
        .map(str::to_string)
        .collect()
}

/// HTML bodies keep the raw markup and gain a plain-text rendering for rule
/// matching; text bodies are stored as-is.
fn normalize_body(remote: &RemoteMessage) -> (Option<String>, Option<String>) {
    let Some(body) = &remote.body else {
        return (None, None);
    };
    let Some(content) = body.content.clone().filter(|c| !c.is_empty()) else {
        return (None, None);
    };

    let is_html = body
        .content_type
        .as_deref()
        .map(|ct| ct.eq_ignore_ascii_case("html"))
        .unwrap_or(false);

    if is_html {
        let text = html2text::from_read(content.as_bytes(), TEXT_RENDER_WIDTH)
            .ok()
            .map(|rendered| rendered.trim().to_string())
            .filter(|rendered| !rendered.is_empty());
        (text, Some(content))
    } else {
        (Some(content), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{RemoteBody, RemoteEmailAddress, RemoteRecipient};

    fn test_folder(kind: FolderKind) -> FolderRecord {
        FolderRecord {
            org_id: "org-1".into(),
            remote_id: "folder-1".into(),
            display_name: "Inbox".into(),
            parent_remote_id: None,
            kind,
            sync_enabled: true,
            message_count: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn recipient(address: &str) -> RemoteRecipient {
        RemoteRecipient {
            email_address: Some(RemoteEmailAddress {
                name: None,
                address: Some(address.to_string()),
            }),
        }
    }

    #[test]
    fn default_sync_covers_standard_folders_only() {
        assert!(default_sync_enabled("Inbox"));
        assert!(default_sync_enabled("Sent Items"));
        assert!(default_sync_enabled("Drafts"));
        assert!(default_sync_enabled(" inbox "));
        assert!(!default_sync_enabled("Deleted Items"));
        assert!(!default_sync_enabled("Facturas 2024"));
    }

    #[test]
    fn normalize_fills_addresses_and_timestamps() {
        let remote = RemoteMessage {
            id: Some("msg-1".into()),
            subject: Some("Nueva factura".into()),
            from: Some(recipient("avisos@hacienda.gob.es")),
            to_recipients: Some(vec![recipient("despacho@asesoria.es")]),
            received_date_time: Some("2026-03-01T09:30:00Z".into()),
            is_read: Some(false),
            ..Default::default()
        };

        let (message, attachments) =
            normalize_message("org-1", &test_folder(FolderKind::Inbox), &remote).unwrap();
        assert_eq!(message.remote_id, "msg-1");
        assert_eq!(message.direction, Direction::Received);
        assert_eq!(message.from_address.as_deref(), Some("avisos@hacienda.gob.es"));
        assert_eq!(message.to_addresses, vec!["despacho@asesoria.es".to_string()]);
        assert_eq!(message.received_at, Some(1772357400));
        assert!(attachments.is_empty());
    }

    #[test]
    fn normalize_direction_follows_folder_kind() {
        let remote = RemoteMessage {
            id: Some("msg-2".into()),
            ..Default::default()
        };
        let (message, _) =
            normalize_message("org-1", &test_folder(FolderKind::Sent), &remote).unwrap();
        assert_eq!(message.direction, Direction::Sent);

        let (message, _) =
            normalize_message("org-1", &test_folder(FolderKind::Drafts), &remote).unwrap();
        assert_eq!(message.direction, Direction::Draft);
    }

    #[test]
    fn normalize_renders_html_body_to_text() {
        let remote = RemoteMessage {
            id: Some("msg-3".into()),
            body: Some(RemoteBody {
                content_type: Some("html".into()),
                content: Some("<p>Adjunto la <b>factura</b> de marzo</p>".into()),
            }),
            ..Default::default()
        };

        let (message, _) =
            normalize_message("org-1", &test_folder(FolderKind::Inbox), &remote).unwrap();
        assert!(message.body_html.as_deref().unwrap().contains("<b>factura</b>"));
        assert!(message.body_text.as_deref().unwrap().contains("factura"));
        assert!(!message.body_text.as_deref().unwrap().contains('<'));
    }

    #[test]
    fn normalize_rejects_missing_id() {
        let remote = RemoteMessage::default();
        let err = normalize_message("org-1", &test_folder(FolderKind::Inbox), &remote);
        assert!(err.is_err());
    }
}
