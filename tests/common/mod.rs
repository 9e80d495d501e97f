use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use asemail::auth::Authenticator;
use asemail::graph::{
    parse_graph_ts, MailProvider, MessagePage, RemoteAttachment, RemoteBody, RemoteEmailAddress,
    RemoteFolder, RemoteMessage, RemoteRecipient,
};
use asemail::storage::Database;
use asemail::types::{now_ts, MailAccount, OutboundMail};

pub const ORG: &str = "org-1";
pub const USER: &str = "user-1";

const PAGE_SIZE: usize = 2;

/// In-memory stand-in for the Graph API. Messages are handed out in pages
/// of two with synthetic continuation links, and every `since` argument is
/// recorded so tests can assert on the incremental boundary.
#[derive(Default)]
pub struct FakeProvider {
    folders: Vec<RemoteFolder>,
    messages: Mutex<HashMap<String, Vec<RemoteMessage>>>,
    pub seen_since: Mutex<Vec<Option<i64>>>,
    pub sent: Mutex<Vec<OutboundMail>>,
    pub fail_message_listing: AtomicBool,
}

impl FakeProvider {
    pub fn new(folder_names: &[&str]) -> Self {
        let folders = folder_names
            .iter()
            .enumerate()
            .map(|(i, name)| RemoteFolder {
                id: format!("folder-{}", i + 1),
                display_name: name.to_string(),
                parent_folder_id: None,
                total_item_count: Some(0),
            })
            .collect();
        Self {
            folders,
            ..Default::default()
        }
    }

    pub fn add_message(&self, folder_id: &str, message: RemoteMessage) {
        self.messages
            .lock()
            .unwrap()
            .entry(folder_id.to_string())
            .or_default()
            .push(message);
    }
}

#[async_trait]
impl MailProvider for FakeProvider {
    async fn list_folders(&self, _access_token: &str) -> Result<Vec<RemoteFolder>> {
        Ok(self.folders.clone())
    }

    async fn list_messages(
        &self,
        _access_token: &str,
        folder_remote_id: &str,
        since: Option<i64>,
        page_link: Option<&str>,
    ) -> Result<MessagePage> {
        if self.fail_message_listing.load(Ordering::SeqCst) {
            return Err(anyhow!("simulated provider outage"));
        }
        let (folder, offset, since) = match page_link {
            Some(link) => {
                let rest = link
                    .strip_prefix("fake://")
                    .ok_or_else(|| anyhow!("bad page link {link}"))?;
                let (folder, tail) = rest
                    .split_once('/')
                    .ok_or_else(|| anyhow!("bad page link {link}"))?;
                let (offset, since) = tail
                    .split_once('/')
                    .ok_or_else(|| anyhow!("bad page link {link}"))?;
                (
                    folder.to_string(),
                    offset.parse::<usize>()?,
                    since.parse::<i64>().ok().filter(|ts| *ts >= 0),
                )
            }
            None => {
                self.seen_since.lock().unwrap().push(since);
                (folder_remote_id.to_string(), 0, since)
            }
        };

        let store = self.messages.lock().unwrap();
        let matching: Vec<RemoteMessage> = store
            .get(&folder)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|m| match since {
                Some(boundary) => m
                    .received_date_time
                    .as_deref()
                    .and_then(parse_graph_ts)
                    .map(|ts| ts > boundary)
                    .unwrap_or(false),
                None => true,
            })
            .collect();

        let page: Vec<RemoteMessage> =
            matching.iter().skip(offset).take(PAGE_SIZE).cloned().collect();
        let next_link = if offset + PAGE_SIZE < matching.len() {
            Some(format!(
                "fake://{}/{}/{}",
                folder,
                offset + PAGE_SIZE,
                since.unwrap_or(-1)
            ))
        } else {
            None
        };

        Ok(MessagePage {
            value: page,
            next_link,
        })
    }

    async fn send_mail(&self, _access_token: &str, mail: &OutboundMail) -> Result<()> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

pub fn recipient(address: &str) -> RemoteRecipient {
    RemoteRecipient {
        email_address: Some(RemoteEmailAddress {
            name: None,
            address: Some(address.to_string()),
        }),
    }
}

pub fn remote_message(id: &str, subject: &str, from: &str, received: &str) -> RemoteMessage {
    RemoteMessage {
        id: Some(id.to_string()),
        subject: Some(subject.to_string()),
        from: Some(recipient(from)),
        to_recipients: Some(vec![recipient("despacho@asesoria.es")]),
        body: Some(RemoteBody {
            content_type: Some("text".into()),
            content: Some(format!("cuerpo de {id}")),
        }),
        received_date_time: Some(received.to_string()),
        sent_date_time: Some(received.to_string()),
        is_read: Some(false),
        ..Default::default()
    }
}

pub fn with_attachment(mut message: RemoteMessage, att_id: &str, name: &str) -> RemoteMessage {
    message.has_attachments = Some(true);
    message.attachments = Some(vec![RemoteAttachment {
        id: Some(att_id.to_string()),
        name: Some(name.to_string()),
        content_type: Some("application/pdf".into()),
        size: Some(2048),
    }]);
    message
}

/// Stores an account whose access token is valid for another hour, so no
/// refresh round-trip is attempted during tests.
pub async fn seed_account(db: &Database) {
    let now = now_ts();
    db.save_mail_account(&MailAccount {
        org_id: ORG.into(),
        user_id: USER.into(),
        address: "despacho@asesoria.es".into(),
        access_token: Some("test-token".into()),
        refresh_token: Some("test-refresh".into()),
        token_expires_at: Some(now + 3600),
        created_at: now,
        updated_at: now,
    })
    .await
    .unwrap();
}

pub fn test_authenticator() -> Arc<Authenticator> {
    Arc::new(
        Authenticator::new(
            "test-client",
            "test-secret",
            "https://login.microsoftonline.com/common/oauth2/v2.0/token",
        )
        .unwrap(),
    )
}
