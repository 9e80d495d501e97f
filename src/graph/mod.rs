use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::types::OutboundMail;

const FOLDER_PAGE_SIZE: usize = 100;
const REDACTED_BODY_MAX_LEN: usize = 200;

const MESSAGE_SELECT_FIELDS: &str = concat!(
    "id,subject,from,toRecipients,ccRecipients,bccRecipients,",
    "receivedDateTime,sentDateTime,body,isRead,isDraft,flag,hasAttachments"
);
const ATTACHMENT_EXPAND: &str = "attachments($select=id,name,contentType,size)";

/// One page of remote messages plus the provider-supplied continuation link.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePage {
    pub value: Vec<RemoteMessage>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FolderPage {
    pub value: Vec<RemoteFolder>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteFolder {
    pub id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "parentFolderId")]
    pub parent_folder_id: Option<String>,
    #[serde(rename = "totalItemCount")]
    pub total_item_count: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteMessage {
    pub id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<RemoteRecipient>,
    #[serde(rename = "toRecipients")]
    pub to_recipients: Option<Vec<RemoteRecipient>>,
    #[serde(rename = "ccRecipients")]
    pub cc_recipients: Option<Vec<RemoteRecipient>>,
    #[serde(rename = "bccRecipients")]
    pub bcc_recipients: Option<Vec<RemoteRecipient>>,
    pub body: Option<RemoteBody>,
    #[serde(rename = "receivedDateTime")]
    pub received_date_time: Option<String>,
    #[serde(rename = "sentDateTime")]
    pub sent_date_time: Option<String>,
    #[serde(rename = "isRead")]
    pub is_read: Option<bool>,
    #[serde(rename = "isDraft")]
    pub is_draft: Option<bool>,
    #[serde(rename = "hasAttachments")]
    pub has_attachments: Option<bool>,
    pub flag: Option<RemoteFlag>,
    pub attachments: Option<Vec<RemoteAttachment>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteRecipient {
    #[serde(rename = "emailAddress")]
    pub email_address: Option<RemoteEmailAddress>,
}

impl RemoteRecipient {
    pub fn address(&self) -> Option<&str> {
        self.email_address
            .as_ref()
            .and_then(|email| email.address.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteEmailAddress {
    pub name: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteBody {
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteFlag {
    #[serde(rename = "flagStatus")]
    pub flag_status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteAttachment {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
    pub size: Option<i64>,
}

/// Seam between the pipeline and the remote mail API. The production
/// implementation talks Microsoft-Graph-style REST; tests substitute an
/// in-memory fake.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Full remote folder list, paginated internally until exhausted.
    async fn list_folders(&self, access_token: &str) -> Result<Vec<RemoteFolder>>;

    /// One page of messages for a folder. `since` constrains the first
    /// request to messages received strictly after the checkpoint and is
    /// ignored when following a continuation link.
    async fn list_messages(
        &self,
        access_token: &str,
        folder_remote_id: &str,
        since: Option<i64>,
        page_link: Option<&str>,
    ) -> Result<MessagePage>;

    /// Outbound-send collaborator used by the forward_email action.
    async fn send_mail(&self, access_token: &str, mail: &OutboundMail) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct GraphClient {
    client: Client,
    base_url: String,
    page_size: usize,
}

impl GraphClient {
    pub fn new(base_url: impl Into<String>, page_size: usize) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            page_size,
        }
    }

    fn initial_messages_url(&self, folder_remote_id: &str, since: Option<i64>) -> Result<String> {
        let endpoint = format!(
            "{}/me/mailFolders/{}/messages",
            self.base_url, folder_remote_id
        );
        let mut url = Url::parse(&endpoint).with_context(|| format!("parse url {endpoint}"))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("$top", &self.page_size.to_string())
                .append_pair("$select", MESSAGE_SELECT_FIELDS)
                .append_pair("$expand", ATTACHMENT_EXPAND)
                .append_pair("$orderby", "receivedDateTime desc");
            if let Some(ts) = since {
                pairs.append_pair(
                    "$filter",
                    &format!("receivedDateTime gt {}", format_graph_ts(ts)),
                );
            }
        }
        Ok(url.to_string())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        access_token: &str,
        url: &str,
        what: &str,
    ) -> Result<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .header("accept", "application/json")
            .send()
            .await
            .with_context(|| format!("request {what}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("read {what} response body"))?;
        if !status.is_success() {
            return Err(anyhow!(
                "{what} request failed: status={} body={}",
                status,
                redact_response_body(&body)
            ));
        }

        serde_json::from_str(&body).with_context(|| format!("decode {what} JSON"))
    }
}

#[async_trait]
impl MailProvider for GraphClient {
    async fn list_folders(&self, access_token: &str) -> Result<Vec<RemoteFolder>> {
        let mut folders = Vec::new();
        let mut url = format!(
            "{}/me/mailFolders?$top={}",
            self.base_url, FOLDER_PAGE_SIZE
        );

        loop {
            let page: FolderPage = self.get_json(access_token, &url, "mail folders").await?;
            folders.extend(page.value);
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(folders)
    }

    async fn list_messages(
        &self,
        access_token: &str,
        folder_remote_id: &str,
        since: Option<i64>,
        page_link: Option<&str>,
    ) -> Result<MessagePage> {
        let url = match page_link {
            Some(link) => link.to_string(),
            None => self.initial_messages_url(folder_remote_id, since)?,
        };
        self.get_json(access_token, &url, "messages").await
    }

    async fn send_mail(&self, access_token: &str, mail: &OutboundMail) -> Result<()> {
        let recipients: Vec<_> = mail
            .to
            .iter()
            .map(|addr| json!({ "emailAddress": { "address": addr } }))
            .collect();
        let (content_type, content) = match (&mail.body_html, &mail.body_text) {
            (Some(html), _) => ("HTML", html.clone()),
            (None, Some(text)) => ("Text", text.clone()),
            (None, None) => ("Text", String::new()),
        };
        let payload = json!({
            "message": {
                "subject": mail.subject,
                "body": { "contentType": content_type, "content": content },
                "toRecipients": recipients,
            },
            "saveToSentItems": true,
        });

        let url = format!("{}/me/sendMail", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .context("request send mail")?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .context("read send mail response body")?;
            return Err(anyhow!(
                "send mail request failed: status={} body={}",
                status,
                redact_response_body(&body)
            ));
        }

        Ok(())
    }
}

pub fn format_graph_ts(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_graph_ts(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp())
}

fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= REDACTED_BODY_MAX_LEN {
        return trimmed.to_string();
    }
    // Back off to a char boundary; a fixed byte cut can split a multi-byte
    // character in localized provider error text.
    let mut cut = REDACTED_BODY_MAX_LEN;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…[truncated {} bytes]", &trimmed[..cut], trimmed.len())
}
