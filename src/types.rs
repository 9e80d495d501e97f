use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Folder role derived from the remote display name. Anything the provider
/// doesn't name as a well-known folder is `Custom`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderKind {
    Inbox,
    Sent,
    Drafts,
    Deleted,
    Custom,
}

impl FolderKind {
    pub fn from_display_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "inbox" => FolderKind::Inbox,
            "sent items" => FolderKind::Sent,
            "drafts" => FolderKind::Drafts,
            "deleted items" => FolderKind::Deleted,
            _ => FolderKind::Custom,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FolderKind::Inbox => "inbox",
            FolderKind::Sent => "sent",
            FolderKind::Drafts => "drafts",
            FolderKind::Deleted => "deleted",
            FolderKind::Custom => "custom",
        }
    }

    pub fn from_str(raw: &str) -> Self {
        match raw {
            "inbox" => FolderKind::Inbox,
            "sent" => FolderKind::Sent,
            "drafts" => FolderKind::Drafts,
            "deleted" => FolderKind::Deleted,
            _ => FolderKind::Custom,
        }
    }
}

/// Message direction, exposed to rules as the `message_type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Received,
    Sent,
    Draft,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Received => "received",
            Direction::Sent => "sent",
            Direction::Draft => "draft",
        }
    }

    pub fn from_str(raw: &str) -> Self {
        match raw {
            "sent" => Direction::Sent,
            "draft" => Direction::Draft,
            _ => Direction::Received,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn from_str(raw: &str) -> Self {
        match raw {
            "low" => Priority::Low,
            "high" => Priority::High,
            "urgent" => Priority::Urgent,
            _ => Priority::Normal,
        }
    }
}

/// Stored Outlook credential for one (org, user) pair. Tokens live in the
/// database so any invocation can pick up where the previous one left off.
#[derive(Clone, Debug)]
pub struct MailAccount {
    pub org_id: String,
    pub user_id: String,
    pub address: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone, Debug)]
pub struct FolderRecord {
    pub org_id: String,
    pub remote_id: String,
    pub display_name: String,
    pub parent_remote_id: Option<String>,
    pub kind: FolderKind,
    pub sync_enabled: bool,
    pub message_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A conversation, grouped by exact subject within an org. Carries the
/// denormalized fields rules mutate (priority, tags, assigned client).
#[derive(Clone, Debug)]
pub struct ThreadRecord {
    pub id: String,
    pub org_id: String,
    pub subject: String,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub client_id: Option<String>,
    pub latest_message_id: Option<String>,
    pub last_message_at: Option<i64>,
    pub message_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

pub const MESSAGE_SYNC_STATUS_SYNCED: &str = "synced";

#[derive(Clone, Debug)]
pub struct MessageRecord {
    pub remote_id: String,
    pub org_id: String,
    pub folder_remote_id: String,
    pub thread_id: String,
    pub direction: Direction,
    pub from_address: Option<String>,
    pub to_addresses: Vec<String>,
    pub cc_addresses: Vec<String>,
    pub bcc_addresses: Vec<String>,
    pub subject: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub received_at: Option<i64>,
    pub sent_at: Option<i64>,
    pub is_read: bool,
    pub is_flagged: bool,
    pub has_attachments: bool,
    pub sync_status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Attachment metadata only; content is fetched lazily elsewhere.
#[derive(Clone, Debug)]
pub struct AttachmentRecord {
    pub org_id: String,
    pub message_remote_id: String,
    pub remote_id: String,
    pub name: String,
    pub content_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub downloaded: bool,
}

pub const SYNC_PHASE_SYNCING: &str = "syncing";
pub const SYNC_PHASE_COMPLETED: &str = "completed";
pub const SYNC_PHASE_ERROR: &str = "error";

/// Per-folder checkpoint that makes subsequent syncs incremental.
#[derive(Clone, Debug)]
pub struct SyncStatusRecord {
    pub org_id: String,
    pub folder_remote_id: String,
    pub last_synced_at: Option<i64>,
    pub status: String,
    pub synced_count: i64,
    pub updated_at: i64,
}

/// One rule condition. Field and operator are kept as raw strings on
/// purpose: an unknown value must degrade to a non-matching condition
/// rather than fail the whole rule load.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleCondition {
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: String,
}

/// Rule actions as a tagged union, one typed parameter set per action.
/// Unknown action types are rejected at rule-save time by serde.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    AssignClient {
        client_id: String,
    },
    AddTags {
        tags: Vec<String>,
    },
    SetPriority {
        priority: Priority,
    },
    MoveToFolder {
        folder_id: String,
    },
    ForwardEmail {
        to: String,
    },
    CreateTask {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    AutoReply {
        #[serde(default)]
        template: Option<String>,
    },
}

impl RuleAction {
    pub fn kind(&self) -> &'static str {
        match self {
            RuleAction::AssignClient { .. } => "assign_client",
            RuleAction::AddTags { .. } => "add_tags",
            RuleAction::SetPriority { .. } => "set_priority",
            RuleAction::MoveToFolder { .. } => "move_to_folder",
            RuleAction::ForwardEmail { .. } => "forward_email",
            RuleAction::CreateTask { .. } => "create_task",
            RuleAction::AutoReply { .. } => "auto_reply",
        }
    }
}

#[derive(Clone, Debug)]
pub struct RuleRecord {
    pub id: String,
    pub org_id: String,
    pub user_id: String,
    pub name: String,
    pub active: bool,
    pub conditions: Vec<RuleCondition>,
    pub actions: Vec<RuleAction>,
    pub execution_count: i64,
    pub last_executed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone, Debug)]
pub struct TaskRecord {
    pub id: String,
    pub org_id: String,
    pub title: String,
    pub description: Option<String>,
    pub message_remote_id: Option<String>,
    pub thread_id: Option<String>,
    pub created_at: i64,
}

#[derive(Clone, Debug)]
pub struct ClientRecord {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub email: Option<String>,
    pub created_at: i64,
}

/// Payload handed to the outbound-send collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboundMail {
    pub to: Vec<String>,
    pub subject: String,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
}

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parses_from_tagged_json() {
        let raw = r#"{"type": "add_tags", "tags": ["fiscal"]}"#;
        let action: RuleAction = serde_json::from_str(raw).unwrap();
        assert_eq!(
            action,
            RuleAction::AddTags {
                tags: vec!["fiscal".into()]
            }
        );

        let raw = r#"{"type": "set_priority", "priority": "high"}"#;
        let action: RuleAction = serde_json::from_str(raw).unwrap();
        assert_eq!(
            action,
            RuleAction::SetPriority {
                priority: Priority::High
            }
        );
    }

    #[test]
    fn unknown_action_type_is_rejected() {
        let raw = r#"{"type": "launch_missiles", "target": "inbox"}"#;
        assert!(serde_json::from_str::<RuleAction>(raw).is_err());
    }

    #[test]
    fn folder_kind_from_display_name() {
        assert_eq!(FolderKind::from_display_name("Inbox"), FolderKind::Inbox);
        assert_eq!(FolderKind::from_display_name("  INBOX "), FolderKind::Inbox);
        assert_eq!(FolderKind::from_display_name("Sent Items"), FolderKind::Sent);
        assert_eq!(FolderKind::from_display_name("Drafts"), FolderKind::Drafts);
        assert_eq!(
            FolderKind::from_display_name("Deleted Items"),
            FolderKind::Deleted
        );
        assert_eq!(
            FolderKind::from_display_name("Facturas 2024"),
            FolderKind::Custom
        );
    }
}
