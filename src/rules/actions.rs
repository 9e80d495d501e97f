use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::graph::MailProvider;
use crate::storage::Database;
use crate::types::{now_ts, MessageRecord, OutboundMail, RuleAction, RuleRecord, TaskRecord};

/// Executes the actions of a matched rule. Each action is isolated: a
/// failure is logged and the remaining actions still run.
pub struct ActionExecutor {
    db: Arc<Database>,
    provider: Arc<dyn MailProvider>,
    auth: Arc<Authenticator>,
}

impl ActionExecutor {
    pub fn new(db: Arc<Database>, provider: Arc<dyn MailProvider>, auth: Arc<Authenticator>) -> Self {
        Self { db, provider, auth }
    }

    pub async fn run_actions(&self, rule: &RuleRecord, message: &MessageRecord) {
        for action in &rule.actions {
            if let Err(e) = self.execute(action, rule, message).await {
                warn!(
                    rule = %rule.id,
                    action = %action.kind(),
                    message = %message.remote_id,
                    error = format!("{e:#}"),
                    "Rule action failed; continuing"
                );
            }
        }
    }

    async fn execute(
        &self,
        action: &RuleAction,
        rule: &RuleRecord,
        message: &MessageRecord,
    ) -> Result<()> {
        match action {
            RuleAction::AssignClient { client_id } => {
                if !self.db.client_exists(&message.org_id, client_id).await? {
                    bail!("client {client_id} does not exist in org {}", message.org_id);
                }
                self.db
                    .set_thread_client(&message.thread_id, client_id)
                    .await?;
            }
            RuleAction::AddTags { tags } => {
                self.db.add_thread_tags(&message.thread_id, tags).await?;
            }
            RuleAction::SetPriority { priority } => {
                self.db
                    .set_thread_priority(&message.thread_id, *priority)
                    .await?;
            }
            RuleAction::MoveToFolder { folder_id } => {
                // Remote move is not wired up; record the intent only.
                info!(
                    message = %message.remote_id,
                    folder = %folder_id,
                    "move_to_folder requested; leaving message in place"
                );
            }
            RuleAction::ForwardEmail { to } => {
                let token = self
                    .auth
                    .resolve_access_token(&self.db, &rule.org_id, &rule.user_id)
                    .await
                    .context("resolving token for forward")?;
                let mail = build_forward(to, message);
                self.provider
                    .send_mail(&token, &mail)
                    .await
                    .context("sending forwarded mail")?;
            }
            RuleAction::CreateTask { title, description } => {
                let task = TaskRecord {
                    id: Uuid::new_v4().to_string(),
                    org_id: message.org_id.clone(),
                    title: title.clone().unwrap_or_else(|| {
                        format!(
                            "Follow up: {}",
                            message.subject.as_deref().unwrap_or("(no subject)")
                        )
                    }),
                    description: description.clone(),
                    message_remote_id: Some(message.remote_id.clone()),
                    thread_id: Some(message.thread_id.clone()),
                    created_at: now_ts(),
                };
                self.db.insert_task(&task).await?;
            }
            RuleAction::AutoReply { template } => {
                // Same as move_to_folder: intent only, no outbound reply.
                info!(
                    message = %message.remote_id,
                    template = ?template,
                    "auto_reply requested; skipping outbound reply"
                );
            }
        }
        Ok(())
    }
}

fn build_forward(to: &str, message: &MessageRecord) -> OutboundMail {
    let subject = format!(
        "Fwd: {}",
        message.subject.as_deref().unwrap_or("(no subject)")
    );

    let body_text = message.body_text.as_deref().map(|text| {
        format!(
            "----- Forwarded message -----\nFrom: {}\nSubject: {}\n\n{}",
            message.from_address.as_deref().unwrap_or("(unknown)"),
            message.subject.as_deref().unwrap_or("(no subject)"),
            text
        )
    });
    let body_html = message.body_html.clone();

    OutboundMail {
        to: vec![to.to_string()],
        subject,
        body_html,
        body_text,
    }
}
