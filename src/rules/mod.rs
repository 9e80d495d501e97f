mod actions;

pub use actions::ActionExecutor;

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::storage::Database;
use crate::types::{MessageRecord, RuleCondition, RuleRecord};

// Cap on how many recent messages one processing pass will evaluate when no
// specific message id is given.
const MAX_PENDING_MESSAGES: usize = 100;

#[derive(Clone, Debug, Deserialize)]
pub struct ProcessRequest {
    pub org_id: String,
    #[serde(default)]
    pub message_id: Option<String>,
    /// Accepted for wire compatibility with existing callers; a request
    /// without `message_id` always processes the pending batch.
    #[serde(default)]
    pub process_all_pending: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessOutcome {
    pub processed_messages: u64,
    pub rules_applied: u64,
}

/// Evaluates an org's active rules against stored messages and hands
/// matches to the action executor.
pub struct RuleEngine {
    db: Arc<Database>,
    executor: ActionExecutor,
}

impl RuleEngine {
    pub fn new(db: Arc<Database>, executor: ActionExecutor) -> Self {
        Self { db, executor }
    }

    /// One processing pass. Rules run in creation order against each
    /// message; action failures are contained per action, so a single bad
    /// action never blocks the rest of the pass.
    pub async fn process(&self, request: &ProcessRequest) -> AppResult<ProcessOutcome> {
        let rules = self
            .db
            .list_active_rules(&request.org_id)
            .await
            .map_err(AppError::db)?;

        let messages: Vec<MessageRecord> = match &request.message_id {
            Some(remote_id) => {
                let message = self
                    .db
                    .load_message(&request.org_id, remote_id)
                    .await
                    .map_err(AppError::db)?
                    .ok_or_else(|| {
                        AppError::Unexpected(format!("unknown message {remote_id}"))
                    })?;
                vec![message]
            }
            None => self
                .db
                .load_recent_synced_messages(&request.org_id, MAX_PENDING_MESSAGES)
                .await
                .map_err(AppError::db)?,
        };

        let mut outcome = ProcessOutcome {
            processed_messages: messages.len() as u64,
            rules_applied: 0,
        };

        for message in &messages {
            for rule in &rules {
                if !rule_matches(rule, message) {
                    continue;
                }
                debug!(
                    org = %request.org_id,
                    rule = %rule.name,
                    message = %message.remote_id,
                    "Rule matched"
                );
                self.executor.run_actions(rule, message).await;
                self.db
                    .record_rule_execution(&rule.id)
                    .await
                    .map_err(AppError::db)?;
                outcome.rules_applied += 1;
            }
        }

        info!(
            org = %request.org_id,
            messages = outcome.processed_messages,
            applied = outcome.rules_applied,
            "Rule processing complete"
        );
        Ok(outcome)
    }
}

/// A rule matches when every condition matches. A rule with no conditions
/// never matches.
pub fn rule_matches(rule: &RuleRecord, message: &MessageRecord) -> bool {
    if rule.conditions.is_empty() {
        return false;
    }
    rule.conditions
        .iter()
        .all(|condition| condition_matches(condition, message))
}

enum FieldValue {
    Text(String),
    Flag(bool),
}

fn extract_field(field: &str, message: &MessageRecord) -> Option<FieldValue> {
    match field {
        "from_address" => Some(FieldValue::Text(
            message.from_address.clone().unwrap_or_default(),
        )),
        "to_addresses" => Some(FieldValue::Text(message.to_addresses.join(", "))),
        "subject" => Some(FieldValue::Text(
            message.subject.clone().unwrap_or_default(),
        )),
        "body_text" => Some(FieldValue::Text(
            message.body_text.clone().unwrap_or_default(),
        )),
        "body_html" => Some(FieldValue::Text(
            message.body_html.clone().unwrap_or_default(),
        )),
        "message_type" => Some(FieldValue::Text(message.direction.as_str().to_string())),
        "has_attachments" => Some(FieldValue::Flag(message.has_attachments)),
        _ => None,
    }
}

/// Unknown fields and unknown field/operator combinations never match.
/// Text comparisons are case-insensitive.
fn condition_matches(condition: &RuleCondition, message: &MessageRecord) -> bool {
    let Some(value) = extract_field(&condition.field, message) else {
        return false;
    };

    match value {
        FieldValue::Flag(flag) => match condition.operator.as_str() {
            "is_true" => flag,
            "is_false" => !flag,
            _ => false,
        },
        FieldValue::Text(text) => {
            let haystack = text.to_lowercase();
            let needle = condition.value.to_lowercase();
            match condition.operator.as_str() {
                "contains" => haystack.contains(&needle),
                "not_contains" => !haystack.contains(&needle),
                "equals" => haystack == needle,
                "starts_with" => haystack.starts_with(&needle),
                "ends_with" => haystack.ends_with(&needle),
                _ => false,
            }
        }
    }
}
