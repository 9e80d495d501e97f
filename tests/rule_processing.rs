mod common;

use std::sync::Arc;

use asemail::rules::{ActionExecutor, ProcessRequest, RuleEngine};
use asemail::storage::Database;
use asemail::types::{
    now_ts, ClientRecord, Direction, MessageRecord, Priority, RuleAction, RuleCondition,
    RuleRecord,
};

use common::{seed_account, test_authenticator, FakeProvider, ORG, USER};

async fn setup() -> (Arc<Database>, Arc<FakeProvider>, RuleEngine) {
    let db = Arc::new(Database::new_in_memory().await.unwrap());
    seed_account(&db).await;
    let provider = Arc::new(FakeProvider::new(&[]));
    let executor = ActionExecutor::new(db.clone(), provider.clone(), test_authenticator());
    let engine = RuleEngine::new(db.clone(), executor);
    (db, provider, engine)
}

async fn store_message(
    db: &Database,
    remote_id: &str,
    from: &str,
    subject: &str,
    received_at: i64,
) -> String {
    let now = now_ts();
    let message = MessageRecord {
        remote_id: remote_id.into(),
        org_id: ORG.into(),
        folder_remote_id: "folder-1".into(),
        thread_id: String::new(),
        direction: Direction::Received,
        from_address: Some(from.into()),
        to_addresses: vec!["despacho@asesoria.es".into()],
        cc_addresses: vec![],
        bcc_addresses: vec![],
        subject: Some(subject.into()),
        body_text: Some("Adjunto requerimiento con plazo de diez días.".into()),
        body_html: None,
        received_at: Some(received_at),
        sent_at: Some(received_at),
        is_read: false,
        is_flagged: false,
        has_attachments: false,
        sync_status: "synced".into(),
        created_at: now,
        updated_at: now,
    };
    db.upsert_normalized_message(&message, &[]).await.unwrap()
}

async fn store_rule(
    db: &Database,
    id: &str,
    created_at: i64,
    conditions: Vec<RuleCondition>,
    actions: Vec<RuleAction>,
) {
    db.save_rule(&RuleRecord {
        id: id.into(),
        org_id: ORG.into(),
        user_id: USER.into(),
        name: format!("rule {id}"),
        active: true,
        conditions,
        actions,
        execution_count: 0,
        last_executed_at: None,
        created_at,
        updated_at: created_at,
    })
    .await
    .unwrap();
}

fn condition(field: &str, operator: &str, value: &str) -> RuleCondition {
    RuleCondition {
        field: field.into(),
        operator: operator.into(),
        value: value.into(),
    }
}

fn process_all() -> ProcessRequest {
    ProcessRequest {
        org_id: ORG.into(),
        message_id: None,
        process_all_pending: true,
    }
}

#[tokio::test]
async fn matching_rule_tags_and_prioritizes_thread() {
    let (db, _provider, engine) = setup().await;
    let thread_id = store_message(
        &db,
        "msg-1",
        "avisos@hacienda.gob.es",
        "Notificación de la AEAT",
        1_772_357_400,
    )
    .await;
    store_rule(
        &db,
        "rule-fiscal",
        100,
        vec![condition("from_address", "contains", "hacienda.gob")],
        vec![
            RuleAction::AddTags {
                tags: vec!["fiscal".into()],
            },
            RuleAction::SetPriority {
                priority: Priority::High,
            },
        ],
    )
    .await;

    let outcome = engine.process(&process_all()).await.unwrap();
    assert_eq!(outcome.processed_messages, 1);
    assert_eq!(outcome.rules_applied, 1);

    let thread = db.load_thread(ORG, &thread_id).await.unwrap().unwrap();
    assert_eq!(thread.tags, vec!["fiscal".to_string()]);
    assert_eq!(thread.priority, Priority::High);

    let rule = db.load_rule(ORG, "rule-fiscal").await.unwrap().unwrap();
    assert_eq!(rule.execution_count, 1);
    assert!(rule.last_executed_at.is_some());
}

#[tokio::test]
async fn failed_action_does_not_block_the_rest() {
    let (db, _provider, engine) = setup().await;
    let thread_id = store_message(
        &db,
        "msg-1",
        "cliente@example.es",
        "Consulta laboral",
        1_772_357_400,
    )
    .await;
    store_rule(
        &db,
        "rule-mixed",
        100,
        vec![condition("subject", "contains", "consulta")],
        vec![
            RuleAction::AssignClient {
                client_id: "no-such-client".into(),
            },
            RuleAction::AddTags {
                tags: vec!["laboral".into()],
            },
        ],
    )
    .await;

    let outcome = engine.process(&process_all()).await.unwrap();
    assert_eq!(outcome.rules_applied, 1);

    let thread = db.load_thread(ORG, &thread_id).await.unwrap().unwrap();
    assert_eq!(thread.client_id, None);
    assert_eq!(thread.tags, vec!["laboral".to_string()]);
}

#[tokio::test]
async fn assign_client_links_existing_client() {
    let (db, _provider, engine) = setup().await;
    db.insert_client(&ClientRecord {
        id: "client-1".into(),
        org_id: ORG.into(),
        name: "Construcciones García SL".into(),
        email: Some("info@garcia.es".into()),
        created_at: now_ts(),
    })
    .await
    .unwrap();

    let thread_id = store_message(
        &db,
        "msg-1",
        "info@garcia.es",
        "Obra calle Mayor",
        1_772_357_400,
    )
    .await;
    store_rule(
        &db,
        "rule-client",
        100,
        vec![condition("from_address", "equals", "info@garcia.es")],
        vec![RuleAction::AssignClient {
            client_id: "client-1".into(),
        }],
    )
    .await;

    engine.process(&process_all()).await.unwrap();

    let thread = db.load_thread(ORG, &thread_id).await.unwrap().unwrap();
    assert_eq!(thread.client_id.as_deref(), Some("client-1"));
}

#[tokio::test]
async fn forward_action_sends_through_provider() {
    let (db, provider, engine) = setup().await;
    store_message(
        &db,
        "msg-1",
        "avisos@hacienda.gob.es",
        "Requerimiento",
        1_772_357_400,
    )
    .await;
    store_rule(
        &db,
        "rule-fwd",
        100,
        vec![condition("subject", "contains", "requerimiento")],
        vec![RuleAction::ForwardEmail {
            to: "socio@asesoria.es".into(),
        }],
    )
    .await;

    let outcome = engine.process(&process_all()).await.unwrap();
    assert_eq!(outcome.rules_applied, 1);

    let sent = provider.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["socio@asesoria.es".to_string()]);
    assert_eq!(sent[0].subject, "Fwd: Requerimiento");
    assert!(sent[0]
        .body_text
        .as_deref()
        .unwrap()
        .contains("avisos@hacienda.gob.es"));
}

#[tokio::test]
async fn create_task_action_records_task() {
    let (db, _provider, engine) = setup().await;
    let thread_id = store_message(
        &db,
        "msg-1",
        "cliente@example.es",
        "Renovación contrato",
        1_772_357_400,
    )
    .await;
    store_rule(
        &db,
        "rule-task",
        100,
        vec![condition("subject", "contains", "renovación")],
        vec![RuleAction::CreateTask {
            title: None,
            description: Some("Revisar cláusulas".into()),
        }],
    )
    .await;

    engine.process(&process_all()).await.unwrap();

    let tasks = db.list_tasks(ORG).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Follow up: Renovación contrato");
    assert_eq!(tasks[0].description.as_deref(), Some("Revisar cláusulas"));
    assert_eq!(tasks[0].message_remote_id.as_deref(), Some("msg-1"));
    assert_eq!(tasks[0].thread_id.as_deref(), Some(thread_id.as_str()));
}

#[tokio::test]
async fn rules_apply_in_creation_order() {
    let (db, _provider, engine) = setup().await;
    let thread_id = store_message(
        &db,
        "msg-1",
        "avisos@hacienda.gob.es",
        "Notificación",
        1_772_357_400,
    )
    .await;
    store_rule(
        &db,
        "rule-late",
        200,
        vec![condition("from_address", "contains", "hacienda")],
        vec![RuleAction::SetPriority {
            priority: Priority::Urgent,
        }],
    )
    .await;
    store_rule(
        &db,
        "rule-early",
        100,
        vec![condition("from_address", "contains", "hacienda")],
        vec![RuleAction::SetPriority {
            priority: Priority::High,
        }],
    )
    .await;

    let outcome = engine.process(&process_all()).await.unwrap();
    assert_eq!(outcome.rules_applied, 2);

    // The later-created rule runs second, so its priority wins.
    let thread = db.load_thread(ORG, &thread_id).await.unwrap().unwrap();
    assert_eq!(thread.priority, Priority::Urgent);
}

#[tokio::test]
async fn empty_rule_applies_to_nothing() {
    let (db, _provider, engine) = setup().await;
    store_message(
        &db,
        "msg-1",
        "cliente@example.es",
        "Cualquier asunto",
        1_772_357_400,
    )
    .await;
    store_rule(&db, "rule-empty", 100, vec![], vec![
        RuleAction::AddTags {
            tags: vec!["nunca".into()],
        },
    ])
    .await;

    let outcome = engine.process(&process_all()).await.unwrap();
    assert_eq!(outcome.processed_messages, 1);
    assert_eq!(outcome.rules_applied, 0);
}

#[tokio::test]
async fn explicit_message_id_limits_the_pass() {
    let (db, _provider, engine) = setup().await;
    store_message(
        &db,
        "msg-1",
        "avisos@hacienda.gob.es",
        "Notificación A",
        1_772_357_400,
    )
    .await;
    store_message(
        &db,
        "msg-2",
        "avisos@hacienda.gob.es",
        "Notificación B",
        1_772_357_500,
    )
    .await;
    store_rule(
        &db,
        "rule-fiscal",
        100,
        vec![condition("from_address", "contains", "hacienda")],
        vec![RuleAction::AddTags {
            tags: vec!["fiscal".into()],
        }],
    )
    .await;

    let outcome = engine
        .process(&ProcessRequest {
            org_id: ORG.into(),
            message_id: Some("msg-2".into()),
            process_all_pending: false,
        })
        .await
        .unwrap();
    assert_eq!(outcome.processed_messages, 1);
    assert_eq!(outcome.rules_applied, 1);

    let rule = db.load_rule(ORG, "rule-fiscal").await.unwrap().unwrap();
    assert_eq!(rule.execution_count, 1);
}
