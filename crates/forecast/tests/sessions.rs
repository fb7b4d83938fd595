use chrono::Duration;
use forecast_core::flows::creation::{CreationContext, CreationSession, CreationStep};
use forecast_core::session::{SaveMode, SessionRecord};
use forecast_core::store::SessionStore;
use forecast_core::{
    ConflictCheck, ErrorKind, FlowKind, FlowSession, ForecastError, SessionLookup,
};
use forecast_testing::{Harness, ADMIN};
use serde_json::json;

fn creation(step: CreationStep, chat: i64) -> FlowSession {
    FlowSession::Creation(CreationSession {
        step,
        context: CreationContext {
            chat_id: chat,
            group_id: Some(3),
            question: Some("Will it rain?".into()),
            ..CreationContext::default()
        },
    })
}

#[tokio::test]
async fn get_returns_what_was_set() {
    let h = Harness::new();
    let sessions = h.services.sessions();

    let first = creation(CreationStep::AskQuestion, 5);
    sessions.start(5, &first).await.unwrap();
    assert_eq!(sessions.get(5).await.unwrap(), SessionLookup::Active(first));

    let next = creation(CreationStep::AskEventType, 5);
    sessions.set(5, &next).await.unwrap();
    assert_eq!(sessions.get(5).await.unwrap(), SessionLookup::Active(next));

    let record = h.session(5).await.unwrap();
    assert_eq!(record.state_name, "event_creation:ask_event_type");
    assert_eq!(record.context["question"], "Will it rain?");
}

#[tokio::test]
async fn sessions_expire_after_ttl() {
    let h = Harness::new();
    let sessions = h.services.sessions();
    sessions
        .start(5, &creation(CreationStep::AskQuestion, 5))
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(30));
    assert_eq!(
        sessions.get(5).await.unwrap(),
        SessionLookup::Expired(FlowKind::EventCreation)
    );
    assert_eq!(sessions.get(5).await.unwrap(), SessionLookup::NotFound);
    assert!(h.session(5).await.is_none());
}

#[tokio::test]
async fn a_live_session_blocks_another_start() {
    let h = Harness::new();
    let sessions = h.services.sessions();
    sessions
        .start(5, &creation(CreationStep::AskQuestion, 5))
        .await
        .unwrap();

    let err = sessions
        .start(5, &creation(CreationStep::AskQuestion, 5))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ForecastError::SessionConflict {
            existing: FlowKind::EventCreation
        }
    ));

    h.clock.advance(Duration::minutes(31));
    sessions
        .start(5, &creation(CreationStep::AskQuestion, 5))
        .await
        .unwrap();
}

#[tokio::test]
async fn session_without_namespace_is_dropped() {
    let h = Harness::new();
    let now = h.now();
    h.store
        .save_session(
            SessionRecord {
                owner_id: 5,
                state_name: "legacy_step".into(),
                context: json!({}),
                created_at: now,
                updated_at: now,
                expires_at: now + Duration::minutes(30),
            },
            SaveMode::Create,
            now,
        )
        .await
        .unwrap();

    let check = h
        .services
        .conflicts()
        .check(5, FlowKind::EventCreation)
        .await
        .unwrap();
    assert_eq!(check, ConflictCheck::Free);
    assert!(h.session(5).await.is_none());
}

#[tokio::test]
async fn another_flow_command_reports_conflict() {
    let h = Harness::new();
    h.group(-100, "Forecasters").await;

    h.dm(ADMIN, "/create_event").await.unwrap();
    h.dm(ADMIN, "/create_group").await.unwrap();

    let check = h
        .services
        .conflicts()
        .check(ADMIN, FlowKind::GroupRegistration)
        .await
        .unwrap();
    assert_eq!(check.label(), Some("event creation"));

    let menu = h.transport.last_to(ADMIN).unwrap();
    assert!(menu.text.contains("middle of event creation"));
    assert_eq!(menu.payloads, ["conflict:resume", "conflict:restart:group_creation"]);
    assert_eq!(
        h.session(ADMIN).await.unwrap().state_name,
        "event_creation:ask_question"
    );
}

#[tokio::test]
async fn conflict_restart_replaces_the_old_flow() {
    let h = Harness::new();
    h.group(-100, "Forecasters").await;
    h.dm(ADMIN, "/create_event").await.unwrap();
    h.dm(ADMIN, "/create_group").await.unwrap();

    h.press(ADMIN, ADMIN, "conflict:restart:group_creation")
        .await
        .unwrap();

    assert_eq!(
        h.session(ADMIN).await.unwrap().state_name,
        "group_creation:ask_name"
    );
}

#[tokio::test]
async fn conflict_resume_sends_the_prompt_again() {
    let h = Harness::new();
    h.group(-100, "Forecasters").await;
    h.dm(ADMIN, "/create_event").await.unwrap();
    let first_prompt = h.transport.last_to(ADMIN).unwrap();
    h.dm(ADMIN, "/resolve_event").await.unwrap();

    h.press(ADMIN, ADMIN, "conflict:resume").await.unwrap();

    let prompt = h.transport.last_to(ADMIN).unwrap();
    assert!(prompt.text.starts_with("What should people forecast?"));
    assert_ne!(prompt.message_id, first_prompt.message_id);
    assert!(h
        .transport
        .deleted()
        .contains(&(ADMIN, first_prompt.message_id)));
    assert_eq!(
        h.session(ADMIN).await.unwrap().state_name,
        "event_creation:ask_question"
    );
}

#[tokio::test]
async fn resume_without_a_live_dialog_explains_why() {
    let h = Harness::new();
    h.group(-100, "Forecasters").await;

    h.press(ADMIN, ADMIN, "conflict:resume").await.unwrap();
    assert!(h.transport.saw(ADMIN, "There is no dialog to continue."));

    h.dm(ADMIN, "/create_event").await.unwrap();
    h.clock.advance(Duration::minutes(30));
    h.press(ADMIN, ADMIN, "conflict:resume").await.unwrap();
    assert!(h.transport.saw(
        ADMIN,
        "Your event creation dialog expired. Start again with /create_event."
    ));
    assert!(h.session(ADMIN).await.is_none());
}

#[tokio::test]
async fn lookups_turn_into_session_errors() {
    let h = Harness::new();
    let sessions = h.services.sessions();
    sessions
        .start(5, &creation(CreationStep::AskQuestion, 5))
        .await
        .unwrap();
    assert!(sessions.get(5).await.unwrap().into_active().is_ok());

    h.clock.advance(Duration::minutes(30));
    let expired = sessions.get(5).await.unwrap().into_active().unwrap_err();
    assert!(matches!(
        expired,
        ForecastError::SessionExpired {
            flow: FlowKind::EventCreation
        }
    ));
    let missing = sessions.get(5).await.unwrap().into_active().unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::SessionNotFound);
}

#[tokio::test]
async fn same_command_restarts_the_flow() {
    let h = Harness::new();
    h.group(-100, "Forecasters").await;
    h.dm(ADMIN, "/create_event").await.unwrap();
    h.dm(ADMIN, "Will it rain?").await.unwrap();
    assert_eq!(
        h.session(ADMIN).await.unwrap().state_name,
        "event_creation:ask_event_type"
    );

    h.dm(ADMIN, "/create_event").await.unwrap();
    assert_eq!(
        h.session(ADMIN).await.unwrap().state_name,
        "event_creation:ask_question"
    );
}

#[tokio::test]
async fn expired_dialog_is_reported() {
    let h = Harness::new();
    h.group(-100, "Forecasters").await;
    h.dm(ADMIN, "/create_event").await.unwrap();

    h.clock.advance(Duration::minutes(31));
    h.dm(ADMIN, "Will it rain?").await.unwrap();

    assert!(h.transport.saw(
        ADMIN,
        "Your event creation dialog expired. Start again with /create_event."
    ));
    assert!(h.session(ADMIN).await.is_none());
}

#[tokio::test]
async fn cancel_command_ends_the_dialog() {
    let h = Harness::new();
    h.group(-100, "Forecasters").await;

    h.dm(ADMIN, "/cancel").await.unwrap();
    assert!(h.transport.saw(ADMIN, "There is nothing to cancel."));

    h.dm(ADMIN, "/create_event").await.unwrap();
    h.dm(ADMIN, "/cancel").await.unwrap();
    assert!(h.transport.saw(ADMIN, "Event creation cancelled."));
    assert!(h.session(ADMIN).await.is_none());
}

#[tokio::test]
async fn unreadable_button_drops_the_session() {
    let h = Harness::new();
    h.group(-100, "Forecasters").await;
    h.dm(ADMIN, "/create_event").await.unwrap();

    h.press(ADMIN, ADMIN, "bogus:payload").await.unwrap();

    assert!(h.session(ADMIN).await.is_none());
    assert!(h.transport.saw(ADMIN, "Something went wrong with this dialog"));
}

#[tokio::test]
async fn buttons_without_a_dialog_are_stale() {
    let h = Harness::new();
    h.press(ADMIN, ADMIN, "confirm:yes").await.unwrap();
    assert!(h.transport.saw(ADMIN, "This menu is no longer active."));
    assert_eq!(h.transport.answered_callbacks().len(), 1);
}
