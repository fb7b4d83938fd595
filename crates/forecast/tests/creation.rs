use chrono::{Duration, TimeZone, Utc};
use forecast_core::store::EventRepository;
use forecast_core::{EventStatus, EventType};
use forecast_testing::{Harness, ADMIN};

#[tokio::test]
async fn admin_publishes_a_multi_option_event() {
    let h = Harness::new();
    h.group(-100, "Forecasters").await;

    h.dm(ADMIN, "/create_event").await.unwrap();
    assert_eq!(
        h.session(ADMIN).await.unwrap().state_name,
        "event_creation:ask_question"
    );

    h.dm(ADMIN, "Which team wins the cup?").await.unwrap();
    h.press(ADMIN, ADMIN, "event_type:multi").await.unwrap();
    assert_eq!(
        h.session(ADMIN).await.unwrap().state_name,
        "event_creation:ask_options"
    );

    h.dm(ADMIN, "a\nb\nc\nd\ne\nf\ng").await.unwrap();
    assert!(h
        .transport
        .saw(ADMIN, "Expected between 2 and 6 options, got 7. Please try again."));
    assert_eq!(
        h.session(ADMIN).await.unwrap().state_name,
        "event_creation:ask_options"
    );

    h.dm(ADMIN, "Reds\nBlues\nGreens").await.unwrap();
    h.press(ADMIN, ADMIN, "deadline_preset:7d").await.unwrap();
    let confirm = h.transport.last_to(ADMIN).unwrap();
    assert!(confirm.text.contains("Publish this event?"));
    assert_eq!(confirm.payloads, ["confirm:yes", "confirm:no"]);

    h.press(ADMIN, ADMIN, "confirm:yes").await.unwrap();

    let poll = h.transport.last_poll().unwrap();
    assert_eq!(poll.chat_id, -100);
    assert_eq!(poll.question, "Which team wins the cup?");
    assert_eq!(poll.options, ["Reds", "Blues", "Greens"]);

    let event = h.store.event(1).await.unwrap().unwrap();
    assert_eq!(event.event_type, EventType::MultiOption);
    assert_eq!(event.status, EventStatus::Active);
    assert_eq!(event.poll_id.as_deref(), Some(poll.poll_id.as_str()));
    assert_eq!(
        event.deadline,
        Utc.with_ymd_and_hms(2025, 3, 8, 12, 0, 0).unwrap()
    );

    assert!(h.transport.saw(
        ADMIN,
        "Event #1 published in Forecasters. Voting closes 08.03.2025 12:00."
    ));
    assert!(h.transport.saw(-100, "user1 unlocked Event Creator"));
    assert!(h.session(ADMIN).await.is_none());
}

#[tokio::test]
async fn binary_events_skip_the_options_step() {
    let h = Harness::new();
    h.group(-100, "Forecasters").await;

    h.dm(ADMIN, "/create_event").await.unwrap();
    h.dm(ADMIN, "Will it snow in April?").await.unwrap();
    h.press(ADMIN, ADMIN, "event_type:binary").await.unwrap();

    assert_eq!(
        h.session(ADMIN).await.unwrap().state_name,
        "event_creation:ask_deadline"
    );

    h.dm(ADMIN, "15.04.2025 18:00").await.unwrap();
    h.press(ADMIN, ADMIN, "confirm:yes").await.unwrap();
    assert_eq!(h.transport.last_poll().unwrap().options, ["Yes", "No"]);
}

#[tokio::test]
async fn finished_steps_leave_only_the_final_message() {
    let h = Harness::new();
    h.group(-100, "Forecasters").await;

    h.dm(ADMIN, "/create_event").await.unwrap();
    h.dm(ADMIN, "Will it snow in April?").await.unwrap();
    h.press(ADMIN, ADMIN, "event_type:binary").await.unwrap();
    h.dm(ADMIN, "yesterday").await.unwrap();
    h.dm(ADMIN, "15.04.2025 18:00").await.unwrap();
    h.press(ADMIN, ADMIN, "confirm:yes").await.unwrap();

    let deleted = h.transport.deleted();
    let kept: Vec<_> = h
        .transport
        .sent_to(ADMIN)
        .into_iter()
        .filter(|m| !deleted.contains(&(ADMIN, m.message_id)))
        .collect();
    assert_eq!(kept.len(), 1);
    assert!(kept[0].text.starts_with("Event #1 published"));
}

#[tokio::test]
async fn several_groups_are_offered_as_buttons() {
    let h = Harness::new();
    h.group(-100, "Forecasters").await;
    h.group(-200, "Chess club").await;

    h.dm(ADMIN, "/create_event").await.unwrap();

    let menu = h.transport.last_to(ADMIN).unwrap();
    assert_eq!(menu.payloads, ["select_group:1", "select_group:2", "cancel"]);

    h.dm(ADMIN, "first").await.unwrap();
    assert!(h.transport.saw(ADMIN, "Please use the buttons above. Please try again."));

    h.press(ADMIN, ADMIN, "select_group:2").await.unwrap();
    h.dm(ADMIN, "Who wins the club final?").await.unwrap();
    h.press(ADMIN, ADMIN, "event_type:binary").await.unwrap();
    h.press(ADMIN, ADMIN, "deadline_preset:3d").await.unwrap();
    h.press(ADMIN, ADMIN, "confirm:yes").await.unwrap();

    assert_eq!(h.transport.last_poll().unwrap().chat_id, -200);
}

#[tokio::test]
async fn confirm_no_cancels() {
    let h = Harness::new();
    h.group(-100, "Forecasters").await;

    h.dm(ADMIN, "/create_event").await.unwrap();
    h.dm(ADMIN, "Will it snow in April?").await.unwrap();
    h.press(ADMIN, ADMIN, "event_type:binary").await.unwrap();
    h.press(ADMIN, ADMIN, "deadline_preset:1d").await.unwrap();
    h.press(ADMIN, ADMIN, "confirm:no").await.unwrap();

    assert!(h.transport.saw(ADMIN, "Event creation cancelled."));
    assert!(h.transport.polls().is_empty());
    assert!(h.session(ADMIN).await.is_none());
}

#[tokio::test]
async fn newcomers_must_vote_before_creating() {
    let h = Harness::new();
    let group = h.group(-100, "Forecasters").await;
    let user = 7;

    h.dm(user, "/create_event").await.unwrap();
    assert!(h
        .transport
        .saw(user, "Make 3 more prediction(s) before creating your own events."));
    assert!(h.session(user).await.is_none());

    let deadline = h.now() + Duration::days(2);
    for _ in 0..3 {
        let event = h
            .event(group.id, ADMIN, EventType::Binary, &["Yes", "No"], deadline)
            .await;
        h.vote(event.poll_id.as_deref().unwrap(), user, 0).await.unwrap();
    }

    h.dm(user, "/create_event").await.unwrap();
    assert_eq!(
        h.session(user).await.unwrap().state_name,
        "event_creation:ask_question"
    );
}

#[tokio::test]
async fn failed_publication_drops_the_dialog() {
    let h = Harness::new();
    h.group(-100, "Forecasters").await;
    h.transport.fail_polls(true);

    h.dm(ADMIN, "/create_event").await.unwrap();
    h.dm(ADMIN, "Will it snow in April?").await.unwrap();
    h.press(ADMIN, ADMIN, "event_type:binary").await.unwrap();
    h.press(ADMIN, ADMIN, "deadline_preset:1d").await.unwrap();

    assert!(h.press(ADMIN, ADMIN, "confirm:yes").await.is_err());
    assert!(h.session(ADMIN).await.is_none());
    assert!(h.transport.saw(ADMIN, "something went wrong on our side"));
}
