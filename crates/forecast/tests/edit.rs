use chrono::Duration;
use forecast_core::store::EventRepository;
use forecast_core::{Event, EventType};
use forecast_testing::{Harness, ADMIN};

async fn binary_event(h: &Harness, creator: i64) -> Event {
    let group = h.group(-100, "Forecasters").await;
    h.event(
        group.id,
        creator,
        EventType::Binary,
        &["Yes", "No"],
        h.now() + Duration::days(2),
    )
    .await
}

#[tokio::test]
async fn events_with_votes_are_frozen() {
    let h = Harness::new();
    let event = binary_event(&h, ADMIN).await;
    h.vote(event.poll_id.as_deref().unwrap(), 11, 0)
        .await
        .unwrap();

    h.dm(ADMIN, &format!("/edit_event {}", event.id)).await.unwrap();

    assert!(h.transport.saw(
        ADMIN,
        "This event already has votes and can no longer be edited."
    ));
    assert!(h.session(ADMIN).await.is_none());

    h.dm(ADMIN, "/edit_event").await.unwrap();
    assert!(h
        .transport
        .saw(ADMIN, "You have no events that can still be edited."));
}

#[tokio::test]
async fn question_change_republishes_the_poll() {
    let h = Harness::new();
    let event = binary_event(&h, ADMIN).await;

    h.dm(ADMIN, "/edit_event").await.unwrap();
    assert_eq!(h.transport.last_to(ADMIN).unwrap().payloads, ["edit_event:1"]);

    h.press(ADMIN, ADMIN, "edit_event:1").await.unwrap();
    assert_eq!(h.session(ADMIN).await.unwrap().state_name, "event_edit:menu");
    assert_eq!(
        h.transport.last_to(ADMIN).unwrap().payloads,
        [
            "edit_field:question:1",
            "edit_field:deadline:1",
            "edit_field:save:1",
            "edit_field:cancel:1"
        ]
    );

    h.press(ADMIN, ADMIN, "edit_field:question:1").await.unwrap();
    h.dm(ADMIN, "Will it snow in May?").await.unwrap();
    assert!(h.transport.last_to(ADMIN).unwrap().text.contains("Unsaved changes."));
    h.press(ADMIN, ADMIN, "edit_field:save:1").await.unwrap();

    let stored = h.store.event(event.id).await.unwrap().unwrap();
    assert_eq!(stored.question, "Will it snow in May?");

    let polls = h.transport.polls();
    assert_eq!(polls.len(), 2);
    assert_eq!(polls[1].question, "Will it snow in May?");
    assert_eq!(stored.poll_id.as_deref(), Some(polls[1].poll_id.as_str()));
    assert_eq!(
        h.transport.stopped_polls(),
        vec![(-100, event.poll_message_id.unwrap())]
    );
    assert!(h.transport.saw(ADMIN, "Event #1 updated."));
    assert!(h.session(ADMIN).await.is_none());
}

#[tokio::test]
async fn deadline_change_keeps_the_poll() {
    let h = Harness::new();
    let event = binary_event(&h, ADMIN).await;

    h.dm(ADMIN, "/edit_event 1").await.unwrap();
    h.press(ADMIN, ADMIN, "edit_field:deadline:1").await.unwrap();
    let prompt = h.transport.last_to(ADMIN).unwrap();
    assert!(prompt.payloads.iter().any(|p| p == "deadline_preset:14d"));
    h.press(ADMIN, ADMIN, "deadline_preset:14d").await.unwrap();
    h.press(ADMIN, ADMIN, "edit_field:save:1").await.unwrap();

    let stored = h.store.event(event.id).await.unwrap().unwrap();
    assert!(stored.deadline > event.deadline);
    assert_eq!(h.transport.polls().len(), 1);
    assert!(h.transport.stopped_polls().is_empty());
}

#[tokio::test]
async fn saving_without_changes_says_so() {
    let h = Harness::new();
    binary_event(&h, ADMIN).await;

    h.dm(ADMIN, "/edit_event 1").await.unwrap();
    h.press(ADMIN, ADMIN, "edit_field:save:1").await.unwrap();

    assert!(h.transport.saw(ADMIN, "Nothing was changed."));
    assert_eq!(h.transport.polls().len(), 1);
}

#[tokio::test]
async fn strangers_cannot_edit() {
    let h = Harness::new();
    binary_event(&h, 21).await;

    h.dm(22, "/edit_event 1").await.unwrap();
    assert!(h.transport.saw(
        22,
        "Not allowed: only the creator or an admin can change this event."
    ));
    assert!(h.session(22).await.is_none());

    h.dm(21, "/edit_event 1").await.unwrap();
    assert_eq!(h.session(21).await.unwrap().state_name, "event_edit:menu");
}

#[tokio::test]
async fn missing_events_are_reported() {
    let h = Harness::new();
    h.dm(ADMIN, "/edit_event 99").await.unwrap();
    assert!(h.transport.saw(ADMIN, "That event does not exist."));
}

#[tokio::test]
async fn binary_options_are_fixed() {
    let h = Harness::new();
    binary_event(&h, ADMIN).await;

    h.dm(ADMIN, "/edit_event 1").await.unwrap();
    h.press(ADMIN, ADMIN, "edit_field:options:1").await.unwrap();

    assert!(h.transport.saw(
        ADMIN,
        "Options are fixed for this event type. Please try again."
    ));
    assert_eq!(h.session(ADMIN).await.unwrap().state_name, "event_edit:menu");
}
