use forecast_core::store::GroupRepository;
use forecast_core::ChatInfo;
use forecast_testing::{Harness, ADMIN};

#[tokio::test]
async fn detected_plain_group_is_registered_directly() {
    let h = Harness::new();
    h.transport.set_chat_info(ChatInfo {
        chat_id: -300,
        title: Some("Chess".into()),
        is_forum: false,
    });

    h.dm(ADMIN, "/create_group").await.unwrap();
    h.dm(ADMIN, "Chess club").await.unwrap();
    assert_eq!(
        h.session(ADMIN).await.unwrap().state_name,
        "group_creation:ask_chat_id"
    );
    h.dm(ADMIN, "-300").await.unwrap();

    let group = h.store.group_by_chat(-300).await.unwrap().unwrap();
    assert_eq!(group.name, "Chess club");
    assert!(!group.is_forum);
    assert!(h.transport.saw(ADMIN, "Chess club (chat -300) registered."));
    assert!(h.session(ADMIN).await.is_none());
    assert_eq!(h.store.groups_for_user(ADMIN).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_chat_asks_about_forum_and_topic() {
    let h = Harness::new();

    h.dm(ADMIN, "/create_group").await.unwrap();
    h.dm(ADMIN, "Quiz night").await.unwrap();
    h.dm(ADMIN, "-400").await.unwrap();
    assert_eq!(
        h.transport.last_to(ADMIN).unwrap().payloads,
        ["forum:yes", "forum:no", "cancel"]
    );

    h.press(ADMIN, ADMIN, "forum:yes").await.unwrap();
    h.dm(ADMIN, "42").await.unwrap();

    let group = h.store.group_by_chat(-400).await.unwrap().unwrap();
    assert!(group.is_forum);
    let topics = h.store.topics(group.id).await.unwrap();
    assert_eq!(topics.len(), 1);
    assert_eq!(topics[0].thread_id, 42);
    assert!(h
        .transport
        .saw(ADMIN, "Quiz night (chat -400) registered. Topic 42 added."));
}

#[tokio::test]
async fn registered_forum_gets_another_topic() {
    let h = Harness::new();
    h.dm(ADMIN, "/create_group").await.unwrap();
    h.dm(ADMIN, "Quiz night").await.unwrap();
    h.dm(ADMIN, "-400").await.unwrap();
    h.press(ADMIN, ADMIN, "forum:yes").await.unwrap();
    h.press(ADMIN, ADMIN, "topic:skip").await.unwrap();

    h.dm(ADMIN, "/create_group").await.unwrap();
    h.dm(ADMIN, "Ignored name").await.unwrap();
    h.dm(ADMIN, "-400").await.unwrap();
    h.dm(ADMIN, "7").await.unwrap();

    assert!(h
        .transport
        .saw(ADMIN, "Quiz night (chat -400) was already registered. Topic 7 added."));
    assert_eq!(h.store.all_groups().await.unwrap().len(), 1);
}

#[tokio::test]
async fn chat_id_must_be_a_number() {
    let h = Harness::new();
    h.dm(ADMIN, "/create_group").await.unwrap();
    h.dm(ADMIN, "Quiz night").await.unwrap();
    h.dm(ADMIN, "minus four hundred").await.unwrap();

    assert!(h.transport.saw(ADMIN, "is not a valid number. Please try again."));
    assert_eq!(
        h.session(ADMIN).await.unwrap().state_name,
        "group_creation:ask_chat_id"
    );
}

#[tokio::test]
async fn only_admins_register_groups() {
    let h = Harness::new();
    h.dm(5, "/create_group").await.unwrap();

    assert!(h
        .transport
        .saw(5, "Not allowed: only admins can register groups."));
    assert!(h.session(5).await.is_none());
}
