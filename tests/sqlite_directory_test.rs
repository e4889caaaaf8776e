//! Tests for the SQLite-backed Directory collaborator.

use tempfile::tempdir;

use courier_server::db::{init_db, SqliteDirectory};
use courier_server::directory::Directory;
use courier_server::error::Error;

async fn open_directory() -> (SqliteDirectory, tempfile::TempDir) {
    let tmp = tempdir().expect("temp dir");
    let db = init_db(tmp.path().to_str().unwrap()).expect("init db");
    (SqliteDirectory::new(db), tmp)
}

#[tokio::test]
async fn users_and_chats_round_trip() {
    let (directory, _tmp) = open_directory().await;

    let alice = directory.create_user("alice").await.unwrap();
    let chat = directory.create_chat("pair", false).await.unwrap();

    let fetched = directory.get_user(alice.id).await.unwrap().unwrap();
    assert_eq!(fetched.name, "alice");
    assert!(directory.get_user(alice.id + 100).await.unwrap().is_none());

    let fetched = directory.get_chat(chat.id).await.unwrap().unwrap();
    assert_eq!(fetched.name, "pair");
    assert!(!fetched.is_group);
}

#[tokio::test]
async fn membership_is_tracked_and_duplicates_rejected() {
    let (directory, _tmp) = open_directory().await;

    let alice = directory.create_user("alice").await.unwrap();
    let bob = directory.create_user("bob").await.unwrap();
    let chat = directory.create_chat("pair", false).await.unwrap();

    directory.add_chat_member(chat.id, alice.id).await.unwrap();
    directory.add_chat_member(chat.id, bob.id).await.unwrap();

    let mut members = directory.get_chat_members(chat.id).await.unwrap();
    members.sort_unstable();
    assert_eq!(members, vec![alice.id, bob.id]);

    assert!(directory.is_user_in_chat(chat.id, alice.id).await.unwrap());
    assert!(!directory.is_user_in_chat(chat.id, alice.id + 100).await.unwrap());

    match directory.add_chat_member(chat.id, alice.id).await {
        Err(Error::AlreadyExists(_)) => {}
        other => panic!("expected AlreadyExists, got {other:?}"),
    }
}

#[tokio::test]
async fn message_insert_is_idempotent_on_external_id() {
    let (directory, _tmp) = open_directory().await;

    let alice = directory.create_user("alice").await.unwrap();
    let chat = directory.create_chat("pair", false).await.unwrap();
    directory.add_chat_member(chat.id, alice.id).await.unwrap();

    let first = directory
        .insert_message_if_absent("e1-key", chat.id, alice.id, "hello")
        .await
        .unwrap()
        .expect("first insert creates a row");
    assert_eq!(first.text, "hello");
    assert_eq!(first.chat_id, chat.id);
    assert_eq!(first.sender_id, alice.id);
    assert!(!first.is_read);

    // Same external_id again: duplicate signal, no second row, no error.
    let second = directory
        .insert_message_if_absent("e1-key", chat.id, alice.id, "hello again")
        .await
        .unwrap();
    assert!(second.is_none());
}
