//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Mailvault.
//
// Mailvault is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailvault is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Mailvault. If not, see <http://www.gnu.org/licenses/>.

use super::defs::*;
use crate::model::*;
use crate::{CancellationToken, Error};

fn ids(messages: &[Message]) -> Vec<u32> {
    messages.iter().map(|m| m.id).collect()
}

#[tokio::test]
async fn unread_count_matches_bulk_insert() {
    let setup = set_up().await;
    let storage = &setup.storage;
    storage.add_account(sample_account("me@example.com")).await.unwrap();

    let messages = (1..=20)
        .map(|id| {
            let mut m = message("INBOX", id, i64::from(id));
            m.is_marked_as_read = 0 == id % 3;
            m
        })
        .collect::<Vec<_>>();
    let unread = messages.iter().filter(|m| m.is_unread()).count() as u32;
    storage
        .add_message_list("me@example.com", messages, true)
        .await
        .unwrap();

    let inbox = storage
        .get_folders("me@example.com")
        .await
        .unwrap()
        .into_iter()
        .find(|f| "INBOX" == f.full_name)
        .unwrap();
    assert_eq!(unread, inbox.unread_count);
    assert_eq!(20, inbox.local_count);
    assert_eq!(20, inbox.total_count);
    assert_eq!(
        unread,
        storage
            .get_unread_messages_count("me@example.com", "INBOX", &setup.cancel)
            .await
            .unwrap(),
    );
}

#[tokio::test]
async fn global_ordering_across_accounts() {
    let setup = set_up().await;
    let storage = &setup.storage;
    storage.add_account(sample_account("a@example.com")).await.unwrap();
    storage.add_account(sample_account("b@example.com")).await.unwrap();

    storage
        .add_message("a@example.com", message("INBOX", 1, 1000), true)
        .await
        .unwrap();
    storage
        .add_message("b@example.com", message("INBOX", 101, 1000), true)
        .await
        .unwrap();
    storage
        .add_message("b@example.com", message("Sent", 1, 500), true)
        .await
        .unwrap();

    let first = storage
        .get_earlier_messages(None, 2, None, &setup.cancel)
        .await
        .unwrap();
    assert_eq!(vec![101, 1], ids(&first));

    let second = storage
        .get_earlier_messages(None, 2, first.last().cloned(), &setup.cancel)
        .await
        .unwrap();
    assert_eq!(vec![1], ids(&second));
    assert_eq!("b@example.com", second[0].account);
    assert_eq!("Sent", second[0].folder);
}

#[tokio::test]
async fn id_rewrite_keeps_children() {
    let setup = set_up().await;
    let storage = &setup.storage;
    storage.add_account(sample_account("me@example.com")).await.unwrap();

    let mut original = message("INBOX", 1, 1000);
    original.attachments.push(Attachment {
        file_name: "blob.bin".to_owned(),
        data: (0..=255).collect(),
    });
    original.protection = ProtectionInfo {
        kind: MessageProtectionType::Signature,
        signatures: vec![SignatureInfo {
            created: at(999),
            hash_algorithm: "SHA512".to_owned(),
            signer_fingerprint: "0123456789ABCDEF".to_owned(),
            signer_email: "alice@example.com".to_owned(),
            is_verified: false,
        }],
    };
    let mut stored = storage
        .add_message("me@example.com", original, true)
        .await
        .unwrap();

    stored.id = 1000;
    storage
        .update_message("me@example.com", stored.clone(), true)
        .await
        .unwrap();

    let fetched = storage
        .get_message("me@example.com", "INBOX", 1000, &setup.cancel)
        .await
        .unwrap();
    assert_eq!(stored, fetched);
    assert!(!storage
        .is_message_exist("me@example.com", "INBOX", 1, &setup.cancel)
        .await
        .unwrap());
    assert_eq!(
        Some(1000),
        storage
            .get_latest_message("me@example.com", "INBOX", &setup.cancel)
            .await
            .unwrap()
            .map(|m| m.id),
    );
}

#[tokio::test]
async fn cancelled_queries_fail() {
    let setup = set_up().await;
    let storage = &setup.storage;
    storage.add_account(sample_account("me@example.com")).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert_matches!(
        Err(Error::Cancelled),
        storage
            .get_message_list("me@example.com", "INBOX", 10, &cancel)
            .await,
    );
    assert_matches!(
        Err(Error::Cancelled),
        storage.get_unread_messages_count_by_contact(&cancel).await,
    );

    // Mutations are unaffected by any token.
    storage
        .add_message("me@example.com", message("INBOX", 1, 1000), true)
        .await
        .unwrap();
    assert_eq!(
        1,
        storage
            .get_messages_count("me@example.com", "INBOX", &setup.cancel)
            .await
            .unwrap(),
    );
}

#[tokio::test]
async fn folder_removal_cascades() {
    let setup = set_up().await;
    let storage = &setup.storage;
    storage.add_account(sample_account("me@example.com")).await.unwrap();
    storage
        .add_message_list(
            "me@example.com",
            vec![message("INBOX", 1, 1000), message("Sent", 1, 2000)],
            true,
        )
        .await
        .unwrap();

    let mut account = storage.get_account("me@example.com").await.unwrap();
    account.folders.retain(|f| "Sent" != f.full_name);
    account.folders.push(Folder::new("Archive"));
    storage.update_account(account).await.unwrap();

    assert_matches!(
        Err(Error::NxFolder),
        storage
            .get_message_list("me@example.com", "Sent", 10, &setup.cancel)
            .await,
    );
    assert_eq!(
        vec![1],
        ids(&storage
            .get_earlier_messages(None, 10, None, &setup.cancel)
            .await
            .unwrap()),
    );

    let names = storage
        .get_folders("me@example.com")
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.full_name)
        .collect::<Vec<_>>();
    assert_eq!(vec!["INBOX".to_owned(), "Archive".to_owned()], names);

    storage
        .delete_account_by_email("me@example.com")
        .await
        .unwrap();
    assert!(storage
        .get_earlier_messages(None, 10, None, &setup.cancel)
        .await
        .unwrap()
        .is_empty());
}
