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
use crate::Error;

#[tokio::test]
async fn contact_dedup() {
    let setup = set_up().await;
    let storage = &setup.storage;

    let contact = Contact::new(EmailAddress::with_name("Bob@Example.com", "Bob"));
    storage.add_contact(contact.clone()).await.unwrap();
    assert_matches!(
        Err(Error::ConstraintViolation(_)),
        storage.add_contact(contact.clone()).await,
    );
    assert!(!storage.try_add_contact(contact.clone()).await.unwrap());
    assert_matches!(
        Err(Error::ConstraintViolation(_)),
        storage.add_contact(Contact::new(EmailAddress::new(""))).await,
    );

    assert!(storage
        .exists_contact_with_email("bob@example.com", &setup.cancel)
        .await
        .unwrap());
    assert_eq!(
        contact,
        storage
            .get_contact("BOB@example.com", &setup.cancel)
            .await
            .unwrap(),
    );

    storage.remove_contact("bob@example.com").await.unwrap();
    assert_matches!(
        Err(Error::NxContact),
        storage.get_contact("bob@example.com", &setup.cancel).await,
    );
    assert_matches!(
        Err(Error::NxContact),
        storage
            .set_contact_avatar(
                "bob@example.com",
                ImageInfo {
                    width: 1,
                    height: 1,
                    bytes: vec![0],
                },
            )
            .await,
    );
}

#[tokio::test]
async fn unread_aggregation_per_participant() {
    let setup = set_up().await;
    let storage = &setup.storage;
    storage.add_account(sample_account("me@example.com")).await.unwrap();

    let mut message = Message::new("INBOX", 1, at(1000));
    message.to.push(EmailAddress::new("to@example.com"));
    message.cc.push(EmailAddress::new("cc@example.com"));
    message.bcc.push(EmailAddress::new("bcc@example.com"));
    storage
        .add_message("me@example.com", message, true)
        .await
        .unwrap();

    let counts = storage
        .get_unread_messages_count_by_contact(&setup.cancel)
        .await
        .unwrap();
    assert_eq!(3, counts.len());
    assert!(counts.values().all(|&n| 1 == n));

    // A message added without counter updates contributes nothing.
    let mut quiet = Message::new("INBOX", 2, at(2000));
    quiet.to.push(EmailAddress::new("to@example.com"));
    storage
        .add_message("me@example.com", quiet, false)
        .await
        .unwrap();
    assert_eq!(
        1,
        storage
            .get_contact_unread_messages_count("to@example.com", &setup.cancel)
            .await
            .unwrap(),
    );
}

#[tokio::test]
async fn last_message_pointer() {
    let setup = set_up().await;
    let storage = &setup.storage;
    storage.add_account(sample_account("me@example.com")).await.unwrap();
    let stored = storage
        .add_message("me@example.com", message("INBOX", 7, 7000), true)
        .await
        .unwrap();

    let mut alice =
        Contact::new(EmailAddress::with_name("alice@example.com", "Alice"));
    alice.last_message = Some(LastMessageData {
        account_email: "me@example.com".to_owned(),
        message_id: stored.id,
        date: stored.date,
    });
    storage.add_contact(alice.clone()).await.unwrap();

    let found = storage
        .get_contacts_with_last_message_id("me@example.com", 7, &setup.cancel)
        .await
        .unwrap();
    assert_eq!(1, found.len());
    assert_eq!(alice.email, found[0].email);
    // Alice sent the unread message.
    assert_eq!(1, found[0].unread_count);

    assert_eq!(
        Some(stored),
        storage
            .get_contact_last_message(
                "me@example.com",
                "INBOX",
                "alice@example.com",
                &setup.cancel,
            )
            .await
            .unwrap(),
    );
}
