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
async fn lifecycle_with_password_change() {
    let setup = set_up().await;
    assert!(setup.storage.exists());
    assert_matches!(
        Err(Error::VaultAlreadyExists),
        setup.storage.create(PASSWORD).await,
    );

    let reopened = setup.reopen();
    assert_matches!(Err(Error::NotOpened), reopened.get_accounts().await);
    assert_matches!(Err(Error::WrongPassword), reopened.open("nope").await);
    reopened.open(PASSWORD).await.unwrap();
    assert!(reopened.get_accounts().await.unwrap().is_empty());

    assert_matches!(
        Err(Error::WrongPassword),
        reopened.change_password("nope", "swordfish").await,
    );
    reopened.change_password(PASSWORD, "swordfish").await.unwrap();

    // Already-open stores are unaffected by the change.
    setup.storage.add_account(sample_account("me@example.com")).await.unwrap();
    assert_eq!(1, reopened.get_accounts().await.unwrap().len());

    let after_change = setup.reopen();
    assert_matches!(Err(Error::WrongPassword), after_change.open(PASSWORD).await);
    after_change.open("swordfish").await.unwrap();
    assert_eq!(1, after_change.get_accounts().await.unwrap().len());

    after_change.reset().await.unwrap();
    assert!(!setup.storage.exists());
    assert_matches!(Err(Error::NotCreated), setup.storage.get_accounts().await);
    assert_matches!(Err(Error::NotCreated), after_change.open("swordfish").await);
    assert_matches!(
        Err(Error::NotCreated),
        after_change.change_password("swordfish", PASSWORD).await,
    );

    after_change.create("fresh").await.unwrap();
    assert!(after_change.get_accounts().await.unwrap().is_empty());
}

#[tokio::test]
async fn state_survives_reopen() {
    let setup = set_up().await;
    let storage = &setup.storage;

    storage.add_account(sample_account("me@example.com")).await.unwrap();
    storage
        .add_message_list(
            "me@example.com",
            (1..=5).map(|id| message("INBOX", id, i64::from(id) * 1000)).collect(),
            true,
        )
        .await
        .unwrap();
    storage
        .add_contact(Contact::new(EmailAddress::new("alice@example.com")))
        .await
        .unwrap();
    storage.initialize_master_key(b"master".to_vec()).await.unwrap();
    storage.save_pgp_secret_keys(vec![1, 2, 3]).await.unwrap();
    storage
        .set_settings(Settings {
            decentralized_account_counter: 3,
        })
        .await
        .unwrap();

    let before = storage
        .get_earlier_messages(None, 100, None, &setup.cancel)
        .await
        .unwrap();
    let accounts_before = storage.get_accounts().await.unwrap();
    let contacts_before = storage.get_contacts(&setup.cancel).await.unwrap();

    let reopened = setup.reopen();
    reopened.open(PASSWORD).await.unwrap();

    assert_eq!(
        before,
        reopened
            .get_earlier_messages(None, 100, None, &setup.cancel)
            .await
            .unwrap(),
    );
    assert_eq!(accounts_before, reopened.get_accounts().await.unwrap());
    assert_eq!(
        contacts_before,
        reopened.get_contacts(&setup.cancel).await.unwrap(),
    );
    assert_eq!(b"master".to_vec(), reopened.get_master_key().await.unwrap());
    assert_eq!(
        Some(vec![1, 2, 3]),
        reopened.get_pgp_secret_keys().await.unwrap(),
    );
    assert_eq!(None, reopened.get_pgp_public_keys().await.unwrap());
    assert_eq!(
        3,
        reopened.get_settings().await.unwrap().decentralized_account_counter,
    );
}

#[tokio::test]
async fn key_material() {
    let setup = set_up().await;
    let storage = &setup.storage;

    assert!(!storage.is_master_key_present().await.unwrap());
    assert_matches!(Err(Error::NxMasterKey), storage.get_master_key().await);
    storage.initialize_master_key(b"first".to_vec()).await.unwrap();
    assert_matches!(
        Err(Error::MasterKeyAlreadyExists),
        storage.initialize_master_key(b"second".to_vec()).await,
    );
    assert!(storage.is_master_key_present().await.unwrap());
    assert_eq!(b"first".to_vec(), storage.get_master_key().await.unwrap());

    storage.save_pgp_public_keys(b"pub1".to_vec()).await.unwrap();
    storage.save_pgp_public_keys(b"pub2".to_vec()).await.unwrap();
    assert_eq!(
        Some(b"pub2".to_vec()),
        storage.get_pgp_public_keys().await.unwrap(),
    );
    assert_eq!(None, storage.get_pgp_secret_keys().await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reset_orders_against_concurrent_operations() {
    let setup = set_up().await;
    setup
        .storage
        .add_account(sample_account("me@example.com"))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..40 {
        let storage = setup.storage.clone();
        tasks.push(tokio::spawn(async move {
            if 20 == i {
                storage.reset().await.map(|()| 0)
            } else {
                storage.get_accounts().await.map(|a| a.len())
            }
        }));
    }

    for task in tasks {
        match task.await.unwrap() {
            Ok(_) | Err(Error::NotCreated) => (),
            Err(e) => panic!("Unexpected error: {e}"),
        }
    }

    assert!(!setup.storage.exists());
    assert_eq!(0, setup.storage.vault().outstanding());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reset_waits_for_other_storage_on_same_file() {
    let setup = set_up().await;
    let other = setup.reopen();
    other.open(PASSWORD).await.unwrap();

    let handle = other.vault().connect().unwrap();
    let reset = {
        let storage = setup.storage.clone();
        tokio::spawn(async move { storage.reset().await })
    };

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!reset.is_finished());
    assert!(other.exists());
    drop(handle);

    reset.await.unwrap().unwrap();
    assert!(!other.exists());
    assert_matches!(Err(Error::NotCreated), other.get_accounts().await);
}
