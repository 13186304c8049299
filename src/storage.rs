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

//! The asynchronous facade over the store.
//!
//! Every call opens its own connection to the vault and runs on tokio's
//! blocking thread pool, so callers never block the executor on file I/O or
//! key derivation. Message and contact queries take a `CancellationToken`;
//! mutations never do, since a mutation is always applied entirely or not at
//! all.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    model::*,
    store::{Connection, Vault},
    support::{error::Error, store_config::StoreConfig},
};

/// The mail data store of one vault file.
///
/// Cloning a `DataStorage` produces another reference to the same vault.
#[derive(Clone)]
pub struct DataStorage {
    vault: Arc<Vault>,
}

impl DataStorage {
    /// Creates a closed store for the vault at `path` with the default
    /// configuration.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_config(path, StoreConfig::default())
    }

    pub fn with_config(path: impl Into<PathBuf>, config: StoreConfig) -> Self {
        Self {
            vault: Arc::new(Vault::new(path.into(), config)),
        }
    }

    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    /// Returns whether the vault file exists.
    pub fn exists(&self) -> bool {
        self.vault.exists()
    }

    pub async fn create(&self, password: &str) -> Result<(), Error> {
        let vault = Arc::clone(&self.vault);
        let password = password.to_owned();
        blocking(move || vault.create(&password)).await
    }

    pub async fn open(&self, password: &str) -> Result<(), Error> {
        let vault = Arc::clone(&self.vault);
        let password = password.to_owned();
        blocking(move || vault.open(&password)).await
    }

    pub async fn change_password(
        &self,
        old: &str,
        new: &str,
    ) -> Result<(), Error> {
        let vault = Arc::clone(&self.vault);
        let (old, new) = (old.to_owned(), new.to_owned());
        blocking(move || vault.change_password(&old, &new)).await
    }

    /// Deletes the vault, waiting for all in-flight operations to finish
    /// first.
    pub async fn reset(&self) -> Result<(), Error> {
        let vault = Arc::clone(&self.vault);
        blocking(move || vault.reset()).await
    }

    // ==================== Key material ====================

    pub async fn initialize_master_key(
        &self,
        key: Vec<u8>,
    ) -> Result<(), Error> {
        self.run(move |cxn| cxn.initialize_master_key(&key)).await
    }

    pub async fn is_master_key_present(&self) -> Result<bool, Error> {
        self.run(|cxn| cxn.is_master_key_present()).await
    }

    pub async fn get_master_key(&self) -> Result<Vec<u8>, Error> {
        self.run(|cxn| cxn.get_master_key()).await
    }

    pub async fn save_pgp_public_keys(
        &self,
        data: Vec<u8>,
    ) -> Result<(), Error> {
        self.run(move |cxn| cxn.save_pgp_keys(PgpKeyKind::Public, &data))
            .await
    }

    pub async fn save_pgp_secret_keys(
        &self,
        data: Vec<u8>,
    ) -> Result<(), Error> {
        self.run(move |cxn| cxn.save_pgp_keys(PgpKeyKind::Secret, &data))
            .await
    }

    pub async fn get_pgp_public_keys(&self) -> Result<Option<Vec<u8>>, Error> {
        self.run(|cxn| cxn.get_pgp_keys(PgpKeyKind::Public)).await
    }

    pub async fn get_pgp_secret_keys(&self) -> Result<Option<Vec<u8>>, Error> {
        self.run(|cxn| cxn.get_pgp_keys(PgpKeyKind::Secret)).await
    }

    // ==================== Settings ====================

    pub async fn get_settings(&self) -> Result<Settings, Error> {
        self.run(|cxn| cxn.get_settings()).await
    }

    pub async fn set_settings(&self, settings: Settings) -> Result<(), Error> {
        self.run(move |cxn| cxn.set_settings(&settings)).await
    }

    // ==================== Accounts ====================

    pub async fn add_account(&self, account: Account) -> Result<(), Error> {
        self.run(move |cxn| cxn.add_account(&account)).await
    }

    pub async fn exists_account_with_email(
        &self,
        email: &str,
    ) -> Result<bool, Error> {
        let email = email.to_owned();
        self.run(move |cxn| cxn.exists_account_with_email(&email))
            .await
    }

    pub async fn get_account(&self, email: &str) -> Result<Account, Error> {
        let email = email.to_owned();
        self.run(move |cxn| cxn.get_account(&email)).await
    }

    pub async fn get_accounts(&self) -> Result<Vec<Account>, Error> {
        self.run(|cxn| cxn.get_accounts()).await
    }

    pub async fn get_folders(&self, email: &str) -> Result<Vec<Folder>, Error> {
        let email = email.to_owned();
        self.run(move |cxn| cxn.get_folders(&email)).await
    }

    pub async fn update_account(&self, account: Account) -> Result<(), Error> {
        self.run(move |cxn| cxn.update_account(&account)).await
    }

    pub async fn delete_account(&self, account: Account) -> Result<(), Error> {
        self.run(move |cxn| cxn.delete_account(&account)).await
    }

    pub async fn delete_account_by_email(
        &self,
        email: &str,
    ) -> Result<(), Error> {
        let email = email.to_owned();
        self.run(move |cxn| cxn.delete_account_by_email(&email))
            .await
    }

    // ==================== Messages ====================

    pub async fn add_message(
        &self,
        account_email: &str,
        message: Message,
        update_unread_and_total: bool,
    ) -> Result<Message, Error> {
        let account_email = account_email.to_owned();
        self.run(move |cxn| {
            cxn.add_message(&account_email, &message, update_unread_and_total)
        })
        .await
    }

    pub async fn add_message_list(
        &self,
        account_email: &str,
        messages: Vec<Message>,
        update_unread_and_total: bool,
    ) -> Result<Vec<Message>, Error> {
        let account_email = account_email.to_owned();
        self.run(move |cxn| {
            cxn.add_messages(&account_email, &messages, update_unread_and_total)
        })
        .await
    }

    pub async fn update_message(
        &self,
        account_email: &str,
        message: Message,
        update_unread_and_total: bool,
    ) -> Result<(), Error> {
        let account_email = account_email.to_owned();
        self.run(move |cxn| {
            cxn.update_message(
                &account_email,
                &message,
                update_unread_and_total,
            )
        })
        .await
    }

    pub async fn update_messages(
        &self,
        account_email: &str,
        messages: Vec<Message>,
        update_unread_and_total: bool,
    ) -> Result<(), Error> {
        let account_email = account_email.to_owned();
        self.run(move |cxn| {
            cxn.update_messages(
                &account_email,
                &messages,
                update_unread_and_total,
            )
        })
        .await
    }

    pub async fn update_messages_flags(
        &self,
        account_email: &str,
        messages: Vec<Message>,
        update_unread_and_total: bool,
    ) -> Result<(), Error> {
        let account_email = account_email.to_owned();
        self.run(move |cxn| {
            cxn.update_messages_flags(
                &account_email,
                &messages,
                update_unread_and_total,
            )
        })
        .await
    }

    pub async fn delete_message(
        &self,
        account_email: &str,
        folder: &str,
        id: u32,
        update_unread_and_total: bool,
    ) -> Result<(), Error> {
        self.delete_messages(
            account_email,
            folder,
            vec![id],
            update_unread_and_total,
        )
        .await
    }

    pub async fn delete_messages(
        &self,
        account_email: &str,
        folder: &str,
        ids: Vec<u32>,
        update_unread_and_total: bool,
    ) -> Result<(), Error> {
        let (account_email, folder) =
            (account_email.to_owned(), folder.to_owned());
        self.run(move |cxn| {
            cxn.delete_messages(
                &account_email,
                &folder,
                &ids,
                update_unread_and_total,
            )
        })
        .await
    }

    pub async fn get_message_list(
        &self,
        account_email: &str,
        folder: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, Error> {
        let (account_email, folder) =
            (account_email.to_owned(), folder.to_owned());
        self.query(cancel, move |cxn| {
            cxn.get_message_list(&account_email, &folder, count)
        })
        .await
    }

    pub async fn get_message_list_before(
        &self,
        account_email: &str,
        folder: &str,
        before_id: u32,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, Error> {
        let (account_email, folder) =
            (account_email.to_owned(), folder.to_owned());
        self.query(cancel, move |cxn| {
            cxn.get_message_list_before(
                &account_email,
                &folder,
                before_id,
                count,
            )
        })
        .await
    }

    pub async fn get_message_list_in_range(
        &self,
        account_email: &str,
        folder: &str,
        bounds: (u32, u32),
        fast: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, Error> {
        let (account_email, folder) =
            (account_email.to_owned(), folder.to_owned());
        self.query(cancel, move |cxn| {
            cxn.get_message_list_in_range(&account_email, &folder, bounds, fast)
        })
        .await
    }

    pub async fn get_message(
        &self,
        account_email: &str,
        folder: &str,
        id: u32,
        cancel: &CancellationToken,
    ) -> Result<Message, Error> {
        let (account_email, folder) =
            (account_email.to_owned(), folder.to_owned());
        self.query(cancel, move |cxn| {
            cxn.get_message(&account_email, &folder, id)
        })
        .await
    }

    pub async fn is_message_exist(
        &self,
        account_email: &str,
        folder: &str,
        id: u32,
        cancel: &CancellationToken,
    ) -> Result<bool, Error> {
        let (account_email, folder) =
            (account_email.to_owned(), folder.to_owned());
        self.query(cancel, move |cxn| {
            cxn.is_message_exist(&account_email, &folder, id)
        })
        .await
    }

    pub async fn get_latest_message(
        &self,
        account_email: &str,
        folder: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Message>, Error> {
        let (account_email, folder) =
            (account_email.to_owned(), folder.to_owned());
        self.query(cancel, move |cxn| {
            cxn.get_latest_message(&account_email, &folder)
        })
        .await
    }

    pub async fn get_earlier_messages(
        &self,
        folder: Option<FolderPath>,
        count: usize,
        anchor: Option<Message>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, Error> {
        self.query(cancel, move |cxn| {
            cxn.get_earlier_messages(folder.as_ref(), count, anchor.as_ref())
        })
        .await
    }

    pub async fn get_contact_last_message(
        &self,
        account_email: &str,
        folder: &str,
        contact_email: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Message>, Error> {
        let (account_email, folder, contact_email) = (
            account_email.to_owned(),
            folder.to_owned(),
            contact_email.to_owned(),
        );
        self.query(cancel, move |cxn| {
            cxn.get_contact_last_message(
                &account_email,
                &folder,
                &contact_email,
            )
        })
        .await
    }

    pub async fn get_earlier_contact_messages(
        &self,
        contact_email: &str,
        count: usize,
        anchor: Option<Message>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, Error> {
        let contact_email = contact_email.to_owned();
        self.query(cancel, move |cxn| {
            cxn.get_earlier_contact_messages(
                &contact_email,
                count,
                anchor.as_ref(),
            )
        })
        .await
    }

    pub async fn get_messages_count(
        &self,
        account_email: &str,
        folder: &str,
        cancel: &CancellationToken,
    ) -> Result<u32, Error> {
        let (account_email, folder) =
            (account_email.to_owned(), folder.to_owned());
        self.query(cancel, move |cxn| {
            cxn.get_messages_count(&account_email, &folder)
        })
        .await
    }

    pub async fn get_unread_messages_count(
        &self,
        account_email: &str,
        folder: &str,
        cancel: &CancellationToken,
    ) -> Result<u32, Error> {
        let (account_email, folder) =
            (account_email.to_owned(), folder.to_owned());
        self.query(cancel, move |cxn| {
            cxn.get_unread_messages_count(&account_email, &folder)
        })
        .await
    }

    // ==================== Contacts ====================

    pub async fn add_contact(&self, contact: Contact) -> Result<(), Error> {
        self.run(move |cxn| cxn.add_contact(&contact)).await
    }

    pub async fn try_add_contact(
        &self,
        contact: Contact,
    ) -> Result<bool, Error> {
        self.run(move |cxn| cxn.try_add_contact(&contact)).await
    }

    pub async fn exists_contact_with_email(
        &self,
        email: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, Error> {
        let email = email.to_owned();
        self.query(cancel, move |cxn| cxn.exists_contact_with_email(&email))
            .await
    }

    pub async fn get_contact(
        &self,
        email: &str,
        cancel: &CancellationToken,
    ) -> Result<Contact, Error> {
        let email = email.to_owned();
        self.query(cancel, move |cxn| cxn.get_contact(&email)).await
    }

    pub async fn get_contacts(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Contact>, Error> {
        self.query(cancel, |cxn| cxn.get_contacts()).await
    }

    pub async fn update_contact(&self, contact: Contact) -> Result<(), Error> {
        self.run(move |cxn| cxn.update_contact(&contact)).await
    }

    pub async fn set_contact_avatar(
        &self,
        email: &str,
        image: ImageInfo,
    ) -> Result<(), Error> {
        let email = email.to_owned();
        self.run(move |cxn| cxn.set_contact_avatar(&email, &image))
            .await
    }

    pub async fn remove_contact_avatar(
        &self,
        email: &str,
    ) -> Result<(), Error> {
        let email = email.to_owned();
        self.run(move |cxn| cxn.remove_contact_avatar(&email)).await
    }

    pub async fn remove_contact(&self, email: &str) -> Result<(), Error> {
        let email = email.to_owned();
        self.run(move |cxn| cxn.remove_contact(&email)).await
    }

    pub async fn get_contacts_with_last_message_id(
        &self,
        account_email: &str,
        message_id: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<Contact>, Error> {
        let account_email = account_email.to_owned();
        self.query(cancel, move |cxn| {
            cxn.get_contacts_with_last_message_id(&account_email, message_id)
        })
        .await
    }

    pub async fn get_contact_unread_messages_count(
        &self,
        email: &str,
        cancel: &CancellationToken,
    ) -> Result<u32, Error> {
        let email = email.to_owned();
        self.query(cancel, move |cxn| {
            cxn.get_contact_unread_messages_count(&email)
        })
        .await
    }

    pub async fn get_unread_messages_count_by_contact(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, u32>, Error> {
        self.query(cancel, |cxn| cxn.get_unread_messages_count_by_contact())
            .await
    }

    /// Runs `f` against a fresh connection on the blocking pool.
    async fn run<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<R, Error> + Send + 'static,
    ) -> Result<R, Error> {
        let vault = Arc::clone(&self.vault);
        blocking(move || {
            let mut handle = vault.connect()?;
            f(&mut handle)
        })
        .await
    }

    /// Like `run`, but with SQLite execution interruptible by `cancel`.
    async fn query<R: Send + 'static>(
        &self,
        cancel: &CancellationToken,
        f: impl FnOnce(&mut Connection) -> Result<R, Error> + Send + 'static,
    ) -> Result<R, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let vault = Arc::clone(&self.vault);
        let cancel = cancel.clone();
        blocking(move || {
            let mut handle = vault.connect()?;
            handle.cancellable(&cancel, f)
        })
        .await
    }
}

async fn blocking<R: Send + 'static>(
    f: impl FnOnce() -> Result<R, Error> + Send + 'static,
) -> Result<R, Error> {
    tokio::task::spawn_blocking(f).await?
}
