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

//! The account and folder directory.

use std::collections::{HashMap, HashSet};

use log::info;
use rusqlite::OptionalExtension as _;

use super::{
    connection::{Connection, ConnectionExt as _},
    messages::uncount_unread_in,
    types::*,
};
use crate::{model::*, support::error::Error};

impl Connection {
    /// Adds a new account with its folder structure.
    ///
    /// Folder `local_count` values are ignored and start at 0.
    pub fn add_account(&mut self, account: &Account) -> Result<(), Error> {
        validate_account(account)?;
        let settings = serde_cbor::to_vec(&AccountSettings::of(account))?;

        let txn = self.cxn.write_tx()?;
        if find_account(&txn, &account.email.address)?.is_some() {
            return Err(Error::AccountAlreadyExists);
        }

        txn.execute(
            "INSERT INTO `account` \
             (`email`, `raw_email`, `email_name`, `settings`, `default_inbox`) \
             VALUES (?, ?, ?, ?, ?)",
            (
                account.email.key(),
                &account.email.address,
                &account.email.name,
                settings,
                &account.default_inbox,
            ),
        )?;
        let account_id = AccountId(txn.last_insert_rowid());

        for (position, folder) in account.folders.iter().enumerate() {
            insert_folder(&txn, account_id, position, folder)?;
        }

        txn.commit()?;
        info!(
            "{} Added account #{} with {} folders",
            self.log_prefix,
            account_id.0,
            account.folders.len(),
        );
        Ok(())
    }

    pub fn exists_account_with_email(
        &mut self,
        email: &str,
    ) -> Result<bool, Error> {
        self.cxn.enable_write(false)?;
        Ok(find_account(&self.cxn, email)?.is_some())
    }

    /// Returns the account with the given email, or `NxAccount`.
    pub fn get_account(&mut self, email: &str) -> Result<Account, Error> {
        let txn = self.cxn.read_tx()?;
        let raw = txn
            .prepare_cached(
                "SELECT * FROM `account` WHERE `email` = ?",
            )?
            .query_row((normalise_address(email),), from_row::<RawAccount>)
            .optional()?
            .ok_or(Error::NxAccount)?;

        load_account(&txn, raw)
    }

    /// Returns every account, in the order they were added.
    pub fn get_accounts(&mut self) -> Result<Vec<Account>, Error> {
        let txn = self.cxn.read_tx()?;
        let raws = txn
            .prepare("SELECT * FROM `account` ORDER BY `id`")?
            .query_map((), from_row::<RawAccount>)?
            .collect::<Result<Vec<_>, _>>()?;

        raws.into_iter()
            .map(|raw| load_account(&txn, raw))
            .collect()
    }

    /// Returns the current folder list of the given account, or `NxAccount`.
    pub fn get_folders(&mut self, email: &str) -> Result<Vec<Folder>, Error> {
        let txn = self.cxn.read_tx()?;
        let account_id = find_account(&txn, email)?.ok_or(Error::NxAccount)?;
        load_folders(&txn, account_id)
    }

    /// Rewrites the settings and folder structure of an existing account.
    ///
    /// Does nothing if there is no such account.
    ///
    /// Folders no longer in `account.folders` are deleted along with their
    /// messages. Surviving folders keep their `local_count`; all other
    /// folder fields are taken from `account`.
    pub fn update_account(&mut self, account: &Account) -> Result<(), Error> {
        validate_account(account)?;
        let settings = serde_cbor::to_vec(&AccountSettings::of(account))?;

        let txn = self.cxn.write_tx()?;
        let Some(account_id) = find_account(&txn, &account.email.address)?
        else {
            return Ok(());
        };

        txn.execute(
            "UPDATE `account` SET \
             `raw_email` = ?, `email_name` = ?, `settings` = ?, \
             `default_inbox` = ? \
             WHERE `id` = ?",
            (
                &account.email.address,
                &account.email.name,
                settings,
                &account.default_inbox,
                account_id,
            ),
        )?;

        let existing = txn
            .prepare_cached(
                "SELECT `full_name`, `id` FROM `folder` WHERE `account_id` = ?",
            )?
            .query_map((account_id,), from_row::<(String, FolderId)>)?
            .collect::<Result<HashMap<_, _>, _>>()?;

        let retained = account
            .folders
            .iter()
            .map(|f| f.full_name.as_str())
            .collect::<HashSet<_>>();
        for (full_name, &folder_id) in &existing {
            if !retained.contains(full_name.as_str()) {
                uncount_unread_in(&txn, FolderScope::Folder(folder_id))?;
                txn.execute("DELETE FROM `folder` WHERE `id` = ?", (folder_id,))?;
                info!(
                    "{} Removed folder #{} from account #{}",
                    self.log_prefix, folder_id.0, account_id.0,
                );
            }
        }

        for (position, folder) in account.folders.iter().enumerate() {
            if let Some(&folder_id) = existing.get(&folder.full_name) {
                txn.execute(
                    "UPDATE `folder` SET \
                     `attributes` = ?, `position` = ?, \
                     `total_count` = ?, `unread_count` = ? \
                     WHERE `id` = ?",
                    (
                        folder.attributes,
                        position,
                        folder.total_count,
                        folder.unread_count,
                        folder_id,
                    ),
                )?;
            } else {
                insert_folder(&txn, account_id, position, folder)?;
            }
        }

        txn.commit()?;
        Ok(())
    }

    /// Deletes the account with the given email, along with all its folders
    /// and messages.
    ///
    /// Does nothing if there is no such account.
    pub fn delete_account_by_email(&mut self, email: &str) -> Result<(), Error> {
        let txn = self.cxn.write_tx()?;
        let Some(account_id) = find_account(&txn, email)? else {
            return Ok(());
        };

        uncount_unread_in(&txn, FolderScope::Account(account_id))?;
        txn.execute("DELETE FROM `account` WHERE `id` = ?", (account_id,))?;
        txn.commit()?;
        info!("{} Deleted account #{}", self.log_prefix, account_id.0);
        Ok(())
    }

    pub fn delete_account(&mut self, account: &Account) -> Result<(), Error> {
        self.delete_account_by_email(&account.email.address)
    }
}

/// A set of folders whose messages are to be operated on in bulk.
#[derive(Clone, Copy, Debug)]
pub(super) enum FolderScope {
    Folder(FolderId),
    Account(AccountId),
}

fn validate_account(account: &Account) -> Result<(), Error> {
    if account.email.is_empty() {
        return Err(Error::ConstraintViolation("account email is required"));
    }

    let mut names = HashSet::new();
    if !account
        .folders
        .iter()
        .all(|f| names.insert(f.full_name.as_str()))
    {
        return Err(Error::ConstraintViolation("duplicate folder name"));
    }

    if let Some(ref inbox) = account.default_inbox {
        if !names.contains(inbox.as_str()) {
            return Err(Error::ConstraintViolation(
                "default inbox is not a folder of the account",
            ));
        }
    }

    Ok(())
}

pub(super) fn find_account(
    cxn: &rusqlite::Connection,
    email: &str,
) -> Result<Option<AccountId>, Error> {
    let id = cxn
        .prepare_cached("SELECT `id` FROM `account` WHERE `email` = ?")?
        .query_row((normalise_address(email),), from_single::<AccountId>)
        .optional()?;
    Ok(id)
}

/// Finds the folder `full_name` of the account `email`.
///
/// Fails with `NxAccount` or `NxFolder` if either does not exist.
pub(super) fn find_folder(
    cxn: &rusqlite::Connection,
    email: &str,
    full_name: &str,
) -> Result<FolderId, Error> {
    let account_id = find_account(cxn, email)?.ok_or(Error::NxAccount)?;
    cxn.prepare_cached(
        "SELECT `id` FROM `folder` WHERE `account_id` = ? AND `full_name` = ?",
    )?
    .query_row((account_id, full_name), from_single::<FolderId>)
    .optional()?
    .ok_or(Error::NxFolder)
}

fn insert_folder(
    cxn: &rusqlite::Connection,
    account_id: AccountId,
    position: usize,
    folder: &Folder,
) -> Result<(), Error> {
    cxn.prepare_cached(
        "INSERT INTO `folder` (\
         `account_id`, `full_name`, `attributes`, `position`, \
         `local_count`, `total_count`, `unread_count`\
         ) VALUES (?, ?, ?, ?, 0, ?, ?)",
    )?
    .execute((
        account_id,
        &folder.full_name,
        folder.attributes,
        position,
        folder.total_count,
        folder.unread_count,
    ))?;
    Ok(())
}

fn load_folders(
    cxn: &rusqlite::Connection,
    account_id: AccountId,
) -> Result<Vec<Folder>, Error> {
    let folders = cxn
        .prepare_cached(
            "SELECT * FROM `folder` WHERE `account_id` = ? \
             ORDER BY `position`, `id`",
        )?
        .query_map((account_id,), from_row::<Folder>)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(folders)
}

fn load_account(
    cxn: &rusqlite::Connection,
    raw: RawAccount,
) -> Result<Account, Error> {
    let settings: AccountSettings = serde_cbor::from_slice(&raw.settings)?;
    Ok(Account {
        email: EmailAddress {
            address: raw.raw_email,
            name: raw.email_name,
        },
        auth: settings.auth,
        incoming: settings.incoming,
        outgoing: settings.outgoing,
        synchronization_interval: settings.synchronization_interval,
        decentralized_index: settings.decentralized_index,
        folders: load_folders(cxn, raw.id)?,
        default_inbox: raw.default_inbox,
    })
}
