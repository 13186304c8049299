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

use std::path::PathBuf;

use chrono::prelude::*;
use tempfile::TempDir;

use crate::model::*;
use crate::{CancellationToken, DataStorage};

pub const PASSWORD: &str = "hunter2";

pub struct Setup {
    dir: TempDir,
    pub storage: DataStorage,
    pub cancel: CancellationToken,
}

/// Creates a new vault and leaves it open.
pub async fn set_up() -> Setup {
    crate::init_test_log();

    let dir = TempDir::new().unwrap();
    let storage = DataStorage::new(dir.path().join("mail.vault"));
    storage.create(PASSWORD).await.unwrap();

    Setup {
        dir,
        storage,
        cancel: CancellationToken::new(),
    }
}

impl Setup {
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("mail.vault")
    }

    /// Returns a new, closed, `DataStorage` on the same file, as a
    /// restarted process would see it.
    pub fn reopen(&self) -> DataStorage {
        DataStorage::new(self.path())
    }
}

pub fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

pub fn sample_account(email: &str) -> Account {
    let mut account = Account::new(EmailAddress::with_name(email, "Me"));
    account.auth = AuthData::OAuth2 {
        refresh_token: "refresh".to_owned(),
        auth_server: "https://auth.example.com".to_owned(),
    };
    account.folders = vec![
        Folder::with_attributes("INBOX", FolderAttributes::INBOX),
        Folder::with_attributes("Sent", FolderAttributes::SENT),
    ];
    account.default_inbox = Some("INBOX".to_owned());
    account
}

pub fn message(folder: &str, id: u32, millis: i64) -> Message {
    let mut message = Message::new(folder, id, at(millis));
    message.subject = format!("Message {id}");
    message.from.push(EmailAddress::with_name("alice@example.com", "Alice"));
    message.to.push(EmailAddress::new("me@example.com"));
    message
}
