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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Vault has not been created")]
    NotCreated,
    #[error("Vault has not been opened")]
    NotOpened,
    #[error("Vault already exists")]
    VaultAlreadyExists,
    #[error("Wrong password")]
    WrongPassword,
    #[error("Vault header is malformed")]
    BadVaultHeader,
    #[error("Account already exists")]
    AccountAlreadyExists,
    #[error("Message already exists")]
    MessageAlreadyExists,
    #[error("Master key already initialised")]
    MasterKeyAlreadyExists,
    #[error("No such account")]
    NxAccount,
    #[error("No such folder")]
    NxFolder,
    #[error("No such message")]
    NxMessage,
    #[error("No such contact")]
    NxContact,
    #[error("Master key not initialised")]
    NxMasterKey,
    #[error("Constraint violation: {0}")]
    ConstraintViolation(&'static str),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Background task failed: {0}")]
    TaskFailed(String),
    #[error("SQLite VFS error {0}")]
    Vfs(std::os::raw::c_int),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Ssl(#[from] openssl::error::ErrorStack),
    #[error(transparent)]
    Cbor(#[from] serde_cbor::error::Error),
    #[error(transparent)]
    KeyDerivation(#[from] argon2::Error),
    #[error(transparent)]
    Sqlite(rusqlite::Error),
}

impl Error {
    /// Whether this error reports an attempt to create something whose key is
    /// already taken.
    pub fn is_already_exists(&self) -> bool {
        matches!(
            *self,
            Error::VaultAlreadyExists
                | Error::AccountAlreadyExists
                | Error::MessageAlreadyExists
                | Error::MasterKeyAlreadyExists,
        )
    }

    /// Whether this error reports a lookup of something that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            *self,
            Error::NxAccount
                | Error::NxFolder
                | Error::NxMessage
                | Error::NxContact
                | Error::NxMasterKey,
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: rusqlite::ErrorCode::OperationInterrupted,
                    ..
                },
                _,
            ) => Error::Cancelled,
            e => Error::Sqlite(e),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::TaskFailed(e.to_string())
    }
}
