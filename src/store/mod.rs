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

//! The persistent store.
//!
//! `Vault` owns the encrypted file and its lifecycle. A successfully opened
//! vault hands out `Handle`s, each wrapping a `Connection` through which all
//! data operations are performed. Those operations are grouped by concern
//! into the `accounts`, `contacts`, `keys`, `messages` and `settings`
//! modules.
//!
//! On disk, the vault is a SQLite database behind a VFS which encrypts every
//! page with XEX, preceded by a cleartext header holding the password-wrapped
//! vault key (see `header`).

mod accounts;
mod connection;
mod contacts;
mod header;
mod keys;
mod messages;
mod migrations;
mod settings;
mod types;
mod vault;
mod vfs;

pub use connection::Connection;
pub use vault::{Handle, Vault};
