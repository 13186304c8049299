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

//! Bindings for our model types to `rusqlite`, plus model types specific to
//! the database itself.

use chrono::prelude::*;
use rusqlite::types::{
    FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef,
};

use crate::model::*;

macro_rules! transparent_to_sql {
    ($t:ident) => {
        impl ToSql for $t {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }
    };
}

macro_rules! transparent_from_sql {
    ($t:ident) => {
        impl FromSql for $t {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                FromSql::column_result(value).map(Self)
            }
        }
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId(pub i64);
transparent_to_sql!(AccountId);
transparent_from_sql!(AccountId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FolderId(pub i64);
transparent_to_sql!(FolderId);
transparent_from_sql!(FolderId);

transparent_to_sql!(MessagePk);
transparent_from_sql!(MessagePk);

/// A timestamp stored as integer milliseconds since the UNIX epoch.
///
/// Sub-millisecond precision is discarded on the way in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnixMillis(pub DateTime<Utc>);

impl UnixMillis {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    fn from_millis(millis: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp(
            millis.div_euclid(1000),
            (millis.rem_euclid(1000) * 1_000_000) as u32,
        )
        .map(Self)
    }

    /// Returns `date` as it reads back after a round trip through storage.
    pub fn truncate(date: DateTime<Utc>) -> DateTime<Utc> {
        Self::from_millis(date.timestamp_millis()).map_or(date, |d| d.0)
    }
}

impl ToSql for UnixMillis {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.timestamp_millis()))
    }
}

impl FromSql for UnixMillis {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let inner = i64::column_result(value)?;
        Self::from_millis(inner).ok_or(FromSqlError::OutOfRange(inner))
    }
}

impl ToSql for FolderAttributes {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.bits()))
    }
}

impl FromSql for FolderAttributes {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        // Unknown bits are kept so that a newer writer's attributes survive a
        // round trip through this version.
        u32::column_result(value).map(Self::from_bits_retain)
    }
}

impl ToSql for MessageProtectionType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Text(self.as_str().as_bytes())))
    }
}

impl FromSql for MessageProtectionType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Self::parse(s).ok_or(FromSqlError::InvalidType)
    }
}

impl ToSql for ParticipantRole {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Text(self.as_str().as_bytes())))
    }
}

impl FromSql for ParticipantRole {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Self::parse(s).ok_or(FromSqlError::InvalidType)
    }
}

impl ToSql for PgpKeyKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Text(self.as_str().as_bytes())))
    }
}

/// The stored form of an account, before its settings are decoded.
#[derive(Debug, Clone)]
pub struct RawAccount {
    pub id: AccountId,
    pub email: String,
    pub raw_email: String,
    pub email_name: String,
    pub settings: Vec<u8>,
    pub default_inbox: Option<String>,
}

impl FromRow for RawAccount {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            email: row.get("email")?,
            raw_email: row.get("raw_email")?,
            email_name: row.get("email_name")?,
            settings: row.get("settings")?,
            default_inbox: row.get("default_inbox")?,
        })
    }
}

impl FromRow for Folder {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            full_name: row.get("full_name")?,
            attributes: row.get("attributes")?,
            local_count: row.get("local_count")?,
            total_count: row.get("total_count")?,
            unread_count: row.get("unread_count")?,
        })
    }
}

/// The first-level data of a stored message, without its child records.
///
/// Queries producing this must also select the owning account's `email` as
/// `account_email` and the folder's `full_name` as `folder_name`.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub pk: MessagePk,
    pub folder_id: FolderId,
    pub account_email: String,
    pub folder_name: String,
    pub id: u32,
    pub date: UnixMillis,
    pub subject: String,
    pub preview: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub is_read: bool,
    pub is_flagged: bool,
}

impl FromRow for RawMessage {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            pk: row.get("pk")?,
            folder_id: row.get("folder_id")?,
            account_email: row.get("account_email")?,
            folder_name: row.get("folder_name")?,
            id: row.get("id")?,
            date: row.get("date")?,
            subject: row.get("subject")?,
            preview: row.get("preview")?,
            text_body: row.get("text_body")?,
            html_body: row.get("html_body")?,
            is_read: row.get("is_read")?,
            is_flagged: row.get("is_flagged")?,
        })
    }
}

impl RawMessage {
    /// Converts to a `Message` with all child collections empty.
    pub fn into_message(self) -> Message {
        Message {
            pk: self.pk,
            id: self.id,
            account: self.account_email,
            folder: self.folder_name,
            from: Vec::new(),
            reply_to: Vec::new(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: self.subject,
            preview_text: self.preview,
            text_body: self.text_body,
            html_body: self.html_body,
            date: self.date.0,
            is_marked_as_read: self.is_read,
            is_flagged: self.is_flagged,
            attachments: Vec::new(),
            protection: ProtectionInfo::default(),
        }
    }
}

/// The read and unread-accounting state of a stored message.
#[derive(Debug, Clone, Copy)]
pub struct MessageState {
    pub pk: MessagePk,
    pub folder_id: FolderId,
    pub is_read: bool,
    pub counted_unread: bool,
}

impl FromRow for MessageState {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            pk: row.get("pk")?,
            folder_id: row.get("folder_id")?,
            is_read: row.get("is_read")?,
            counted_unread: row.get("counted_unread")?,
        })
    }
}

/// Queries producing this must select the contact's unread count from
/// `address_unread` as `unread_count`.
impl FromRow for Contact {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let avatar = match (
            row.get::<_, Option<u32>>("avatar_width")?,
            row.get::<_, Option<u32>>("avatar_height")?,
            row.get::<_, Option<Vec<u8>>>("avatar")?,
        ) {
            (Some(width), Some(height), Some(bytes)) => Some(ImageInfo {
                width,
                height,
                bytes,
            }),
            _ => None,
        };

        let last_message = match (
            row.get::<_, Option<String>>("last_account")?,
            row.get::<_, Option<u32>>("last_message_id")?,
            row.get::<_, Option<UnixMillis>>("last_message_date")?,
        ) {
            (Some(account_email), Some(message_id), Some(date)) => {
                Some(LastMessageData {
                    account_email,
                    message_id,
                    date: date.0,
                })
            },
            _ => None,
        };

        Ok(Self {
            email: EmailAddress {
                address: row.get("raw_email")?,
                name: row.get("email_name")?,
            },
            full_name: row.get("full_name")?,
            avatar,
            last_message,
            unread_count: row
                .get::<_, Option<u32>>("unread_count")?
                .unwrap_or(0),
        })
    }
}

pub fn from_row<T: FromRow>(row: &rusqlite::Row<'_>) -> rusqlite::Result<T> {
    T::from_row(row)
}

pub fn from_single<T: FromSql>(row: &rusqlite::Row<'_>) -> rusqlite::Result<T> {
    row.get(0)
}

pub trait FromRow: Sized {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>;
}

macro_rules! from_row_tuple {
    ($($ix:tt: $t:ident),*) => {
        impl<$($t: FromSql,)*> FromRow
        for ($($t,)*) {
            fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
                Ok(($(row.get($ix)?,)*))
            }
        }
    }
}

from_row_tuple!(0: A);
from_row_tuple!(0: A, 1: B);
from_row_tuple!(0: A, 1: B, 2: C);
from_row_tuple!(0: A, 1: B, 2: C, 3: D);
from_row_tuple!(0: A, 1: B, 2: C, 3: D, 4: E);
from_row_tuple!(0: A, 1: B, 2: C, 3: D, 4: E, 5: F);
from_row_tuple!(0: A, 1: B, 2: C, 3: D, 4: E, 5: F, 6: G);
