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

//! The public data model of the mail store.

use std::fmt;

use bitflags::bitflags;
use chrono::prelude::*;
use serde::{Deserialize, Serialize};

/// An email address with an optional display name.
///
/// Equality is by value of both fields; the store itself keys addresses by
/// `key()`, so two addresses which differ only in case or display name refer
/// to the same account or contact.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub address: String,
    pub name: String,
}

impl EmailAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: String::new(),
        }
    }

    pub fn with_name(
        address: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }

    /// The canonical form under which this address is stored and looked up.
    pub fn key(&self) -> String {
        normalise_address(&self.address)
    }

    pub fn is_empty(&self) -> bool {
        self.address.trim().is_empty()
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "<{}>", self.address)
        } else {
            write!(f, "{} <{}>", self.name, self.address)
        }
    }
}

pub fn normalise_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MailProtocol {
    Imap,
    Pop3,
    Smtp,
}

/// Where to reach one of the account's mail servers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub protocol: MailProtocol,
    pub host: String,
    pub port: u16,
}

/// How the account authenticates against its servers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthData {
    #[default]
    None,
    Basic {
        password: String,
    },
    OAuth2 {
        refresh_token: String,
        auth_server: String,
    },
}

bitflags! {
    /// Special-use attributes of a folder.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct FolderAttributes: u32 {
        const INBOX = 1 << 0;
        const SENT = 1 << 1;
        const DRAFTS = 1 << 2;
        const TRASH = 1 << 3;
        const JUNK = 1 << 4;
        const IMPORTANT = 1 << 5;
        const FLAGGED = 1 << 6;
        const ALL = 1 << 7;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Folder {
    pub full_name: String,
    pub attributes: FolderAttributes,
    /// The number of messages physically present in the store.
    ///
    /// This is always computed by the store; values passed in are ignored.
    pub local_count: u32,
    /// The total number of messages as reported by the server.
    pub total_count: u32,
    pub unread_count: u32,
}

impl Folder {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            ..Self::default()
        }
    }

    pub fn with_attributes(
        full_name: impl Into<String>,
        attributes: FolderAttributes,
    ) -> Self {
        Self {
            full_name: full_name.into(),
            attributes,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub email: EmailAddress,
    pub auth: AuthData,
    pub incoming: Option<ServerEndpoint>,
    pub outgoing: Option<ServerEndpoint>,
    /// Minutes between background synchronisations.
    pub synchronization_interval: u32,
    /// Index of this account in the decentralized account sequence, if it is
    /// one.
    pub decentralized_index: Option<u32>,
    /// The folder structure, in display order.
    pub folders: Vec<Folder>,
    /// The full name of the folder treated as this account's inbox.
    pub default_inbox: Option<String>,
}

impl Account {
    pub fn new(email: EmailAddress) -> Self {
        Self {
            email,
            auth: AuthData::None,
            incoming: None,
            outgoing: None,
            synchronization_interval: 10,
            decentralized_index: None,
            folders: Vec::new(),
            default_inbox: None,
        }
    }

    pub fn folder(&self, full_name: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.full_name == full_name)
    }
}

/// The account settings persisted as a single opaque record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct AccountSettings {
    pub auth: AuthData,
    pub incoming: Option<ServerEndpoint>,
    pub outgoing: Option<ServerEndpoint>,
    pub synchronization_interval: u32,
    #[serde(default)]
    pub decentralized_index: Option<u32>,
}

impl AccountSettings {
    pub fn of(account: &Account) -> Self {
        Self {
            auth: account.auth.clone(),
            incoming: account.incoming.clone(),
            outgoing: account.outgoing.clone(),
            synchronization_interval: account.synchronization_interval,
            decentralized_index: account.decentralized_index,
        }
    }
}

/// The stable surrogate key of a stored message.
///
/// `MessagePk::UNSAVED` marks a message which has not been stored.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct MessagePk(pub i64);

impl MessagePk {
    pub const UNSAVED: Self = Self(0);

    pub fn is_saved(self) -> bool {
        self.0 > 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MessageProtectionType {
    #[default]
    None,
    Signature,
    Encryption,
    SignatureAndEncryption,
}

impl MessageProtectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Signature => "signature",
            Self::Encryption => "encryption",
            Self::SignatureAndEncryption => "signature+encryption",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "signature" => Some(Self::Signature),
            "encryption" => Some(Self::Encryption),
            "signature+encryption" => Some(Self::SignatureAndEncryption),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureInfo {
    pub created: DateTime<Utc>,
    pub hash_algorithm: String,
    pub signer_fingerprint: String,
    pub signer_email: String,
    pub is_verified: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProtectionInfo {
    pub kind: MessageProtectionType,
    pub signatures: Vec<SignatureInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub pk: MessagePk,
    pub id: u32,
    /// The owning account. Filled in by the store on load; ignored on input,
    /// where the account is always passed separately.
    pub account: String,
    pub folder: String,
    pub from: Vec<EmailAddress>,
    pub reply_to: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub subject: String,
    pub preview_text: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub date: DateTime<Utc>,
    pub is_marked_as_read: bool,
    pub is_flagged: bool,
    pub attachments: Vec<Attachment>,
    pub protection: ProtectionInfo,
}

impl Message {
    pub fn new(folder: impl Into<String>, id: u32, date: DateTime<Utc>) -> Self {
        Self {
            pk: MessagePk::UNSAVED,
            id,
            account: String::new(),
            folder: folder.into(),
            from: Vec::new(),
            reply_to: Vec::new(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            preview_text: String::new(),
            text_body: None,
            html_body: None,
            date,
            is_marked_as_read: false,
            is_flagged: false,
            attachments: Vec::new(),
            protection: ProtectionInfo::default(),
        }
    }

    pub fn is_unread(&self) -> bool {
        !self.is_marked_as_read
    }

    /// Iterates all participants paired with their role.
    pub(crate) fn participants(
        &self,
    ) -> impl Iterator<Item = (ParticipantRole, usize, &EmailAddress)> {
        [
            (ParticipantRole::From, &self.from),
            (ParticipantRole::ReplyTo, &self.reply_to),
            (ParticipantRole::To, &self.to),
            (ParticipantRole::Cc, &self.cc),
            (ParticipantRole::Bcc, &self.bcc),
        ]
        .into_iter()
        .flat_map(|(role, addrs)| {
            addrs
                .iter()
                .enumerate()
                .map(move |(ix, addr)| (role, ix, addr))
        })
    }

    pub(crate) fn participants_mut(
        &mut self,
        role: ParticipantRole,
    ) -> &mut Vec<EmailAddress> {
        match role {
            ParticipantRole::From => &mut self.from,
            ParticipantRole::ReplyTo => &mut self.reply_to,
            ParticipantRole::To => &mut self.to,
            ParticipantRole::Cc => &mut self.cc,
            ParticipantRole::Bcc => &mut self.bcc,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum ParticipantRole {
    From,
    ReplyTo,
    To,
    Cc,
    Bcc,
}

impl ParticipantRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::From => "from",
            Self::ReplyTo => "reply-to",
            Self::To => "to",
            Self::Cc => "cc",
            Self::Bcc => "bcc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "from" => Some(Self::From),
            "reply-to" => Some(Self::ReplyTo),
            "to" => Some(Self::To),
            "cc" => Some(Self::Cc),
            "bcc" => Some(Self::Bcc),
            _ => None,
        }
    }
}

/// Identifies a folder for cross-folder queries.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FolderPath {
    pub account_email: String,
    pub full_name: String,
}

impl FolderPath {
    pub fn new(
        account_email: impl Into<String>,
        full_name: impl Into<String>,
    ) -> Self {
        Self {
            account_email: account_email.into(),
            full_name: full_name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// A contact's pointer to the most recent message it took part in.
///
/// This is not a foreign key: the message may since have been deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastMessageData {
    pub account_email: String,
    pub message_id: u32,
    pub date: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    pub email: EmailAddress,
    pub full_name: String,
    pub avatar: Option<ImageInfo>,
    pub last_message: Option<LastMessageData>,
    /// Maintained by the store; ignored on input.
    pub unread_count: u32,
}

impl Contact {
    pub fn new(email: EmailAddress) -> Self {
        Self {
            email,
            full_name: String::new(),
            avatar: None,
            last_message: None,
            unread_count: 0,
        }
    }
}

/// Which of the two stored PGP key bundles to address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PgpKeyKind {
    Public,
    Secret,
}

impl PgpKeyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Secret => "secret",
        }
    }
}

/// The singleton settings record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    pub decentralized_account_counter: u32,
}
