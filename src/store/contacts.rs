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

//! The contact store.
//!
//! Contacts are keyed by normalised address. Their unread counts are not
//! stored on the contact itself but read from `address_unread`, which the
//! message store maintains for every participant address whether or not a
//! contact exists for it.

use std::collections::BTreeMap;

use rusqlite::OptionalExtension as _;

use super::{
    connection::{Connection, ConnectionExt as _},
    types::*,
};
use crate::{model::*, support::error::Error};

const CONTACT_SELECT: &str = "\
    SELECT `c`.*, `u`.`unread_count` \
    FROM `contact` `c` \
    LEFT JOIN `address_unread` `u` ON `u`.`address` = `c`.`email`";

impl Connection {
    /// Adds a new contact.
    ///
    /// Fails with `ConstraintViolation` if the contact has no email address
    /// or one is already present with the same address.
    pub fn add_contact(&mut self, contact: &Contact) -> Result<(), Error> {
        if self.try_add_contact(contact)? {
            Ok(())
        } else {
            Err(Error::ConstraintViolation("duplicate contact email"))
        }
    }

    /// Like `add_contact`, but returns `false` instead of failing if the
    /// contact already exists.
    pub fn try_add_contact(&mut self, contact: &Contact) -> Result<bool, Error> {
        if contact.email.is_empty() {
            return Err(Error::ConstraintViolation("contact email is empty"));
        }

        let txn = self.cxn.write_tx()?;
        let (avatar_width, avatar_height, avatar) = avatar_columns(contact);
        let (last_account, last_message_id, last_message_date) =
            last_message_columns(contact);
        let inserted = txn.execute(
            "INSERT INTO `contact` (\
             `email`, `raw_email`, `email_name`, `full_name`, \
             `avatar_width`, `avatar_height`, `avatar`, \
             `last_account`, `last_message_id`, `last_message_date`\
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT DO NOTHING",
            (
                contact.email.key(),
                &contact.email.address,
                &contact.email.name,
                &contact.full_name,
                avatar_width,
                avatar_height,
                avatar,
                last_account,
                last_message_id,
                last_message_date,
            ),
        )?;
        txn.commit()?;

        Ok(inserted > 0)
    }

    pub fn exists_contact_with_email(
        &mut self,
        email: &str,
    ) -> Result<bool, Error> {
        self.cxn.enable_write(false)?;
        let exists = self
            .cxn
            .prepare_cached("SELECT 1 FROM `contact` WHERE `email` = ?")?
            .exists((normalise_address(email),))?;
        Ok(exists)
    }

    /// Returns the contact with the given address, or `NxContact`.
    pub fn get_contact(&mut self, email: &str) -> Result<Contact, Error> {
        self.cxn.enable_write(false)?;
        self.cxn
            .prepare_cached(&format!(
                "{CONTACT_SELECT} WHERE `c`.`email` = ?"
            ))?
            .query_row((normalise_address(email),), from_row::<Contact>)
            .optional()?
            .ok_or(Error::NxContact)
    }

    /// Returns every contact, in the order they were added.
    pub fn get_contacts(&mut self) -> Result<Vec<Contact>, Error> {
        self.cxn.enable_write(false)?;
        let contacts = self
            .cxn
            .prepare_cached(&format!(
                "{CONTACT_SELECT} ORDER BY `c`.`rowid`"
            ))?
            .query_map((), from_row::<Contact>)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(contacts)
    }

    /// Rewrites everything about an existing contact except its unread count.
    ///
    /// Fails with `NxContact` if there is no contact with its address.
    pub fn update_contact(&mut self, contact: &Contact) -> Result<(), Error> {
        let txn = self.cxn.write_tx()?;
        let (avatar_width, avatar_height, avatar) = avatar_columns(contact);
        let (last_account, last_message_id, last_message_date) =
            last_message_columns(contact);
        let updated = txn.execute(
            "UPDATE `contact` SET \
             `raw_email` = ?, `email_name` = ?, `full_name` = ?, \
             `avatar_width` = ?, `avatar_height` = ?, `avatar` = ?, \
             `last_account` = ?, `last_message_id` = ?, \
             `last_message_date` = ? \
             WHERE `email` = ?",
            (
                &contact.email.address,
                &contact.email.name,
                &contact.full_name,
                avatar_width,
                avatar_height,
                avatar,
                last_account,
                last_message_id,
                last_message_date,
                contact.email.key(),
            ),
        )?;
        if 0 == updated {
            return Err(Error::NxContact);
        }

        txn.commit()?;
        Ok(())
    }

    pub fn set_contact_avatar(
        &mut self,
        email: &str,
        image: &ImageInfo,
    ) -> Result<(), Error> {
        self.write_avatar(
            email,
            Some(image.width),
            Some(image.height),
            Some(image.bytes.as_slice()),
        )
    }

    pub fn remove_contact_avatar(&mut self, email: &str) -> Result<(), Error> {
        self.write_avatar(email, None, None, None)
    }

    fn write_avatar(
        &mut self,
        email: &str,
        width: Option<u32>,
        height: Option<u32>,
        bytes: Option<&[u8]>,
    ) -> Result<(), Error> {
        let txn = self.cxn.write_tx()?;
        let updated = txn.execute(
            "UPDATE `contact` SET \
             `avatar_width` = ?, `avatar_height` = ?, `avatar` = ? \
             WHERE `email` = ?",
            (width, height, bytes, normalise_address(email)),
        )?;
        if 0 == updated {
            return Err(Error::NxContact);
        }

        txn.commit()?;
        Ok(())
    }

    /// Deletes the contact with the given address, if there is one.
    pub fn remove_contact(&mut self, email: &str) -> Result<(), Error> {
        let txn = self.cxn.write_tx()?;
        txn.execute(
            "DELETE FROM `contact` WHERE `email` = ?",
            (normalise_address(email),),
        )?;
        txn.commit()?;
        Ok(())
    }

    /// Returns the contacts whose last message is `message_id` in the account
    /// `account_email`.
    pub fn get_contacts_with_last_message_id(
        &mut self,
        account_email: &str,
        message_id: u32,
    ) -> Result<Vec<Contact>, Error> {
        self.cxn.enable_write(false)?;
        let contacts = self
            .cxn
            .prepare_cached(&format!(
                "{CONTACT_SELECT} \
                 WHERE `c`.`last_account` = ? AND `c`.`last_message_id` = ? \
                 ORDER BY `c`.`rowid`"
            ))?
            .query_map(
                (normalise_address(account_email), message_id),
                from_row::<Contact>,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(contacts)
    }

    /// Returns the number of counted unread messages in which `email`
    /// participates in any role.
    pub fn get_contact_unread_messages_count(
        &mut self,
        email: &str,
    ) -> Result<u32, Error> {
        self.cxn.enable_write(false)?;
        let count = self
            .cxn
            .prepare_cached(
                "SELECT `unread_count` FROM `address_unread` \
                 WHERE `address` = ?",
            )?
            .query_row((normalise_address(email),), from_single::<u32>)
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    /// Returns the unread count of every participant address ever counted,
    /// including those which have since dropped to zero.
    pub fn get_unread_messages_count_by_contact(
        &mut self,
    ) -> Result<BTreeMap<String, u32>, Error> {
        self.cxn.enable_write(false)?;
        let counts = self
            .cxn
            .prepare_cached(
                "SELECT `address`, `unread_count` FROM `address_unread`",
            )?
            .query_map((), from_row::<(String, u32)>)?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(counts)
    }
}

fn avatar_columns(
    contact: &Contact,
) -> (Option<u32>, Option<u32>, Option<&[u8]>) {
    match contact.avatar {
        Some(ref image) => (
            Some(image.width),
            Some(image.height),
            Some(image.bytes.as_slice()),
        ),
        None => (None, None, None),
    }
}

/// The account address is stored normalised, so it reads back lowercased.
fn last_message_columns(
    contact: &Contact,
) -> (Option<String>, Option<u32>, Option<UnixMillis>) {
    match contact.last_message {
        Some(ref last) => (
            Some(normalise_address(&last.account_email)),
            Some(last.message_id),
            Some(UnixMillis(last.date)),
        ),
        None => (None, None, None),
    }
}
