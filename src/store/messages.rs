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

//! The message store.
//!
//! Messages are identified in two ways: `pk` is the stable surrogate key
//! which all child rows (participants, attachments, protection data) hang
//! off, while `id` is the mutable protocol-visible identifier, unique within a
//! folder only at the time a message is added.
//!
//! Every mutation adjusts the counters it affects in the same transaction:
//!
//! - `folder.local_count` always tracks the rows physically present.
//! - `folder.total_count` and `folder.unread_count` move only when the caller
//!   passes `update_unread_and_total`.
//! - `address_unread` counts, per participant address, the messages with
//!   `counted_unread` set. A message is counted when it is added unread with
//!   `update_unread_and_total`, and thereafter follows its read state on
//!   updates made with `update_unread_and_total`. Deleting a counted message
//!   always uncounts it.

use std::collections::HashMap;

use log::debug;
use rusqlite::OptionalExtension as _;

use super::{
    accounts::{find_folder, FolderScope},
    connection::{Connection, ConnectionExt as _},
    types::*,
};
use crate::{model::*, support::error::Error};

const MESSAGE_SELECT: &str = "\
    SELECT `m`.`pk`, `m`.`folder_id`, \
           `a`.`email` AS `account_email`, `f`.`full_name` AS `folder_name`, \
           `m`.`id`, `m`.`date`, `m`.`subject`, `m`.`preview`, \
           `m`.`text_body`, `m`.`html_body`, `m`.`is_read`, `m`.`is_flagged` \
    FROM `message` `m` \
    CROSS JOIN `folder` `f` ON `f`.`id` = `m`.`folder_id` \
    CROSS JOIN `account` `a` ON `a`.`id` = `f`.`account_id`";

const CHRONO_DESC: &str =
    "ORDER BY `m`.`date` DESC, `m`.`id` DESC, `m`.`pk` DESC";

/// The greatest number of messages whose children are loaded per query.
const CHILD_BATCH: usize = 256;

impl Connection {
    /// Adds a single message to the folder `message.folder` of the account
    /// `account_email`.
    ///
    /// Returns the message as stored, with its `pk` assigned.
    pub fn add_message(
        &mut self,
        account_email: &str,
        message: &Message,
        update_unread_and_total: bool,
    ) -> Result<Message, Error> {
        let mut added = self.add_messages(
            account_email,
            std::slice::from_ref(message),
            update_unread_and_total,
        )?;
        added.pop().ok_or(Error::NxMessage)
    }

    /// Adds all of `messages` atomically.
    ///
    /// Fails with `MessageAlreadyExists` if any message has the same `id` as
    /// another in its folder, including earlier ones in `messages`.
    pub fn add_messages(
        &mut self,
        account_email: &str,
        messages: &[Message],
        update_unread_and_total: bool,
    ) -> Result<Vec<Message>, Error> {
        let txn = self.cxn.write_tx()?;
        let mut folders = FolderCache::default();
        let mut added = Vec::with_capacity(messages.len());

        for message in messages {
            let folder_id =
                folders.get(&txn, account_email, &message.folder)?;

            let collides = txn
                .prepare_cached(
                    "SELECT 1 FROM `message` \
                     WHERE `folder_id` = ? AND `id` = ? LIMIT 1",
                )?
                .exists((folder_id, message.id))?;
            if collides {
                return Err(Error::MessageAlreadyExists);
            }

            let counted = update_unread_and_total && message.is_unread();
            txn.prepare_cached(
                "INSERT INTO `message` (\
                 `folder_id`, `id`, `date`, `subject`, `preview`, \
                 `text_body`, `html_body`, `is_read`, `is_flagged`, \
                 `counted_unread`\
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?
            .execute((
                folder_id,
                message.id,
                UnixMillis(message.date),
                &message.subject,
                &message.preview_text,
                &message.text_body,
                &message.html_body,
                message.is_marked_as_read,
                message.is_flagged,
                counted,
            ))?;
            let pk = MessagePk(txn.last_insert_rowid());

            insert_children(&txn, pk, message)?;
            if counted {
                adjust_address_unread(&txn, pk, 1)?;
            }

            adjust_folder_counters(
                &txn,
                folder_id,
                1,
                i64::from(update_unread_and_total),
                i64::from(counted),
            )?;

            let mut stored = Message {
                pk,
                account: normalise_address(account_email),
                date: UnixMillis::truncate(message.date),
                ..message.clone()
            };
            for signature in &mut stored.protection.signatures {
                signature.created = UnixMillis::truncate(signature.created);
            }
            added.push(stored);
        }

        txn.commit()?;
        debug!("{} Added {} messages", self.log_prefix, added.len());
        Ok(added)
    }

    /// Rewrites the fields, participants, attachments and protection data of
    /// each message.
    ///
    /// Each message is located by `pk` if it has one, and otherwise by its
    /// folder and `id`. The `id` itself may be changed through the former.
    pub fn update_messages(
        &mut self,
        account_email: &str,
        messages: &[Message],
        update_unread_and_total: bool,
    ) -> Result<(), Error> {
        let txn = self.cxn.write_tx()?;
        let mut folders = FolderCache::default();

        for message in messages {
            let folder_id =
                folders.get(&txn, account_email, &message.folder)?;
            let state = locate_message(&txn, folder_id, message)?;

            // Participants may change, so take them out of the unread
            // accounting while they are rewritten.
            if state.counted_unread {
                adjust_address_unread(&txn, state.pk, -1)?;
            }

            txn.prepare_cached(
                "UPDATE `message` SET \
                 `id` = ?, `date` = ?, `subject` = ?, `preview` = ?, \
                 `text_body` = ?, `html_body` = ?, `is_flagged` = ? \
                 WHERE `pk` = ?",
            )?
            .execute((
                message.id,
                UnixMillis(message.date),
                &message.subject,
                &message.preview_text,
                &message.text_body,
                &message.html_body,
                message.is_flagged,
                state.pk,
            ))?;

            delete_children(&txn, state.pk)?;
            insert_children(&txn, state.pk, message)?;

            if state.counted_unread {
                adjust_address_unread(&txn, state.pk, 1)?;
            }

            apply_read_state(
                &txn,
                state,
                message.is_marked_as_read,
                update_unread_and_total,
            )?;
        }

        txn.commit()?;
        Ok(())
    }

    pub fn update_message(
        &mut self,
        account_email: &str,
        message: &Message,
        update_unread_and_total: bool,
    ) -> Result<(), Error> {
        self.update_messages(
            account_email,
            std::slice::from_ref(message),
            update_unread_and_total,
        )
    }

    /// Updates only the read and flagged state of each message.
    ///
    /// Messages are located as by `update_messages`.
    pub fn update_messages_flags(
        &mut self,
        account_email: &str,
        messages: &[Message],
        update_unread_and_total: bool,
    ) -> Result<(), Error> {
        let txn = self.cxn.write_tx()?;
        let mut folders = FolderCache::default();

        for message in messages {
            let folder_id =
                folders.get(&txn, account_email, &message.folder)?;
            let state = locate_message(&txn, folder_id, message)?;

            txn.prepare_cached(
                "UPDATE `message` SET `is_flagged` = ? WHERE `pk` = ?",
            )?
            .execute((message.is_flagged, state.pk))?;

            apply_read_state(
                &txn,
                state,
                message.is_marked_as_read,
                update_unread_and_total,
            )?;
        }

        txn.commit()?;
        Ok(())
    }

    /// Deletes every message in the given folder whose id is in `ids`.
    ///
    /// Ids which match no message are ignored.
    pub fn delete_messages(
        &mut self,
        account_email: &str,
        folder: &str,
        ids: &[u32],
        update_unread_and_total: bool,
    ) -> Result<(), Error> {
        let txn = self.cxn.write_tx()?;
        let folder_id = find_folder(&txn, account_email, folder)?;
        let mut deleted = 0usize;

        for &id in ids {
            let states = txn
                .prepare_cached(
                    "SELECT `pk`, `folder_id`, `is_read`, `counted_unread` \
                     FROM `message` WHERE `folder_id` = ? AND `id` = ?",
                )?
                .query_map((folder_id, id), from_row::<MessageState>)?
                .collect::<Result<Vec<_>, _>>()?;

            for state in states {
                if state.counted_unread {
                    adjust_address_unread(&txn, state.pk, -1)?;
                }

                txn.prepare_cached("DELETE FROM `message` WHERE `pk` = ?")?
                    .execute((state.pk,))?;

                adjust_folder_counters(
                    &txn,
                    folder_id,
                    -1,
                    -i64::from(update_unread_and_total),
                    -i64::from(update_unread_and_total && !state.is_read),
                )?;
                deleted += 1;
            }
        }

        txn.commit()?;
        debug!(
            "{} Deleted {} messages from folder #{}",
            self.log_prefix, deleted, folder_id.0,
        );
        Ok(())
    }

    pub fn delete_message(
        &mut self,
        account_email: &str,
        folder: &str,
        id: u32,
        update_unread_and_total: bool,
    ) -> Result<(), Error> {
        self.delete_messages(
            account_email,
            folder,
            &[id],
            update_unread_and_total,
        )
    }

    /// Returns the `count` messages with the greatest ids in the folder,
    /// greatest first.
    pub fn get_message_list(
        &mut self,
        account_email: &str,
        folder: &str,
        count: usize,
    ) -> Result<Vec<Message>, Error> {
        let txn = self.cxn.read_tx()?;
        let folder_id = find_folder(&txn, account_email, folder)?;
        let mut messages = query_messages(
            &txn,
            "WHERE `m`.`folder_id` = ? \
             ORDER BY `m`.`id` DESC, `m`.`pk` DESC LIMIT ?",
            (folder_id, limit(count)),
        )?;
        load_children(&txn, &mut messages)?;
        Ok(messages)
    }

    /// Returns up to `count` messages with ids strictly below `before_id`,
    /// greatest first.
    pub fn get_message_list_before(
        &mut self,
        account_email: &str,
        folder: &str,
        before_id: u32,
        count: usize,
    ) -> Result<Vec<Message>, Error> {
        let txn = self.cxn.read_tx()?;
        let folder_id = find_folder(&txn, account_email, folder)?;
        let mut messages = query_messages(
            &txn,
            "WHERE `m`.`folder_id` = ? AND `m`.`id` < ? \
             ORDER BY `m`.`id` DESC, `m`.`pk` DESC LIMIT ?",
            (folder_id, before_id, limit(count)),
        )?;
        load_children(&txn, &mut messages)?;
        Ok(messages)
    }

    /// Returns every message whose id is at least the lower bound and below
    /// the upper bound, greatest first. The bounds may be given in either
    /// order.
    ///
    /// `fast` selects a strategy that loads child records in bulk instead of
    /// per message. The results are identical.
    pub fn get_message_list_in_range(
        &mut self,
        account_email: &str,
        folder: &str,
        bounds: (u32, u32),
        fast: bool,
    ) -> Result<Vec<Message>, Error> {
        let (low, high) = if bounds.0 <= bounds.1 {
            bounds
        } else {
            (bounds.1, bounds.0)
        };

        let txn = self.cxn.read_tx()?;
        let folder_id = find_folder(&txn, account_email, folder)?;
        let mut messages = query_messages(
            &txn,
            "WHERE `m`.`folder_id` = ? AND `m`.`id` >= ? AND `m`.`id` < ? \
             ORDER BY `m`.`id` DESC, `m`.`pk` DESC",
            (folder_id, low, high),
        )?;

        if fast {
            load_children(&txn, &mut messages)?;
        } else {
            for message in &mut messages {
                load_children(&txn, std::slice::from_mut(message))?;
            }
        }

        Ok(messages)
    }

    /// Returns the message with the given id, or `NxMessage`.
    pub fn get_message(
        &mut self,
        account_email: &str,
        folder: &str,
        id: u32,
    ) -> Result<Message, Error> {
        let txn = self.cxn.read_tx()?;
        let folder_id = find_folder(&txn, account_email, folder)?;
        let mut messages = query_messages(
            &txn,
            "WHERE `m`.`folder_id` = ? AND `m`.`id` = ? \
             ORDER BY `m`.`pk` DESC LIMIT 1",
            (folder_id, id),
        )?;
        load_children(&txn, &mut messages)?;
        messages.pop().ok_or(Error::NxMessage)
    }

    pub fn is_message_exist(
        &mut self,
        account_email: &str,
        folder: &str,
        id: u32,
    ) -> Result<bool, Error> {
        let txn = self.cxn.read_tx()?;
        let folder_id = find_folder(&txn, account_email, folder)?;
        let exists = txn
            .prepare_cached(
                "SELECT 1 FROM `message` \
                 WHERE `folder_id` = ? AND `id` = ? LIMIT 1",
            )?
            .exists((folder_id, id))?;
        Ok(exists)
    }

    /// Returns the message with the greatest id in the folder.
    pub fn get_latest_message(
        &mut self,
        account_email: &str,
        folder: &str,
    ) -> Result<Option<Message>, Error> {
        Ok(self
            .get_message_list(account_email, folder, 1)?
            .into_iter()
            .next())
    }

    /// Returns up to `count` messages which sort strictly after `anchor` in
    /// descending `(date, id, pk)` order, or the first `count` messages if
    /// `anchor` is `None`.
    ///
    /// If `folder` is `None`, this covers every folder of every account as a
    /// single sequence.
    pub fn get_earlier_messages(
        &mut self,
        folder: Option<&FolderPath>,
        count: usize,
        anchor: Option<&Message>,
    ) -> Result<Vec<Message>, Error> {
        let txn = self.cxn.read_tx()?;
        let (date, id, pk) = order_key(anchor);

        let mut messages = if let Some(folder) = folder {
            let folder_id =
                find_folder(&txn, &folder.account_email, &folder.full_name)?;
            query_messages(
                &txn,
                &format!(
                    "WHERE `m`.`folder_id` = ? \
                     AND (`m`.`date`, `m`.`id`, `m`.`pk`) < (?, ?, ?) \
                     {CHRONO_DESC} LIMIT ?"
                ),
                (folder_id, date, id, pk, limit(count)),
            )?
        } else {
            query_messages(
                &txn,
                &format!(
                    "WHERE (`m`.`date`, `m`.`id`, `m`.`pk`) < (?, ?, ?) \
                     {CHRONO_DESC} LIMIT ?"
                ),
                (date, id, pk, limit(count)),
            )?
        };

        load_children(&txn, &mut messages)?;
        Ok(messages)
    }

    /// Returns the most recent message in the folder in which
    /// `contact_email` participates in any role.
    pub fn get_contact_last_message(
        &mut self,
        account_email: &str,
        folder: &str,
        contact_email: &str,
    ) -> Result<Option<Message>, Error> {
        let txn = self.cxn.read_tx()?;
        let folder_id = find_folder(&txn, account_email, folder)?;
        let mut messages = query_messages(
            &txn,
            &format!(
                "WHERE `m`.`folder_id` = ? AND `m`.`pk` IN (\
                 SELECT `message_pk` FROM `message_participant` \
                 WHERE `address` = ?) \
                 {CHRONO_DESC} LIMIT 1"
            ),
            (folder_id, normalise_address(contact_email)),
        )?;
        load_children(&txn, &mut messages)?;
        Ok(messages.pop())
    }

    /// Like `get_earlier_messages` across all folders, but limited to the
    /// messages in which `contact_email` participates in any role.
    pub fn get_earlier_contact_messages(
        &mut self,
        contact_email: &str,
        count: usize,
        anchor: Option<&Message>,
    ) -> Result<Vec<Message>, Error> {
        let txn = self.cxn.read_tx()?;
        let (date, id, pk) = order_key(anchor);
        let mut messages = query_messages(
            &txn,
            &format!(
                "WHERE `m`.`pk` IN (\
                 SELECT `message_pk` FROM `message_participant` \
                 WHERE `address` = ?) \
                 AND (`m`.`date`, `m`.`id`, `m`.`pk`) < (?, ?, ?) \
                 {CHRONO_DESC} LIMIT ?"
            ),
            (normalise_address(contact_email), date, id, pk, limit(count)),
        )?;
        load_children(&txn, &mut messages)?;
        Ok(messages)
    }

    /// Returns the number of messages physically present in the folder.
    pub fn get_messages_count(
        &mut self,
        account_email: &str,
        folder: &str,
    ) -> Result<u32, Error> {
        self.count_messages(account_email, folder, false)
    }

    /// Returns the number of unread messages physically present in the
    /// folder.
    pub fn get_unread_messages_count(
        &mut self,
        account_email: &str,
        folder: &str,
    ) -> Result<u32, Error> {
        self.count_messages(account_email, folder, true)
    }

    fn count_messages(
        &mut self,
        account_email: &str,
        folder: &str,
        unread_only: bool,
    ) -> Result<u32, Error> {
        let txn = self.cxn.read_tx()?;
        let folder_id = find_folder(&txn, account_email, folder)?;
        let count = txn
            .prepare_cached(
                "SELECT COUNT(*) FROM `message` \
                 WHERE `folder_id` = ? AND (NOT ? OR NOT `is_read`)",
            )?
            .query_row((folder_id, unread_only), from_single::<u32>)?;
        Ok(count)
    }
}

/// Memoises folder lookups over the course of one batch operation.
#[derive(Default)]
struct FolderCache {
    ids: HashMap<String, FolderId>,
}

impl FolderCache {
    fn get(
        &mut self,
        cxn: &rusqlite::Connection,
        account_email: &str,
        folder: &str,
    ) -> Result<FolderId, Error> {
        if let Some(&id) = self.ids.get(folder) {
            return Ok(id);
        }

        let id = find_folder(cxn, account_email, folder)?;
        self.ids.insert(folder.to_owned(), id);
        Ok(id)
    }
}

fn limit(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

/// The `(date, id, pk)` bound strictly below which the next page starts.
fn order_key(anchor: Option<&Message>) -> (i64, i64, i64) {
    match anchor {
        // An unsaved anchor has pk 0, which excludes every message sharing
        // its date and id.
        Some(anchor) => (
            anchor.date.timestamp_millis(),
            i64::from(anchor.id),
            anchor.pk.0,
        ),
        None => (i64::MAX, i64::MAX, i64::MAX),
    }
}

fn query_messages(
    cxn: &rusqlite::Connection,
    tail: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Message>, Error> {
    let messages = cxn
        .prepare_cached(&format!("{MESSAGE_SELECT} {tail}"))?
        .query_map(params, from_row::<RawMessage>)?
        .map(|r| r.map(RawMessage::into_message))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

fn locate_message(
    cxn: &rusqlite::Connection,
    folder_id: FolderId,
    message: &Message,
) -> Result<MessageState, Error> {
    let state = if message.pk.is_saved() {
        cxn.prepare_cached(
            "SELECT `pk`, `folder_id`, `is_read`, `counted_unread` \
             FROM `message` WHERE `pk` = ? AND `folder_id` = ?",
        )?
        .query_row((message.pk, folder_id), from_row::<MessageState>)
        .optional()?
    } else {
        cxn.prepare_cached(
            "SELECT `pk`, `folder_id`, `is_read`, `counted_unread` \
             FROM `message` WHERE `folder_id` = ? AND `id` = ? \
             ORDER BY `pk` LIMIT 1",
        )?
        .query_row((folder_id, message.id), from_row::<MessageState>)
        .optional()?
    };

    state.ok_or(Error::NxMessage)
}

/// Brings the stored read state of a message to `is_read`, along with the
/// counters which follow it.
fn apply_read_state(
    cxn: &rusqlite::Connection,
    state: MessageState,
    is_read: bool,
    update_unread_and_total: bool,
) -> Result<(), Error> {
    if state.is_read != is_read {
        cxn.prepare_cached("UPDATE `message` SET `is_read` = ? WHERE `pk` = ?")?
            .execute((is_read, state.pk))?;
        if update_unread_and_total {
            adjust_folder_counters(
                cxn,
                state.folder_id,
                0,
                0,
                if is_read { -1 } else { 1 },
            )?;
        }
    }

    let counted = if update_unread_and_total {
        !is_read
    } else {
        state.counted_unread
    };
    if counted != state.counted_unread {
        cxn.prepare_cached(
            "UPDATE `message` SET `counted_unread` = ? WHERE `pk` = ?",
        )?
        .execute((counted, state.pk))?;
        adjust_address_unread(cxn, state.pk, if counted { 1 } else { -1 })?;
    }

    Ok(())
}

fn adjust_folder_counters(
    cxn: &rusqlite::Connection,
    folder_id: FolderId,
    local: i64,
    total: i64,
    unread: i64,
) -> Result<(), Error> {
    cxn.prepare_cached(
        "UPDATE `folder` SET \
         `local_count` = MAX(`local_count` + ?, 0), \
         `total_count` = MAX(`total_count` + ?, 0), \
         `unread_count` = MAX(`unread_count` + ?, 0) \
         WHERE `id` = ?",
    )?
    .execute((local, total, unread, folder_id))?;
    Ok(())
}

/// Adds `delta` to the unread count of each distinct participant address of
/// the message.
fn adjust_address_unread(
    cxn: &rusqlite::Connection,
    pk: MessagePk,
    delta: i64,
) -> Result<(), Error> {
    cxn.prepare_cached(
        "INSERT INTO `address_unread` (`address`, `unread_count`) \
         SELECT DISTINCT `address`, MAX(?1, 0) FROM `message_participant` \
         WHERE `message_pk` = ?2 AND `address` <> '' \
         ON CONFLICT (`address`) DO UPDATE \
         SET `unread_count` = MAX(`unread_count` + ?1, 0)",
    )?
    .execute((delta, pk))?;
    Ok(())
}

/// Removes every counted message in `scope` from the per-address unread
/// counts, in preparation for the scope being deleted.
pub(super) fn uncount_unread_in(
    cxn: &rusqlite::Connection,
    scope: FolderScope,
) -> Result<(), Error> {
    let folder_filter = match scope {
        FolderScope::Folder(_) => "= ?",
        FolderScope::Account(_) => {
            "IN (SELECT `id` FROM `folder` WHERE `account_id` = ?)"
        },
    };
    let sql = format!(
        "UPDATE `address_unread` \
         SET `unread_count` = MAX(`unread_count` - `c`.`n`, 0) \
         FROM (\
           SELECT `p`.`address` AS `address`, \
                  COUNT(DISTINCT `p`.`message_pk`) AS `n` \
           FROM `message_participant` `p` \
           JOIN `message` `m` ON `m`.`pk` = `p`.`message_pk` \
           WHERE `m`.`counted_unread` AND `m`.`folder_id` {folder_filter} \
           GROUP BY `p`.`address`\
         ) AS `c` \
         WHERE `address_unread`.`address` = `c`.`address`"
    );

    let mut stmt = cxn.prepare_cached(&sql)?;
    match scope {
        FolderScope::Folder(id) => stmt.execute((id,))?,
        FolderScope::Account(id) => stmt.execute((id,))?,
    };
    Ok(())
}

fn insert_children(
    cxn: &rusqlite::Connection,
    pk: MessagePk,
    message: &Message,
) -> Result<(), Error> {
    {
        let mut stmt = cxn.prepare_cached(
            "INSERT INTO `message_participant` (\
             `message_pk`, `role`, `position`, `raw_address`, `address`, \
             `name`\
             ) VALUES (?, ?, ?, ?, ?, ?)",
        )?;
        for (role, position, address) in message.participants() {
            stmt.execute((
                pk,
                role,
                position,
                &address.address,
                address.key(),
                &address.name,
            ))?;
        }
    }

    {
        let mut stmt = cxn.prepare_cached(
            "INSERT INTO `attachment` \
             (`message_pk`, `position`, `file_name`, `data`) \
             VALUES (?, ?, ?, ?)",
        )?;
        for (position, attachment) in message.attachments.iter().enumerate() {
            stmt.execute((
                pk,
                position,
                &attachment.file_name,
                &attachment.data,
            ))?;
        }
    }

    cxn.prepare_cached(
        "INSERT INTO `protection` (`message_pk`, `kind`) VALUES (?, ?)",
    )?
    .execute((pk, message.protection.kind))?;

    let mut stmt = cxn.prepare_cached(
        "INSERT INTO `signature` (\
         `message_pk`, `position`, `created`, `hash_algorithm`, \
         `signer_fingerprint`, `signer_email`, `is_verified`\
         ) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )?;
    for (position, signature) in
        message.protection.signatures.iter().enumerate()
    {
        stmt.execute((
            pk,
            position,
            UnixMillis(signature.created),
            &signature.hash_algorithm,
            &signature.signer_fingerprint,
            &signature.signer_email,
            signature.is_verified,
        ))?;
    }

    Ok(())
}

fn delete_children(
    cxn: &rusqlite::Connection,
    pk: MessagePk,
) -> Result<(), Error> {
    for table in ["message_participant", "attachment", "protection", "signature"]
    {
        cxn.prepare_cached(&format!(
            "DELETE FROM `{table}` WHERE `message_pk` = ?"
        ))?
        .execute((pk,))?;
    }
    Ok(())
}

/// Populates the participants, attachments and protection data of every
/// message in `messages`.
fn load_children(
    cxn: &rusqlite::Connection,
    messages: &mut [Message],
) -> Result<(), Error> {
    let index = messages
        .iter()
        .enumerate()
        .map(|(ix, m)| (m.pk, ix))
        .collect::<HashMap<_, _>>();
    let pks = messages.iter().map(|m| m.pk).collect::<Vec<_>>();

    for chunk in pks.chunks(CHILD_BATCH) {
        let placeholders = vec!["?"; chunk.len()].join(",");

        let find = |pk: &MessagePk| index.get(pk).copied();

        for row in cxn
            .prepare_cached(&format!(
                "SELECT `message_pk`, `role`, `raw_address`, `name` \
                 FROM `message_participant` \
                 WHERE `message_pk` IN ({placeholders}) \
                 ORDER BY `message_pk`, `role`, `position`"
            ))?
            .query_map(
                rusqlite::params_from_iter(chunk),
                from_row::<(MessagePk, ParticipantRole, String, String)>,
            )?
        {
            let (pk, role, address, name) = row?;
            if let Some(ix) = find(&pk) {
                messages[ix]
                    .participants_mut(role)
                    .push(EmailAddress { address, name });
            }
        }

        for row in cxn
            .prepare_cached(&format!(
                "SELECT `message_pk`, `file_name`, `data` FROM `attachment` \
                 WHERE `message_pk` IN ({placeholders}) \
                 ORDER BY `message_pk`, `position`"
            ))?
            .query_map(
                rusqlite::params_from_iter(chunk),
                from_row::<(MessagePk, String, Vec<u8>)>,
            )?
        {
            let (pk, file_name, data) = row?;
            if let Some(ix) = find(&pk) {
                messages[ix].attachments.push(Attachment { file_name, data });
            }
        }

        for row in cxn
            .prepare_cached(&format!(
                "SELECT `message_pk`, `kind` FROM `protection` \
                 WHERE `message_pk` IN ({placeholders})"
            ))?
            .query_map(
                rusqlite::params_from_iter(chunk),
                from_row::<(MessagePk, MessageProtectionType)>,
            )?
        {
            let (pk, kind) = row?;
            if let Some(ix) = find(&pk) {
                messages[ix].protection.kind = kind;
            }
        }

        for row in cxn
            .prepare_cached(&format!(
                "SELECT `message_pk`, `created`, `hash_algorithm`, \
                 `signer_fingerprint`, `signer_email`, `is_verified` \
                 FROM `signature` \
                 WHERE `message_pk` IN ({placeholders}) \
                 ORDER BY `message_pk`, `position`"
            ))?
            .query_map(
                rusqlite::params_from_iter(chunk),
                from_row::<(MessagePk, UnixMillis, String, String, String, bool)>,
            )?
        {
            let (
                pk,
                created,
                hash_algorithm,
                signer_fingerprint,
                signer_email,
                is_verified,
            ) = row?;
            if let Some(ix) = find(&pk) {
                messages[ix].protection.signatures.push(SignatureInfo {
                    created: created.0,
                    hash_algorithm,
                    signer_fingerprint,
                    signer_email,
                    is_verified,
                });
            }
        }
    }

    Ok(())
}
