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

//! Persistence of the application master key and the PGP key bundles.
//!
//! The store treats all of these as opaque bytes.

use rusqlite::OptionalExtension as _;

use super::{
    connection::{Connection, ConnectionExt as _},
    types::*,
};
use crate::{model::PgpKeyKind, support::error::Error};

impl Connection {
    /// Stores the master key.
    ///
    /// Fails with `MasterKeyAlreadyExists` if one has already been stored; the
    /// master key can never be replaced.
    pub fn initialize_master_key(&mut self, key: &[u8]) -> Result<(), Error> {
        let txn = self.cxn.write_tx()?;
        let inserted = txn.execute(
            "INSERT INTO `master_key` (`id`, `key`) VALUES (0, ?) \
             ON CONFLICT DO NOTHING",
            (key,),
        )?;
        if 0 == inserted {
            return Err(Error::MasterKeyAlreadyExists);
        }

        txn.commit()?;
        Ok(())
    }

    pub fn is_master_key_present(&mut self) -> Result<bool, Error> {
        self.cxn.enable_write(false)?;
        let present = self.cxn.query_row(
            "SELECT EXISTS (SELECT 1 FROM `master_key`)",
            (),
            from_single::<bool>,
        )?;
        Ok(present)
    }

    /// Returns the master key, or `NxMasterKey` if none has been stored.
    pub fn get_master_key(&mut self) -> Result<Vec<u8>, Error> {
        self.cxn.enable_write(false)?;
        self.cxn
            .query_row(
                "SELECT `key` FROM `master_key` WHERE `id` = 0",
                (),
                from_single::<Vec<u8>>,
            )
            .optional()?
            .ok_or(Error::NxMasterKey)
    }

    /// Replaces the stored bundle of the given kind with `data`.
    pub fn save_pgp_keys(
        &mut self,
        kind: PgpKeyKind,
        data: &[u8],
    ) -> Result<(), Error> {
        let txn = self.cxn.write_tx()?;
        txn.execute(
            "INSERT INTO `pgp_keys` (`kind`, `data`) VALUES (?, ?) \
             ON CONFLICT (`kind`) DO UPDATE SET `data` = `excluded`.`data`",
            (kind, data),
        )?;
        txn.commit()?;
        Ok(())
    }

    /// Returns the stored bundle of the given kind, if ever saved.
    pub fn get_pgp_keys(
        &mut self,
        kind: PgpKeyKind,
    ) -> Result<Option<Vec<u8>>, Error> {
        self.cxn.enable_write(false)?;
        let data = self
            .cxn
            .query_row(
                "SELECT `data` FROM `pgp_keys` WHERE `kind` = ?",
                (kind,),
                from_single::<Vec<u8>>,
            )
            .optional()?;
        Ok(data)
    }
}
