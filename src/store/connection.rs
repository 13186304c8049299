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

use std::panic::AssertUnwindSafe;
use std::path::Path;

use tokio_util::sync::CancellationToken;

use super::{migrations, vfs::XexVfs};
use crate::support::{
    error::Error, log_prefix::LogPrefix, store_config::StoreConfig,
};

/// A connection to the encrypted vault database.
///
/// The data operations are implemented in the sibling modules (`accounts`,
/// `messages`, etc) as further `impl Connection` blocks.
pub struct Connection {
    pub(super) cxn: rusqlite::Connection,
    pub(super) log_prefix: LogPrefix,
    cancel_check_interval: i32,
}

impl Connection {
    pub fn new(
        path: &Path,
        vfs: &XexVfs,
        config: &StoreConfig,
        log_prefix: LogPrefix,
    ) -> Result<Self, Error> {
        // The file is only ever created by `header::create`.
        let mut cxn = rusqlite::Connection::open_with_flags_and_vfs(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            vfs.name(),
        )?;

        cxn.pragma_update(None, "foreign_keys", true)?;
        // DELETE keeps the vault a single file whenever no write is in
        // progress. WAL is out of the question since the VFS has no shared
        // memory support.
        cxn.pragma_update(None, "journal_mode", "DELETE")?;
        cxn.pragma_update(None, "temp_store", "MEMORY")?;
        cxn.pragma_update(
            None,
            "cache_size",
            -i64::from(config.cache_size_kib),
        )?;
        cxn.busy_timeout(config.busy_timeout())?;

        migrations::apply_migrations(
            &log_prefix,
            &mut cxn,
            migrations::VAULT_MIGRATIONS,
        )?;

        Ok(Self {
            cxn,
            log_prefix,
            cancel_check_interval: i32::try_from(config.cancel_check_interval)
                .unwrap_or(i32::MAX)
                .max(1),
        })
    }

    /// Runs `f` with `cancel` able to interrupt any SQLite statement it
    /// executes.
    ///
    /// Fails with `Error::Cancelled` without calling `f` if `cancel` has
    /// already fired.
    pub fn cancellable<R>(
        &mut self,
        cancel: &CancellationToken,
        f: impl FnOnce(&mut Self) -> Result<R, Error>,
    ) -> Result<R, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let token = AssertUnwindSafe(cancel.clone());
        self.cxn.progress_handler(
            self.cancel_check_interval,
            Some(move || token.is_cancelled()),
        );

        let result = f(self);
        self.cxn.progress_handler(0, None::<fn() -> bool>);

        // A statement which completed before the handler observed the signal
        // still counts as cancelled, so callers see one consistent outcome.
        match result {
            Ok(_) if cancel.is_cancelled() => Err(Error::Cancelled),
            result => result,
        }
    }
}

pub(super) trait ConnectionExt {
    fn read_tx(&mut self) -> rusqlite::Result<rusqlite::Transaction<'_>>;
    fn write_tx(&mut self) -> rusqlite::Result<rusqlite::Transaction<'_>>;
    fn enable_write(&mut self, enabled: bool) -> rusqlite::Result<()>;
}

impl ConnectionExt for rusqlite::Connection {
    fn read_tx(&mut self) -> rusqlite::Result<rusqlite::Transaction<'_>> {
        self.enable_write(false)?;
        self.transaction_with_behavior(rusqlite::TransactionBehavior::Deferred)
    }

    fn write_tx(&mut self) -> rusqlite::Result<rusqlite::Transaction<'_>> {
        self.enable_write(true)?;
        self.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
    }

    #[cfg(debug_assertions)]
    fn enable_write(&mut self, enabled: bool) -> rusqlite::Result<()> {
        // PRAGMA doesn't actually support templates, so switch the whole query
        // string based on `enabled`.
        self.execute(
            if enabled {
                "PRAGMA query_only = false"
            } else {
                "PRAGMA query_only = true"
            },
            (),
        )?;
        Ok(())
    }

    #[cfg(not(debug_assertions))]
    fn enable_write(&mut self, _: bool) -> rusqlite::Result<()> {
        Ok(())
    }
}
