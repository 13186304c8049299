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

use log::info;

use super::types::*;
use crate::support::{error::Error, log_prefix::LogPrefix};

/// The schema migrations of the vault database, oldest first.
pub static VAULT_MIGRATIONS: &[&str] = &[include_str!("vault.v1.sql")];

/// Brings the schema of `cxn` up to date with `migrations`.
///
/// Migration `n` (1-based) is applied iff the greatest recorded version is
/// less than `n`. All pending migrations are applied in one exclusive
/// transaction.
pub fn apply_migrations(
    log_prefix: &LogPrefix,
    cxn: &mut rusqlite::Connection,
    migrations: &[&str],
) -> Result<(), Error> {
    let latest_version = migrations.len();

    // Fast path for the overwhelmingly common case, which does not need a
    // write lock.
    if Ok(Some(latest_version))
        == cxn.query_row(
            "SELECT MAX(`version`) FROM `migration`",
            (),
            from_single::<Option<usize>>,
        )
    {
        return Ok(());
    }

    let txn = cxn
        .transaction_with_behavior(rusqlite::TransactionBehavior::Exclusive)?;
    txn.execute(
        "CREATE TABLE IF NOT EXISTS `migration` (\
         `version` INTEGER NOT NULL PRIMARY KEY, \
         `applied_at` INTEGER NOT NULL\
         ) STRICT",
        (),
    )?;

    let current_version = txn
        .query_row(
            "SELECT MAX(`version`) FROM `migration`",
            (),
            from_single::<Option<usize>>,
        )?
        .unwrap_or(0);

    for (version, migration) in migrations
        .iter()
        .copied()
        .enumerate()
        .map(|(ix, migration)| (ix + 1, migration))
        .skip(current_version)
    {
        info!("{log_prefix} Applying #{version} migration to vault DB");
        txn.execute_batch(migration)?;
        txn.execute(
            "INSERT INTO `migration` (`version`, `applied_at`) \
             VALUES (?, ?)",
            (version, UnixMillis::now()),
        )?;
    }

    txn.commit()?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn versions(cxn: &rusqlite::Connection) -> Vec<usize> {
        cxn.prepare("SELECT `version` FROM `migration` ORDER BY `version`")
            .unwrap()
            .query_map((), from_single::<usize>)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn migrations_apply_incrementally() {
        let log_prefix = LogPrefix::new("test".to_owned());
        let mut cxn = rusqlite::Connection::open_in_memory().unwrap();

        apply_migrations(
            &log_prefix,
            &mut cxn,
            &["CREATE TABLE `a` (`x` INTEGER) STRICT;"],
        )
        .unwrap();
        assert_eq!(vec![1], versions(&cxn));

        // Re-applying the same set is a no-op.
        apply_migrations(
            &log_prefix,
            &mut cxn,
            &["CREATE TABLE `a` (`x` INTEGER) STRICT;"],
        )
        .unwrap();

        apply_migrations(
            &log_prefix,
            &mut cxn,
            &[
                "CREATE TABLE `a` (`x` INTEGER) STRICT;",
                "CREATE TABLE `b` (`y` INTEGER) STRICT;",
            ],
        )
        .unwrap();
        assert_eq!(vec![1, 2], versions(&cxn));
        cxn.execute("INSERT INTO `b` (`y`) VALUES (1)", ()).unwrap();
    }

    #[test]
    fn vault_schema_applies_cleanly() {
        let mut cxn = rusqlite::Connection::open_in_memory().unwrap();
        apply_migrations(
            &LogPrefix::new("test".to_owned()),
            &mut cxn,
            VAULT_MIGRATIONS,
        )
        .unwrap();
        assert_eq!(vec![1], versions(&cxn));
    }
}
