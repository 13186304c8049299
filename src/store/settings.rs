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

use rusqlite::OptionalExtension as _;

use super::{
    connection::{Connection, ConnectionExt as _},
    types::*,
};
use crate::{model::Settings, support::error::Error};

impl Connection {
    /// Returns the settings record, which is all zeroes until first set.
    pub fn get_settings(&mut self) -> Result<Settings, Error> {
        self.cxn.enable_write(false)?;
        let counter = self
            .cxn
            .query_row(
                "SELECT `decentralized_account_counter` FROM `settings` \
                 WHERE `id` = 0",
                (),
                from_single::<u32>,
            )
            .optional()?;

        Ok(Settings {
            decentralized_account_counter: counter.unwrap_or(0),
        })
    }

    pub fn set_settings(&mut self, settings: &Settings) -> Result<(), Error> {
        let txn = self.cxn.write_tx()?;
        txn.execute(
            "INSERT INTO `settings` (`id`, `decentralized_account_counter`) \
             VALUES (0, ?) \
             ON CONFLICT (`id`) DO UPDATE SET \
             `decentralized_account_counter` = \
             `excluded`.`decentralized_account_counter`",
            (settings.decentralized_account_counter,),
        )?;
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::super::connection::test::Fixture;
    use super::*;

    #[test]
    fn settings_default_then_upsert() {
        let mut fixture = Fixture::new();
        assert_eq!(Settings::default(), fixture.cxn.get_settings().unwrap());

        let settings = Settings {
            decentralized_account_counter: 3,
        };
        fixture.cxn.set_settings(&settings).unwrap();
        assert_eq!(settings, fixture.cxn.get_settings().unwrap());

        let settings = Settings {
            decentralized_account_counter: 4,
        };
        fixture.cxn.set_settings(&settings).unwrap();
        assert_eq!(settings, fixture.cxn.get_settings().unwrap());
    }
}
