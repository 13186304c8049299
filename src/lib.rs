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

//! Password-protected, encrypted local storage for an offline mail client.
//!
//! The crate persists accounts with their folder structures, messages,
//! contacts, key material and settings in a single vault file. Everything
//! after the file's small cleartext header is encrypted under a random vault
//! key, which is itself stored wrapped under the user's password.
//!
//! `storage::DataStorage` is the asynchronous entry point. The synchronous
//! layer it is built on is available in `store`.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr $(,)?) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

mod crypt;
pub mod model;
pub mod storage;
pub mod store;
mod support;

#[cfg(test)]
mod integration_tests;

pub use storage::DataStorage;
pub use support::{
    error::Error, log_prefix::LogPrefix, store_config::StoreConfig,
};
pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{} [{}][{}] {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    message,
                ))
            })
            .level(log::LevelFilter::Debug)
            .chain(std::io::stderr())
            .apply()
            .unwrap();
    })
}
