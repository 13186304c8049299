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

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a vault.
///
/// This is typically embedded in the host application's own TOML
/// configuration. Every field has a default, so an empty table is a valid
/// configuration.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// How long, in milliseconds, a connection waits for a lock held by
    /// another connection before giving up with `SQLITE_BUSY`.
    ///
    /// Writers are serialised on the vault file, so this bounds how long a
    /// mutation may queue behind others.
    pub busy_timeout_ms: u64,

    /// The number of SQLite virtual machine steps between checks of a read
    /// query's cancellation signal.
    ///
    /// Lower values make cancellation more responsive at a small CPU cost.
    pub cancel_check_interval: u32,

    /// The page cache size of each connection, in KiB.
    pub cache_size_kib: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 10_000,
            cancel_check_interval: 1000,
            cache_size_kib: 2048,
        }
    }
}

impl StoreConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
