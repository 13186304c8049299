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

use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Text included at the start of every log statement concerning a particular
/// vault.
///
/// Clones of a `LogPrefix` share the same underlying data.
#[derive(Clone)]
pub struct LogPrefix {
    vault: Arc<str>,
}

impl LogPrefix {
    pub fn new(vault: String) -> Self {
        Self {
            vault: sanitise(vault).into(),
        }
    }

    /// Builds a prefix naming the vault by the final component of its path.
    ///
    /// The full path is deliberately not logged, since it frequently contains
    /// the user's home directory.
    pub fn for_path(path: &Path) -> Self {
        Self::new(
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "?".to_owned()),
        )
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "vault[{}]", self.vault)
    }
}

fn sanitise(mut s: String) -> String {
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(64) {
        s.truncate(truncate_len);
    }

    s
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prefix_uses_file_name_only() {
        let prefix = LogPrefix::for_path(Path::new("/home/user/mail.vault"));
        assert_eq!("vault[mail.vault]", prefix.to_string());
    }

    #[test]
    fn control_characters_are_stripped() {
        let prefix = LogPrefix::new("evil\nname\x1b[0m".to_owned());
        assert_eq!("vault[evilname[0m]", prefix.to_string());
    }
}
