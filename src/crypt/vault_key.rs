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

//! The vault key and its password wrapping.
//!
//! A vault is encrypted under a random 256-bit key chosen at creation time
//! and never changed afterwards. The header stores that key XORed with a
//! "wrapping key" derived from the password, along with a check value that
//! tells whether a password is right before any page is decrypted.
//!
//! Both the wrapping key and the check come from one slow Argon2 hash of the
//! password, split with KMAC under distinct customisation strings. A password
//! change just picks a new salt and recomputes both.
//!
//! The AES keys used for page encryption are never the vault key itself, but
//! KMAC128 derivations of it keyed on the role of the file (`"main"`,
//! `"journal"`, ...) and the purpose (`"xex-data"` or `"xex-tweak"`).

use chrono::prelude::*;
use rand::{rngs::OsRng, Rng};
use secstr::SecBox;
use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Kmac};

use super::AES_BLOCK;

const VAULT_KEY_SIZE: usize = 32;
const SALT_SIZE: usize = 32;

/// How a `VaultKeyConfig` turns a password into its check and wrapping key.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum Algorithm {
    /// Argon2i v1.3, 4 MiB, 10 passes, 1 lane, 32-byte output. The check is
    /// `KMAC256(salt, hash, 32, "check")` and the wrapping key
    /// `KMAC256(salt, hash, 32, "vault")`.
    #[default]
    Argon2i_V13_M4096_T10_L1_Kmac256,
}

/// The output of running a password through an `Algorithm`.
struct Derivation {
    check: [u8; 32],
    wrapping_key: [u8; VAULT_KEY_SIZE],
}

impl Algorithm {
    fn derive(
        self,
        password: &[u8],
        salt: &[u8],
    ) -> Result<Derivation, argon2::Error> {
        let hash = match self {
            Self::Argon2i_V13_M4096_T10_L1_Kmac256 => argon2::hash_raw(
                password,
                salt,
                &argon2::Config {
                    variant: argon2::Variant::Argon2i,
                    version: argon2::Version::Version13,
                    mem_cost: 4096,
                    time_cost: 10,
                    lanes: 1,
                    thread_mode: argon2::ThreadMode::Sequential,
                    hash_length: 32,
                    ..argon2::Config::default()
                },
            )?,
        };

        Ok(Derivation {
            check: kmac256(salt, b"check", &hash),
            wrapping_key: kmac256(salt, b"vault", &hash),
        })
    }
}

fn kmac256(key: &[u8], custom: &[u8], input: &[u8]) -> [u8; 32] {
    let mut kmac = Kmac::v256(key, custom);
    kmac.update(input);
    let mut out = [0u8; 32];
    kmac.finalize(&mut out);
    out
}

/// The cleartext record in the vault header from which the vault key is
/// recovered given the password.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VaultKeyConfig {
    algorithm: Algorithm,
    #[serde(with = "serde_bytes")]
    salt: Vec<u8>,
    #[serde(with = "serde_bytes")]
    check: Vec<u8>,
    /// The vault key XORed with the wrapping key.
    #[serde(with = "serde_bytes")]
    wrapped_key: Vec<u8>,
    /// When the password was last changed, if ever.
    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,
}

/// The AES-128 key pair for XEX encryption of one file role.
pub struct XexKeys {
    pub data: [u8; AES_BLOCK],
    pub tweak: [u8; AES_BLOCK],
}

/// The secret key of a vault.
///
/// Lives in locked memory which is zeroed on drop.
pub struct VaultKey {
    key: SecBox<[u8; VAULT_KEY_SIZE]>,
}

impl VaultKey {
    /// Generates a fresh random key.
    pub fn new() -> Self {
        let mut key = SecBox::new(Box::new([0u8; VAULT_KEY_SIZE]));
        OsRng.fill(&mut key.unsecure_mut()[..]);
        Self { key }
    }

    pub fn xex_keys(&self, role: &str) -> XexKeys {
        XexKeys {
            data: self.kmac128(b"xex-data", role),
            tweak: self.kmac128(b"xex-tweak", role),
        }
    }

    fn kmac128(&self, custom: &[u8], role: &str) -> [u8; AES_BLOCK] {
        let mut kmac = Kmac::v128(self.key.unsecure(), custom);
        kmac.update(role.as_bytes());
        let mut out = [0u8; AES_BLOCK];
        kmac.finalize(&mut out);
        out
    }

    /// Wraps this key under `password`, with a new random salt.
    pub fn make_config(
        &self,
        password: &[u8],
    ) -> Result<VaultKeyConfig, argon2::Error> {
        let algorithm = Algorithm::default();
        let salt: [u8; SALT_SIZE] = OsRng.gen();
        let derivation = algorithm.derive(password, &salt)?;

        Ok(VaultKeyConfig {
            algorithm,
            salt: salt.to_vec(),
            check: derivation.check.to_vec(),
            wrapped_key: xor(self.key.unsecure(), &derivation.wrapping_key),
            last_changed: None,
        })
    }

    /// Unwraps the key in `config` with `password`.
    ///
    /// Returns `None` if the password is wrong or `config` is malformed.
    pub fn from_config(config: &VaultKeyConfig, password: &[u8]) -> Option<Self> {
        let derivation = config.algorithm.derive(password, &config.salt).ok()?;
        if config.check.len() != derivation.check.len()
            || !openssl::memcmp::eq(&config.check, &derivation.check)
            || VAULT_KEY_SIZE != config.wrapped_key.len()
        {
            return None;
        }

        let mut key = SecBox::new(Box::new([0u8; VAULT_KEY_SIZE]));
        for ((dst, wrapped), mask) in key
            .unsecure_mut()
            .iter_mut()
            .zip(&config.wrapped_key)
            .zip(&derivation.wrapping_key)
        {
            *dst = wrapped ^ mask;
        }

        Some(Self { key })
    }
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(a, b)| a ^ b).collect()
}
