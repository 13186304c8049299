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

//! The cleartext header at the start of every vault file.
//!
//! Layout:
//!
//! ```text
//!   [0..8)      magic "MVAULT\0\x02"
//!   [8..12)     length N of the payload, u32 LE
//!   [12..44)    SHA3-256 of the payload
//!   [44..44+N)  CBOR-encoded `VaultKeyConfig`
//!   ...         zero padding up to HEADER_SIZE
//! ```
//!
//! Everything after `HEADER_SIZE` is the encrypted database, which is only
//! ever accessed through the XEX VFS.
//!
//! A header is never rewritten in place without first being staged, complete
//! and synced, in a sidecar file next to the vault. If the in-place write is
//! torn, the digest no longer matches and `read` restores the header from the
//! sidecar.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use log::warn;
use tiny_keccak::{Hasher, Sha3};

use crate::{crypt::vault_key::VaultKeyConfig, support::error::Error};

pub const HEADER_SIZE: usize = 4096;
const MAGIC: &[u8; 8] = b"MVAULT\0\x02";
const LENGTH_OFFSET: usize = MAGIC.len();
const DIGEST_OFFSET: usize = LENGTH_OFFSET + 4;
const PAYLOAD_OFFSET: usize = DIGEST_OFFSET + 32;

fn digest(payload: &[u8]) -> [u8; 32] {
    let mut sha3 = Sha3::v256();
    sha3.update(payload);
    let mut out = [0u8; 32];
    sha3.finalize(&mut out);
    out
}

fn encode(config: &VaultKeyConfig) -> Result<Vec<u8>, Error> {
    let payload = serde_cbor::to_vec(config)?;
    if payload.len() > HEADER_SIZE - PAYLOAD_OFFSET {
        return Err(Error::BadVaultHeader);
    }

    let mut header = vec![0u8; HEADER_SIZE];
    header[..MAGIC.len()].copy_from_slice(MAGIC);
    LittleEndian::write_u32(
        &mut header[LENGTH_OFFSET..DIGEST_OFFSET],
        payload.len() as u32,
    );
    header[DIGEST_OFFSET..PAYLOAD_OFFSET].copy_from_slice(&digest(&payload));
    header[PAYLOAD_OFFSET..][..payload.len()].copy_from_slice(&payload);
    Ok(header)
}

fn decode(header: &[u8]) -> Result<VaultKeyConfig, Error> {
    if header.len() < HEADER_SIZE || MAGIC[..] != header[..MAGIC.len()] {
        return Err(Error::BadVaultHeader);
    }

    let len = LittleEndian::read_u32(&header[LENGTH_OFFSET..DIGEST_OFFSET])
        as usize;
    if len > HEADER_SIZE - PAYLOAD_OFFSET {
        return Err(Error::BadVaultHeader);
    }

    let payload = &header[PAYLOAD_OFFSET..][..len];
    if header[DIGEST_OFFSET..PAYLOAD_OFFSET] != digest(payload) {
        return Err(Error::BadVaultHeader);
    }

    serde_cbor::from_slice(payload).map_err(|_| Error::BadVaultHeader)
}

/// The sidecar holding a header while it is being rewritten.
fn staged_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("-header");
    PathBuf::from(name)
}

/// Creates a new vault file at `path` containing only a header.
///
/// Fails with `VaultAlreadyExists` if anything is already at `path`.
pub fn create(path: &Path, config: &VaultKeyConfig) -> Result<(), Error> {
    let header = encode(config)?;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            if io::ErrorKind::AlreadyExists == e.kind() {
                Error::VaultAlreadyExists
            } else {
                Error::Io(e)
            }
        })?;

    // A sidecar left over from a previous vault at this path must never be
    // restored into this one.
    discard_staged(path)?;

    file.write_all(&header)?;
    file.sync_all()?;
    Ok(())
}

/// Reads the header of the vault at `path`.
///
/// Fails with `NotCreated` if there is no file at `path`. A torn header is
/// repaired from the staged copy if there is one.
pub fn read(path: &Path) -> Result<VaultKeyConfig, Error> {
    let mut file = fs::File::open(path).map_err(|e| {
        if io::ErrorKind::NotFound == e.kind() {
            Error::NotCreated
        } else {
            Error::Io(e)
        }
    })?;

    let mut header = vec![0u8; HEADER_SIZE];
    let decoded = match file.read_exact(&mut header) {
        Ok(()) => decode(&header),
        Err(e) if io::ErrorKind::UnexpectedEof == e.kind() => {
            Err(Error::BadVaultHeader)
        },
        Err(e) => return Err(e.into()),
    };

    match decoded {
        Ok(config) => {
            // Either the rewrite never reached the vault or it completed; the
            // vault's own header is authoritative in both cases.
            discard_staged(path)?;
            Ok(config)
        },
        Err(Error::BadVaultHeader) => recover(path),
        Err(e) => Err(e),
    }
}

fn recover(path: &Path) -> Result<VaultKeyConfig, Error> {
    let staged = match fs::read(staged_path(path)) {
        Ok(staged) => staged,
        Err(e) if io::ErrorKind::NotFound == e.kind() => {
            return Err(Error::BadVaultHeader);
        },
        Err(e) => return Err(e.into()),
    };

    let config = decode(&staged)?;
    warn!(
        "{} Restoring vault header after an interrupted rewrite",
        path.display(),
    );
    commit(path, &staged)?;
    discard_staged(path)?;
    Ok(config)
}

/// Overwrites the header of the existing vault at `path`.
///
/// The encrypted content is untouched.
pub fn rewrite(path: &Path, config: &VaultKeyConfig) -> Result<(), Error> {
    let header = encode(config)?;
    stage(path, &header)?;
    commit(path, &header)?;
    discard_staged(path)
}

fn stage(path: &Path, header: &[u8]) -> Result<(), Error> {
    let mut file = fs::File::create(staged_path(path))?;
    file.write_all(header)?;
    file.sync_all()?;
    Ok(())
}

fn commit(path: &Path, header: &[u8]) -> Result<(), Error> {
    let mut file = fs::OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(header)?;
    file.sync_all()?;
    Ok(())
}

/// Removes any staged header for the vault at `path`.
pub fn discard_staged(path: &Path) -> Result<(), Error> {
    match fs::remove_file(staged_path(path)) {
        Ok(()) => Ok(()),
        Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;
    use crate::crypt::vault_key::VaultKey;

    #[test]
    fn create_read_rewrite() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("vault");
        let key = VaultKey::new();

        create(&path, &key.make_config(b"hunter2").unwrap()).unwrap();
        assert_eq!(HEADER_SIZE as u64, fs::metadata(&path).unwrap().len());
        assert_matches!(
            Err(Error::VaultAlreadyExists),
            create(&path, &key.make_config(b"hunter2").unwrap()),
        );

        let config = read(&path).unwrap();
        assert!(VaultKey::from_config(&config, b"hunter2").is_some());

        rewrite(&path, &key.make_config(b"hunter3").unwrap()).unwrap();
        assert!(!staged_path(&path).exists());
        let config = read(&path).unwrap();
        assert!(VaultKey::from_config(&config, b"hunter2").is_none());
        assert!(VaultKey::from_config(&config, b"hunter3").is_some());
    }

    #[test]
    fn missing_and_garbage_files() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("vault");
        assert_matches!(Err(Error::NotCreated), read(&path));

        fs::write(&path, b"short").unwrap();
        assert_matches!(Err(Error::BadVaultHeader), read(&path));

        fs::write(&path, vec![0xAAu8; HEADER_SIZE]).unwrap();
        assert_matches!(Err(Error::BadVaultHeader), read(&path));
    }

    #[test]
    fn corrupt_payload_fails_digest() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("vault");
        let key = VaultKey::new();
        create(&path, &key.make_config(b"hunter2").unwrap()).unwrap();

        let mut raw = fs::read(&path).unwrap();
        raw[PAYLOAD_OFFSET + 3] ^= 1;
        fs::write(&path, &raw).unwrap();
        assert_matches!(Err(Error::BadVaultHeader), read(&path));
    }

    #[test]
    fn torn_rewrite_restored_from_stage() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("vault");
        let key = VaultKey::new();
        create(&path, &key.make_config(b"hunter2").unwrap()).unwrap();

        // Crash after staging, half way through the in-place write.
        let new_header = encode(&key.make_config(b"hunter3").unwrap()).unwrap();
        stage(&path, &new_header).unwrap();
        let mut raw = fs::read(&path).unwrap();
        raw[..HEADER_SIZE / 2].copy_from_slice(&new_header[..HEADER_SIZE / 2]);
        raw[PAYLOAD_OFFSET..PAYLOAD_OFFSET + 8].fill(0xAA);
        fs::write(&path, &raw).unwrap();

        let config = read(&path).unwrap();
        assert!(VaultKey::from_config(&config, b"hunter3").is_some());
        assert!(!staged_path(&path).exists());
        assert_eq!(new_header, fs::read(&path).unwrap()[..HEADER_SIZE]);
    }

    #[test]
    fn interrupted_staging_keeps_old_header() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("vault");
        let key = VaultKey::new();
        create(&path, &key.make_config(b"hunter2").unwrap()).unwrap();

        fs::write(staged_path(&path), b"partial").unwrap();
        let config = read(&path).unwrap();
        assert!(VaultKey::from_config(&config, b"hunter2").is_some());
        assert!(!staged_path(&path).exists());
    }
}
