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

//! Lifecycle of the vault file and accounting of the connections to it.
//!
//! Every use of the file, including the lifecycle operations themselves,
//! holds a lease on the file for its duration. `reset()` first blocks new
//! leases and then waits for the existing ones to be returned before it
//! deletes anything, so a reset is always ordered entirely before or entirely
//! after any other operation.
//!
//! Lease accounting belongs to the file rather than to a `Vault`: every
//! `Vault` in the process naming the same file shares one `FileGate`. Each
//! `Vault` keeps its own unwrapped key, which a reset through any of them
//! invalidates.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use chrono::prelude::*;
use lazy_static::lazy_static;
use log::{info, warn};

use super::{connection::Connection, header, vfs::XexVfs};
use crate::{
    crypt::vault_key::VaultKey,
    support::{
        error::Error, log_prefix::LogPrefix, store_config::StoreConfig,
    },
};

lazy_static! {
    /// The gates of every file some live `Vault` refers to, by canonical
    /// path.
    static ref GATES: Mutex<HashMap<PathBuf, Weak<FileGate>>> =
        Mutex::new(HashMap::new());
}

/// A password-protected vault at a fixed path.
///
/// A `Vault` starts out closed. It becomes open by `create()` or `open()`,
/// after which `connect()` hands out connections to the decrypted database.
pub struct Vault {
    path: PathBuf,
    config: StoreConfig,
    log_prefix: LogPrefix,
    gate: Arc<FileGate>,
    /// The VFS carrying the unwrapped vault key, tagged with the file
    /// generation it was unwrapped in.
    vfs: Mutex<Option<(u64, Arc<XexVfs>)>>,
}

/// Lease accounting shared by every `Vault` on one file.
struct FileGate {
    state: Mutex<GateState>,
    /// Signalled whenever `leases` drops to zero or `resetting` is cleared.
    cond: Condvar,
    /// Serialises reads and rewrites of the header.
    header_lock: Mutex<()>,
}

#[derive(Default)]
struct GateState {
    leases: usize,
    resetting: bool,
    /// Incremented by every reset.
    generation: u64,
}

impl FileGate {
    fn for_path(path: &Path) -> Arc<Self> {
        let key = canonical_path(path);
        let mut gates = GATES.lock().unwrap_or_else(PoisonError::into_inner);
        gates.retain(|_, gate| gate.strong_count() > 0);

        if let Some(gate) = gates.get(&key).and_then(Weak::upgrade) {
            return gate;
        }

        let gate = Arc::new(FileGate {
            state: Mutex::new(GateState::default()),
            cond: Condvar::new(),
            header_lock: Mutex::new(()),
        });
        gates.insert(key, Arc::downgrade(&gate));
        gate
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        // Nothing panics while holding the lock, and the state is consistent
        // at every unlock point regardless.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(
        &self,
        guard: MutexGuard<'a, GateState>,
    ) -> MutexGuard<'a, GateState> {
        self.cond
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_header(&self) -> MutexGuard<'_, ()> {
        self.header_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves `path` so that different spellings of one file agree.
///
/// The file itself need not exist, but its directory must for the result to
/// be canonical.
fn canonical_path(path: &Path) -> PathBuf {
    let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
        return path.to_owned();
    };
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };

    fs::canonicalize(dir)
        .map(|dir| dir.join(name))
        .unwrap_or_else(|_| path.to_owned())
}

impl Vault {
    pub fn new(path: PathBuf, config: StoreConfig) -> Self {
        Self {
            log_prefix: LogPrefix::for_path(&path),
            gate: FileGate::for_path(&path),
            path,
            config,
            vfs: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_prefix(&self) -> &LogPrefix {
        &self.log_prefix
    }

    /// Returns whether the vault file exists.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Creates a new vault protected by `password` and leaves it open.
    ///
    /// Fails with `VaultAlreadyExists` if the file already exists.
    pub fn create(&self, password: &str) -> Result<(), Error> {
        let lease = self.lease();

        let key = VaultKey::new();
        let key_config = key.make_config(password.as_bytes())?;
        {
            let _header_lock = self.gate.lock_header();
            header::create(&self.path, &key_config)?;
        }

        let vfs = Arc::new(XexVfs::new(Arc::new(key))?);
        // Lay down the schema now so that a vault never exists without one.
        if let Err(e) = Connection::new(
            &self.path,
            &vfs,
            &self.config,
            self.log_prefix.clone(),
        ) {
            // Don't leave a header-only file behind which would block a retry.
            let _ = fs::remove_file(&self.path);
            return Err(e);
        }

        self.install(&lease, vfs);
        info!("{} Created vault", self.log_prefix);
        Ok(())
    }

    /// Opens the existing vault with `password`.
    ///
    /// Fails with `NotCreated` if there is no vault file, or `WrongPassword`
    /// if `password` is incorrect.
    pub fn open(&self, password: &str) -> Result<(), Error> {
        let lease = self.lease();

        let key_config = {
            let _header_lock = self.gate.lock_header();
            header::read(&self.path)?
        };
        let Some(key) = VaultKey::from_config(&key_config, password.as_bytes())
        else {
            warn!("{} Rejected open with wrong password", self.log_prefix);
            return Err(Error::WrongPassword);
        };

        let vfs = Arc::new(XexVfs::new(Arc::new(key))?);
        // Opening a connection reads the schema, which proves that the key
        // actually decrypts the file.
        Connection::new(&self.path, &vfs, &self.config, self.log_prefix.clone())?;

        self.install(&lease, vfs);
        info!("{} Opened vault", self.log_prefix);
        Ok(())
    }

    /// Changes the password protecting the vault from `old` to `new`.
    ///
    /// Only the header is rewritten: the vault key, and therefore everything
    /// encrypted under it, is unchanged, as are any open connections. The
    /// rewrite is staged through a sidecar file, so a crash part way through
    /// leaves either the old or the new password in effect.
    pub fn change_password(&self, old: &str, new: &str) -> Result<(), Error> {
        let _lease = self.lease();
        let _header_lock = self.gate.lock_header();

        let key_config = header::read(&self.path)?;
        let Some(key) = VaultKey::from_config(&key_config, old.as_bytes())
        else {
            warn!(
                "{} Rejected password change with wrong password",
                self.log_prefix,
            );
            return Err(Error::WrongPassword);
        };

        let mut new_config = key.make_config(new.as_bytes())?;
        new_config.last_changed = Some(Utc::now());
        header::rewrite(&self.path, &new_config)?;

        info!("{} Changed vault password", self.log_prefix);
        Ok(())
    }

    /// Deletes the vault file and forgets the key.
    ///
    /// Blocks until every outstanding connection to the file has been
    /// dropped, including those of other `Vault`s on the same path.
    /// Operations which start while this is waiting are held until it
    /// completes.
    pub fn reset(&self) -> Result<(), Error> {
        let gate = &self.gate;
        let mut state = gate.lock_state();
        while state.resetting {
            state = gate.wait(state);
        }

        state.resetting = true;
        while state.leases > 0 {
            state = gate.wait(state);
        }

        let result = remove_if_exists(&self.path)
            .and_then(|()| remove_if_exists(&journal_path(&self.path)))
            .and_then(|()| header::discard_staged(&self.path));
        state.generation += 1;
        *self.lock_vfs() = None;
        state.resetting = false;
        drop(state);
        gate.cond.notify_all();

        result?;
        info!("{} Reset vault", self.log_prefix);
        Ok(())
    }

    /// Opens a new connection to the vault.
    ///
    /// Fails with `NotCreated` if the vault does not exist, or `NotOpened` if
    /// it exists but has not been opened through this `Vault` since it was
    /// last created.
    pub fn connect(&self) -> Result<Handle, Error> {
        let lease = self.lease();
        if !self.exists() {
            return Err(Error::NotCreated);
        }
        let Some(vfs) = lease.vfs.clone() else {
            return Err(Error::NotOpened);
        };

        let cxn = Connection::new(
            &self.path,
            &vfs,
            &self.config,
            self.log_prefix.clone(),
        )?;

        Ok(Handle {
            cxn,
            _vfs: vfs,
            _lease: lease,
        })
    }

    /// Returns the number of outstanding leases on the file, including
    /// connections, across every `Vault` sharing it.
    pub fn outstanding(&self) -> usize {
        self.gate.lock_state().leases
    }

    fn lease(&self) -> Lease {
        let mut state = self.gate.lock_state();
        while state.resetting {
            state = self.gate.wait(state);
        }

        state.leases += 1;
        let generation = state.generation;
        drop(state);

        // A key unwrapped before the last reset belongs to a file that no
        // longer exists.
        let vfs = self
            .lock_vfs()
            .as_ref()
            .filter(|&&(vfs_generation, _)| vfs_generation == generation)
            .map(|(_, vfs)| Arc::clone(vfs));

        Lease {
            vfs,
            generation,
            gate: Arc::clone(&self.gate),
        }
    }

    fn install(&self, lease: &Lease, vfs: Arc<XexVfs>) {
        *self.lock_vfs() = Some((lease.generation, vfs));
    }

    fn lock_vfs(&self) -> MutexGuard<'_, Option<(u64, Arc<XexVfs>)>> {
        self.vfs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registration of one in-progress use of the file.
struct Lease {
    /// The VFS as of when the lease was taken.
    vfs: Option<Arc<XexVfs>>,
    /// The file generation, which cannot change while the lease is held.
    generation: u64,
    gate: Arc<FileGate>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut state = self.gate.lock_state();
        state.leases -= 1;
        let idle = 0 == state.leases;
        drop(state);

        if idle {
            self.gate.cond.notify_all();
        }
    }
}
/// A connection to an open vault.
///
/// The vault cannot be reset while any `Handle` is alive.
pub struct Handle {
    // Field order matters: the connection must close before the lease is
    // returned.
    cxn: Connection,
    _vfs: Arc<XexVfs>,
    _lease: Lease,
}

impl Deref for Handle {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.cxn
    }
}

impl DerefMut for Handle {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.cxn
    }
}

fn journal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("-journal");
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> Result<(), Error> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rayon::prelude::*;
    use tempfile::TempDir;

    use super::*;

    struct Fixture {
        _tmpdir: TempDir,
        vault: Arc<Vault>,
    }

    impl Fixture {
        fn new() -> Self {
            crate::init_test_log();

            let tmpdir = TempDir::new().unwrap();
            let vault = Arc::new(Vault::new(
                tmpdir.path().join("mail.vault"),
                StoreConfig::default(),
            ));
            Self {
                _tmpdir: tmpdir,
                vault,
            }
        }

        fn reopen(&self) -> Arc<Vault> {
            Arc::new(Vault::new(
                self.vault.path().to_owned(),
                StoreConfig::default(),
            ))
        }
    }

    #[test]
    fn lifecycle() {
        let fixture = Fixture::new();
        let vault = &fixture.vault;

        assert!(!vault.exists());
        assert_matches!(Err(Error::NotCreated), vault.open("p1"));
        assert_matches!(Err(Error::NotCreated), vault.connect().map(|_| ()));

        vault.create("p1").unwrap();
        assert!(vault.exists());
        assert_matches!(Err(Error::VaultAlreadyExists), vault.create("p1"));
        vault.connect().unwrap();

        let vault = fixture.reopen();
        assert_matches!(Err(Error::NotOpened), vault.connect().map(|_| ()));
        assert_matches!(Err(Error::WrongPassword), vault.open("p2"));
        assert_matches!(Err(Error::NotOpened), vault.connect().map(|_| ()));
        vault.open("p1").unwrap();
        vault.connect().unwrap();

        assert_matches!(
            Err(Error::WrongPassword),
            vault.change_password("p2", "p3"),
        );
        vault.change_password("p1", "p2").unwrap();
        // The existing key remains usable.
        vault.connect().unwrap();

        let vault = fixture.reopen();
        assert_matches!(Err(Error::WrongPassword), vault.open("p1"));
        vault.open("p2").unwrap();

        vault.reset().unwrap();
        assert!(!vault.exists());
        assert_matches!(Err(Error::NotCreated), vault.connect().map(|_| ()));
        assert_matches!(Err(Error::NotCreated), vault.open("p2"));

        vault.create("p4").unwrap();
        vault.connect().unwrap();
    }

    #[test]
    fn file_does_not_contain_cleartext() {
        let fixture = Fixture::new();
        fixture.vault.create("hunter2").unwrap();
        {
            let handle = fixture.vault.connect().unwrap();
            handle
                .cxn
                .cxn
                .execute(
                    "INSERT INTO `pgp_keys` (`kind`, `data`) \
                     VALUES ('public', ?)",
                    (&b"plugh xyzzy plugh xyzzy"[..],),
                )
                .unwrap();
        }

        let raw = fs::read(fixture.vault.path()).unwrap();
        assert!(!raw.windows(5).any(|w| w == b"plugh"));
        assert!(!raw.windows(6).any(|w| w == b"SQLite"));
        assert!(!journal_path(fixture.vault.path()).exists());
    }

    #[test]
    fn reset_waits_for_handles() {
        let fixture = Fixture::new();
        fixture.vault.create("hunter2").unwrap();

        let handle = fixture.vault.connect().unwrap();
        assert_eq!(1, fixture.vault.outstanding());

        let vault = Arc::clone(&fixture.vault);
        let resetter = std::thread::spawn(move || vault.reset());

        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(fixture.vault.exists());
        drop(handle);

        resetter.join().unwrap().unwrap();
        assert!(!fixture.vault.exists());
        assert_eq!(0, fixture.vault.outstanding());
    }

    #[test]
    fn reset_waits_for_handles_of_other_vaults_on_the_file() {
        let fixture = Fixture::new();
        let a = &fixture.vault;
        let b = fixture.reopen();
        // A different spelling of the same path shares the same lease state.
        let c = Arc::new(Vault::new(
            fixture
                .vault
                .path()
                .parent()
                .unwrap()
                .join(".")
                .join("mail.vault"),
            StoreConfig::default(),
        ));

        a.create("hunter2").unwrap();
        b.open("hunter2").unwrap();
        c.open("hunter2").unwrap();
        let handle = b.connect().unwrap();
        assert_eq!(1, a.outstanding());
        assert_eq!(1, c.outstanding());

        let resetter = {
            let a = Arc::clone(a);
            std::thread::spawn(move || a.reset())
        };

        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(a.exists());
        handle
            .cxn
            .cxn
            .execute(
                "INSERT INTO `pgp_keys` (`kind`, `data`) VALUES ('secret', ?)",
                (&b"still here"[..],),
            )
            .unwrap();
        drop(handle);

        resetter.join().unwrap().unwrap();
        assert!(!a.exists());
        assert_eq!(0, b.outstanding());
        assert_matches!(Err(Error::NotCreated), b.connect().map(|_| ()));

        // The key b unwrapped belongs to the old file.
        a.create("swordfish").unwrap();
        assert_matches!(Err(Error::NotOpened), b.connect().map(|_| ()));
        assert_matches!(Err(Error::NotOpened), c.connect().map(|_| ()));
        b.open("swordfish").unwrap();
        b.connect().unwrap();
    }

    #[test]
    fn concurrent_opens_racing_reset() {
        let fixture = Fixture::new();
        fixture.vault.create("hunter2").unwrap();

        let opened = AtomicUsize::new(0);
        let not_created = AtomicUsize::new(0);

        (0..100).into_par_iter().for_each(|i| {
            if 50 == i {
                fixture.vault.reset().unwrap();
                return;
            }

            match fixture.vault.open("hunter2") {
                Ok(()) => {},
                Err(Error::NotCreated) => {
                    not_created.fetch_add(1, Ordering::Relaxed);
                    return;
                },
                Err(e) => panic!("Unexpected error: {e}"),
            }

            match fixture.vault.connect() {
                Ok(handle) => {
                    handle
                        .cxn
                        .cxn
                        .query_row(
                            "SELECT COUNT(*) FROM `account`",
                            (),
                            |row| row.get::<_, i64>(0),
                        )
                        .unwrap();
                    opened.fetch_add(1, Ordering::Relaxed);
                },
                // The reset may land between the open and the connect.
                Err(Error::NotCreated) => {
                    not_created.fetch_add(1, Ordering::Relaxed);
                },
                Err(e) => panic!("Unexpected error: {e}"),
            }
        });

        assert_eq!(
            99,
            opened.load(Ordering::Relaxed)
                + not_created.load(Ordering::Relaxed),
        );
        assert_eq!(0, fixture.vault.outstanding());
        assert!(!fixture.vault.exists());

        fixture.vault.create("hunter2").unwrap();
        fixture.vault.connect().unwrap();
    }
}
