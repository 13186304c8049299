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

//! The SQLite VFS which encrypts every file of a vault.
//!
//! Each `XexVfs` is bound to one unwrapped `VaultKey` and layers encryption
//! over SQLite's default VFS, which does the actual I/O. Files are assigned a
//! role from the flags SQLite opens them with, and each role gets its own
//! pair of XEX keys:
//!
//! - `main`: the vault itself. The first `HEADER_SIZE` bytes of the physical
//!   file are the cleartext vault header, which this layer hides from SQLite
//!   entirely; logical offset 0 is physical offset `HEADER_SIZE`.
//! - `journal`: the rollback journal.
//! - `aux`: anything else (statement journals, temporary files).
//!
//! Only version 1 of the I/O methods is provided. The vault always runs in
//! rollback-journal mode, so neither shared memory nor memory-mapped I/O is
//! ever requested.

use std::cell::UnsafeCell;
use std::convert::TryFrom;
use std::ffi::{CStr, CString};
use std::mem;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use libsqlite3_sys::*;
use log::error;

use super::header::HEADER_SIZE;
use crate::{
    crypt::{vault_key::VaultKey, xex, AES_BLOCK64},
    support::error::Error,
};

/// A registered SQLite VFS encrypting with one vault key.
///
/// Names come from a process-wide counter so that nothing about the vault
/// appears in them. The VFS stays registered until both this value and every
/// file opened through it are gone.
pub struct XexVfs {
    registration: Arc<Registration>,
}

impl XexVfs {
    pub fn new(key: Arc<VaultKey>) -> Result<Self, Error> {
        // Safety: a null name asks for the default VFS, which lives as long
        // as the process.
        let base_vfs = unsafe { sqlite3_vfs_find(ptr::null()) };
        if base_vfs.is_null() {
            return Err(Error::Vfs(SQLITE_NOTFOUND));
        }
        // Safety: checked non-null above.
        let base = unsafe { &*base_vfs };

        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        let name = CString::new(format!(
            "mailvault{}",
            NEXT_ID.fetch_add(1, Ordering::Relaxed),
        ))
        .map_err(|_| Error::Vfs(SQLITE_MISUSE))?;

        let registration = Arc::new_cyclic(|weak| {
            let state = Box::new(VfsState {
                key,
                registration: weak.clone(),
                base_vfs,
            });

            Registration {
                vfs: UnsafeCell::new(sqlite3_vfs {
                    iVersion: 2,
                    szOsFile: mem::size_of::<EncryptedFile>() as c_int,
                    mxPathname: base.mxPathname,
                    pNext: ptr::null_mut(),
                    zName: name.as_ptr(),
                    pAppData: Box::into_raw(state).cast(),
                    xOpen: Some(vfs_open),
                    xDelete: Some(vfs_delete),
                    xAccess: Some(vfs_access),
                    xFullPathname: Some(vfs_full_pathname),
                    xDlOpen: None,
                    xDlError: None,
                    xDlSym: None,
                    xDlClose: None,
                    xRandomness: base.xRandomness.and(Some(vfs_randomness)),
                    xSleep: base.xSleep.and(Some(vfs_sleep)),
                    xCurrentTime: base
                        .xCurrentTime
                        .and(Some(vfs_current_time)),
                    xGetLastError: base
                        .xGetLastError
                        .and(Some(vfs_get_last_error)),
                    xCurrentTimeInt64: base
                        .xCurrentTimeInt64
                        .and(Some(vfs_current_time_int64)),
                    xSetSystemCall: None,
                    xGetSystemCall: None,
                    xNextSystemCall: None,
                }),
                name,
            }
        });

        // Safety: the `sqlite3_vfs` is pinned inside the Arc, and is only
        // unregistered once no open file refers to it.
        let rc = unsafe {
            sqlite3_vfs_register(UnsafeCell::raw_get(&registration.vfs), 0)
        };
        if 0 != rc {
            return Err(Error::Vfs(rc));
        }

        Ok(Self { registration })
    }

    pub fn name(&self) -> &str {
        // Always ASCII.
        self.registration.name.to_str().unwrap_or_default()
    }
}

/// The registered `sqlite3_vfs`, unregistered and freed on drop.
///
/// Every open file holds a strong reference.
struct Registration {
    vfs: UnsafeCell<sqlite3_vfs>,
    /// Pointed to by `vfs.zName`.
    name: CString,
}

// Safety: after construction, the only fields of `vfs` ever read are
// immutable, and SQLite itself serialises registration changes.
unsafe impl Send for Registration {}
unsafe impl Sync for Registration {}

impl Drop for Registration {
    fn drop(&mut self) {
        // Safety: `pAppData` was produced by `Box::into_raw` and nothing else
        // frees it. Unregistering a VFS that never got registered is a no-op.
        unsafe {
            let vfs = self.vfs.get();
            sqlite3_vfs_unregister(vfs);
            let state = mem::replace(&mut (*vfs).pAppData, ptr::null_mut());
            if !state.is_null() {
                drop(Box::<VfsState>::from_raw(state.cast()));
            }
        }
    }
}

/// What `sqlite3_vfs::pAppData` points to.
struct VfsState {
    key: Arc<VaultKey>,
    registration: Weak<Registration>,
    /// The default VFS, which does the actual I/O.
    base_vfs: *mut sqlite3_vfs,
}

unsafe fn state_of<'a>(vfs: *mut sqlite3_vfs) -> &'a VfsState {
    &*(*vfs).pAppData.cast::<VfsState>()
}

/// Determines the key role and the header length of a file from its open
/// flags.
fn file_role(flags: c_int) -> (&'static str, u64) {
    if 0 != flags & SQLITE_OPEN_MAIN_DB {
        ("main", HEADER_SIZE as u64)
    } else if 0 != flags & SQLITE_OPEN_MAIN_JOURNAL {
        ("journal", 0)
    } else {
        ("aux", 0)
    }
}

impl VfsState {
    unsafe fn open(
        &self,
        name: *const c_char,
        file: *mut sqlite3_file,
        flags: c_int,
        out_flags: *mut c_int,
    ) -> c_int {
        let Some(registration) = self.registration.upgrade() else {
            error!("BUG: file opened through a dropped VFS");
            return SQLITE_IOERR_CONVPATH;
        };

        // A null name is an anonymous temporary file, which the base VFS
        // names itself. It is still encrypted under the aux role.
        if !name.is_null() && CStr::from_ptr(name).to_str().is_err() {
            return SQLITE_IOERR_CONVPATH;
        }

        let (role, header_len) = file_role(flags);
        let xex = match xex::Xex::new(&self.key.xex_keys(role)) {
            Ok(xex) => xex,
            Err(e) => {
                error!("BUG: XEX setup for {role} failed: {e:?}");
                return SQLITE_IOERR_AUTH;
            },
        };

        let inner: *mut sqlite3_file =
            sqlite3_malloc((*self.base_vfs).szOsFile).cast();
        if inner.is_null() {
            return SQLITE_NOMEM;
        }

        let rc = match (*self.base_vfs).xOpen {
            Some(open) => open(self.base_vfs, name, inner, flags, out_flags),
            None => SQLITE_NOTFOUND,
        };
        if 0 != rc {
            sqlite3_free(inner.cast());
            return rc;
        }

        ptr::write(
            file.cast::<EncryptedFile>(),
            EncryptedFile {
                base: sqlite3_file {
                    pMethods: &ENCRYPTED_FILE_METHODS,
                },
                inner,
                base_vfs: self.base_vfs,
                xex,
                header_len,
                _registration: registration,
            },
        );
        0
    }
}

/// Generates `sqlite3_vfs` entry points which go straight to the base VFS.
macro_rules! vfs_passthrough {
    ($($shim:ident => $method:ident($($arg:ident: $ty:ty),*);)*) => {$(
        unsafe extern "C" fn $shim(
            vfs: *mut sqlite3_vfs $(, $arg: $ty)*
        ) -> c_int {
            let base = state_of(vfs).base_vfs;
            match (*base).$method {
                Some(f) => f(base $(, $arg)*),
                None => SQLITE_NOTFOUND,
            }
        }
    )*};
}

vfs_passthrough! {
    vfs_delete => xDelete(name: *const c_char, sync_dir: c_int);
    vfs_access => xAccess(name: *const c_char, flags: c_int, out: *mut c_int);
    vfs_full_pathname =>
        xFullPathname(name: *const c_char, n: c_int, out: *mut c_char);
    vfs_randomness => xRandomness(n: c_int, out: *mut c_char);
    vfs_sleep => xSleep(micros: c_int);
    vfs_current_time => xCurrentTime(out: *mut f64);
    vfs_get_last_error => xGetLastError(n: c_int, out: *mut c_char);
    vfs_current_time_int64 => xCurrentTimeInt64(out: *mut sqlite3_int64);
}

unsafe extern "C" fn vfs_open(
    vfs: *mut sqlite3_vfs,
    name: *const c_char,
    file: *mut sqlite3_file,
    flags: c_int,
    out_flags: *mut c_int,
) -> c_int {
    state_of(vfs).open(name, file, flags, out_flags)
}

/// The `sqlite3_file` subclass handed out by `XexVfs`.
#[repr(C)]
struct EncryptedFile {
    base: sqlite3_file,
    /// The file opened by the base VFS, allocated with `sqlite3_malloc`.
    inner: *mut sqlite3_file,
    base_vfs: *mut sqlite3_vfs,
    xex: xex::Xex,
    /// Cleartext bytes at the start of the physical file.
    header_len: u64,
    _registration: Arc<Registration>,
}

impl Drop for EncryptedFile {
    fn drop(&mut self) {
        // Safety: allocated by `VfsState::open` and owned exclusively.
        unsafe { sqlite3_free(self.inner.cast()) };
        self.inner = ptr::null_mut();
    }
}

/// Calls an I/O method of the wrapped file, yielding 0 if it has none.
macro_rules! inner_call {
    ($this:expr, $method:ident($($arg:expr),*)) => {{
        let inner = $this.inner;
        match (*(*inner).pMethods).$method {
            Some(f) => f(inner $(, $arg)*),
            None => 0,
        }
    }};
}

impl EncryptedFile {
    fn ciphertext(&self) -> Ciphertext {
        Ciphertext {
            inner: self.inner,
            header_len: self.header_len,
        }
    }

    unsafe fn read_at(&mut self, dst: &mut [u8], offset: u64) -> c_int {
        let mut ciphertext = self.ciphertext();
        // Anything past the end is zero-filled, which is exactly what SQLite
        // expects alongside SHORT_READ.
        match self.xex.read(&mut ciphertext, dst, offset) {
            Ok(n) if n == dst.len() => 0,
            Ok(_) => SQLITE_IOERR_SHORT_READ,
            Err(rc) => rc,
        }
    }

    unsafe fn write_at(&mut self, src: &[u8], offset: u64) -> c_int {
        let mut ciphertext = self.ciphertext();
        match self.xex.write(&mut ciphertext, src, offset) {
            Ok(()) => 0,
            Err(rc) => rc,
        }
    }

    unsafe fn truncate_to(&mut self, len: u64) -> c_int {
        // Blocks can't be split, so the logical length rounds up.
        let physical = len
            .div_ceil(AES_BLOCK64)
            .checked_mul(AES_BLOCK64)
            .and_then(|len| len.checked_add(self.header_len))
            .and_then(|len| i64::try_from(len).ok());
        match physical {
            Some(physical) => inner_call!(self, xTruncate(physical)),
            None => SQLITE_IOERR_TRUNCATE,
        }
    }

    unsafe fn logical_len(&self) -> Result<i64, c_int> {
        let len = xex::Backing::len(&mut self.ciphertext())?;
        Ok(i64::try_from(len).unwrap_or(i64::MAX))
    }

    unsafe fn control(&mut self, op: c_int, arg: *mut c_void) -> c_int {
        match op {
            SQLITE_FCNTL_LOCKSTATE
            | SQLITE_FCNTL_SYNC
            | SQLITE_FCNTL_COMMIT_PHASETWO
            | SQLITE_FCNTL_WIN32_AV_RETRY
            | SQLITE_FCNTL_POWERSAFE_OVERWRITE
            | SQLITE_FCNTL_OVERWRITE
            | SQLITE_FCNTL_PRAGMA
            | SQLITE_FCNTL_BUSYHANDLER
            | SQLITE_FCNTL_TRACE
            | SQLITE_FCNTL_HAS_MOVED
            | SQLITE_FCNTL_LOCK_TIMEOUT => {
                inner_call!(self, xFileControl(op, arg))
            },

            SQLITE_FCNTL_VFS_POINTER => {
                *arg.cast::<*mut sqlite3_vfs>() = self.base_vfs;
                0
            },

            // Size hints and chunk sizes are in logical offsets the base VFS
            // can't interpret. Atomic batch writes can't pass through a
            // read-modify-write layer.
            _ => SQLITE_NOTFOUND,
        }
    }

    unsafe fn characteristics(&self) -> c_int {
        let mut caps = inner_call!(self, xDeviceCharacteristics());
        // Whole-sector atomicity only survives down to the cipher block.
        if 0 != caps & SQLITE_IOCAP_ATOMIC {
            caps = caps & !SQLITE_IOCAP_ATOMIC | SQLITE_IOCAP_ATOMIC512;
        }
        caps & !SQLITE_IOCAP_BATCH_ATOMIC
    }
}

/// The wrapped file past its header, as seen by the XEX layer.
struct Ciphertext {
    inner: *mut sqlite3_file,
    header_len: u64,
}

impl Ciphertext {
    fn physical(&self, offset: u64) -> Result<i64, c_int> {
        offset
            .checked_add(self.header_len)
            .and_then(|o| i64::try_from(o).ok())
            .ok_or(SQLITE_IOERR_SEEK)
    }
}

fn check(rc: c_int) -> Result<(), c_int> {
    match rc {
        0 => Ok(()),
        rc => Err(rc),
    }
}

impl xex::Backing for Ciphertext {
    type Error = c_int;

    fn read(&mut self, dst: &mut [u8], offset: u64) -> Result<(), c_int> {
        let len = c_int::try_from(dst.len()).map_err(|_| SQLITE_IOERR_READ)?;
        let offset = self.physical(offset)?;
        // Safety: `inner` is open for as long as its `EncryptedFile` is.
        let rc = unsafe {
            inner_call!(self, xRead(dst.as_mut_ptr().cast(), len, offset))
        };
        match rc {
            // The XEX layer never reads past `len()`, so a short read means
            // the file shrank underneath us.
            SQLITE_IOERR_SHORT_READ => Err(SQLITE_IOERR_READ),
            rc => check(rc),
        }
    }

    fn write(&mut self, src: &[u8], offset: u64) -> Result<(), c_int> {
        let len = c_int::try_from(src.len()).map_err(|_| SQLITE_IOERR_WRITE)?;
        let offset = self.physical(offset)?;
        // Safety: as in `read`.
        check(unsafe {
            inner_call!(self, xWrite(src.as_ptr().cast(), len, offset))
        })
    }

    fn len(&mut self) -> Result<u64, c_int> {
        let mut physical: i64 = 0;
        // Safety: as in `read`.
        check(unsafe { inner_call!(self, xFileSize(&mut physical)) })?;
        u64::try_from(physical)
            .map(|len| len.saturating_sub(self.header_len))
            .map_err(|_| SQLITE_IOERR_FSTAT)
    }

    fn encryption_error() -> c_int {
        SQLITE_IOERR_AUTH
    }
}

unsafe fn this<'a>(file: *mut sqlite3_file) -> &'a mut EncryptedFile {
    &mut *file.cast::<EncryptedFile>()
}

/// Generates I/O methods which go straight to the wrapped file.
macro_rules! file_passthrough {
    ($($shim:ident => $method:ident($($arg:ident: $ty:ty),*);)*) => {$(
        unsafe extern "C" fn $shim(
            file: *mut sqlite3_file $(, $arg: $ty)*
        ) -> c_int {
            inner_call!(this(file), $method($($arg),*))
        }
    )*};
}

file_passthrough! {
    file_sync => xSync(flags: c_int);
    file_lock => xLock(level: c_int);
    file_unlock => xUnlock(level: c_int);
    file_check_reserved_lock => xCheckReservedLock(out: *mut c_int);
    file_sector_size => xSectorSize();
}

unsafe extern "C" fn file_close(file: *mut sqlite3_file) -> c_int {
    let rc = inner_call!(this(file), xClose());
    // SQLite frees the memory itself; only the contents are ours.
    ptr::drop_in_place(file.cast::<EncryptedFile>());
    rc
}

unsafe extern "C" fn file_read(
    file: *mut sqlite3_file,
    dst: *mut c_void,
    len: c_int,
    offset: sqlite3_int64,
) -> c_int {
    match (usize::try_from(len), u64::try_from(offset)) {
        (Ok(len), Ok(offset)) => this(file).read_at(
            std::slice::from_raw_parts_mut(dst.cast::<u8>(), len),
            offset,
        ),
        (Err(_), _) => SQLITE_IOERR_READ,
        (_, Err(_)) => SQLITE_IOERR_SEEK,
    }
}

unsafe extern "C" fn file_write(
    file: *mut sqlite3_file,
    src: *const c_void,
    len: c_int,
    offset: sqlite3_int64,
) -> c_int {
    match (usize::try_from(len), u64::try_from(offset)) {
        (Ok(len), Ok(offset)) => this(file).write_at(
            std::slice::from_raw_parts(src.cast::<u8>(), len),
            offset,
        ),
        (Err(_), _) => SQLITE_IOERR_WRITE,
        (_, Err(_)) => SQLITE_IOERR_SEEK,
    }
}

unsafe extern "C" fn file_truncate(
    file: *mut sqlite3_file,
    len: sqlite3_int64,
) -> c_int {
    match u64::try_from(len) {
        Ok(len) => this(file).truncate_to(len),
        Err(_) => SQLITE_IOERR_TRUNCATE,
    }
}

unsafe extern "C" fn file_size(
    file: *mut sqlite3_file,
    out: *mut sqlite3_int64,
) -> c_int {
    match this(file).logical_len() {
        Ok(len) => {
            *out = len;
            0
        },
        Err(rc) => rc,
    }
}

unsafe extern "C" fn file_control(
    file: *mut sqlite3_file,
    op: c_int,
    arg: *mut c_void,
) -> c_int {
    this(file).control(op, arg)
}

unsafe extern "C" fn file_device_characteristics(
    file: *mut sqlite3_file,
) -> c_int {
    this(file).characteristics()
}

static ENCRYPTED_FILE_METHODS: sqlite3_io_methods = sqlite3_io_methods {
    iVersion: 1,
    xClose: Some(file_close),
    xRead: Some(file_read),
    xWrite: Some(file_write),
    xTruncate: Some(file_truncate),
    xSync: Some(file_sync),
    xFileSize: Some(file_size),
    xLock: Some(file_lock),
    xUnlock: Some(file_unlock),
    xCheckReservedLock: Some(file_check_reserved_lock),
    xFileControl: Some(file_control),
    xSectorSize: Some(file_sector_size),
    xDeviceCharacteristics: Some(file_device_characteristics),
    xShmMap: None,
    xShmLock: None,
    xShmBarrier: None,
    xShmUnmap: None,
    xFetch: None,
    xUnfetch: None,
};
