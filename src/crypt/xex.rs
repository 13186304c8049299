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

//! XEX (Xor-Encrypt-Xor) mode on AES-128 with random-access read/write of the
//! underlying data. It is the page-level encryption of the vault database.
//!
//! Each 16-byte block at index `n` (its file offset divided by 16) is
//! transformed as
//!
//! ```text
//!   tweak(n)   = encrypt_ecb(tweak_key, le128(n))
//!   ciphertext = tweak(n) ^ encrypt_ecb(data_key, tweak(n) ^ cleartext)
//! ```
//!
//! This is the two-key construction of XTS with the tweak sequence produced
//! by encrypting the block index directly rather than by repeated
//! multiplication in GF(2**128). One AES operation per block for the tweak is
//! cheap here because tweaks for a whole run of blocks are encrypted in a
//! single ECB call.
//!
//! Writes that do not cover whole blocks are handled with a read-modify-write
//! of the edge blocks. Writes extending past the end of the file are padded
//! to a whole block, so the backing store is always a multiple of 16 bytes
//! long. SQLite tolerates arbitrary garbage at the end of its files.

use std::mem;

use openssl::symm::{Cipher, Crypter, Mode};

use super::{vault_key::XexKeys, AES_BLOCK, AES_BLOCK64};

/// The backing store on which XEX operates.
///
/// In the real database, this delegates to the `sqlite3_file` obtained from
/// SQLite's default VFS.
pub trait Backing {
    type Error;

    /// Fill `dst` by reading bytes starting at `offset`.
    ///
    /// Returns an error if `dst` cannot be filled.
    fn read(&mut self, dst: &mut [u8], offset: u64) -> Result<(), Self::Error>;
    /// Write the full contents of `src` at `offset`.
    fn write(&mut self, src: &[u8], offset: u64) -> Result<(), Self::Error>;
    /// Returns the length of the backing store.
    fn len(&mut self) -> Result<u64, Self::Error>;
    /// Returns an appropriate error representing an encryption error.
    fn encryption_error() -> Self::Error;
}

/// The number of blocks run through OpenSSL per call.
///
/// 256 blocks is one 4kB database page.
const GROUP_BLOCKS: usize = 256;
const GROUP_BYTES: usize = GROUP_BLOCKS * AES_BLOCK;

/// The contextual state for XEX mode.
///
/// This does not contain the `Backing` to simplify lifetime management.
pub struct Xex {
    data_enc: Crypter,
    data_dec: Crypter,
    tweak_enc: Crypter,

    // Reusable buffers. OpenSSL demands one extra block of output space.
    tweak_in: Vec<u8>,
    tweaks: Vec<u8>,
    crypt_out: Vec<u8>,
    scratch: Vec<u8>,
}

impl Xex {
    pub fn new(keys: &XexKeys) -> Result<Self, crate::support::error::Error> {
        fn ecb(key: &[u8], mode: Mode) -> Result<Crypter, openssl::error::ErrorStack> {
            let mut crypter = Crypter::new(Cipher::aes_128_ecb(), mode, key, None)?;
            crypter.pad(false);
            Ok(crypter)
        }

        Ok(Self {
            data_enc: ecb(&keys.data, Mode::Encrypt)?,
            data_dec: ecb(&keys.data, Mode::Decrypt)?,
            tweak_enc: ecb(&keys.tweak, Mode::Encrypt)?,
            tweak_in: vec![0u8; GROUP_BYTES],
            tweaks: vec![0u8; GROUP_BYTES + AES_BLOCK],
            crypt_out: vec![0u8; GROUP_BYTES + AES_BLOCK],
            scratch: Vec::new(),
        })
    }

    /// Fills `dst` from `backing` starting at `offset`.
    ///
    /// Returns the number of bytes which were actually present in the backing
    /// store. If this is less than `dst.len()`, the rest of `dst` is zeroed.
    pub fn read<B: Backing>(
        &mut self,
        backing: &mut B,
        dst: &mut [u8],
        offset: u64,
    ) -> Result<usize, B::Error> {
        if dst.is_empty() {
            return Ok(0);
        }

        let end = offset + dst.len() as u64;
        let file_end = align_down(backing.len()?);

        if offset % AES_BLOCK64 == 0 && end % AES_BLOCK64 == 0 && end <= file_end
        {
            // The common case for database pages: decrypt in place.
            backing.read(dst, offset)?;
            self.crypt::<B>(dst, offset, false)?;
            return Ok(dst.len());
        }

        let start = align_down(offset);
        let avail_end = align_up(end).min(file_end);
        if avail_end <= offset {
            dst.fill(0);
            return Ok(0);
        }

        let mut buf = mem::take(&mut self.scratch);
        buf.clear();
        buf.resize((avail_end - start) as usize, 0);
        let result = backing
            .read(&mut buf, start)
            .and_then(|()| self.crypt::<B>(&mut buf, start, false));

        let avail = if result.is_ok() {
            let avail = ((avail_end - offset) as usize).min(dst.len());
            dst[..avail]
                .copy_from_slice(&buf[(offset - start) as usize..][..avail]);
            dst[avail..].fill(0);
            avail
        } else {
            0
        };

        self.scratch = buf;
        result.map(|()| avail)
    }

    /// Writes all of `src` to `backing` at `offset`.
    pub fn write<B: Backing>(
        &mut self,
        backing: &mut B,
        src: &[u8],
        offset: u64,
    ) -> Result<(), B::Error> {
        if src.is_empty() {
            return Ok(());
        }

        let start = align_down(offset);
        let end = align_up(offset + src.len() as u64);
        let head_partial = start != offset;
        let tail_partial = end != offset + src.len() as u64;

        let mut buf = mem::take(&mut self.scratch);
        buf.clear();
        buf.resize((end - start) as usize, 0);

        let result = self
            .load_edges(backing, &mut buf, start, head_partial, tail_partial)
            .and_then(|()| {
                buf[(offset - start) as usize..][..src.len()]
                    .copy_from_slice(src);
                self.crypt::<B>(&mut buf, start, true)
            })
            .and_then(|()| backing.write(&buf, start));

        self.scratch = buf;
        result
    }

    /// Decrypts the existing content of the partially overwritten blocks at
    /// either end of `buf` (which covers `start..start+buf.len()`).
    ///
    /// Blocks beyond the end of the backing store are left as zeroes.
    fn load_edges<B: Backing>(
        &mut self,
        backing: &mut B,
        buf: &mut [u8],
        start: u64,
        head_partial: bool,
        tail_partial: bool,
    ) -> Result<(), B::Error> {
        if !head_partial && !tail_partial {
            return Ok(());
        }

        let file_end = align_down(backing.len()?);
        let last_block = buf.len() - AES_BLOCK;
        let last_block_offset = start + last_block as u64;

        if head_partial && start < file_end {
            backing.read(&mut buf[..AES_BLOCK], start)?;
            self.crypt::<B>(&mut buf[..AES_BLOCK], start, false)?;
        }

        if tail_partial
            && last_block_offset < file_end
            && !(head_partial && 0 == last_block)
        {
            backing.read(&mut buf[last_block..], last_block_offset)?;
            self.crypt::<B>(&mut buf[last_block..], last_block_offset, false)?;
        }

        Ok(())
    }

    /// Encrypts or decrypts `data` in place. `data` must be a whole number of
    /// blocks representing file content starting at the block-aligned
    /// `offset`.
    fn crypt<B: Backing>(
        &mut self,
        data: &mut [u8],
        offset: u64,
        encrypt: bool,
    ) -> Result<(), B::Error> {
        debug_assert_eq!(0, offset % AES_BLOCK64);
        debug_assert_eq!(0, data.len() % AES_BLOCK);

        let first_block = offset / AES_BLOCK64;
        for (group_ix, group) in data.chunks_mut(GROUP_BYTES).enumerate() {
            let group_first_block =
                first_block + (group_ix * GROUP_BLOCKS) as u64;

            // Generate all the tweaks for this group in one go.
            let tweak_in = &mut self.tweak_in[..group.len()];
            for (i, chunk) in tweak_in.chunks_exact_mut(AES_BLOCK).enumerate() {
                let index = u128::from(group_first_block + i as u64);
                chunk.copy_from_slice(&index.to_le_bytes());
            }
            let n = self
                .tweak_enc
                .update(tweak_in, &mut self.tweaks)
                .map_err(|_| B::encryption_error())?;
            debug_assert_eq!(group.len(), n);
            let tweaks = &self.tweaks[..group.len()];

            xor_in_place(group, tweaks);

            let crypter = if encrypt {
                &mut self.data_enc
            } else {
                &mut self.data_dec
            };
            let n = crypter
                .update(group, &mut self.crypt_out)
                .map_err(|_| B::encryption_error())?;
            debug_assert_eq!(group.len(), n);

            group.copy_from_slice(&self.crypt_out[..group.len()]);
            xor_in_place(group, tweaks);
        }

        Ok(())
    }
}

fn xor_in_place(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

fn align_down(n: u64) -> u64 {
    n / AES_BLOCK64 * AES_BLOCK64
}

fn align_up(n: u64) -> u64 {
    (n + AES_BLOCK64 - 1) / AES_BLOCK64 * AES_BLOCK64
}
