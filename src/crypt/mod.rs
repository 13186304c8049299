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

//! Cryptographic building blocks of the vault file.

pub mod vault_key;
pub mod xex;

/// The size of an AES block in bytes.
pub const AES_BLOCK: usize = 16;
/// `AES_BLOCK` as a `u64`, for file offset arithmetic.
pub const AES_BLOCK64: u64 = AES_BLOCK as u64;
