// Modern, minimalistic & standard-compliant cold wallet library.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2020-2024 by
//     Dr Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// Copyright (C) 2020-2024 LNP/BP Standards Association. All rights reserved.
// Copyright (C) 2020-2024 Dr Maxim Orlovsky. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Qi outputs: a UTXO is never an arbitrary amount, only one of the sixteen fixed
//! [`Denomination`](crate::denom::Denomination) values, optionally locked until a future block.

use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use crate::denom::Denomination;
use crate::derivation::Address;
use crate::{DerivationError, Zone};

/// A transaction hash, 32 bytes, displayed and parsed as lowercase hex.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TxHash(pub [u8; 32]);

impl Debug for TxHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { write!(f, "{self}") }
}

impl Display for TxHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for TxHash {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(hex).map_err(|_| DerivationError::InvalidAddress(s.to_owned()))?;
        let bytes: [u8; 32] =
            bytes.try_into().map_err(|_| DerivationError::InvalidAddress(s.to_owned()))?;
        Ok(TxHash(bytes))
    }
}

/// A single unspent (or pending-spend) Qi output reference.
///
/// `lock == 0` means unlocked; any other value is the block number before which the output
/// cannot be spent, per spec.md §3.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Outpoint {
    pub txhash: TxHash,
    pub index: u16,
    pub denomination: Denomination,
    pub lock: u64,
}

impl Outpoint {
    pub fn is_locked(&self, block_number: u64) -> bool { self.lock != 0 && self.lock > block_number }

    /// The lexicographic `(txhash, index)` ordering used to break ties deterministically in coin
    /// selection, per spec.md §4.6.
    pub fn sort_key(&self) -> (TxHash, u16) { (self.txhash, self.index) }
}

impl Display for Outpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { write!(f, "{}:{}", self.txhash, self.index) }
}

/// Everything the wallet needs to know about one outpoint beyond its chain identity: which of our
/// addresses it pays, and that address's zone.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct OutpointInfo {
    pub outpoint: Outpoint,
    pub address: Address,
    pub zone: Zone,
    pub account: Option<u32>,
    pub derivation_path: Option<String>,
}
