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

//! spec.md §1 treats BIP39 word-list handling as an external collaborator: "a Mnemonic module
//! producing seed bytes". [`SeedSource`] is that collaborator's interface reduced to the one
//! thing [`crate::bip32::ExtendedPrivKey::master`] actually consumes.

use crate::error::SnapshotError;

/// Anything that can produce the raw seed bytes a BIP32 master node derives from.
pub trait SeedSource {
    fn seed_bytes(&self) -> Vec<u8>;
}

/// A parsed BIP39 mnemonic, the production [`SeedSource`].
#[cfg(feature = "bip39")]
pub struct Bip39Seed(bip39::Mnemonic);

#[cfg(feature = "bip39")]
impl Bip39Seed {
    pub fn parse(phrase: &str) -> Result<Self, SnapshotError> {
        bip39::Mnemonic::parse(phrase)
            .map(Bip39Seed)
            .map_err(|e| SnapshotError::InvalidMnemonic(e.to_string()))
    }
}

#[cfg(feature = "bip39")]
impl SeedSource for Bip39Seed {
    /// BIP39 seeds are derived with an empty passphrase; the wallet has no notion of a second
    /// factor beyond the mnemonic itself.
    fn seed_bytes(&self) -> Vec<u8> { self.0.to_seed("").to_vec() }
}
