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

//! The single source of truth for every address the wallet controls. Every [`OutpointInfo`]
//! and pending transaction references an address through here, never by storing a pointer to an
//! `AddressInfo` directly (per Design Notes §9's "cyclic address <-> outpoint references" fix).

use std::collections::HashMap;

use crate::address::{AddressInfo, Origin, PathFamily, Status};
use crate::crypto::Crypto;
use crate::derivation::{self, Address};
use crate::{DerivationError, Zone};

/// Ordered-by-derivation-index address lists, keyed by [`PathFamily`] (chain, not individual
/// address), plus a reverse index for O(1) address lookup.
#[derive(Default)]
pub struct AddressBook {
    by_path: HashMap<PathFamily, Vec<AddressInfo>>,
    by_address: HashMap<Address, (PathFamily, usize)>,
}

impl AddressBook {
    pub fn new() -> Self { AddressBook::default() }

    /// Appends `info` to its chain's list. Fails if the address is already present under any
    /// path, per spec.md §4.2's "no two entries share `address`" invariant.
    pub fn put(&mut self, info: AddressInfo) -> Result<(), DerivationError> {
        if self.by_address.contains_key(&info.address) {
            return Err(DerivationError::AddressAlreadyImported(info.derivation_path().to_string()));
        }
        let family = info.path_family();
        let list = self.by_path.entry(family).or_default();
        let position = list.len();
        let address = info.address;
        list.push(info);
        self.by_address.insert(address, (family, position));
        Ok(())
    }

    pub fn get_by_address(&self, address: &Address) -> Option<&AddressInfo> {
        let (family, position) = self.by_address.get(address)?;
        self.by_path.get(family)?.get(*position)
    }

    pub fn get_by_address_mut(&mut self, address: &Address) -> Option<&mut AddressInfo> {
        let (family, position) = *self.by_address.get(address)?;
        self.by_path.get_mut(&family)?.get_mut(position)
    }

    pub fn list_by_path(&self, family: &PathFamily) -> &[AddressInfo] {
        self.by_path.get(family).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn list_by_path_mut(&mut self, family: PathFamily) -> &mut Vec<AddressInfo> {
        self.by_path.entry(family).or_default()
    }

    pub fn list_by_zone(&self, zone: Zone) -> impl Iterator<Item = &AddressInfo> {
        self.by_path.values().flatten().filter(move |info| info.zone == zone)
    }

    pub fn list_by_zone_account(&self, zone: Zone, account: u32) -> impl Iterator<Item = &AddressInfo> {
        self.list_by_zone(zone).filter(move |info| matches!(
            info.origin,
            Origin::Bip44 { account: a, .. } | Origin::Bip47 { account: a, .. } if a == account
        ))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AddressInfo> {
        self.by_path.values_mut().flatten()
    }

    /// Every address entry tracked, across every chain. Used by snapshot encoding, which needs a
    /// flat view regardless of `PathFamily`.
    pub fn iter(&self) -> impl Iterator<Item = &AddressInfo> { self.by_path.values().flatten() }

    /// The highest index among `Status::Used` entries on `family`, used by the scanner to seed
    /// the gap-limit run counter.
    pub fn last_used_index(&self, family: &PathFamily) -> Option<u32> {
        self.list_by_path(family)
            .iter()
            .filter(|info| info.status == Status::Used)
            .map(|info| info.index())
            .max()
    }

    /// Every chain currently tracked — BIP44 external/change plus every open BIP47 channel —
    /// used by the scanner to know which chains to run gap-limit extension over.
    pub fn families(&self) -> impl Iterator<Item = &PathFamily> { self.by_path.keys() }

    /// Marks every address in `(zone, account)` `UNKNOWN` and clears its sync checkpoint, per
    /// spec.md §4.5's `scan` contract. The entries themselves are kept — only their usage state
    /// is forgotten — so a subsequent sync treats them as freshly unsynced and rediscovers them.
    pub fn reset_zone_account(&mut self, zone: Zone, account: u32) {
        for info in self.iter_mut() {
            let same_account = matches!(
                info.origin,
                Origin::Bip44 { account: a, .. } | Origin::Bip47 { account: a, .. } if a == account
            );
            if info.zone == zone && same_account {
                info.status = Status::Unknown;
                info.last_synced_block = None;
            }
        }
    }

    /// Derives the address and pubkey controlled by a raw private key, validates it is a Qi
    /// address, and stores it under the `"privateKeys"` sentinel path (spec.md §4.1/§4.2).
    pub fn import_private_key(
        &mut self,
        crypto: &impl Crypto,
        secret: [u8; 32],
    ) -> Result<AddressInfo, DerivationError> {
        let sk = crate::crypto::PrivateKey(secret);
        let pubkey = crypto.public_key(sk);
        let (address, zone, is_qi) = derivation::address_of(crypto, pubkey);
        let zone = match (is_qi, zone) {
            (true, Some(zone)) => zone,
            _ => return Err(DerivationError::InvalidAddress(address.to_string())),
        };
        let info = AddressInfo {
            address,
            pubkey,
            zone,
            status: Status::Unused,
            last_synced_block: None,
            origin: Origin::Imported { secret },
        };
        self.put(info)?;
        Ok(info)
    }
}
