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

//! The wallet's live UTXO set (spec.md §4.3): outputs available to spend, and outputs tentatively
//! spent by a broadcast transaction whose confirmation has not yet been observed.

use std::collections::HashMap;

use log::{debug, trace};

use crate::address_book::AddressBook;
use crate::address::{PathFamily, Status};
use crate::provider::ChainAdapter;
use crate::outpoint::{Outpoint, OutpointInfo, TxHash};
use crate::{Sats, Zone};

type OutpointKey = (TxHash, u16);

/// Tracks which outpoints the wallet can spend right now, and which it has already offered to a
/// transaction that is awaiting confirmation.
#[derive(Default)]
pub struct UtxoStore {
    available: HashMap<OutpointKey, OutpointInfo>,
    pending: HashMap<OutpointKey, OutpointInfo>,
    /// Per-(zone, chain) watermark: the next raw BIP32/BIP47 index the scanner's gap-limit
    /// extension should try, per spec.md §3's `last_derivation_index[zone][account]` (refined to
    /// carry the chain, i.e. external vs change vs a BIP47 counterparty, since spec.md §4.1 keeps
    /// their gap counters independent). Zones probe this index space independently of one
    /// another: the same raw index may be re-derived under two zones' searches, which is
    /// redundant but never incorrect, since the zone a candidate lands in is a pure function of
    /// the index.
    next_index: HashMap<(Zone, PathFamily), u32>,
}

impl UtxoStore {
    pub fn new() -> Self { UtxoStore::default() }

    /// The next raw index the gap-limit extension should try deriving for `family` in `zone`.
    pub fn next_start_index(&self, zone: Zone, family: PathFamily) -> u32 {
        self.next_index.get(&(zone, family)).copied().unwrap_or(0)
    }

    /// Records that indices up to (but not including) `next` have now been probed for `family`
    /// in `zone`.
    pub fn advance_start_index(&mut self, zone: Zone, family: PathFamily, next: u32) {
        let entry = self.next_index.entry((zone, family)).or_insert(0);
        *entry = (*entry).max(next);
    }

    /// Drops every outpoint the wallet holds in `zone`, available or pending, per spec.md §4.5's
    /// `scan` contract ("forgets local outpoints in that zone"). Derivation watermarks are left
    /// untouched: the addresses themselves are not forgotten, only re-marked `UNKNOWN` by the
    /// caller, so resuming derivation from the middle of the chain is still correct.
    pub fn forget_zone(&mut self, zone: Zone) {
        self.available.retain(|_, info| info.zone != zone);
        self.pending.retain(|_, info| info.zone != zone);
    }

    /// Registers newly observed outpoints as available. Idempotent: re-importing an outpoint
    /// already tracked (as available or pending) is a no-op. Marks the owning address `Used` in
    /// `book`, per spec.md §4.3's "first sight of an outpoint marks its address used" rule.
    pub fn import_outpoints(&mut self, outpoints: Vec<OutpointInfo>, book: &mut AddressBook) {
        for info in outpoints {
            let key = info.outpoint.sort_key();
            if self.available.contains_key(&key) || self.pending.contains_key(&key) {
                continue;
            }
            if let Some(address) = book.get_by_address_mut(&info.address) {
                address.status = Status::Used;
            }
            trace!("importing outpoint {} for {}", info.outpoint, info.address);
            self.available.insert(key, info);
        }
    }

    /// Drops outpoints reported as deleted (spent elsewhere, or reorged away) by the chain
    /// adapter's delta sync.
    pub fn remove_outpoints(&mut self, deleted: &[Outpoint]) {
        for outpoint in deleted {
            let key = outpoint.sort_key();
            self.available.remove(&key);
            self.pending.remove(&key);
        }
    }

    /// Moves the given outpoints from available to pending, returning the ones actually found.
    /// Used by the send flow immediately after a successful broadcast (spec.md §4.7 step 9).
    pub fn move_to_pending(&mut self, keys: &[OutpointKey]) -> Vec<OutpointInfo> {
        let mut moved = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(info) = self.available.remove(key) {
                self.pending.insert(*key, info.clone());
                moved.push(info);
            }
        }
        moved
    }

    /// Re-checks every pending outpoint in `zone` against the chain adapter: an outpoint that
    /// still exists on-chain was never actually spent (its transaction was dropped or reorged
    /// out) and is moved back to available; one that no longer exists was confirmed spent and is
    /// dropped permanently. spec.md §4.3.
    pub async fn reconcile_pending<C: ChainAdapter>(
        &mut self,
        zone: Zone,
        adapter: &C,
    ) -> Result<(), C::Error> {
        let keys: Vec<OutpointKey> =
            self.pending.iter().filter(|(_, info)| info.zone == zone).map(|(k, _)| *k).collect();
        for key in keys {
            let Some(info) = self.pending.get(&key) else { continue };
            let still_exists = adapter
                .get_outpoints_by_address(zone, info.address)
                .await?
                .into_iter()
                .any(|o| o.sort_key() == key);
            if still_exists {
                debug!("pending outpoint {} reverted, returning to available", info.outpoint);
                if let Some(info) = self.pending.remove(&key) {
                    self.available.insert(key, info);
                }
            } else {
                debug!("pending outpoint {key:?} confirmed spent");
                self.pending.remove(&key);
            }
        }
        Ok(())
    }

    /// Available, unlocked outpoints in `zone` at `block_number` — the pool coin selection draws
    /// from.
    pub fn spendable_for(&self, zone: Zone, block_number: u64) -> Vec<&OutpointInfo> {
        self.available
            .values()
            .filter(|info| info.zone == zone && !info.outpoint.is_locked(block_number))
            .collect()
    }

    /// Available outpoints in `zone` still locked at `block_number`.
    pub fn locked_for(&self, zone: Zone, block_number: u64) -> Vec<&OutpointInfo> {
        self.available
            .values()
            .filter(|info| info.zone == zone && info.outpoint.is_locked(block_number))
            .collect()
    }

    pub fn pending_in(&self, zone: Zone) -> impl Iterator<Item = &OutpointInfo> {
        self.pending.values().filter(move |info| info.zone == zone)
    }

    pub fn available_in(&self, zone: Zone) -> impl Iterator<Item = &OutpointInfo> {
        self.available.values().filter(move |info| info.zone == zone)
    }

    pub fn balance(&self, zone: Zone) -> Sats {
        self.available_in(zone).map(|info| info.outpoint.denomination.value()).sum()
    }

    pub fn pending_balance(&self, zone: Zone) -> Sats {
        self.pending_in(zone).map(|info| info.outpoint.denomination.value()).sum()
    }

    pub fn all_available(&self) -> impl Iterator<Item = &OutpointInfo> { self.available.values() }

    pub fn all_pending(&self) -> impl Iterator<Item = &OutpointInfo> { self.pending.values() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denom::Denomination;
    use crate::derivation::Address;

    fn info(txhash: u8, denom: u8, lock: u64, zone: Zone) -> OutpointInfo {
        OutpointInfo {
            outpoint: Outpoint {
                txhash: TxHash([txhash; 32]),
                index: 0,
                denomination: Denomination::new(denom).unwrap(),
                lock,
            },
            address: Address([txhash; 20]),
            zone,
            account: Some(0),
            derivation_path: None,
        }
    }

    #[test]
    fn import_is_idempotent() {
        let mut book = AddressBook::new();
        let mut store = UtxoStore::new();
        let i = info(1, 0, 0, Zone::Cyprus1);
        store.import_outpoints(vec![i.clone(), i.clone()], &mut book);
        assert_eq!(store.all_available().count(), 1);
    }

    #[test]
    fn locked_outpoints_are_excluded_from_spendable() {
        let mut book = AddressBook::new();
        let mut store = UtxoStore::new();
        store.import_outpoints(vec![info(1, 0, 100, Zone::Cyprus1)], &mut book);
        assert!(store.spendable_for(Zone::Cyprus1, 50).is_empty());
        assert_eq!(store.locked_for(Zone::Cyprus1, 50).len(), 1);
        assert_eq!(store.spendable_for(Zone::Cyprus1, 200).len(), 1);
    }

    #[test]
    fn move_to_pending_and_back() {
        let mut book = AddressBook::new();
        let mut store = UtxoStore::new();
        let i = info(1, 0, 0, Zone::Cyprus1);
        store.import_outpoints(vec![i.clone()], &mut book);
        let moved = store.move_to_pending(&[i.outpoint.sort_key()]);
        assert_eq!(moved.len(), 1);
        assert!(store.all_available().next().is_none());
        assert_eq!(store.all_pending().count(), 1);
    }
}
