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

//! BIP47 payment channels (spec.md §4.9): per-counterparty receive- and send-address generation.
//!
//! Receive addresses are spendable by this wallet and live in the [`AddressBook`] like any other
//! BIP44/BIP47 entry, so the scanner can gap-limit-extend them. Send addresses are addresses we
//! derive to pay a counterparty's notification-free channel; we never hold their spending key,
//! so they are tracked only here, never imported into the book and never scanned.

use std::collections::{HashMap, HashSet};

use crate::address::{AddressInfo, Origin, PathFamily, Status};
use crate::address_book::AddressBook;
use crate::bip32::ExtendedPrivKey;
use crate::bip47::{self, PaymentCode, Role};
use crate::crypto::Crypto;
use crate::derivation::Address;
use crate::utxo_store::UtxoStore;
use crate::{DerivationError, Zone};

/// Tracks which counterparty payment codes this wallet has opened a channel with, and the
/// send-addresses generated for each (spec.md §4.8's `sender_payment_code_addresses`).
#[derive(Default)]
pub struct PaymentChannels {
    opened: HashSet<PaymentCode>,
    send_addresses: HashMap<PaymentCode, Vec<Address>>,
    /// Per-`(counterparty, zone)` watermark: the next raw BIP47 index `next_send_address` should
    /// try, mirroring `UtxoStore::next_index`'s role for BIP44/receive chains (scanner.rs). A send
    /// address is never imported into an `AddressBook`/`UtxoStore`, so this chain has nowhere else
    /// to keep its watermark; using the generated list's length instead would re-derive whatever
    /// sparse index the *first* candidate landed on, since most raw indices fail the Qi+zone
    /// predicate and only a minority advance the watermark by exactly one.
    send_next_index: HashMap<(PaymentCode, Zone), u32>,
}

impl PaymentChannels {
    pub fn new() -> Self { PaymentChannels::default() }

    /// Opens an empty receive/send bucket for `pc`. Idempotent.
    pub fn open_channel(&mut self, pc: PaymentCode) {
        self.opened.insert(pc);
        self.send_addresses.entry(pc).or_default();
    }

    pub fn is_open(&self, pc: &PaymentCode) -> bool { self.opened.contains(pc) }

    pub fn channels(&self) -> impl Iterator<Item = &PaymentCode> { self.opened.iter() }

    pub fn send_addresses(&self, pc: &PaymentCode) -> &[Address] {
        self.send_addresses.get(pc).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Restores a send-address list from a snapshot (spec.md §4.8), without re-deriving it.
    pub fn restore_send_addresses(&mut self, pc: PaymentCode, addresses: Vec<Address>) {
        self.opened.insert(pc);
        self.send_addresses.insert(pc, addresses);
    }

    /// Derives the next receive address for `pc` and stores it in `book` under the BIP47 chain
    /// for `(account, pc)`. Opens the channel first if it was not already open.
    ///
    /// The next index to try comes from `store`'s `(zone, family)` watermark — the same one the
    /// scanner's gap-limit extension advances (`scanner.rs::extend_one_chain`) — never from the
    /// book's entry count, since `derive_payment_address` returns the absolute sparse index of the
    /// first Qi+zone match (most raw indices fail that predicate), so the book can hold far fewer
    /// entries than the raw index already reached.
    pub fn next_receive_address(
        &mut self,
        crypto: &impl Crypto,
        book: &mut AddressBook,
        store: &mut UtxoStore,
        self_account_node: &ExtendedPrivKey,
        pc: PaymentCode,
        zone: Zone,
        account: u32,
    ) -> Result<AddressInfo, DerivationError> {
        self.open_channel(pc);
        let family = PathFamily::Bip47 { account, counterparty: pc };
        let start_index = store.next_start_index(zone, family);
        let derived = bip47::derive_payment_address(
            crypto,
            self_account_node,
            pc,
            Role::Receiving,
            zone,
            start_index,
        )?;
        store.advance_start_index(zone, family, derived.index + 1);
        let private_key = derived.private_key.expect("Role::Receiving always yields a private key");
        let info = AddressInfo {
            address: derived.address,
            pubkey: crypto.public_key(private_key),
            zone,
            status: Status::Unused,
            last_synced_block: None,
            origin: Origin::Bip47 { account, counterparty: pc, index: derived.index },
        };
        book.put(info)?;
        Ok(info)
    }

    /// Derives the next send address for `pc`: one we will pay to, but never spend from, so it is
    /// tracked here rather than in the address book and is never scanned.
    ///
    /// The next index to try comes from `send_next_index`'s own `(pc, zone)` watermark, not the
    /// generated list's length, for the same reason `next_receive_address` cannot use the book's
    /// entry count: the length of `send_addresses[pc]` lags the raw index actually reached once
    /// any candidate skips non-Qi or wrong-zone indices.
    pub fn next_send_address(
        &mut self,
        crypto: &impl Crypto,
        self_account_node: &ExtendedPrivKey,
        pc: PaymentCode,
        zone: Zone,
    ) -> Result<Address, DerivationError> {
        self.open_channel(pc);
        let start_index = self.send_next_index.get(&(pc, zone)).copied().unwrap_or(0);
        let derived = bip47::derive_payment_address(
            crypto,
            self_account_node,
            pc,
            Role::Sending,
            zone,
            start_index,
        )?;
        let entry = self.send_next_index.entry((pc, zone)).or_insert(0);
        *entry = (*entry).max(derived.index + 1);
        let address = derived.address;
        self.send_addresses.entry(pc).or_default().push(address);
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Secp256k1Crypto;
    use crate::derivation::account_path;

    fn account(crypto: &Secp256k1Crypto, seed: &[u8], account: u32) -> ExtendedPrivKey {
        let master = ExtendedPrivKey::master(crypto, seed);
        master.derive_path(crypto, &account_path(account).unwrap()).unwrap()
    }

    #[test]
    fn open_channel_is_idempotent() {
        let crypto = Secp256k1Crypto::default();
        let alice = account(&crypto, b"alice seed bytes for payment code test case", 0);
        let pc = bip47::payment_code(&crypto, &alice);
        let mut channels = PaymentChannels::new();
        channels.open_channel(pc);
        channels.open_channel(pc);
        assert_eq!(channels.channels().count(), 1);
        assert!(channels.send_addresses(&pc).is_empty());
    }

    #[test]
    fn receive_addresses_land_in_the_address_book_and_advance_the_index() {
        let crypto = Secp256k1Crypto::default();
        let bob = account(&crypto, b"bob seed bytes used only in this unit test!", 0);
        let alice = account(&crypto, b"alice seed bytes for payment code test case", 0);
        let alice_pc = bip47::payment_code(&crypto, &alice);

        let mut book = AddressBook::new();
        let mut store = UtxoStore::new();
        let mut channels = PaymentChannels::new();
        let first = channels
            .next_receive_address(&crypto, &mut book, &mut store, &bob, alice_pc, Zone::Hydra1, 0)
            .unwrap();
        let second = channels
            .next_receive_address(&crypto, &mut book, &mut store, &bob, alice_pc, Zone::Hydra1, 0)
            .unwrap();
        assert_ne!(first.address, second.address);
        assert!(second.index() > first.index(), "watermark must advance past the sparse match found");
        assert!(book.get_by_address(&first.address).is_some());
        assert!(book.get_by_address(&second.address).is_some());
    }

    /// Regresses the bug where the watermark was taken from the book's entry count rather than
    /// the last derived raw index: deriving several receive addresses in a row must never produce
    /// a duplicate, even though most raw indices fail the Qi+zone predicate and so the book's
    /// length almost always lags the true next index to try.
    #[test]
    fn many_receive_addresses_in_a_row_never_collide() {
        let crypto = Secp256k1Crypto::default();
        let bob = account(&crypto, b"bob seed bytes used only in this unit test!", 0);
        let alice = account(&crypto, b"alice seed bytes for payment code test case", 0);
        let alice_pc = bip47::payment_code(&crypto, &alice);

        let mut book = AddressBook::new();
        let mut store = UtxoStore::new();
        let mut channels = PaymentChannels::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..8 {
            let info = channels
                .next_receive_address(&crypto, &mut book, &mut store, &bob, alice_pc, Zone::Paxos3, 0)
                .unwrap();
            assert!(seen.insert(info.address), "duplicate receive address derived");
        }
    }

    #[test]
    fn send_addresses_are_tracked_but_never_enter_the_book() {
        let crypto = Secp256k1Crypto::default();
        let alice = account(&crypto, b"alice seed bytes for payment code test case", 0);
        let bob = account(&crypto, b"bob seed bytes used only in this unit test!", 0);
        let bob_pc = bip47::payment_code(&crypto, &bob);

        let mut channels = PaymentChannels::new();
        let a1 = channels.next_send_address(&crypto, &alice, bob_pc, Zone::Cyprus2).unwrap();
        let a2 = channels.next_send_address(&crypto, &alice, bob_pc, Zone::Cyprus2).unwrap();
        assert_ne!(a1, a2);
        assert_eq!(channels.send_addresses(&bob_pc), &[a1, a2]);
    }

    /// Regresses the bug where the watermark was taken from `send_addresses[pc].len()`: deriving
    /// several send addresses in a row must never produce a duplicate.
    #[test]
    fn many_send_addresses_in_a_row_never_collide() {
        let crypto = Secp256k1Crypto::default();
        let alice = account(&crypto, b"alice seed bytes for payment code test case", 0);
        let bob = account(&crypto, b"bob seed bytes used only in this unit test!", 0);
        let bob_pc = bip47::payment_code(&crypto, &bob);

        let mut channels = PaymentChannels::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..8 {
            let address = channels.next_send_address(&crypto, &alice, bob_pc, Zone::Hydra2).unwrap();
            assert!(seen.insert(address), "duplicate send address derived");
        }
    }
}
