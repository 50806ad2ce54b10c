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

//! The top-level wallet: a `Crypto` handle plus a BIP32 root node wired to the address book,
//! UTXO store and payment channels that the rest of the crate operates on. Everything here is a
//! thin orchestration layer — derivation, scanning, coin selection and signing all live in their
//! own modules; `QiWallet` just owns the state they share and exposes it as one cohesive API.

use crate::address::{AddressInfo, Origin, Status};
use crate::address_book::AddressBook;
use crate::amount::Sats;
use crate::bip32::ExtendedPrivKey;
use crate::bip47::PaymentCode;
use crate::config::WalletConfig;
use crate::crypto::Crypto;
use crate::denom::Denomination;
use crate::derivation::{self, Address, DerivationError};
use crate::error::{ScanError, SendError};
use crate::outpoint::OutpointInfo;
use crate::payment_channel::PaymentChannels;
use crate::provider::ChainAdapter;
use crate::scanner::{self, AddressUseChecker, SyncSink};
use crate::txbuilder::{self, Destination, SendOutcome};
use crate::utxo_store::UtxoStore;
use crate::zone::Zone;

#[cfg(feature = "bip39")]
use crate::error::SnapshotError;
#[cfg(feature = "bip39")]
use crate::seed::{Bip39Seed, SeedSource};

#[cfg(feature = "serde")]
use crate::snapshot;

/// A Qi UTXO HD-wallet: one BIP32 root, the address book and UTXO set it has discovered, and the
/// BIP47 payment channels it has opened, all driven through a single injected [`Crypto`] handle.
pub struct QiWallet<K: Crypto> {
    crypto: K,
    root: ExtendedPrivKey,
    mnemonic_phrase: String,
    config: WalletConfig,
    book: AddressBook,
    store: UtxoStore,
    channels: PaymentChannels,
}

impl<K: Crypto> QiWallet<K> {
    /// Builds a wallet from raw seed bytes. `mnemonic_phrase` is retained only so it can be
    /// round-tripped through a snapshot; the root node is derived from `seed`, not re-derived
    /// from the phrase.
    pub fn from_seed(
        crypto: K,
        seed: &[u8],
        mnemonic_phrase: impl Into<String>,
        config: WalletConfig,
    ) -> Self {
        let root = ExtendedPrivKey::master(&crypto, seed);
        QiWallet {
            crypto,
            root,
            mnemonic_phrase: mnemonic_phrase.into(),
            config,
            book: AddressBook::new(),
            store: UtxoStore::new(),
            channels: PaymentChannels::new(),
        }
    }

    /// Builds a wallet from a BIP39 mnemonic phrase, the production entry point.
    #[cfg(feature = "bip39")]
    pub fn from_mnemonic(
        crypto: K,
        phrase: &str,
        config: WalletConfig,
    ) -> Result<Self, SnapshotError> {
        let seed = Bip39Seed::parse(phrase)?;
        Ok(Self::from_seed(crypto, &seed.seed_bytes(), phrase, config))
    }

    fn account_node(&self, account: u32) -> Result<ExtendedPrivKey, DerivationError> {
        let path = derivation::account_path(account)?;
        self.root.derive_path(&self.crypto, &path)
    }

    /// This account's BIP47 payment code, the identifier handed to a counterparty so they can
    /// derive addresses to pay us at.
    pub fn payment_code(&self, account: u32) -> Result<PaymentCode, DerivationError> {
        let account_node = self.account_node(account)?;
        Ok(crate::bip47::payment_code(&self.crypto, &account_node))
    }

    /// Derives and records the next unused `(zone, account, change)` address, independent of the
    /// gap-limit-driven discovery `scan`/`sync` perform.
    pub fn derive_next_address(
        &mut self,
        account: u32,
        zone: Zone,
        change: bool,
    ) -> Result<AddressInfo, DerivationError> {
        let account_node = self.account_node(account)?;
        let family = crate::address::PathFamily::Bip44 { account, change };
        let start_index = self.store.next_start_index(zone, family);
        let derived =
            derivation::derive_next_qi_address(&self.crypto, &account_node, zone, change, start_index)?;
        let info = AddressInfo {
            address: derived.address,
            pubkey: derived.node.public_key(&self.crypto),
            zone,
            status: Status::Unused,
            last_synced_block: None,
            origin: Origin::Bip44 { account, change, index: derived.index },
        };
        self.book.put(info)?;
        self.store.advance_start_index(zone, family, derived.index + 1);
        Ok(info)
    }

    /// Imports a raw private key outside the BIP44 tree, e.g. a sweep of funds from elsewhere.
    pub fn import_private_key(&mut self, secret: [u8; 32]) -> Result<AddressInfo, DerivationError> {
        self.book.import_private_key(&self.crypto, secret)
    }

    /// Opens (or re-opens, idempotently) a BIP47 channel with `pc`.
    pub fn open_channel(&mut self, pc: PaymentCode) { self.channels.open_channel(pc) }

    /// Is a channel with `pc` currently open?
    pub fn is_channel_open(&self, pc: &PaymentCode) -> bool { self.channels.is_open(pc) }

    /// Derives the next address we will receive `pc`'s payments at, for `zone`/`account`.
    pub fn next_receive_address(
        &mut self,
        pc: PaymentCode,
        zone: Zone,
        account: u32,
    ) -> Result<AddressInfo, DerivationError> {
        let account_node = self.account_node(account)?;
        self.channels.next_receive_address(
            &self.crypto,
            &mut self.book,
            &mut self.store,
            &account_node,
            pc,
            zone,
            account,
        )
    }

    /// Derives the next address we will pay `pc` at, for `zone`/`account`.
    pub fn next_send_address(
        &mut self,
        pc: PaymentCode,
        zone: Zone,
        account: u32,
    ) -> Result<Address, DerivationError> {
        let account_node = self.account_node(account)?;
        self.channels.next_send_address(&self.crypto, &account_node, pc, zone)
    }

    /// Forgets everything locally known about `(zone, account)` and performs a full rediscovery
    /// against `adapter`.
    pub async fn scan<C: ChainAdapter>(
        &mut self,
        adapter: &C,
        zone: Zone,
        account: u32,
        sink: &mut impl SyncSink,
        address_use_checker: Option<AddressUseChecker<'_>>,
    ) -> Result<(), ScanError<C::Error>> {
        scanner::scan(
            &self.crypto,
            &self.root,
            &mut self.book,
            &mut self.store,
            adapter,
            zone,
            account,
            self.config.gap_limit,
            sink,
            address_use_checker,
        )
        .await
    }

    /// Incrementally updates `(zone, account)` from `adapter` without resetting anything first.
    pub async fn sync<C: ChainAdapter>(
        &mut self,
        adapter: &C,
        zone: Zone,
        account: u32,
        sink: &mut impl SyncSink,
        address_use_checker: Option<AddressUseChecker<'_>>,
    ) -> Result<(), ScanError<C::Error>> {
        scanner::sync(
            &self.crypto,
            &self.root,
            &mut self.book,
            &mut self.store,
            adapter,
            zone,
            account,
            self.config.gap_limit,
            sink,
            address_use_checker,
        )
        .await
    }

    /// Assembles, signs and broadcasts a payment of `amount` from `origin_zone`/`account`.
    pub async fn send<C: ChainAdapter>(
        &mut self,
        adapter: &C,
        origin_zone: Zone,
        account: u32,
        destination: Destination,
        amount: Sats,
        address_use_checker: Option<AddressUseChecker<'_>>,
    ) -> Result<SendOutcome, SendError<C::Error>> {
        txbuilder::send(
            &self.crypto,
            &self.root,
            &mut self.book,
            &mut self.store,
            &mut self.channels,
            adapter,
            &self.config,
            origin_zone,
            account,
            destination,
            amount,
            address_use_checker,
        )
        .await
    }

    /// Re-checks every pending outpoint in `zone` against `adapter`, moving reverted spends back
    /// to the available pool and dropping confirmed ones.
    pub async fn reconcile_pending<C: ChainAdapter>(
        &mut self,
        adapter: &C,
        zone: Zone,
    ) -> Result<(), C::Error> {
        self.store.reconcile_pending(zone, adapter).await
    }

    /// The wallet's locally-known spendable balance in `zone` at `block_number`.
    pub fn spendable_balance(&self, zone: Zone, block_number: u64) -> Sats {
        self.store
            .spendable_for(zone, block_number)
            .iter()
            .map(|info| info.outpoint.denomination.value())
            .sum()
    }

    /// The wallet's locally-known time-locked balance in `zone` at `block_number`.
    pub fn locked_balance(&self, zone: Zone, block_number: u64) -> Sats {
        self.store
            .locked_for(zone, block_number)
            .iter()
            .map(|info| info.outpoint.denomination.value())
            .sum()
    }

    /// The wallet's locally-known pending (in-flight) balance in `zone`.
    pub fn pending_balance(&self, zone: Zone) -> Sats { self.store.pending_balance(zone) }

    /// Computes `zone`'s balance by directly querying `adapter` for every known address in the
    /// zone, rather than trusting the locally cached UTXO set.
    pub async fn balance_from_chain<C: ChainAdapter>(
        &self,
        adapter: &C,
        zone: Zone,
    ) -> Result<Sats, C::Error> {
        let mut total = Sats::ZERO;
        for info in self.book.list_by_zone(zone) {
            for outpoint in adapter.get_outpoints_by_address(zone, info.address).await? {
                total += outpoint.denomination.value();
            }
        }
        Ok(total)
    }

    pub fn address_book(&self) -> &AddressBook { &self.book }

    pub fn utxo_store(&self) -> &UtxoStore { &self.store }

    pub fn payment_channels(&self) -> &PaymentChannels { &self.channels }

    pub fn config(&self) -> &WalletConfig { &self.config }

    pub fn crypto(&self) -> &K { &self.crypto }

    /// Serializes this wallet's full state into the canonical snapshot JSON document.
    #[cfg(feature = "serde")]
    pub fn export_snapshot(&self) -> Result<Vec<u8>, SnapshotError> {
        snapshot::encode(&self.mnemonic_phrase, &self.book, &self.store, &self.channels)
    }

    /// Restores a wallet from a snapshot previously produced by [`Self::export_snapshot`],
    /// re-deriving and verifying every address against `crypto` along the way.
    #[cfg(feature = "serde")]
    pub fn import_snapshot(
        crypto: K,
        bytes: &[u8],
        config: WalletConfig,
    ) -> Result<Self, SnapshotError> {
        let decoded = snapshot::decode(&crypto, bytes)?;
        Ok(QiWallet {
            crypto,
            root: decoded.root,
            mnemonic_phrase: decoded.mnemonic_phrase,
            config,
            book: decoded.book,
            store: decoded.store,
            channels: decoded.channels,
        })
    }

    /// All denominations currently available across every zone, e.g. for display purposes.
    pub fn denominations_held(&self) -> impl Iterator<Item = Denomination> + '_ {
        self.store.all_available().map(|info: &OutpointInfo| info.outpoint.denomination)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap as StdHashMap;

    use super::*;
    use crate::crypto::Secp256k1Crypto;
    use crate::outpoint::{Outpoint, TxHash};
    use crate::provider::{BlockRef, BlockTag, FeeEstimatePreview, OutpointDelta};

    struct MockAdapter {
        tip: BlockRef,
        funded: RefCell<Option<Address>>,
    }

    impl ChainAdapter for MockAdapter {
        type Error = std::convert::Infallible;

        async fn get_block_number(&self, _zone: Zone) -> Result<u64, Self::Error> { Ok(self.tip.number) }

        async fn get_block(&self, _zone: Zone, _tag: BlockTag) -> Result<BlockRef, Self::Error> {
            Ok(self.tip)
        }

        async fn get_outpoints_by_address(
            &self,
            _zone: Zone,
            address: Address,
        ) -> Result<Vec<Outpoint>, Self::Error> {
            if self.funded.borrow().as_ref() == Some(&address) {
                Ok(vec![Outpoint {
                    txhash: TxHash([7; 32]),
                    index: 0,
                    denomination: Denomination::new(3).unwrap(),
                    lock: 0,
                }])
            } else {
                Ok(vec![])
            }
        }

        async fn get_outpoint_deltas(
            &self,
            _zone: Zone,
            _addresses: &[Address],
            _from: TxHash,
            _to: BlockTag,
        ) -> Result<StdHashMap<Address, OutpointDelta>, Self::Error> {
            Ok(StdHashMap::new())
        }

        async fn estimate_fee_qi(
            &self,
            _zone: Zone,
            _preview: &FeeEstimatePreview,
        ) -> Result<Sats, Self::Error> {
            Ok(Sats::ZERO)
        }

        async fn broadcast(&self, _zone: Zone, _tx: &[u8]) -> Result<TxHash, Self::Error> {
            Ok(TxHash([0; 32]))
        }

        async fn get_chain_id(&self) -> Result<u64, Self::Error> { Ok(9000) }
    }

    fn wallet(seed: &[u8]) -> QiWallet<Secp256k1Crypto> {
        QiWallet::from_seed(Secp256k1Crypto::default(), seed, "test phrase", WalletConfig::default())
    }

    #[test]
    fn derive_next_address_records_and_advances() {
        let mut w = wallet(b"wallet construction test seed bytes, 32+ long");
        let first = w.derive_next_address(0, Zone::Cyprus1, false).unwrap();
        let second = w.derive_next_address(0, Zone::Cyprus1, false).unwrap();
        assert_ne!(first.address, second.address);
        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 1);
        assert!(w.address_book().get_by_address(&first.address).is_some());
    }

    #[test]
    fn payment_code_is_stable_for_the_same_account() {
        let w = wallet(b"payment code determinism test seed bytes long");
        let a = w.payment_code(0).unwrap();
        let b = w.payment_code(0).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn sync_then_spendable_balance_reflects_discovered_funds() {
        let mut w = wallet(b"sync discovers funded address seed bytes long!!");
        let info = w.derive_next_address(0, Zone::Cyprus1, false).unwrap();

        let adapter = MockAdapter {
            tip: BlockRef { hash: TxHash([1; 32]), number: 10 },
            funded: RefCell::new(Some(info.address)),
        };

        w.sync(&adapter, Zone::Cyprus1, 0, &mut (), None).await.unwrap();

        assert!(w.spendable_balance(Zone::Cyprus1, 10).0 > 0);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn snapshot_round_trips_addresses() {
        let mut w = wallet(b"snapshot export and import round trip seed 32b!");
        w.derive_next_address(0, Zone::Cyprus1, false).unwrap();

        let bytes = w.export_snapshot().unwrap();
        let restored =
            QiWallet::import_snapshot(Secp256k1Crypto::default(), &bytes, WalletConfig::default()).unwrap();

        assert_eq!(restored.address_book().iter().count(), w.address_book().iter().count());
    }
}
