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

//! Builds, signs, and broadcasts one outgoing transaction (spec.md §4.7).
//!
//! The flow runs fee estimation and coin selection in a loop because the fee itself depends on
//! the input/output counts that coin selection picks, and a changed fee can in turn change which
//! counts are optimal. The loop stops either once an iteration changes nothing, or once
//! [`crate::config::WalletConfig::fee_iteration_cap`] iterations have been spent, whichever comes
//! first — a direct translation of the teacher's `construct_psbt` remainder-distribution pass
//! (`examples/BP-WG-bp-wallet/src/payments.rs`) to a world where the "remainder" is itself
//! denomination-quantized rather than a free-form amount.

use crate::address_book::AddressBook;
use crate::bip32::ExtendedPrivKey;
use crate::bip47::{self, PaymentCode, Role};
use crate::config::WalletConfig;
use crate::crypto::Crypto;
use crate::denom::Denomination;
use crate::derivation::{self, account_path, Address};
use crate::outpoint::{OutpointInfo, TxHash};
use crate::payment_channel::PaymentChannels;
use crate::provider::{ChainAdapter, FeeEstimatePreview};
use crate::scanner::AddressUseChecker;
use crate::tx::{QiTransaction, TxInput, TxOutput};
use crate::utxo_store::UtxoStore;
use crate::{coinselect, DerivationError, SendError, Zone};
use crate::{Origin, Sats};

/// Where an outgoing payment is headed: either a Quai-conversion address on the account ledger,
/// or a counterparty's BIP47 payment code (a fresh one-time address is derived per send).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Destination {
    Quai(Address),
    PaymentCode(PaymentCode),
}

/// The result of a successful send: the signed transaction and the hash the node confirmed.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct SendOutcome {
    pub tx: QiTransaction,
    pub txid: TxHash,
}

/// Assembles, signs and broadcasts a payment of `amount` from `origin_zone`/`account`, per
/// spec.md §4.7's ten-step flow.
#[allow(clippy::too_many_arguments)]
pub async fn send<C: ChainAdapter>(
    crypto: &impl Crypto,
    root: &ExtendedPrivKey,
    book: &mut AddressBook,
    store: &mut UtxoStore,
    channels: &mut PaymentChannels,
    adapter: &C,
    config: &WalletConfig,
    origin_zone: Zone,
    account: u32,
    destination: Destination,
    amount: Sats,
    address_use_checker: Option<AddressUseChecker<'_>>,
) -> Result<SendOutcome, SendError<C::Error>> {
    let provider_err = |source: C::Error| SendError::Provider { zone: origin_zone, source };

    // Step 1: pre-check the zone actually holds enough spendable value before touching anything.
    let tip = adapter.get_block_number(origin_zone).await.map_err(provider_err)?;
    let spendable: Sats =
        store.spendable_for(origin_zone, tip).iter().map(|o| o.outpoint.denomination.value()).sum();
    if spendable < amount {
        return Err(crate::SelectionError::InsufficientFunds {
            zone: origin_zone,
            needed: amount,
            available: spendable,
        }
        .into());
    }

    let min_denomination_to_use = match destination {
        Destination::Quai(_) => Some(config.quai_conversion_min),
        Destination::PaymentCode(_) => None,
    };

    let pool: Vec<OutpointInfo> =
        store.spendable_for(origin_zone, tip).into_iter().cloned().collect();

    let account_node: ExtendedPrivKey = root.derive_path(crypto, &account_path(account)?)?;

    // Step 2: first pass, fee assumed zero.
    let mut selection =
        coinselect::select(&pool, origin_zone, amount, Sats::ZERO, min_denomination_to_use)?;

    // Step 3: destination address allocation.
    let mut destinations = allocate_destinations::<C>(
        crypto,
        channels,
        &account_node,
        destination,
        origin_zone,
        selection.spend_outputs.len(),
        address_use_checker,
    )?;

    // Step 4: change address allocation, preferring unused BIP44:change entries.
    let mut change_addresses = allocate_change_addresses::<C>(
        crypto,
        &account_node,
        book,
        store,
        origin_zone,
        account,
        selection.change_outputs.len(),
    )?;

    // Steps 5-6: iteratively re-price against a fresh fee estimate.
    let mut fee_estimate = Sats::ZERO;
    for _ in 0..config.fee_iteration_cap {
        let preview = build_preview(book, &selection);
        fee_estimate = adapter.estimate_fee_qi(origin_zone, &preview).await.map_err(provider_err)?;

        let fee_total = Sats(fee_estimate.0.saturating_mul(2));
        let reselection =
            coinselect::select(&pool, origin_zone, amount, fee_total, min_denomination_to_use)?;

        let spend_delta = reselection.spend_outputs.len() as i64 - selection.spend_outputs.len() as i64;
        let change_delta =
            reselection.change_outputs.len() as i64 - selection.change_outputs.len() as i64;
        let stable = spend_delta == 0 && change_delta == 0;

        if spend_delta > 0 {
            destinations.extend(allocate_destinations::<C>(
                crypto,
                channels,
                &account_node,
                destination,
                origin_zone,
                spend_delta as usize,
                address_use_checker,
            )?);
        } else if spend_delta < 0 {
            destinations.truncate(reselection.spend_outputs.len());
        }

        if change_delta > 0 {
            change_addresses.extend(allocate_change_addresses::<C>(
                crypto,
                &account_node,
                book,
                store,
                origin_zone,
                account,
                change_delta as usize,
            )?);
        } else if change_delta < 0 {
            change_addresses.truncate(reselection.change_outputs.len());
        }

        selection = reselection;
        if stable {
            break;
        }
    }
    let _ = fee_estimate;

    // Step 7: assemble the transaction.
    let chain_id = adapter.get_chain_id().await.map_err(provider_err)?;
    let inputs: Vec<TxInput> = selection
        .inputs
        .iter()
        .map(|info| {
            let pubkey = book
                .get_by_address(&info.address)
                .map(|a| a.pubkey)
                .ok_or(SendError::UnresolvedPrivateKey)?;
            Ok(TxInput { txhash: info.outpoint.txhash, index: info.outpoint.index, pubkey })
        })
        .collect::<Result<_, SendError<C::Error>>>()?;
    let outputs: Vec<TxOutput> = destinations
        .iter()
        .zip(selection.spend_outputs.iter())
        .chain(change_addresses.iter().zip(selection.change_outputs.iter()))
        .map(|(address, denomination)| TxOutput { address: *address, denomination: *denomination })
        .collect();
    let mut tx = QiTransaction { chain_id, inputs, outputs, signature: None };

    // Step 8: move the chosen inputs to pending before broadcasting, so a crash mid-broadcast
    // never leaves them double-spendable.
    let keys: Vec<_> = selection.inputs.iter().map(|o| o.outpoint.sort_key()).collect();
    store.move_to_pending(&keys);

    // Step 9: resolve spending keys and sign.
    sign::<C::Error>(crypto, root, book, &selection.inputs, &mut tx)?;

    // Step 10: broadcast and verify the echoed hash.
    let bytes = tx.encode();
    let returned = adapter.broadcast(origin_zone, &bytes).await.map_err(provider_err)?;
    let local = TxHash(tx.txid(crypto));
    if returned != local {
        return Err(SendError::HashMismatch);
    }

    Ok(SendOutcome { tx, txid: local })
}

fn build_preview(book: &AddressBook, selection: &coinselect::SelectedCoins) -> FeeEstimatePreview {
    let input_pubkeys = selection
        .inputs
        .iter()
        .map(|info| book.get_by_address(&info.address).map(|a| a.pubkey.0).unwrap_or([0u8; 33]))
        .collect();
    let output_denominations =
        selection.spend_outputs.iter().chain(selection.change_outputs.iter()).copied().collect();
    FeeEstimatePreview { input_pubkeys, output_denominations }
}

#[allow(clippy::too_many_arguments)]
fn allocate_destinations<C: ChainAdapter>(
    crypto: &impl Crypto,
    channels: &mut PaymentChannels,
    account_node: &ExtendedPrivKey,
    destination: Destination,
    zone: Zone,
    count: usize,
    address_use_checker: Option<AddressUseChecker<'_>>,
) -> Result<Vec<Address>, SendError<C::Error>> {
    match destination {
        Destination::Quai(address) => Ok(vec![address; count]),
        Destination::PaymentCode(pc) => {
            let mut out = Vec::with_capacity(count);
            let mut attempts = 0u32;
            while out.len() < count {
                if attempts >= derivation::MAX_DERIVATION_ATTEMPTS {
                    return Err(
                        DerivationError::DerivationExhausted(derivation::MAX_DERIVATION_ATTEMPTS, zone)
                            .into(),
                    );
                }
                let address = channels.next_send_address(crypto, account_node, pc, zone)?;
                attempts += 1;
                let already_used = address_use_checker.map(|check| check(address)).unwrap_or(false);
                if !already_used {
                    out.push(address);
                }
            }
            Ok(out)
        }
    }
}

fn allocate_change_addresses<C: ChainAdapter>(
    crypto: &impl Crypto,
    account_node: &ExtendedPrivKey,
    book: &mut AddressBook,
    store: &mut UtxoStore,
    zone: Zone,
    account: u32,
    count: usize,
) -> Result<Vec<Address>, SendError<C::Error>> {
    use crate::address::{AddressInfo, PathFamily, Status};

    let family = PathFamily::Bip44 { account, change: true };
    let mut out = Vec::with_capacity(count);

    let reusable: Vec<Address> = book
        .list_by_path(&family)
        .iter()
        .filter(|info| info.zone == zone && info.status == Status::Unused)
        .map(|info| info.address)
        .collect();
    for address in reusable {
        if out.len() == count {
            break;
        }
        if let Some(info) = book.get_by_address_mut(&address) {
            info.status = Status::AttemptedUse;
        }
        out.push(address);
    }

    while out.len() < count {
        let start_index = store.next_start_index(zone, family);
        let derived = derivation::derive_next_qi_address(crypto, account_node, zone, true, start_index)?;
        store.advance_start_index(zone, family, derived.index + 1);
        let info = AddressInfo {
            address: derived.address,
            pubkey: derived.node.public_key(crypto),
            zone,
            status: Status::AttemptedUse,
            last_synced_block: None,
            origin: Origin::Bip44 { account, change: true, index: derived.index },
        };
        book.put(info).map_err(|e| SendError::<C::Error>::from(e))?;
        out.push(info.address);
    }

    Ok(out)
}

/// Resolves the spending key for `address` from its origin and re-derives it, never storing more
/// than one private key in memory at a time longer than necessary (Design Notes §9's ambient-
/// global-state fix extended to signing).
fn resolve_private_key<P: std::error::Error>(
    crypto: &impl Crypto,
    root: &ExtendedPrivKey,
    book: &AddressBook,
    address: Address,
) -> Result<crate::crypto::PrivateKey, SendError<P>> {
    let info = book.get_by_address(&address).ok_or(SendError::UnresolvedPrivateKey)?;
    match info.origin {
        Origin::Bip44 { account, change, index } => {
            let account_node = root.derive_path(crypto, &account_path(account)?)?;
            let node = derivation::derive_bip44_child(crypto, &account_node, change, index)?;
            Ok(node.private_key)
        }
        Origin::Bip47 { account, counterparty, index } => {
            let account_node = root.derive_path(crypto, &account_path(account)?)?;
            let derived = bip47::derive_payment_address(
                crypto,
                &account_node,
                counterparty,
                Role::Receiving,
                info.zone,
                index,
            )?;
            derived.private_key.ok_or(SendError::UnresolvedPrivateKey)
        }
        Origin::Imported { secret } => Ok(crate::crypto::PrivateKey(secret)),
    }
}

fn sign<P: std::error::Error>(
    crypto: &impl Crypto,
    root: &ExtendedPrivKey,
    book: &AddressBook,
    inputs: &[OutpointInfo],
    tx: &mut QiTransaction,
) -> Result<(), SendError<P>> {
    let mut secret_keys = Vec::with_capacity(inputs.len());
    let mut public_keys = Vec::with_capacity(inputs.len());
    for info in inputs {
        let sk = resolve_private_key(crypto, root, book, info.address)?;
        secret_keys.push(sk);
        public_keys.push(crypto.public_key(sk));
    }

    let msg_hash = tx.message_hash(crypto);

    if secret_keys.len() == 1 {
        tx.signature = Some(crypto.schnorr_sign(&msg_hash, secret_keys[0]));
        return Ok(());
    }

    let nonces: Vec<_> = secret_keys
        .iter()
        .zip(public_keys.iter())
        .map(|(sk, pk)| crypto.musig_nonce_gen(*sk, *pk, &msg_hash))
        .collect();
    let public_nonces: Vec<_> = nonces.iter().map(|n| n.public.clone()).collect();
    let agg_nonce = crypto.musig_aggregate_nonces(&public_nonces);

    let mut partials = Vec::with_capacity(nonces.len());
    for (nonce, sk) in nonces.into_iter().zip(secret_keys.iter()) {
        let partial = crypto
            .musig_partial_sign(*sk, nonce, &public_keys, &agg_nonce, &msg_hash)
            .ok_or(SendError::UnresolvedPrivateKey)?;
        partials.push(partial);
    }

    let signature = crypto
        .musig_aggregate_signatures(&public_keys, &agg_nonce, &msg_hash, &partials)
        .ok_or(SendError::UnresolvedPrivateKey)?;
    tx.signature = Some(signature);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap as StdHashMap;

    use super::*;
    use crate::address::{AddressInfo, Status};
    use crate::crypto::Secp256k1Crypto;
    use crate::denom::Denomination;
    use crate::outpoint::{Outpoint, OutpointInfo};
    use crate::provider::{BlockRef, BlockTag, OutpointDelta};

    struct MockAdapter {
        chain_id: u64,
        fee: Sats,
        broadcast_hash: RefCell<Option<TxHash>>,
    }

    impl ChainAdapter for MockAdapter {
        type Error = std::convert::Infallible;

        async fn get_block_number(&self, _zone: Zone) -> Result<u64, Self::Error> { Ok(1000) }

        async fn get_block(&self, _zone: Zone, _tag: BlockTag) -> Result<BlockRef, Self::Error> {
            Ok(BlockRef { hash: TxHash([0; 32]), number: 1000 })
        }

        async fn get_outpoints_by_address(
            &self,
            _zone: Zone,
            _address: Address,
        ) -> Result<Vec<Outpoint>, Self::Error> {
            Ok(vec![])
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
            Ok(self.fee)
        }

        async fn broadcast(&self, _zone: Zone, tx: &[u8]) -> Result<TxHash, Self::Error> {
            let decoded = QiTransaction::decode(tx).expect("well-formed tx bytes");
            let crypto = Secp256k1Crypto::default();
            let computed = TxHash(decoded.txid(&crypto));
            Ok(self.broadcast_hash.borrow().unwrap_or(computed))
        }

        async fn get_chain_id(&self) -> Result<u64, Self::Error> { Ok(self.chain_id) }
    }

    fn seed_wallet(
        crypto: &Secp256k1Crypto,
        seed: &[u8],
        zone: Zone,
        denominations: &[u8],
    ) -> (ExtendedPrivKey, AddressBook, UtxoStore) {
        let master = ExtendedPrivKey::master(crypto, seed);
        let account_node = master.derive_path(crypto, &account_path(0).unwrap()).unwrap();
        let mut book = AddressBook::new();
        let mut store = UtxoStore::new();
        for (i, &denom_index) in denominations.iter().enumerate() {
            let derived =
                derivation::derive_next_qi_address(crypto, &account_node, zone, false, i as u32).unwrap();
            let info = AddressInfo {
                address: derived.address,
                pubkey: derived.node.public_key(crypto),
                zone,
                status: Status::Used,
                last_synced_block: None,
                origin: Origin::Bip44 { account: 0, change: false, index: derived.index },
            };
            book.put(info).unwrap();
            store.import_outpoints(
                vec![OutpointInfo {
                    outpoint: Outpoint {
                        txhash: TxHash([i as u8 + 1; 32]),
                        index: 0,
                        denomination: Denomination::new(denom_index).unwrap(),
                        lock: 0,
                    },
                    address: derived.address,
                    zone,
                    account: Some(0),
                    derivation_path: None,
                }],
                &mut book,
            );
        }
        (master, book, store)
    }

    #[tokio::test]
    async fn single_input_send_produces_a_schnorr_signature_and_broadcasts() {
        let crypto = Secp256k1Crypto::default();
        let (root, mut book, mut store) =
            seed_wallet(&crypto, b"txbuilder single-input send test seed bytes", Zone::Cyprus1, &[10]);
        let mut channels = PaymentChannels::new();
        let config = WalletConfig::default();
        let adapter = MockAdapter { chain_id: 9000, fee: Sats::ZERO, broadcast_hash: RefCell::new(None) };

        let dest_master = ExtendedPrivKey::master(&crypto, b"destination account seed for txbuilder test");
        let dest_account = dest_master.derive_path(&crypto, &account_path(0).unwrap()).unwrap();
        let dest = derivation::derive_next_qi_address(&crypto, &dest_account, Zone::Cyprus1, false, 0)
            .unwrap()
            .address;

        let outcome = send(
            &crypto,
            &root,
            &mut book,
            &mut store,
            &mut channels,
            &adapter,
            &config,
            Zone::Cyprus1,
            0,
            Destination::PaymentCode(bip47::payment_code(&crypto, &dest_account)),
            Denomination::new(10).unwrap().value(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.tx.inputs.len(), 1);
        assert!(outcome.tx.signature.is_some());
        let _ = dest;
    }

    #[tokio::test]
    async fn multi_input_send_aggregates_a_musig_signature() {
        let crypto = Secp256k1Crypto::default();
        let (root, mut book, mut store) = seed_wallet(
            &crypto,
            b"txbuilder multi-input musig send test seed",
            Zone::Paxos1,
            &[8, 8],
        );
        let mut channels = PaymentChannels::new();
        let config = WalletConfig::default();
        let adapter = MockAdapter { chain_id: 9001, fee: Sats::ZERO, broadcast_hash: RefCell::new(None) };

        let dest_master = ExtendedPrivKey::master(&crypto, b"a second destination account seed for test");
        let dest_account = dest_master.derive_path(&crypto, &account_path(0).unwrap()).unwrap();
        let pc = bip47::payment_code(&crypto, &dest_account);

        let target = Denomination::new(8).unwrap().value() + Denomination::new(8).unwrap().value();
        let outcome = send(
            &crypto,
            &root,
            &mut book,
            &mut store,
            &mut channels,
            &adapter,
            &config,
            Zone::Paxos1,
            0,
            Destination::PaymentCode(pc),
            target,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.tx.inputs.len(), 2);
        assert!(outcome.tx.signature.is_some());
    }

    #[tokio::test]
    async fn insufficient_funds_is_rejected_before_any_state_mutates() {
        let crypto = Secp256k1Crypto::default();
        let (root, mut book, mut store) =
            seed_wallet(&crypto, b"txbuilder insufficient funds test seed bytes", Zone::Hydra1, &[0]);
        let mut channels = PaymentChannels::new();
        let config = WalletConfig::default();
        let adapter = MockAdapter { chain_id: 1, fee: Sats::ZERO, broadcast_hash: RefCell::new(None) };

        let dest_master = ExtendedPrivKey::master(&crypto, b"unused destination seed for this test case");
        let dest_account = dest_master.derive_path(&crypto, &account_path(0).unwrap()).unwrap();
        let pc = bip47::payment_code(&crypto, &dest_account);

        let err = send(
            &crypto,
            &root,
            &mut book,
            &mut store,
            &mut channels,
            &adapter,
            &config,
            Zone::Hydra1,
            0,
            Destination::PaymentCode(pc),
            Sats(1_000_000),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SendError::Selection(crate::SelectionError::InsufficientFunds { .. })));
        assert_eq!(store.all_pending().count(), 0);
    }

    #[tokio::test]
    async fn hash_mismatch_is_reported_after_inputs_already_moved_to_pending() {
        let crypto = Secp256k1Crypto::default();
        let (root, mut book, mut store) =
            seed_wallet(&crypto, b"txbuilder hash mismatch test seed bytes here", Zone::Cyprus2, &[10]);
        let mut channels = PaymentChannels::new();
        let config = WalletConfig::default();
        let adapter = MockAdapter {
            chain_id: 1,
            fee: Sats::ZERO,
            broadcast_hash: RefCell::new(Some(TxHash([0xFF; 32]))),
        };

        let dest_master = ExtendedPrivKey::master(&crypto, b"destination seed for the mismatch test case");
        let dest_account = dest_master.derive_path(&crypto, &account_path(0).unwrap()).unwrap();
        let pc = bip47::payment_code(&crypto, &dest_account);

        let err = send(
            &crypto,
            &root,
            &mut book,
            &mut store,
            &mut channels,
            &adapter,
            &config,
            Zone::Cyprus2,
            0,
            Destination::PaymentCode(pc),
            Denomination::new(10).unwrap().value(),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SendError::HashMismatch));
        assert_eq!(store.all_pending().count(), 1);
        assert_eq!(store.all_available().count(), 0);
    }
}
