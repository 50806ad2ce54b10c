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

//! Canonical JSON wallet snapshots: the one artifact a caller persists between process runs.
//! Every address is re-derived from the mnemonic and compared against the stored address before
//! being trusted, so a snapshot can never silently resurrect a corrupted or tampered entry — it
//! is rejected outright.

use std::collections::HashMap;

use serde_crate::{Deserialize, Serialize};

use crate::address::{AddressInfo, DerivationPathName, Origin, Status};
use crate::bip32::ExtendedPrivKey;
use crate::bip47::{self, PaymentCode, Role};
use crate::crypto::{Crypto, PrivateKey};
use crate::derivation::{self, account_path, Address};
use crate::outpoint::{Outpoint, OutpointInfo, TxHash};
use crate::payment_channel::PaymentChannels;
use crate::provider::BlockRef;
use crate::utxo_store::UtxoStore;
use crate::{AddressBook, SnapshotError, Zone};

/// The snapshot format version this build reads and writes. Bumped whenever a field is added,
/// removed, or reinterpreted in a way that would silently misread an older file.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Clone, Eq, PartialEq, Debug)]
#[serde(crate = "serde_crate")]
struct SnapshotBlockRef {
    hash: String,
    number: u64,
}

impl From<BlockRef> for SnapshotBlockRef {
    fn from(block: BlockRef) -> Self { SnapshotBlockRef { hash: block.hash.to_string(), number: block.number } }
}

impl SnapshotBlockRef {
    fn into_block_ref(self) -> Result<BlockRef, SnapshotError> {
        let hash: TxHash = self.hash.parse().map_err(|_| SnapshotError::MalformedAddress(self.hash))?;
        Ok(BlockRef { hash, number: self.number })
    }
}

/// One persisted address entry. `derivation_path` is the canonical textual form
/// ([`DerivationPathName`]); `secret` carries the raw private key, hex-encoded, only for entries
/// whose origin is [`Origin::Imported`] — the tagged-variant address model keeps the secret off
/// the `AddressInfo`'s path string, so the snapshot needs a dedicated field to avoid losing the
/// key on a save/load round trip.
#[derive(Serialize, Deserialize, Clone, Eq, PartialEq, Debug)]
#[serde(crate = "serde_crate")]
struct SnapshotAddress {
    address: String,
    zone: Zone,
    status: Status,
    derivation_path: String,
    last_synced_block: Option<SnapshotBlockRef>,
    secret: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Eq, PartialEq, Debug)]
#[serde(crate = "serde_crate")]
struct SnapshotOutpoint {
    txhash: String,
    index: u16,
    denomination: u8,
    lock: u64,
    address: String,
    zone: Zone,
    account: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Eq, PartialEq, Debug, Default)]
#[serde(crate = "serde_crate")]
struct SnapshotChannel {
    counterparty: String,
    send_addresses: Vec<String>,
}

/// The full, canonical snapshot document: everything [`crate::wallet::QiWallet`] needs to resume
/// without talking to a chain adapter.
#[derive(Serialize, Deserialize, Clone, Eq, PartialEq, Debug)]
#[serde(crate = "serde_crate")]
struct WalletSnapshot {
    version: u32,
    coin_type: u32,
    mnemonic: String,
    addresses: Vec<SnapshotAddress>,
    available: Vec<SnapshotOutpoint>,
    pending: Vec<SnapshotOutpoint>,
    channels: Vec<SnapshotChannel>,
}

/// Everything [`decode`] reconstructs from a snapshot document, ready to hand straight to
/// `QiWallet`'s constructor.
pub struct DecodedSnapshot {
    pub root: ExtendedPrivKey,
    pub mnemonic_phrase: String,
    pub book: AddressBook,
    pub store: UtxoStore,
    pub channels: PaymentChannels,
}

fn hex_decode_32(s: &str) -> Result<[u8; 32], SnapshotError> {
    let bytes = hex::decode(s).map_err(|_| SnapshotError::MalformedAddress(s.to_owned()))?;
    bytes.try_into().map_err(|_| SnapshotError::MalformedAddress(s.to_owned()))
}

#[cfg(feature = "bip39")]
fn seed_bytes_from_mnemonic(phrase: &str) -> Result<Vec<u8>, SnapshotError> {
    use crate::seed::{Bip39Seed, SeedSource};
    Bip39Seed::parse(phrase).map(|seed| seed.seed_bytes())
}

#[cfg(not(feature = "bip39"))]
fn seed_bytes_from_mnemonic(_phrase: &str) -> Result<Vec<u8>, SnapshotError> {
    Err(SnapshotError::InvalidMnemonic("bip39 feature is disabled in this build".to_owned()))
}

/// Looks up or derives the cached `m/44'/969'/account'` node, so a snapshot with many addresses
/// under the same account only walks the hardened prefix once.
fn account_node<'a>(
    crypto: &impl Crypto,
    root: &ExtendedPrivKey,
    cache: &'a mut HashMap<u32, ExtendedPrivKey>,
    account: u32,
) -> Result<&'a ExtendedPrivKey, SnapshotError> {
    if !cache.contains_key(&account) {
        let path = account_path(account).map_err(|e| SnapshotError::MalformedAddress(e.to_string()))?;
        let node = root
            .derive_path(crypto, &path)
            .map_err(|e| SnapshotError::MalformedAddress(e.to_string()))?;
        cache.insert(account, node);
    }
    Ok(&cache[&account])
}

/// Serializes the wallet's full state into the canonical snapshot JSON document.
pub fn encode(
    mnemonic_phrase: &str,
    book: &AddressBook,
    store: &UtxoStore,
    channels: &PaymentChannels,
) -> Result<Vec<u8>, SnapshotError> {
    let addresses = book
        .iter()
        .map(|info| SnapshotAddress {
            address: info.address.to_string(),
            zone: info.zone,
            status: info.status,
            derivation_path: info.derivation_path().to_string(),
            last_synced_block: info.last_synced_block.map(SnapshotBlockRef::from),
            secret: match info.origin {
                Origin::Imported { secret } => Some(hex::encode(secret)),
                _ => None,
            },
        })
        .collect();

    let to_snapshot_outpoint = |info: &OutpointInfo| SnapshotOutpoint {
        txhash: info.outpoint.txhash.to_string(),
        index: info.outpoint.index,
        denomination: info.outpoint.denomination.index(),
        lock: info.outpoint.lock,
        address: info.address.to_string(),
        zone: info.zone,
        account: info.account,
    };
    let available = store.all_available().map(to_snapshot_outpoint).collect();
    let pending = store.all_pending().map(to_snapshot_outpoint).collect();

    let channel_entries = channels
        .channels()
        .map(|pc| SnapshotChannel {
            counterparty: pc.to_base58check(),
            send_addresses: channels.send_addresses(pc).iter().map(Address::to_string).collect(),
        })
        .collect();

    let snapshot = WalletSnapshot {
        version: SNAPSHOT_VERSION,
        coin_type: derivation::QI_COIN_TYPE,
        mnemonic: mnemonic_phrase.to_owned(),
        addresses,
        available,
        pending,
        channels: channel_entries,
    };

    serde_json::to_vec_pretty(&snapshot).map_err(|e| SnapshotError::Json(e.to_string()))
}

fn decode_outpoint(entry: &SnapshotOutpoint) -> Result<OutpointInfo, SnapshotError> {
    let txhash: TxHash =
        entry.txhash.parse().map_err(|_| SnapshotError::MalformedAddress(entry.txhash.clone()))?;
    let address: Address =
        entry.address.parse().map_err(|_| SnapshotError::MalformedAddress(entry.address.clone()))?;
    let denomination = crate::denom::Denomination::new(entry.denomination)
        .map_err(|_| SnapshotError::MalformedAddress(format!("denomination index {}", entry.denomination)))?;
    Ok(OutpointInfo {
        outpoint: Outpoint { txhash, index: entry.index, denomination, lock: entry.lock },
        address,
        zone: entry.zone,
        account: entry.account,
        derivation_path: None,
    })
}

/// Re-derives the address, origin and pubkey a stored entry claims, so the caller can verify it
/// matches the address actually persisted.
fn rederive(
    crypto: &impl Crypto,
    root: &ExtendedPrivKey,
    cache: &mut HashMap<u32, ExtendedPrivKey>,
    entry: &SnapshotAddress,
    path_name: DerivationPathName,
) -> Result<(Origin, Address, crate::crypto::PublicKey), SnapshotError> {
    match path_name {
        DerivationPathName::Bip44 { account, change, index } => {
            let node_account = account_node(crypto, root, cache, account)?;
            let node = derivation::derive_bip44_child(crypto, node_account, change, index)
                .map_err(|e| SnapshotError::MalformedAddress(e.to_string()))?;
            let pubkey = node.public_key(crypto);
            let (address, _, _) = derivation::address_of(crypto, pubkey);
            Ok((Origin::Bip44 { account, change, index }, address, pubkey))
        }
        DerivationPathName::Bip47 { account, counterparty, index } => {
            let node_account = account_node(crypto, root, cache, account)?;
            let derived = bip47::derive_payment_address(
                crypto,
                node_account,
                counterparty,
                Role::Receiving,
                entry.zone,
                index,
            )
            .map_err(|e| SnapshotError::MalformedAddress(e.to_string()))?;
            let secret = derived.private_key.expect("Role::Receiving always yields a private key");
            Ok((
                Origin::Bip47 { account, counterparty, index },
                derived.address,
                crypto.public_key(secret),
            ))
        }
        DerivationPathName::Imported => {
            let secret_hex =
                entry.secret.as_ref().ok_or_else(|| SnapshotError::MalformedAddress(entry.address.clone()))?;
            let secret = hex_decode_32(secret_hex)?;
            let pubkey = crypto.public_key(PrivateKey(secret));
            let (address, _, _) = derivation::address_of(crypto, pubkey);
            Ok((Origin::Imported { secret }, address, pubkey))
        }
    }
}

/// Parses and validates a snapshot document, re-deriving every address from the embedded mnemonic
/// and rejecting the snapshot outright if any stored address does not match what re-derivation
/// produces.
pub fn decode(crypto: &impl Crypto, bytes: &[u8]) -> Result<DecodedSnapshot, SnapshotError> {
    let snapshot: WalletSnapshot =
        serde_json::from_slice(bytes).map_err(|e| SnapshotError::Json(e.to_string()))?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(snapshot.version));
    }
    if snapshot.coin_type != derivation::QI_COIN_TYPE {
        return Err(SnapshotError::CoinTypeMismatch(snapshot.coin_type));
    }

    let seed = seed_bytes_from_mnemonic(&snapshot.mnemonic)?;
    let root = ExtendedPrivKey::master(crypto, &seed);
    let mut account_nodes: HashMap<u32, ExtendedPrivKey> = HashMap::new();

    let mut book = AddressBook::new();
    for entry in &snapshot.addresses {
        let address: Address =
            entry.address.parse().map_err(|_| SnapshotError::MalformedAddress(entry.address.clone()))?;
        let path_name: DerivationPathName = entry
            .derivation_path
            .parse()
            .map_err(|_| SnapshotError::MalformedAddress(entry.derivation_path.clone()))?;

        let (origin, expected_address, pubkey) =
            rederive(crypto, &root, &mut account_nodes, entry, path_name)?;

        if expected_address != address {
            let index = match origin {
                Origin::Bip44 { index, .. } | Origin::Bip47 { index, .. } => index,
                Origin::Imported { .. } => u32::MAX,
            };
            return Err(SnapshotError::CorruptSnapshot { path: entry.derivation_path.clone(), index });
        }

        let info = AddressInfo {
            address,
            pubkey,
            zone: entry.zone,
            status: entry.status,
            last_synced_block: entry.last_synced_block.clone().map(SnapshotBlockRef::into_block_ref).transpose()?,
            origin,
        };
        book.put(info).map_err(|e| SnapshotError::MalformedAddress(e.to_string()))?;
    }

    let mut store = UtxoStore::new();
    for entry in &snapshot.available {
        store.import_outpoints(vec![decode_outpoint(entry)?], &mut book);
    }
    for entry in &snapshot.pending {
        let info = decode_outpoint(entry)?;
        let key = info.outpoint.sort_key();
        store.import_outpoints(vec![info], &mut book);
        store.move_to_pending(&[key]);
    }

    let mut channels = PaymentChannels::new();
    for channel in &snapshot.channels {
        let pc = PaymentCode::from_base58check(&channel.counterparty)
            .map_err(|e| SnapshotError::MalformedAddress(e.to_string()))?;
        let send_addresses = channel
            .send_addresses
            .iter()
            .map(|s| s.parse::<Address>().map_err(|_| SnapshotError::MalformedAddress(s.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        channels.restore_send_addresses(pc, send_addresses);
    }

    Ok(DecodedSnapshot { root, mnemonic_phrase: snapshot.mnemonic, book, store, channels })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Secp256k1Crypto;

    const SEED_PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon \
                                abandon abandon abandon about";

    fn wallet_fixture(crypto: &Secp256k1Crypto) -> (ExtendedPrivKey, AddressBook, UtxoStore, PaymentChannels) {
        let seed = seed_bytes_from_mnemonic(SEED_PHRASE).unwrap();
        let root = ExtendedPrivKey::master(crypto, &seed);
        let account = root.derive_path(crypto, &account_path(0).unwrap()).unwrap();

        let mut book = AddressBook::new();
        let derived = derivation::derive_next_qi_address(crypto, &account, Zone::Cyprus1, false, 0).unwrap();
        book.put(AddressInfo {
            address: derived.address,
            pubkey: derived.node.public_key(crypto),
            zone: Zone::Cyprus1,
            status: Status::Used,
            last_synced_block: Some(BlockRef { hash: TxHash([9; 32]), number: 42 }),
            origin: Origin::Bip44 { account: 0, change: false, index: derived.index },
        })
        .unwrap();

        let mut store = UtxoStore::new();
        store.import_outpoints(
            vec![OutpointInfo {
                outpoint: Outpoint {
                    txhash: TxHash([1; 32]),
                    index: 0,
                    denomination: crate::denom::Denomination::new(3).unwrap(),
                    lock: 0,
                },
                address: derived.address,
                zone: Zone::Cyprus1,
                account: Some(0),
                derivation_path: None,
            }],
            &mut book,
        );

        let channels = PaymentChannels::new();
        (root, book, store, channels)
    }

    #[test]
    fn encode_then_decode_recovers_the_same_addresses_and_outpoints() {
        let crypto = Secp256k1Crypto::default();
        let (_, book, store, channels) = wallet_fixture(&crypto);

        let bytes = encode(SEED_PHRASE, &book, &store, &channels).unwrap();
        let decoded = decode(&crypto, &bytes).unwrap();

        assert_eq!(decoded.mnemonic_phrase, SEED_PHRASE);
        assert_eq!(decoded.book.iter().count(), book.iter().count());
        assert_eq!(decoded.store.all_available().count(), 1);
    }

    #[test]
    fn tampered_address_is_rejected() {
        let crypto = Secp256k1Crypto::default();
        let (_, book, store, channels) = wallet_fixture(&crypto);
        let bytes = encode(SEED_PHRASE, &book, &store, &channels).unwrap();

        let mut snapshot: WalletSnapshot = serde_json::from_slice(&bytes).unwrap();
        snapshot.addresses[0].address = "0x1111111111111111111111111111111111111111".to_owned();
        let tampered = serde_json::to_vec(&snapshot).unwrap();

        assert!(matches!(decode(&crypto, &tampered), Err(SnapshotError::CorruptSnapshot { .. })));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let crypto = Secp256k1Crypto::default();
        let (_, book, store, channels) = wallet_fixture(&crypto);
        let bytes = encode(SEED_PHRASE, &book, &store, &channels).unwrap();
        let mut snapshot: WalletSnapshot = serde_json::from_slice(&bytes).unwrap();
        snapshot.version = 99;
        let bumped = serde_json::to_vec(&snapshot).unwrap();
        assert!(matches!(decode(&crypto, &bumped), Err(SnapshotError::UnsupportedVersion(99))));
    }

    #[test]
    fn imported_key_round_trips_with_its_secret_intact() {
        let crypto = Secp256k1Crypto::default();
        let (_, mut book, store, channels) = wallet_fixture(&crypto);

        let mut secret = [0u8; 32];
        let mut imported = None;
        for byte in 1..=255u8 {
            secret[31] = byte;
            if let Ok(info) = book.import_private_key(&crypto, secret) {
                imported = Some(info);
                break;
            }
        }
        let imported = imported.expect("some scalar in 1..=255 yields a Qi address");

        let bytes = encode(SEED_PHRASE, &book, &store, &channels).unwrap();
        let decoded = decode(&crypto, &bytes).unwrap();
        let recovered = decoded.book.get_by_address(&imported.address).unwrap();
        assert!(matches!(recovered.origin, Origin::Imported { .. }));
    }
}
