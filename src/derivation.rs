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

//! BIP44 account derivation for the Qi ledger, and the address/zone/ledger predicate that makes a
//! raw secp256k1 pubkey usable as a Qi UTXO address.
//!
//! A candidate address is accepted only if it both names the right zone and carries the Qi
//! ledger bit; since neither is under our control, `derive_next_qi_address` retries at
//! consecutive indices until one lands, capped at [`MAX_DERIVATION_ATTEMPTS`].

use crate::bip32::{ChildNumber, DerivationPath, ExtendedPrivKey};
use crate::crypto::{Crypto, PublicKey};
use crate::{DerivationError, Zone};

/// SLIP44 coin type assigned to the Qi ledger.
pub const QI_COIN_TYPE: u32 = 969;

/// Ceiling on how many consecutive indices `derive_next_qi_address` will try before giving up,
/// matching the teacher's "do not spin forever on a statistically near-certain event, but do not
/// loop unbounded either" posture.
pub const MAX_DERIVATION_ATTEMPTS: u32 = 10_000;

/// A 20-byte Qi/Quai address, the last 20 bytes of `keccak256(uncompressed pubkey tail)`.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Address(pub [u8; 20]);

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{self}") }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x")?;
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Address {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix("0x").unwrap_or(s);
        let bytes =
            hex::decode(hex).map_err(|_| DerivationError::InvalidAddress(s.to_owned()))?;
        let bytes: [u8; 20] =
            bytes.try_into().map_err(|_| DerivationError::InvalidAddress(s.to_owned()))?;
        Ok(Address(bytes))
    }
}

/// Computes the address a public key controls and reports which zone it falls in and whether it
/// is a Qi (UTXO-ledger) address.
///
/// The zone comes from the address's first byte, exactly as [`Zone::from_address_prefix`]
/// expects; the ledger is named by the low bit of the second byte (`0` selects Qi, `1` selects
/// Quai). Both are outputs of the hash, not something the caller can force, which is what drives
/// the retry loop in [`derive_next_qi_address`].
pub fn address_of(crypto: &impl Crypto, pubkey: PublicKey) -> (Address, Option<Zone>, bool) {
    let uncompressed = decompress(crypto, pubkey);
    let hash = crypto.keccak256(&uncompressed);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..32]);
    let address = Address(bytes);
    let zone = Zone::from_address_prefix(bytes[0]);
    let is_qi = bytes[1] & 0x01 == 0;
    (address, zone, is_qi)
}

/// Recovers the 64-byte X||Y encoding of a compressed pubkey so it hashes the same way an
/// Ethereum-style address derivation expects, sans the leading `0x04` tag.
fn decompress(crypto: &impl Crypto, pubkey: PublicKey) -> [u8; 64] {
    let full = pubkey.to_secp().expect("valid compressed pubkey").serialize_uncompressed();
    let _ = crypto;
    let mut out = [0u8; 64];
    out.copy_from_slice(&full[1..]);
    out
}

/// The fixed `m/44'/969'/account'` prefix shared by every address and payment code under one
/// account.
pub fn account_path(account: u32) -> Result<DerivationPath, DerivationError> {
    Ok(DerivationPath(vec![
        ChildNumber::hardened(44)?,
        ChildNumber::hardened(QI_COIN_TYPE)?,
        ChildNumber::hardened(account)?,
    ]))
}

/// A derived address candidate that satisfied the Qi/zone predicate.
pub struct DerivedAddress {
    pub node: ExtendedPrivKey,
    pub address: Address,
    pub index: u32,
}

/// Finds the first index at or after `start_index` along `m/44'/969'/account'/change/i` whose
/// address is both Qi and in `zone`, per spec.md's "For each candidate i ... accept iff address
/// is Qi and falls in zone; otherwise increment and retry" rule.
pub fn derive_next_qi_address(
    crypto: &impl Crypto,
    account_node: &ExtendedPrivKey,
    zone: Zone,
    change: bool,
    start_index: u32,
) -> Result<DerivedAddress, DerivationError> {
    let change_node = account_node.derive_child(crypto, ChildNumber::normal(change as u32)?)?;

    for attempt in 0..MAX_DERIVATION_ATTEMPTS {
        let index = start_index.checked_add(attempt).ok_or(DerivationError::DepthExceeded(255))?;
        let node = change_node.derive_child(crypto, ChildNumber::normal(index)?)?;
        let (address, found_zone, is_qi) = address_of(crypto, node.public_key(crypto));
        if is_qi && found_zone == Some(zone) {
            return Ok(DerivedAddress { node, address, index });
        }
    }

    Err(DerivationError::DerivationExhausted(MAX_DERIVATION_ATTEMPTS, zone))
}

/// Re-derives the exact child at `(change, index)` beneath `account_node`, with no retry: used to
/// recover a spending key for an address whose index is already known, rather than to search for
/// one (spec.md §4.7's private-key resolution for `BIP44:external`/`BIP44:change` entries).
pub fn derive_bip44_child(
    crypto: &impl Crypto,
    account_node: &ExtendedPrivKey,
    change: bool,
    index: u32,
) -> Result<ExtendedPrivKey, DerivationError> {
    let change_node = account_node.derive_child(crypto, ChildNumber::normal(change as u32)?)?;
    change_node.derive_child(crypto, ChildNumber::normal(index)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Secp256k1Crypto;

    #[test]
    fn account_path_has_the_qi_coin_type() {
        let path = account_path(0).unwrap();
        assert_eq!(path.0[1].0 & !crate::bip32::HARDENED_FLAG, QI_COIN_TYPE);
    }

    #[test]
    fn derive_next_qi_address_finds_a_matching_candidate_for_every_zone() {
        let crypto = Secp256k1Crypto::default();
        let master = ExtendedPrivKey::master(&crypto, b"deterministic test seed for zone scanning");
        let account = master.derive_path(&crypto, &account_path(7).unwrap()).unwrap();
        for zone in Zone::ALL {
            let derived = derive_next_qi_address(&crypto, &account, zone, false, 0).unwrap();
            let (_, found_zone, is_qi) = address_of(&crypto, derived.node.public_key(&crypto));
            assert_eq!(found_zone, Some(zone));
            assert!(is_qi);
        }
    }

    #[test]
    fn derive_bip44_child_matches_the_node_derive_next_qi_address_found() {
        let crypto = Secp256k1Crypto::default();
        let master = ExtendedPrivKey::master(&crypto, b"deterministic test seed for bip44 child check");
        let account = master.derive_path(&crypto, &account_path(3).unwrap()).unwrap();
        let derived = derive_next_qi_address(&crypto, &account, Zone::Paxos1, true, 0).unwrap();
        let reconstructed = derive_bip44_child(&crypto, &account, true, derived.index).unwrap();
        assert_eq!(reconstructed.private_key.0, derived.node.private_key.0);
    }

    #[test]
    fn address_display_round_trips_through_from_str() {
        let addr = Address([0x11; 20]);
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(parsed.0, addr.0);
    }
}
