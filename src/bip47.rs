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

//! BIP47 payment codes: the notification-free, one-time-address scheme built on a
//! Diffie-Hellman shared secret between a sender's and a receiver's static payment code keys.

use crate::bip32::{ChildNumber, ExtendedPrivKey, ExtendedPubKey};
use crate::crypto::{Crypto, PrivateKey, PublicKey};
use crate::derivation::{self, Address};
use crate::{DerivationError, Zone};

const VERSION_BYTE: u8 = 0x47;
const BODY_LEN: usize = 80;

/// A BIP47 payment code: a long-lived public identifier a counterparty can use to derive a fresh
/// receiving address for every payment without an on-chain notification transaction.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct PaymentCode {
    pub pubkey: PublicKey,
    pub chain_code: [u8; 32],
}

impl std::fmt::Debug for PaymentCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentCode({self})")
    }
}

impl std::fmt::Display for PaymentCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base58check())
    }
}

impl PaymentCode {
    /// Builds the 80-byte payment code body: `0x01 | 0x00 | pubkey(33) | chain_code(32) |
    /// padding(13)`, per BIP47's fixed payload layout.
    fn body(&self) -> [u8; BODY_LEN] {
        let mut body = [0u8; BODY_LEN];
        body[0] = 0x01; // payment code version, distinct from the Base58Check version byte
        body[1] = 0x00; // no bitmessage/sign notification flags used here
        body[2..35].copy_from_slice(&self.pubkey.0);
        body[35..67].copy_from_slice(&self.chain_code);
        body
    }

    pub fn to_base58check(&self) -> String {
        let mut payload = Vec::with_capacity(1 + BODY_LEN);
        payload.push(VERSION_BYTE);
        payload.extend_from_slice(&self.body());
        bs58::encode(payload).with_check().into_string()
    }

    pub fn from_base58check(s: &str) -> Result<Self, DerivationError> {
        let payload = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|_| DerivationError::InvalidPaymentCode)?;
        if payload.len() != 1 + BODY_LEN || payload[0] != VERSION_BYTE || payload[1] != 0x01 {
            return Err(DerivationError::InvalidPaymentCode);
        }
        let mut pubkey = [0u8; 33];
        pubkey.copy_from_slice(&payload[3..36]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&payload[36..68]);
        Ok(PaymentCode {
            pubkey: PublicKey(pubkey),
            chain_code,
        })
    }
}

/// Builds the payment code announcing this account's identity to counterparties.
pub fn payment_code(crypto: &impl Crypto, account_node: &ExtendedPrivKey) -> PaymentCode {
    PaymentCode {
        pubkey: account_node.public_key(crypto),
        chain_code: account_node.chain_code,
    }
}

/// Whether this derivation is producing an address we will receive to, or one we will send to
/// (the shared secret formula is symmetric, but which static key plays "self" differs).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Role {
    /// `self` is the receiver: derive using our own private key and the counterparty's pubkey.
    Receiving,
    /// `self` is the sender: derive using our own private key and the counterparty's pubkey, but
    /// the resulting private key is never ours to spend from — only the address is needed.
    Sending,
}

/// Derives the BIP47 shared-secret tweak for notification index `i` between `self_node` (our
/// account node, which must own a private key) and `counterparty`, per BIP47 §"Alice and Bob
/// share a secret point".
///
/// The two roles are genuinely asymmetric: the sender advances along their own chain code to
/// get a fresh ECDH scalar per index and hashes with the receiver's chain code, while the
/// receiver advances the counterparty's *public* key along the counterparty's chain code and
/// hashes with their own chain code. Both sides land on the same point because `a_i * B == b *
/// A_i` whenever `B == b*G`.
fn shared_tweak(
    crypto: &impl Crypto,
    self_node: &ExtendedPrivKey,
    counterparty: PaymentCode,
    role: Role,
    i: u32,
) -> Result<[u8; 32], DerivationError> {
    let (shared_x, hmac_key) = match role {
        Role::Sending => {
            let self_index_node = self_node.derive_child(crypto, ChildNumber::normal(i)?)?;
            let shared_x = crypto
                .ecdh_x_only(self_index_node.private_key, counterparty.pubkey)
                .ok_or(DerivationError::InvalidPaymentCode)?;
            (shared_x, counterparty.chain_code)
        }
        Role::Receiving => {
            let counterparty_root = ExtendedPubKey {
                public_key: counterparty.pubkey,
                chain_code: counterparty.chain_code,
                depth: 0,
                parent_fingerprint: [0; 4],
                child_number: 0,
            };
            let counterparty_index =
                counterparty_root.derive_child(crypto, ChildNumber::normal(i)?)?;
            let shared_x = crypto
                .ecdh_x_only(self_node.private_key, counterparty_index.public_key)
                .ok_or(DerivationError::InvalidPaymentCode)?;
            (shared_x, self_node.chain_code)
        }
    };
    let mac = crypto.hmac_sha512(&hmac_key, &shared_x);
    let mut tweak = [0u8; 32];
    tweak.copy_from_slice(&mac[..32]);
    Ok(tweak)
}

/// A BIP47-derived address candidate satisfying the Qi/zone predicate.
pub struct DerivedPaymentAddress {
    pub address: Address,
    pub index: u32,
    /// Present only for [`Role::Receiving`], where we hold the spending key.
    pub private_key: Option<PrivateKey>,
}

/// Finds the first notification index at or after `start_index` whose derived address is Qi and
/// falls in `zone`, mirroring [`derivation::derive_next_qi_address`]'s retry contract.
pub fn derive_payment_address(
    crypto: &impl Crypto,
    self_node: &ExtendedPrivKey,
    counterparty: PaymentCode,
    role: Role,
    zone: Zone,
    start_index: u32,
) -> Result<DerivedPaymentAddress, DerivationError> {
    for attempt in 0..derivation::MAX_DERIVATION_ATTEMPTS {
        let index = start_index.checked_add(attempt).ok_or(DerivationError::DepthExceeded(255))?;
        let tweak = shared_tweak(crypto, self_node, counterparty, role, index)?;

        let (address, found_zone, is_qi, private_key) = match role {
            Role::Receiving => {
                let sk = crypto
                    .tweak_add_private(self_node.private_key, &tweak)
                    .ok_or(DerivationError::InvalidPaymentCode)?;
                let pk = crypto.public_key(sk);
                let (address, found_zone, is_qi) = derivation::address_of(crypto, pk);
                (address, found_zone, is_qi, Some(sk))
            }
            Role::Sending => {
                let pk = crypto
                    .tweak_add_public(counterparty.pubkey, &tweak)
                    .ok_or(DerivationError::InvalidPaymentCode)?;
                let (address, found_zone, is_qi) = derivation::address_of(crypto, pk);
                (address, found_zone, is_qi, None)
            }
        };

        if is_qi && found_zone == Some(zone) {
            return Ok(DerivedPaymentAddress {
                address,
                index,
                private_key,
            });
        }
    }

    Err(DerivationError::DerivationExhausted(derivation::MAX_DERIVATION_ATTEMPTS, zone))
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
    fn payment_code_round_trips_through_base58check() {
        let crypto = Secp256k1Crypto::default();
        let alice = account(&crypto, b"alice seed bytes for payment code test case", 0);
        let pc = payment_code(&crypto, &alice);
        let encoded = pc.to_base58check();
        let decoded = PaymentCode::from_base58check(&encoded).unwrap();
        assert_eq!(decoded.pubkey, pc.pubkey);
        assert_eq!(decoded.chain_code, pc.chain_code);
    }

    #[test]
    fn sender_and_receiver_derive_the_same_address() {
        let crypto = Secp256k1Crypto::default();
        let alice = account(&crypto, b"alice seed bytes for payment code test case", 0);
        let bob = account(&crypto, b"bob seed bytes used only in this unit test!", 0);
        let alice_pc = payment_code(&crypto, &alice);
        let bob_pc = payment_code(&crypto, &bob);

        for zone in [Zone::Cyprus1, Zone::Hydra3] {
            let receiver_side =
                derive_payment_address(&crypto, &bob, alice_pc, Role::Receiving, zone, 0).unwrap();
            let sender_side =
                derive_payment_address(&crypto, &alice, bob_pc, Role::Sending, zone, 0).unwrap();
            assert_eq!(receiver_side.index, sender_side.index);
            assert_eq!(receiver_side.address.0, sender_side.address.0);
            assert!(receiver_side.private_key.is_some());
            assert!(sender_side.private_key.is_none());
        }
    }

    #[test]
    fn invalid_base58check_is_rejected() {
        assert!(matches!(
            PaymentCode::from_base58check("not a payment code"),
            Err(DerivationError::InvalidPaymentCode)
        ));
    }
}
