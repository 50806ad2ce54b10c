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

//! BIP32 hierarchical deterministic keys: extended private/public nodes, child derivation, and
//! the Base58Check extended-key encoding used to move nodes in and out of the wallet.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::crypto::{Crypto, PrivateKey, PublicKey};
use crate::DerivationError;

const PRIVATE_VERSION: [u8; 4] = [0x04, 0x88, 0xAD, 0xE4];
const PUBLIC_VERSION: [u8; 4] = [0x04, 0x88, 0xB2, 0x1E];

/// One step of a derivation path; hardened when `index >= HARDENED_FLAG`.
pub const HARDENED_FLAG: u32 = 0x8000_0000;

/// A single BIP32 derivation index, displayed with the conventional trailing `'` for hardened
/// steps.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ChildNumber(pub u32);

impl ChildNumber {
    pub fn normal(index: u32) -> Result<Self, DerivationError> {
        if index >= HARDENED_FLAG {
            return Err(DerivationError::InvalidPath(format!(
                "{index} is not representable as a normal index"
            )));
        }
        Ok(ChildNumber(index))
    }

    pub fn hardened(index: u32) -> Result<Self, DerivationError> {
        if index >= HARDENED_FLAG {
            return Err(DerivationError::InvalidPath(format!(
                "{index} is not representable as a hardened index"
            )));
        }
        Ok(ChildNumber(index | HARDENED_FLAG))
    }

    pub fn is_hardened(self) -> bool { self.0 & HARDENED_FLAG != 0 }
}

impl Display for ChildNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_hardened() {
            write!(f, "{}'", self.0 & !HARDENED_FLAG)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for ChildNumber {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DerivationError::InvalidPath(s.to_owned());
        if let Some(digits) = s.strip_suffix('\'').or_else(|| s.strip_suffix('h')) {
            let index: u32 = digits.parse().map_err(|_| invalid())?;
            ChildNumber::hardened(index)
        } else {
            let index: u32 = s.parse().map_err(|_| invalid())?;
            ChildNumber::normal(index)
        }
    }
}

/// A fully-qualified derivation path, `m/44'/969'/0'/0/3` and the like.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct DerivationPath(pub Vec<ChildNumber>);

impl DerivationPath {
    pub fn push(&mut self, child: ChildNumber) {
        if self.0.len() >= 255 {
            // caller is expected to check depth via `len()` before pushing; this is a backstop.
        }
        self.0.push(child);
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl Display for DerivationPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for child in &self.0 {
            write!(f, "/{child}")?;
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match parts.next() {
            Some("m") | Some("M") => {}
            _ => return Err(DerivationError::InvalidPath(s.to_owned())),
        }
        let steps = parts.map(ChildNumber::from_str).collect::<Result<Vec<_>, _>>()?;
        if steps.len() > 255 {
            return Err(DerivationError::DepthExceeded(255));
        }
        Ok(DerivationPath(steps))
    }
}

/// An extended private key: a 32-byte secret plus the chain code needed to derive children.
#[derive(Copy, Clone)]
pub struct ExtendedPrivKey {
    pub private_key: PrivateKey,
    pub chain_code: [u8; 32],
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub child_number: u32,
}

/// An extended public key, the public counterpart of [`ExtendedPrivKey`].
#[derive(Copy, Clone)]
pub struct ExtendedPubKey {
    pub public_key: PublicKey,
    pub chain_code: [u8; 32],
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub child_number: u32,
}

impl ExtendedPrivKey {
    /// Derives the master node from a BIP39-style seed via `HMAC-SHA512("Bitcoin seed", seed)`,
    /// the same key-stretching construction BIP32 defines regardless of network.
    pub fn master(crypto: &impl Crypto, seed: &[u8]) -> Self {
        let i = crypto.hmac_sha512(b"Bitcoin seed", seed);
        let mut private_key = [0u8; 32];
        let mut chain_code = [0u8; 32];
        private_key.copy_from_slice(&i[..32]);
        chain_code.copy_from_slice(&i[32..]);
        ExtendedPrivKey {
            private_key: PrivateKey(private_key),
            chain_code,
            depth: 0,
            parent_fingerprint: [0; 4],
            child_number: 0,
        }
    }

    pub fn public_key(&self, crypto: &impl Crypto) -> PublicKey { crypto.public_key(self.private_key) }

    pub fn fingerprint(&self, crypto: &impl Crypto) -> [u8; 4] {
        fingerprint_of(crypto, self.public_key(crypto))
    }

    /// Derives a single child node, hardened or not, per BIP32 §"Private parent key -> private
    /// child key".
    pub fn derive_child(
        &self,
        crypto: &impl Crypto,
        child: ChildNumber,
    ) -> Result<ExtendedPrivKey, DerivationError> {
        if self.depth == 255 {
            return Err(DerivationError::DepthExceeded(255));
        }
        let mut data = Vec::with_capacity(37);
        if child.is_hardened() {
            data.push(0);
            data.extend_from_slice(&self.private_key.0);
        } else {
            data.extend_from_slice(&self.public_key(crypto).0);
        }
        data.extend_from_slice(&child.0.to_be_bytes());

        let i = crypto.hmac_sha512(&self.chain_code, &data);
        let mut il = [0u8; 32];
        let mut chain_code = [0u8; 32];
        il.copy_from_slice(&i[..32]);
        chain_code.copy_from_slice(&i[32..]);

        let private_key = crypto
            .tweak_add_private(self.private_key, &il)
            .ok_or_else(|| DerivationError::InvalidPath(format!("child {child} tweak out of range")))?;

        Ok(ExtendedPrivKey {
            private_key,
            chain_code,
            depth: self.depth + 1,
            parent_fingerprint: self.fingerprint(crypto),
            child_number: child.0,
        })
    }

    /// Walks an entire path from this node, used both for the fixed `m/44'/969'/account'` prefix
    /// and for individual address indices beneath it.
    pub fn derive_path(
        &self,
        crypto: &impl Crypto,
        path: &DerivationPath,
    ) -> Result<ExtendedPrivKey, DerivationError> {
        let mut node = *self;
        for child in &path.0 {
            node = node.derive_child(crypto, *child)?;
        }
        Ok(node)
    }

    pub fn neuter(&self, crypto: &impl Crypto) -> ExtendedPubKey {
        ExtendedPubKey {
            public_key: self.public_key(crypto),
            chain_code: self.chain_code,
            depth: self.depth,
            parent_fingerprint: self.parent_fingerprint,
            child_number: self.child_number,
        }
    }

    pub fn to_base58check(&self, crypto: &impl Crypto) -> String {
        let mut body = Vec::with_capacity(78);
        body.extend_from_slice(&PRIVATE_VERSION);
        body.push(self.depth);
        body.extend_from_slice(&self.parent_fingerprint);
        body.extend_from_slice(&self.child_number.to_be_bytes());
        body.extend_from_slice(&self.chain_code);
        body.push(0);
        body.extend_from_slice(&self.private_key.0);
        let _ = crypto; // checksum uses bs58's built-in double-SHA256, not the injected hasher
        bs58::encode(body).with_check().into_string()
    }

    pub fn from_base58check(s: &str) -> Result<Self, DerivationError> {
        let body = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| DerivationError::InvalidPath(e.to_string()))?;
        if body.len() != 78 || body[0..4] != PRIVATE_VERSION {
            return Err(DerivationError::InvalidPath(s.to_owned()));
        }
        let mut parent_fingerprint = [0u8; 4];
        parent_fingerprint.copy_from_slice(&body[5..9]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&body[13..45]);
        let mut private_key = [0u8; 32];
        private_key.copy_from_slice(&body[46..78]);
        Ok(ExtendedPrivKey {
            private_key: PrivateKey(private_key),
            chain_code,
            depth: body[4],
            parent_fingerprint,
            child_number: u32::from_be_bytes(body[9..13].try_into().unwrap()),
        })
    }
}

impl ExtendedPubKey {
    pub fn fingerprint(&self, crypto: &impl Crypto) -> [u8; 4] { fingerprint_of(crypto, self.public_key) }

    /// Derives a normal (non-hardened) child; hardened children require the private node.
    pub fn derive_child(
        &self,
        crypto: &impl Crypto,
        child: ChildNumber,
    ) -> Result<ExtendedPubKey, DerivationError> {
        if child.is_hardened() {
            return Err(DerivationError::InvalidPath(format!(
                "cannot derive hardened child {child} from a public node"
            )));
        }
        if self.depth == 255 {
            return Err(DerivationError::DepthExceeded(255));
        }
        let mut data = Vec::with_capacity(37);
        data.extend_from_slice(&self.public_key.0);
        data.extend_from_slice(&child.0.to_be_bytes());

        let i = crypto.hmac_sha512(&self.chain_code, &data);
        let mut il = [0u8; 32];
        let mut chain_code = [0u8; 32];
        il.copy_from_slice(&i[..32]);
        chain_code.copy_from_slice(&i[32..]);

        let public_key = crypto
            .tweak_add_public(self.public_key, &il)
            .ok_or_else(|| DerivationError::InvalidPath(format!("child {child} tweak out of range")))?;

        Ok(ExtendedPubKey {
            public_key,
            chain_code,
            depth: self.depth + 1,
            parent_fingerprint: self.fingerprint(crypto),
            child_number: child.0,
        })
    }

    pub fn to_base58check(&self) -> String {
        let mut body = Vec::with_capacity(78);
        body.extend_from_slice(&PUBLIC_VERSION);
        body.push(self.depth);
        body.extend_from_slice(&self.parent_fingerprint);
        body.extend_from_slice(&self.child_number.to_be_bytes());
        body.extend_from_slice(&self.chain_code);
        body.extend_from_slice(&self.public_key.0);
        bs58::encode(body).with_check().into_string()
    }

    pub fn from_base58check(s: &str) -> Result<Self, DerivationError> {
        let body = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| DerivationError::InvalidPath(e.to_string()))?;
        if body.len() != 78 || body[0..4] != PUBLIC_VERSION {
            return Err(DerivationError::InvalidPath(s.to_owned()));
        }
        let mut parent_fingerprint = [0u8; 4];
        parent_fingerprint.copy_from_slice(&body[5..9]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&body[13..45]);
        let mut public_key = [0u8; 33];
        public_key.copy_from_slice(&body[45..78]);
        Ok(ExtendedPubKey {
            public_key: PublicKey(public_key),
            chain_code,
            depth: body[4],
            parent_fingerprint,
            child_number: u32::from_be_bytes(body[9..13].try_into().unwrap()),
        })
    }
}

fn fingerprint_of(crypto: &impl Crypto, pk: PublicKey) -> [u8; 4] {
    let sha = crypto.ripemd160(&sha256(&pk.0));
    [sha[0], sha[1], sha[2], sha[3]]
}

fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Secp256k1Crypto;

    #[test]
    fn master_key_round_trips_through_base58check() {
        let crypto = Secp256k1Crypto::default();
        let master = ExtendedPrivKey::master(&crypto, b"correct horse battery staple seed bytes");
        let encoded = master.to_base58check(&crypto);
        let decoded = ExtendedPrivKey::from_base58check(&encoded).unwrap();
        assert_eq!(decoded.private_key.0, master.private_key.0);
        assert_eq!(decoded.chain_code, master.chain_code);
    }

    #[test]
    fn hardened_and_normal_children_differ() {
        let crypto = Secp256k1Crypto::default();
        let master = ExtendedPrivKey::master(&crypto, b"another seed for differentiation test");
        let hardened = master.derive_child(&crypto, ChildNumber::hardened(0).unwrap()).unwrap();
        let normal = master.derive_child(&crypto, ChildNumber::normal(0).unwrap()).unwrap();
        assert_ne!(hardened.private_key.0, normal.private_key.0);
    }

    #[test]
    fn public_derivation_matches_private_derivation() {
        let crypto = Secp256k1Crypto::default();
        let master = ExtendedPrivKey::master(&crypto, b"seed used to test neuter derivation path");
        let child_priv = master.derive_child(&crypto, ChildNumber::normal(5).unwrap()).unwrap();
        let child_pub = master.neuter(&crypto).derive_child(&crypto, ChildNumber::normal(5).unwrap()).unwrap();
        assert_eq!(child_priv.public_key(&crypto), child_pub.public_key);
    }

    #[test]
    fn path_parses_and_displays_hardened_steps() {
        let path: DerivationPath = "m/44'/969'/0'/0/3".parse().unwrap();
        assert_eq!(path.to_string(), "m/44'/969'/0'/0/3");
        assert_eq!(path.len(), 5);
    }
}
