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

//! The low-level cryptographic primitives spec.md treats as an external collaborator: secp256k1,
//! Schnorr, MuSig, and the hash functions used by BIP32/Keccak-address derivation. Everything
//! here is a thin, injectable wrapper (per the Design Notes: "ambient global state and
//! singletons... -> injected dependencies: the wallet owns a Crypto handle") around the
//! `secp256k1` crate rather than a reimplementation of the primitives themselves.

use hmac::{Hmac, Mac};
use ripemd::Ripemd160;
use secp256k1::musig::{
    MusigAggNonce, MusigKeyAggCache, MusigPartialSignature, MusigPubNonce, MusigSecNonce,
    MusigSession, MusigSessionId,
};
use secp256k1::{Keypair, Message, PublicKey as Secp256k1PublicKey, Secp256k1, SecretKey};
use sha2::Sha512;
use sha3::{Digest, Keccak256};

/// A raw 32-byte secp256k1 private key.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct PrivateKey(pub [u8; 32]);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// A compressed, 33-byte secp256k1 public key.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct PublicKey(pub [u8; 33]);

/// A 64-byte Schnorr (BIP340-style) signature, used both for single-input signing and as the
/// output of MuSig aggregation.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SchnorrSignature(pub [u8; 64]);

impl PrivateKey {
    pub fn to_secp(self) -> Result<SecretKey, secp256k1::Error> { SecretKey::from_slice(&self.0) }
}

impl PublicKey {
    pub fn to_secp(self) -> Result<Secp256k1PublicKey, secp256k1::Error> {
        Secp256k1PublicKey::from_slice(&self.0)
    }

    pub fn from_secp(pk: Secp256k1PublicKey) -> Self { PublicKey(pk.serialize()) }
}

/// Per-signer MuSig state produced by [`Crypto::musig_nonce_gen`] and consumed by
/// [`Crypto::musig_partial_sign`].
pub struct MusigNonce {
    pub secret: MusigSecNonce,
    pub public: MusigPubNonce,
}

/// The cryptographic collaborator the wallet is constructed with. A production caller supplies a
/// `Secp256k1Crypto`; tests may supply a deterministic stub.
pub trait Crypto {
    fn keccak256(&self, data: &[u8]) -> [u8; 32];

    fn ripemd160(&self, data: &[u8]) -> [u8; 20];

    fn hmac_sha512(&self, key: &[u8], data: &[u8]) -> [u8; 64];

    fn public_key(&self, sk: PrivateKey) -> PublicKey;

    /// Adds `tweak` to `sk` modulo the curve order (BIP32 private child derivation).
    fn tweak_add_private(&self, sk: PrivateKey, tweak: &[u8; 32]) -> Option<PrivateKey>;

    /// Adds `tweak` times the generator to `pk` (BIP32 public child derivation).
    fn tweak_add_public(&self, pk: PublicKey, tweak: &[u8; 32]) -> Option<PublicKey>;

    /// The x-coordinate of `sk * pk`, used as the BIP47 Diffie-Hellman shared secret.
    fn ecdh_x_only(&self, sk: PrivateKey, pk: PublicKey) -> Option<[u8; 32]>;

    fn schnorr_sign(&self, msg_hash: &[u8; 32], sk: PrivateKey) -> SchnorrSignature;

    fn schnorr_verify(&self, msg_hash: &[u8; 32], sig: &SchnorrSignature, pk: PublicKey) -> bool;

    /// Aggregates several signers' pubkeys into the single MuSig pubkey a transaction's combined
    /// signature verifies against.
    fn musig_aggregate_pubkeys(&self, pubkeys: &[PublicKey]) -> Option<PublicKey>;

    /// Generates this signer's secret/public nonce pair for one MuSig session.
    fn musig_nonce_gen(&self, sk: PrivateKey, pk: PublicKey, msg_hash: &[u8; 32]) -> MusigNonce;

    /// Produces this signer's partial signature over `msg_hash` given every signer's pubkey and
    /// the aggregated nonce.
    fn musig_partial_sign(
        &self,
        sk: PrivateKey,
        nonce: MusigNonce,
        pubkeys: &[PublicKey],
        agg_nonce: &MusigAggNonce,
        msg_hash: &[u8; 32],
    ) -> Option<MusigPartialSignature>;

    /// Combines an aggregated nonce from every signer's public nonce.
    fn musig_aggregate_nonces(&self, nonces: &[MusigPubNonce]) -> MusigAggNonce;

    /// Combines every signer's partial signature into the final 64-byte aggregate signature.
    fn musig_aggregate_signatures(
        &self,
        pubkeys: &[PublicKey],
        agg_nonce: &MusigAggNonce,
        msg_hash: &[u8; 32],
        partials: &[MusigPartialSignature],
    ) -> Option<SchnorrSignature>;
}

/// Default [`Crypto`] implementation backed by `secp256k1`.
pub struct Secp256k1Crypto {
    secp: Secp256k1<secp256k1::All>,
}

impl Default for Secp256k1Crypto {
    fn default() -> Self {
        Secp256k1Crypto {
            secp: Secp256k1::new(),
        }
    }
}

impl Crypto for Secp256k1Crypto {
    fn keccak256(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = Keccak256::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    fn ripemd160(&self, data: &[u8]) -> [u8; 20] {
        let mut hasher = Ripemd160::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    fn hmac_sha512(&self, key: &[u8], data: &[u8]) -> [u8; 64] {
        let mut mac = Hmac::<Sha512>::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    fn public_key(&self, sk: PrivateKey) -> PublicKey {
        let sk = sk.to_secp().expect("private key is a valid scalar");
        PublicKey::from_secp(Secp256k1PublicKey::from_secret_key(&self.secp, &sk))
    }

    fn tweak_add_private(&self, sk: PrivateKey, tweak: &[u8; 32]) -> Option<PrivateKey> {
        let sk = sk.to_secp().ok()?;
        let tweak = secp256k1::Scalar::from_be_bytes(*tweak).ok()?;
        let sk = sk.add_tweak(&tweak).ok()?;
        Some(PrivateKey(sk.secret_bytes()))
    }

    fn tweak_add_public(&self, pk: PublicKey, tweak: &[u8; 32]) -> Option<PublicKey> {
        let pk = pk.to_secp().ok()?;
        let tweak = secp256k1::Scalar::from_be_bytes(*tweak).ok()?;
        let pk = pk.add_exp_tweak(&self.secp, &tweak).ok()?;
        Some(PublicKey::from_secp(pk))
    }

    fn ecdh_x_only(&self, sk: PrivateKey, pk: PublicKey) -> Option<[u8; 32]> {
        let sk = sk.to_secp().ok()?;
        let pk = pk.to_secp().ok()?;
        let shared = secp256k1::ecdh::SharedSecret::new(&pk, &sk);
        let mut out = [0u8; 32];
        out.copy_from_slice(&shared.secret_bytes());
        Some(out)
    }

    fn schnorr_sign(&self, msg_hash: &[u8; 32], sk: PrivateKey) -> SchnorrSignature {
        let sk = sk.to_secp().expect("private key is a valid scalar");
        let keypair = Keypair::from_secret_key(&self.secp, &sk);
        let msg = Message::from_digest(*msg_hash);
        let sig = self.secp.sign_schnorr(&msg, &keypair);
        SchnorrSignature(*sig.as_ref())
    }

    fn schnorr_verify(&self, msg_hash: &[u8; 32], sig: &SchnorrSignature, pk: PublicKey) -> bool {
        let Ok(pk) = pk.to_secp() else { return false };
        let (xonly, _) = pk.x_only_public_key();
        let Ok(sig) = secp256k1::schnorr::Signature::from_slice(&sig.0) else { return false };
        let msg = Message::from_digest(*msg_hash);
        self.secp.verify_schnorr(&sig, &msg, &xonly).is_ok()
    }

    fn musig_aggregate_pubkeys(&self, pubkeys: &[PublicKey]) -> Option<PublicKey> {
        let pubkeys: Vec<Secp256k1PublicKey> =
            pubkeys.iter().map(|pk| pk.to_secp()).collect::<Result<_, _>>().ok()?;
        let cache = MusigKeyAggCache::new(&self.secp, &pubkeys.iter().collect::<Vec<_>>());
        Some(PublicKey::from_secp(cache.agg_pk_full()))
    }

    fn musig_nonce_gen(&self, sk: PrivateKey, pk: PublicKey, msg_hash: &[u8; 32]) -> MusigNonce {
        let sk = sk.to_secp().expect("private key is a valid scalar");
        let pk = pk.to_secp().expect("public key is valid");
        let session_id = MusigSessionId::new(&mut secp256k1::rand::thread_rng());
        let msg = Message::from_digest(*msg_hash);
        let keypair = Keypair::from_secret_key(&self.secp, &sk);
        let (secnonce, pubnonce) = self
            .secp
            .musig_nonce_gen(session_id, Some(keypair), None, pk, Some(msg), None)
            .expect("nonce generation with a valid session id never fails");
        MusigNonce {
            secret: secnonce,
            public: pubnonce,
        }
    }

    fn musig_partial_sign(
        &self,
        sk: PrivateKey,
        nonce: MusigNonce,
        pubkeys: &[PublicKey],
        agg_nonce: &MusigAggNonce,
        msg_hash: &[u8; 32],
    ) -> Option<MusigPartialSignature> {
        let sk = sk.to_secp().ok()?;
        let keypair = Keypair::from_secret_key(&self.secp, &sk);
        let pubkeys: Vec<Secp256k1PublicKey> =
            pubkeys.iter().map(|pk| pk.to_secp()).collect::<Result<_, _>>().ok()?;
        let cache = MusigKeyAggCache::new(&self.secp, &pubkeys.iter().collect::<Vec<_>>());
        let msg = Message::from_digest(*msg_hash);
        let session = MusigSession::new(&self.secp, &cache, *agg_nonce, msg);
        session.partial_sign(&self.secp, nonce.secret, &keypair, &cache).ok()
    }

    fn musig_aggregate_nonces(&self, nonces: &[MusigPubNonce]) -> MusigAggNonce {
        MusigAggNonce::new(&self.secp, &nonces.iter().collect::<Vec<_>>())
    }

    fn musig_aggregate_signatures(
        &self,
        pubkeys: &[PublicKey],
        agg_nonce: &MusigAggNonce,
        msg_hash: &[u8; 32],
        partials: &[MusigPartialSignature],
    ) -> Option<SchnorrSignature> {
        let pubkeys: Vec<Secp256k1PublicKey> =
            pubkeys.iter().map(|pk| pk.to_secp()).collect::<Result<_, _>>().ok()?;
        let cache = MusigKeyAggCache::new(&self.secp, &pubkeys.iter().collect::<Vec<_>>());
        let msg = Message::from_digest(*msg_hash);
        let session = MusigSession::new(&self.secp, &cache, *agg_nonce, msg);
        let sig = session.partial_sig_agg(&partials.iter().collect::<Vec<_>>());
        Some(SchnorrSignature(*sig.as_ref()))
    }
}
