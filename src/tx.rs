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

//! The Qi transaction wire format (spec.md §6): a fixed, bit-exact binary codec over
//! `{chain_id, inputs[{txhash, index, pubkey}], outputs[{address, denomination}], signature}`.
//! Every integer is fixed-width little-endian; there are no varints, matching the consensus-style
//! encoding the rest of the ecosystem hand-rolls for wire formats rather than reaching for a
//! generic serialization crate.

use std::fmt;

use crate::crypto::{Crypto, PublicKey, SchnorrSignature};
use crate::denom::{Denomination, InvalidDenomination};
use crate::derivation::Address;
use crate::outpoint::TxHash;

/// One spent outpoint, referenced by its hash and index plus the pubkey authorizing the spend.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct TxInput {
    pub txhash: TxHash,
    pub index: u16,
    pub pubkey: PublicKey,
}

/// One created outpoint: a destination address and the denomination it is funded with.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct TxOutput {
    pub address: Address,
    pub denomination: Denomination,
}

/// An unsigned-or-signed Qi transaction. `signature` is `None` while the builder is still
/// iterating on fee estimation (spec.md §4.7 steps 1-7) and set once signing completes (step 9).
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct QiTransaction {
    pub chain_id: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub signature: Option<SchnorrSignature>,
}

/// Error returned while decoding a malformed or truncated wire-format transaction.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum WireError {
    /// unexpected end of input while decoding a transaction.
    UnexpectedEof,

    /// invalid denomination byte in an output.
    #[from]
    Denomination(InvalidDenomination),

    /// trailing bytes after a fully decoded transaction.
    TrailingBytes,

    /// invalid signature presence flag (must be 0 or 1).
    InvalidSignatureFlag,
}

impl QiTransaction {
    /// Encodes the transaction body the signature is computed over: everything except the
    /// signature field itself.
    pub fn encode_unsigned(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.chain_id.to_le_bytes());

        buf.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            buf.extend_from_slice(&input.txhash.0);
            buf.extend_from_slice(&input.index.to_le_bytes());
            buf.extend_from_slice(&input.pubkey.0);
        }

        buf.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            buf.extend_from_slice(&output.address.0);
            buf.push(output.denomination.index());
        }

        buf
    }

    /// Encodes the full wire transaction, including the signature if present.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.encode_unsigned();
        match &self.signature {
            Some(sig) => {
                buf.push(1);
                buf.extend_from_slice(&sig.0);
            }
            None => buf.push(0),
        }
        buf
    }

    /// Decodes a transaction previously produced by [`QiTransaction::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor(bytes);

        let chain_id = u64::from_le_bytes(cursor.take::<8>()?);

        let input_count = u32::from_le_bytes(cursor.take::<4>()?);
        let mut inputs = Vec::with_capacity(input_count as usize);
        for _ in 0..input_count {
            let txhash = TxHash(cursor.take::<32>()?);
            let index = u16::from_le_bytes(cursor.take::<2>()?);
            let pubkey = PublicKey(cursor.take::<33>()?);
            inputs.push(TxInput { txhash, index, pubkey });
        }

        let output_count = u32::from_le_bytes(cursor.take::<4>()?);
        let mut outputs = Vec::with_capacity(output_count as usize);
        for _ in 0..output_count {
            let address = Address(cursor.take::<20>()?);
            let denomination = Denomination::new(cursor.byte()?)?;
            outputs.push(TxOutput { address, denomination });
        }

        let signature = match cursor.byte()? {
            0 => None,
            1 => Some(SchnorrSignature(cursor.take::<64>()?)),
            _ => return Err(WireError::InvalidSignatureFlag),
        };

        if !cursor.is_empty() {
            return Err(WireError::TrailingBytes);
        }

        Ok(QiTransaction { chain_id, inputs, outputs, signature })
    }

    /// Keccak-256 of the unsigned serialization, the message both single-input Schnorr and
    /// multi-input MuSig signing sign over (spec.md §4.7 step 9).
    pub fn message_hash(&self, crypto: &impl Crypto) -> [u8; 32] {
        crypto.keccak256(&self.encode_unsigned())
    }

    /// Keccak-256 of the fully signed wire encoding, the hash `broadcast` must echo back
    /// (spec.md §4.7 step 10).
    pub fn txid(&self, crypto: &impl Crypto) -> [u8; 32] { crypto.keccak256(&self.encode()) }
}

/// A tiny fixed-size-chunk reader over a decode buffer; avoids pulling in a general-purpose byte
/// parsing crate for a handful of `take`s.
struct Cursor<'a>(&'a [u8]);

impl<'a> Cursor<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        if self.0.len() < N {
            return Err(WireError::UnexpectedEof);
        }
        let (head, tail) = self.0.split_at(N);
        self.0 = tail;
        Ok(head.try_into().expect("split_at(N) yields an N-byte slice"))
    }

    fn byte(&mut self) -> Result<u8, WireError> { Ok(self.take::<1>()?[0]) }

    fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl fmt::Display for QiTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QiTransaction(chain_id={}, {} inputs, {} outputs, signed={})",
            self.chain_id,
            self.inputs.len(),
            self.outputs.len(),
            self.signature.is_some()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Secp256k1Crypto;

    fn sample() -> QiTransaction {
        QiTransaction {
            chain_id: 9000,
            inputs: vec![TxInput {
                txhash: TxHash([7; 32]),
                index: 3,
                pubkey: PublicKey([2; 33]),
            }],
            outputs: vec![TxOutput {
                address: Address([9; 20]),
                denomination: Denomination::new(4).unwrap(),
            }],
            signature: None,
        }
    }

    #[test]
    fn unsigned_round_trips_through_encode_and_decode() {
        let tx = sample();
        let bytes = tx.encode();
        let decoded = QiTransaction::decode(&bytes).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn signed_round_trips_through_encode_and_decode() {
        let mut tx = sample();
        tx.signature = Some(SchnorrSignature([5; 64]));
        let bytes = tx.encode();
        let decoded = QiTransaction::decode(&bytes).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn signing_does_not_change_the_message_hash() {
        let crypto = Secp256k1Crypto::default();
        let mut tx = sample();
        let hash_before = tx.message_hash(&crypto);
        tx.signature = Some(SchnorrSignature([5; 64]));
        let hash_after = tx.message_hash(&crypto);
        assert_eq!(hash_before, hash_after);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let tx = sample();
        let mut bytes = tx.encode();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(QiTransaction::decode(&bytes), Err(WireError::UnexpectedEof)));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let tx = sample();
        let mut bytes = tx.encode();
        bytes.push(0xFF);
        assert!(matches!(QiTransaction::decode(&bytes), Err(WireError::TrailingBytes)));
    }
}
