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

use crate::{Denomination, Sats, Zone};

/// Errors raised while deriving or registering addresses.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum DerivationError {
    /// invalid zone identifier {0}.
    InvalidZone(String),

    /// invalid address representation {0}.
    InvalidAddress(String),

    /// invalid payment code representation.
    InvalidPaymentCode,

    /// invalid derivation path {0}.
    InvalidPath(String),

    /// derivation path depth {0} exceeds the maximum of 255.
    DepthExceeded(u8),

    /// exhausted {0} derivation attempts while looking for a Qi address in zone {1}.
    DerivationExhausted(u32, Zone),

    /// address is already imported under derivation path {0}.
    AddressAlreadyImported(String),
}

/// Errors raised while selecting coins for a payment.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum SelectionError {
    /// insufficient funds: need {needed} sats but only {available} sats are spendable in zone
    /// {zone}.
    InsufficientFunds {
        zone: Zone,
        needed: Sats,
        available: Sats,
    },

    /// zone {0} has no spendable UTXOs.
    NoSpendableUtxos(Zone),

    /// the smallest usable denomination must be at least {min}, but the largest available
    /// denomination is {max}.
    DenominationTooSmall {
        min: Denomination,
        max: Option<Denomination>,
    },
}

/// Errors raised while loading or validating a wallet snapshot.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum SnapshotError {
    /// unsupported snapshot version {0}.
    UnsupportedVersion(u32),

    /// snapshot coin type {0} does not match the expected Qi coin type 969.
    CoinTypeMismatch(u32),

    /// malformed address entry: {0}.
    MalformedAddress(String),

    /// re-derivation of address at {path} index {index} produced a different address than the
    /// one stored in the snapshot.
    CorruptSnapshot { path: String, index: u32 },

    /// failed to parse snapshot JSON: {0}.
    #[from]
    Json(String),

    /// the snapshot's mnemonic phrase could not be parsed: {0}.
    InvalidMnemonic(String),
}

/// Errors raised while scanning or syncing a zone/account against the chain adapter.
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum ScanError<P: std::error::Error> {
    #[display(inner)]
    #[from]
    Derivation(DerivationError),

    /// the chain adapter reported an error in zone {zone} during sync: {source}
    Provider { zone: Zone, source: P },
}

/// Errors that occur while constructing, signing, or broadcasting a transaction.
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum SendError<P: std::error::Error> {
    #[display(inner)]
    #[from]
    Selection(SelectionError),

    #[display(inner)]
    #[from]
    Derivation(DerivationError),

    /// the chain adapter reported an error in zone {zone}: {source}
    Provider { zone: Zone, source: P },

    /// the locally computed transaction hash does not match the hash returned by the node on
    /// broadcast; the inputs were moved to pending and can be recovered with
    /// `reconcile_pending`.
    HashMismatch,

    /// private key for pubkey used by an input could not be resolved from the address book.
    UnresolvedPrivateKey,
}

/// Aggregate error type returned at the crate's public API surface, mirroring the way a runtime
/// wraps component errors behind one enum for callers who don't care which subsystem failed.
#[derive(Debug, Display, Error, From)]
#[display(inner)]
pub enum WalletError<P: std::error::Error> {
    #[from]
    Derivation(DerivationError),

    #[from]
    Selection(SelectionError),

    #[from]
    Snapshot(SnapshotError),

    #[from]
    Send(SendError<P>),

    #[from]
    Scan(ScanError<P>),
}
