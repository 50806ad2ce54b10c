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

//! Per-address bookkeeping: what an address is for, whether it has been used, and how to name
//! its derivation path.
//!
//! `AddressInfo` is a tagged enum rather than one struct with optional/union-typed fields, per
//! the re-architecting guidance against runtime-typed address records: a BIP44 address always
//! carries a `change` flag, a BIP47 address always carries the counterparty it was derived
//! against, and an imported address carries neither.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::bip47::PaymentCode;
use crate::crypto::PublicKey;
use crate::derivation::Address;
use crate::provider::BlockRef;
use crate::{DerivationError, Zone};

/// Whether an address has been seen carrying funds.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Display)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(crate = "serde_crate", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum Status {
    /// never seen an incoming or outgoing transaction.
    #[default]
    #[display("UNUSED")]
    Unused,
    /// has confirmed on-chain activity.
    #[display("USED")]
    Used,
    /// was offered to a counterparty or included in a constructed transaction but not yet
    /// confirmed.
    #[display("ATTEMPTED_USE")]
    AttemptedUse,
    /// usage state could not be determined from the last sync.
    #[display("UNKNOWN")]
    Unknown,
}

/// How an address came to exist in the wallet, and the data unique to that origin.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Origin {
    /// A plain BIP44 address at `m/44'/969'/account'/change/index`.
    Bip44 { account: u32, change: bool, index: u32 },
    /// A BIP47 address derived against a specific counterparty's payment code.
    Bip47 {
        account: u32,
        counterparty: PaymentCode,
        index: u32,
    },
    /// An address whose private key was imported directly rather than derived. spec.md §3 has
    /// `derivation_path` carry the raw private-key bytes for this case; the tagged-variant
    /// re-architecting (Design Notes §9) puts that same byte array directly on the variant
    /// instead of overloading the path string.
    Imported { secret: [u8; 32] },
}

/// Everything the wallet tracks about one address it controls.
#[derive(Copy, Clone, Debug)]
pub struct AddressInfo {
    pub address: Address,
    pub pubkey: PublicKey,
    pub zone: Zone,
    pub status: Status,
    /// The block this address was last checked against, so the scanner can tell a fresh address
    /// (never synced) from one it can delta-sync from a known checkpoint (spec.md §4.5 step 2).
    pub last_synced_block: Option<BlockRef>,
    pub origin: Origin,
}

impl AddressInfo {
    /// The canonical textual derivation path used in snapshots: `m/44'/969'/a'/c/i` for BIP44,
    /// `m/47'/969'/a'/<payment code>/i` for BIP47, and the literal `privateKeys` sentinel for
    /// imported keys.
    pub fn derivation_path(&self) -> DerivationPathName {
        match self.origin {
            Origin::Bip44 { account, change, index } => {
                DerivationPathName::Bip44 { account, change, index }
            }
            Origin::Bip47 { account, counterparty, index } => {
                DerivationPathName::Bip47 { account, counterparty, index }
            }
            Origin::Imported { .. } => DerivationPathName::Imported,
        }
    }

    /// The `(account, change, index)` / `(counterparty, account, index)` position this entry
    /// occupies, or `u32::MAX` for imported keys, which spec.md §3 pins at `index = -1`.
    pub fn index(&self) -> u32 {
        match self.origin {
            Origin::Bip44 { index, .. } | Origin::Bip47 { index, .. } => index,
            Origin::Imported { .. } => u32::MAX,
        }
    }

    /// The chain this address belongs to for gap-limit and sync-grouping purposes, ignoring its
    /// own index. See [`PathFamily`].
    pub fn path_family(&self) -> PathFamily {
        match self.origin {
            Origin::Bip44 { account, change, .. } => PathFamily::Bip44 { account, change },
            Origin::Bip47 { account, counterparty, .. } => {
                PathFamily::Bip47 { account, counterparty }
            }
            Origin::Imported { .. } => PathFamily::Imported,
        }
    }
}

/// The textual form of [`Origin`] as used in snapshot serialization.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum DerivationPathName {
    Bip44 { account: u32, change: bool, index: u32 },
    Bip47 { account: u32, counterparty: PaymentCode, index: u32 },
    Imported,
}

/// The coarser grouping `AddressBook` and the scanner actually operate on: one BIP44 external
/// chain, one BIP44 change chain, and one chain per open BIP47 channel, per account. Distinct
/// from [`DerivationPathName`], which additionally carries the index and so is unique per
/// address rather than per chain — spec.md §4.1's "`\"BIP44:external\"` vs `\"BIP44:change\"` vs
/// each open payment-code channel are scanned independently; their gap counters are separate"
/// operates at this granularity.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PathFamily {
    Bip44 { account: u32, change: bool },
    Bip47 { account: u32, counterparty: PaymentCode },
    Imported,
}

impl Display for PathFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PathFamily::Bip44 { account, change } => {
                write!(f, "m/44'/969'/{account}'/{}", *change as u8)
            }
            PathFamily::Bip47 { account, counterparty } => {
                write!(f, "m/47'/969'/{account}'/{counterparty}")
            }
            PathFamily::Imported => f.write_str("privateKeys"),
        }
    }
}

impl Display for DerivationPathName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DerivationPathName::Bip44 { account, change, index } => {
                write!(f, "m/44'/969'/{account}'/{}/{index}", *change as u8)
            }
            DerivationPathName::Bip47 { account, counterparty, index } => {
                write!(f, "m/47'/969'/{account}'/{counterparty}/{index}")
            }
            DerivationPathName::Imported => f.write_str("privateKeys"),
        }
    }
}

impl FromStr for DerivationPathName {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "privateKeys" {
            return Ok(DerivationPathName::Imported);
        }
        let invalid = || DerivationError::InvalidPath(s.to_owned());
        let rest = s.strip_prefix("m/").ok_or_else(invalid)?;
        let mut parts = rest.split('/');

        let purpose = parts.next().ok_or_else(invalid)?;
        let _coin_type = parts.next().ok_or_else(invalid)?;
        let account: u32 = parts
            .next()
            .and_then(|p| p.strip_suffix('\''))
            .ok_or_else(invalid)?
            .parse()
            .map_err(|_| invalid())?;

        match purpose {
            "44'" => {
                let change: u32 = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
                let index: u32 = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
                if parts.next().is_some() {
                    return Err(invalid());
                }
                Ok(DerivationPathName::Bip44 { account, change: change != 0, index })
            }
            "47'" => {
                let counterparty = parts.next().ok_or_else(invalid)?;
                let counterparty = PaymentCode::from_base58check(counterparty)?;
                let index: u32 = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
                if parts.next().is_some() {
                    return Err(invalid());
                }
                Ok(DerivationPathName::Bip47 { account, counterparty, index })
            }
            _ => Err(invalid()),
        }
    }
}
