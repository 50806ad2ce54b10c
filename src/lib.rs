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

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
extern crate serde_crate as serde;

pub mod address;
pub mod address_book;
pub mod amount;
pub mod bip32;
pub mod bip47;
pub mod coinselect;
pub mod config;
pub mod crypto;
pub mod denom;
pub mod derivation;
pub mod error;
pub mod outpoint;
pub mod payment_channel;
pub mod provider;
pub mod scanner;
pub mod seed;
#[cfg(feature = "serde")]
pub mod snapshot;
pub mod tx;
pub mod txbuilder;
pub mod utxo_store;
pub mod wallet;
pub mod zone;

pub use address::{AddressInfo, DerivationPathName, Origin, PathFamily, Status};
pub use address_book::AddressBook;
pub use amount::Sats;
pub use bip32::{ChildNumber, DerivationPath, ExtendedPrivKey, ExtendedPubKey};
pub use bip47::PaymentCode;
pub use config::WalletConfig;
pub use crypto::{Crypto, PrivateKey, PublicKey, Secp256k1Crypto};
pub use denom::{Denomination, InvalidDenomination};
pub use derivation::{Address, QI_COIN_TYPE};
pub use error::{
    DerivationError, ScanError, SelectionError, SendError, SnapshotError, WalletError,
};
pub use outpoint::{Outpoint, OutpointInfo, TxHash};
pub use payment_channel::PaymentChannels;
pub use provider::{BlockRef, BlockTag, ChainAdapter, FeeEstimatePreview, OutpointDelta};
pub use scanner::{AddressUseChecker, SyncSink, DEFAULT_GAP_LIMIT};
pub use seed::SeedSource;
#[cfg(feature = "bip39")]
pub use seed::Bip39Seed;
pub use tx::{QiTransaction, TxInput, TxOutput, WireError};
pub use txbuilder::{Destination, SendOutcome};
pub use utxo_store::UtxoStore;
pub use wallet::QiWallet;
pub use zone::{Zone, ZoneParseError};
