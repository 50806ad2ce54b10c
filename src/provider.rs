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

//! The contract a remote node client ("chain adapter") must satisfy, per spec.md §4.4. Transport,
//! batching, retries and cancellation all live on the implementor's side of this trait; the core
//! only issues requests and consumes responses.

use std::collections::HashMap;

use crate::denom::Denomination;
use crate::derivation::Address;
use crate::outpoint::{Outpoint, TxHash};
use crate::{Sats, Zone};

/// A block reference, used both as a scan checkpoint and as the tip returned by
/// [`ChainAdapter::get_block_number`]/[`ChainAdapter::get_block`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct BlockRef {
    pub hash: TxHash,
    pub number: u64,
}

/// Tag identifying which block a [`ChainAdapter::get_block`] call should resolve.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BlockTag {
    Latest,
    Number(u64),
    Hash(TxHash),
}

/// The outpoints created and deleted for one address between a prior checkpoint and the tip,
/// as returned by [`ChainAdapter::get_outpoint_deltas`].
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct OutpointDelta {
    pub created: Vec<Outpoint>,
    pub deleted: Vec<Outpoint>,
}

/// A minimal, unsigned preview of a transaction, sufficient for
/// [`ChainAdapter::estimate_fee_qi`] to size a fee without real signatures.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct FeeEstimatePreview {
    pub input_pubkeys: Vec<[u8; 33]>,
    pub output_denominations: Vec<Denomination>,
}

/// The remote node contract the wallet core consumes. Implementors own retries, batching,
/// cancellation and JSON-RPC transport; the core only calls these methods and applies their
/// results (spec.md §4.4, §5).
pub trait ChainAdapter {
    type Error: std::error::Error;

    fn get_block_number(
        &self,
        zone: Zone,
    ) -> impl std::future::Future<Output = Result<u64, Self::Error>> + Send;

    fn get_block(
        &self,
        zone: Zone,
        tag: BlockTag,
    ) -> impl std::future::Future<Output = Result<BlockRef, Self::Error>> + Send;

    fn get_outpoints_by_address(
        &self,
        zone: Zone,
        address: Address,
    ) -> impl std::future::Future<Output = Result<Vec<Outpoint>, Self::Error>> + Send;

    fn get_outpoint_deltas(
        &self,
        zone: Zone,
        addresses: &[Address],
        from_block_hash: TxHash,
        to: BlockTag,
    ) -> impl std::future::Future<Output = Result<HashMap<Address, OutpointDelta>, Self::Error>> + Send;

    fn estimate_fee_qi(
        &self,
        zone: Zone,
        preview: &FeeEstimatePreview,
    ) -> impl std::future::Future<Output = Result<Sats, Self::Error>> + Send;

    fn broadcast(
        &self,
        zone: Zone,
        serialized_tx: &[u8],
    ) -> impl std::future::Future<Output = Result<TxHash, Self::Error>> + Send;

    fn get_chain_id(&self) -> impl std::future::Future<Output = Result<u64, Self::Error>> + Send;
}
