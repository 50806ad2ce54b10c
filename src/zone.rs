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

use std::str::FromStr;

/// One of the nine geographic zones a Quai-family network is partitioned into.
///
/// The first two hex nibbles of an address encode its zone; `Zone::from_address_prefix` performs
/// the reverse lookup used throughout derivation and scanning.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(crate = "serde_crate", rename_all = "kebab-case")
)]
pub enum Zone {
    #[display("cyprus1")]
    Cyprus1,
    #[display("cyprus2")]
    Cyprus2,
    #[display("cyprus3")]
    Cyprus3,
    #[display("paxos1")]
    Paxos1,
    #[display("paxos2")]
    Paxos2,
    #[display("paxos3")]
    Paxos3,
    #[display("hydra1")]
    Hydra1,
    #[display("hydra2")]
    Hydra2,
    #[display("hydra3")]
    Hydra3,
}

/// Error returned when a string or address prefix does not identify a known zone.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ZoneParseError {
    /// invalid zone identifier.
    InvalidZone,
}

impl Zone {
    pub const ALL: [Zone; 9] = [
        Zone::Cyprus1,
        Zone::Cyprus2,
        Zone::Cyprus3,
        Zone::Paxos1,
        Zone::Paxos2,
        Zone::Paxos3,
        Zone::Hydra1,
        Zone::Hydra2,
        Zone::Hydra3,
    ];

    /// The first two hex nibbles (one byte) that every address in this zone must carry.
    pub fn address_prefix(self) -> u8 {
        match self {
            Zone::Cyprus1 => 0x00,
            Zone::Cyprus2 => 0x01,
            Zone::Cyprus3 => 0x02,
            Zone::Paxos1 => 0x10,
            Zone::Paxos2 => 0x11,
            Zone::Paxos3 => 0x12,
            Zone::Hydra1 => 0x20,
            Zone::Hydra2 => 0x21,
            Zone::Hydra3 => 0x22,
        }
    }

    /// Recovers the zone from the first byte of a 20-byte address, if any zone claims it.
    pub fn from_address_prefix(prefix: u8) -> Option<Zone> {
        Zone::ALL.into_iter().find(|z| z.address_prefix() == prefix)
    }
}

impl FromStr for Zone {
    type Err = ZoneParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Zone::ALL
            .into_iter()
            .find(|z| z.to_string().eq_ignore_ascii_case(s))
            .ok_or(ZoneParseError::InvalidZone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_are_unique() {
        let mut prefixes: Vec<u8> = Zone::ALL.iter().map(|z| z.address_prefix()).collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        assert_eq!(prefixes.len(), Zone::ALL.len());
    }

    #[test]
    fn round_trips_through_display_and_from_str() {
        for zone in Zone::ALL {
            assert_eq!(Zone::from_str(&zone.to_string()), Ok(zone));
        }
    }

    #[test]
    fn rejects_unknown_zone() {
        assert_eq!(Zone::from_str("atlantis"), Err(ZoneParseError::InvalidZone));
        assert_eq!(Zone::from_address_prefix(0xff), None);
    }
}
