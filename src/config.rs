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

//! The tunable knobs threaded through [`crate::scanner`] and [`crate::txbuilder`] instead of
//! hard-coded magic numbers: how wide a gap of unused addresses to keep live, and how many times
//! the send flow re-prices a transaction before accepting whatever fee estimate it last saw.

use crate::denom::Denomination;
use crate::scanner::DEFAULT_GAP_LIMIT;

/// Per-wallet tunables. `Default` reproduces the values spec.md's component design calls for.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct WalletConfig {
    /// Trailing run of unused addresses every chain is kept extended to (spec.md §4.5 step 5).
    pub gap_limit: u32,
    /// How many times the send flow re-runs coin selection against a fresh fee estimate before
    /// accepting the last selection regardless (spec.md §4.7 step 6).
    pub fee_iteration_cap: u32,
    /// The smallest denomination the send flow will spend when converting Qi coins to the Quai
    /// account ledger.
    pub quai_conversion_min: Denomination,
}

impl Default for WalletConfig {
    fn default() -> Self {
        WalletConfig {
            gap_limit: DEFAULT_GAP_LIMIT,
            fee_iteration_cap: 5,
            quai_conversion_min: Denomination::QUAI_CONVERSION_MIN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_component_design() {
        let config = WalletConfig::default();
        assert_eq!(config.gap_limit, 5);
        assert_eq!(config.fee_iteration_cap, 5);
        assert_eq!(config.quai_conversion_min, Denomination::QUAI_CONVERSION_MIN);
    }
}
