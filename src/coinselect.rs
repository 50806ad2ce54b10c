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

//! Denomination-constrained coin selection (spec.md §4.6).
//!
//! Two candidate combinations are built for every request: an *exact* one (canonical
//! greedy-largest-first, stopping only when the remaining amount hits zero) and an *overshoot*
//! one (greedy-largest-first, stopping as soon as the accumulated value covers the target). The
//! exact candidate needs no change outputs; the overshoot candidate needs fewer, larger inputs
//! but pays for that with change. Whichever produces fewer total UTXO-touching items (inputs plus
//! change outputs) wins — this is what "fewest coins" means once change is priced in, and it is
//! what makes the selector prefer `{5,1,1}` over `{10}` at target 7 but flip to `{10}` once a fee
//! of 1 makes the exact combination a four-coin affair.

use crate::denom::Denomination;
use crate::outpoint::OutpointInfo;
use crate::{Sats, SelectionError, Zone};

/// The result of a successful coin selection.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct SelectedCoins {
    /// The chosen UTXOs, in the deterministic `(txhash, index)` order spec.md §4.6 requires.
    pub inputs: Vec<OutpointInfo>,
    /// Denomination-sized splits of the payment amount.
    pub spend_outputs: Vec<Denomination>,
    /// Denomination-sized splits of the surplus returned to the wallet.
    pub change_outputs: Vec<Denomination>,
}

impl SelectedCoins {
    pub fn input_value(&self) -> Sats {
        self.inputs.iter().map(|o| o.outpoint.denomination.value()).sum()
    }
}

/// Selects UTXOs from `available` (already filtered to unlocked, spendable outpoints) covering
/// `target + fee` in `zone`. `min_denomination_to_use` additionally restricts which coins may be
/// spent, per spec.md's Quai-conversion rule (`Denomination::QUAI_CONVERSION_MIN`).
pub fn select(
    available: &[OutpointInfo],
    zone: Zone,
    target: Sats,
    fee: Sats,
    min_denomination_to_use: Option<Denomination>,
) -> Result<SelectedCoins, SelectionError> {
    let pool: Vec<&OutpointInfo> = available.iter().filter(|o| o.zone == zone).collect();
    if pool.is_empty() {
        return Err(SelectionError::NoSpendableUtxos(zone));
    }

    let max_available = pool.iter().map(|o| o.outpoint.denomination).max();
    let filtered: Vec<&OutpointInfo> = match min_denomination_to_use {
        Some(min) => {
            let f: Vec<&OutpointInfo> =
                pool.iter().copied().filter(|o| o.outpoint.denomination >= min).collect();
            if f.is_empty() {
                return Err(SelectionError::DenominationTooSmall { min, max: max_available });
            }
            f
        }
        None => pool,
    };

    let target_total = target.checked_add(fee).unwrap_or(Sats(u64::MAX));
    let total_available: Sats = filtered.iter().map(|o| o.outpoint.denomination.value()).sum();
    if total_available < target_total {
        return Err(SelectionError::InsufficientFunds {
            zone,
            needed: target_total,
            available: total_available,
        });
    }

    let mut sorted = filtered;
    sorted.sort_by(|a, b| {
        b.outpoint
            .denomination
            .cmp(&a.outpoint.denomination)
            .then_with(|| a.outpoint.sort_key().cmp(&b.outpoint.sort_key()))
    });

    let exact = exact_greedy(&sorted, target_total);
    let overshoot = overshoot_greedy(&sorted, target_total);

    let chosen = match (exact, overshoot) {
        (Some(exact), Some(overshoot)) => {
            if total_items(&exact, target_total) <= total_items(&overshoot, target_total) {
                exact
            } else {
                overshoot
            }
        }
        (Some(exact), None) => exact,
        (None, Some(overshoot)) => overshoot,
        (None, None) => unreachable!("total_available >= target_total guarantees a cover exists"),
    };

    let input_value: Sats = chosen.iter().map(|o| o.outpoint.denomination.value()).sum();
    let surplus = input_value.checked_sub(target_total).expect("chosen covers target_total");
    let change_outputs = Denomination::split(surplus).unwrap_or_default();
    let spend_outputs = Denomination::split(target).unwrap_or_default();

    Ok(SelectedCoins {
        inputs: chosen.into_iter().cloned().collect(),
        spend_outputs,
        change_outputs,
    })
}

/// Number of UTXO-touching items a candidate costs once its change outputs are priced in.
fn total_items(chosen: &[&OutpointInfo], target_total: Sats) -> usize {
    let value: Sats = chosen.iter().map(|o| o.outpoint.denomination.value()).sum();
    let surplus = value.checked_sub(target_total).unwrap_or(Sats::ZERO);
    let change_parts = Denomination::split(surplus).map(|v| v.len()).unwrap_or(usize::MAX);
    chosen.len() + change_parts
}

/// Greedy-largest-first, taking a coin only if it does not overshoot the remaining amount.
/// Returns `None` if the available coins cannot sum to exactly `target_total`.
fn exact_greedy<'a>(sorted_desc: &[&'a OutpointInfo], target_total: Sats) -> Option<Vec<&'a OutpointInfo>> {
    let mut remaining = target_total;
    let mut chosen = Vec::new();
    if remaining.is_zero() {
        return Some(chosen);
    }
    for outpoint in sorted_desc {
        if remaining.is_zero() {
            break;
        }
        let value = outpoint.outpoint.denomination.value();
        if value <= remaining {
            chosen.push(*outpoint);
            remaining = remaining.checked_sub(value).expect("value <= remaining");
        }
    }
    if remaining.is_zero() {
        Some(chosen)
    } else {
        None
    }
}

/// Greedy-largest-first, stopping as soon as the accumulated value covers `target_total`,
/// overshooting if needed.
fn overshoot_greedy<'a>(
    sorted_desc: &[&'a OutpointInfo],
    target_total: Sats,
) -> Option<Vec<&'a OutpointInfo>> {
    let mut sum = Sats::ZERO;
    let mut chosen = Vec::new();
    for outpoint in sorted_desc {
        if sum >= target_total {
            break;
        }
        chosen.push(*outpoint);
        sum = sum.checked_add(outpoint.outpoint.denomination.value())?;
    }
    if sum >= target_total {
        Some(chosen)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derivation::Address;
    use crate::outpoint::{Outpoint, TxHash};

    fn coin(txhash: u8, denom_index: u8) -> OutpointInfo {
        OutpointInfo {
            outpoint: Outpoint {
                txhash: TxHash([txhash; 32]),
                index: 0,
                denomination: Denomination::new(denom_index).unwrap(),
                lock: 0,
            },
            address: Address([0xAA; 20]),
            zone: Zone::Cyprus1,
            account: Some(0),
            derivation_path: None,
        }
    }

    /// Denomination indices: 0 -> 1, 1 -> 5, 2 -> 10 in the real table.
    fn sample_pool() -> Vec<OutpointInfo> {
        vec![coin(1, 0), coin(2, 0), coin(3, 0), coin(4, 1), coin(5, 2)]
    }

    #[test]
    fn exact_combination_wins_when_it_has_fewer_total_items() {
        let pool = sample_pool();
        let result = select(&pool, Zone::Cyprus1, Sats(7), Sats(0), None).unwrap();
        let values: Vec<u64> = result.inputs.iter().map(|o| o.outpoint.denomination.value().0).collect();
        let mut sorted_values = values.clone();
        sorted_values.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(sorted_values, vec![5, 1, 1]);
        assert!(result.change_outputs.is_empty());
        assert_eq!(result.input_value(), Sats(7));
    }

    #[test]
    fn overshoot_wins_once_the_exact_combination_gets_expensive() {
        let pool = sample_pool();
        let result = select(&pool, Zone::Cyprus1, Sats(7), Sats(1), None).unwrap();
        let values: Vec<u64> = result.inputs.iter().map(|o| o.outpoint.denomination.value().0).collect();
        assert_eq!(values, vec![10]);
        let change_total: u64 = result.change_outputs.iter().map(|d| d.value().0).sum();
        assert_eq!(change_total, 2);
        assert_eq!(result.input_value(), Sats(10));
        // conservation: inputs == spend + change + fee
        let spend_total: u64 = result.spend_outputs.iter().map(|d| d.value().0).sum();
        assert_eq!(spend_total + change_total + 1, 10);
    }

    #[test]
    fn insufficient_funds_reports_shortfall() {
        let pool = vec![coin(1, 0)];
        let err = select(&pool, Zone::Cyprus1, Sats(100), Sats(0), None).unwrap_err();
        assert!(matches!(err, SelectionError::InsufficientFunds { needed: Sats(100), available: Sats(1), .. }));
    }

    #[test]
    fn denomination_too_small_when_converting_to_quai() {
        let pool = vec![coin(1, 8)]; // denomination index 8 < QUAI_CONVERSION_MIN (10)
        let err =
            select(&pool, Zone::Cyprus1, Sats(1), Sats(0), Some(Denomination::QUAI_CONVERSION_MIN))
                .unwrap_err();
        assert!(matches!(err, SelectionError::DenominationTooSmall { .. }));
    }

    #[test]
    fn no_spendable_utxos_in_zone() {
        let pool = vec![coin(1, 0)];
        let err = select(&pool, Zone::Hydra1, Sats(1), Sats(0), None).unwrap_err();
        assert!(matches!(err, SelectionError::NoSpendableUtxos(Zone::Hydra1)));
    }
}
