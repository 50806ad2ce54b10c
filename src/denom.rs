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

use std::fmt::{self, Display, Formatter};

use crate::Sats;

/// The fixed, network-wide table mapping a denomination index to its coin value. Every Qi output
/// must carry a value from this table; there is no "free-form" amount.
pub const DENOMINATION_TABLE: [u64; 16] = [
    1, 5, 10, 50, 100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 500_000, 1_000_000, 5_000_000,
    10_000_000, 50_000_000,
];

/// An index `0..=15` into [`DENOMINATION_TABLE`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Denomination(u8);

/// Error returned when a raw byte does not name one of the sixteen denominations.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub struct InvalidDenomination(pub u8);

impl Denomination {
    pub const MIN: Denomination = Denomination(0);
    pub const MAX: Denomination = Denomination(15);

    /// The smallest denomination accepted when converting Qi coins into the Quai account ledger.
    pub const QUAI_CONVERSION_MIN: Denomination = Denomination(10);

    #[inline]
    pub fn new(index: u8) -> Result<Self, InvalidDenomination> {
        if index as usize >= DENOMINATION_TABLE.len() {
            return Err(InvalidDenomination(index));
        }
        Ok(Denomination(index))
    }

    #[inline]
    pub fn index(self) -> u8 { self.0 }

    #[inline]
    pub fn value(self) -> Sats { Sats(DENOMINATION_TABLE[self.0 as usize]) }

    /// All sixteen denominations ordered from smallest to largest value.
    pub fn all() -> impl DoubleEndedIterator<Item = Denomination> {
        (0..DENOMINATION_TABLE.len() as u8).map(Denomination)
    }

    /// The largest denomination whose value does not exceed `amount`, if any.
    pub fn largest_fitting(amount: Sats) -> Option<Denomination> {
        Denomination::all().rev().find(|d| d.value() <= amount)
    }

    /// The denomination whose value exactly equals `amount`, if any.
    pub fn exact(amount: Sats) -> Option<Denomination> {
        Denomination::all().find(|d| d.value() == amount)
    }

    /// Splits `amount` into the minimal multiset of denominations summing to it, using a
    /// deterministic greedy-largest-first pass. Returns `None` if `amount` is not expressible as
    /// a sum of denominations (it never is for amount 0, which splits to the empty list).
    pub fn split(mut amount: Sats) -> Option<Vec<Denomination>> {
        let mut parts = Vec::new();
        while !amount.is_zero() {
            let d = Denomination::largest_fitting(amount)?;
            parts.push(d);
            amount = amount.checked_sub(d.value()).expect("largest_fitting is <= amount");
        }
        Some(parts)
    }
}

impl Display for Denomination {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { write!(f, "D{}({})", self.0, self.value()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_monotonically_increasing() {
        for w in DENOMINATION_TABLE.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn splits_seven_with_fee_one_into_five_one_not_two() {
        // Matches spec.md scenario 3: surplus of 1 is a denomination, not split further.
        let parts = Denomination::split(Sats(1)).unwrap();
        assert_eq!(parts, vec![Denomination::new(0).unwrap()]);
        assert!(Denomination::exact(Sats(2)).is_none());
    }

    #[test]
    fn splits_non_denomination_surplus_greedily() {
        // 6 = 5 + 1
        let parts = Denomination::split(Sats(6)).unwrap();
        let values: Vec<u64> = parts.iter().map(|d| d.value().0).collect();
        assert_eq!(values, vec![5, 1]);
    }

    #[test]
    fn zero_splits_to_empty() {
        assert_eq!(Denomination::split(Sats::ZERO), Some(vec![]));
    }

    #[test]
    fn rejects_out_of_range_index() {
        assert_eq!(Denomination::new(16), Err(InvalidDenomination(16)));
    }
}
