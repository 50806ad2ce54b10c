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
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};

/// An amount of Qi coin units.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug)]
pub struct Sats(pub u64);

impl Sats {
    pub const ZERO: Sats = Sats(0);

    #[inline]
    pub fn checked_add(self, other: Sats) -> Option<Sats> { self.0.checked_add(other.0).map(Sats) }

    #[inline]
    pub fn checked_sub(self, other: Sats) -> Option<Sats> { self.0.checked_sub(other.0).map(Sats) }

    #[inline]
    pub fn is_zero(self) -> bool { self.0 == 0 }
}

impl Display for Sats {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl From<u64> for Sats {
    fn from(value: u64) -> Self { Sats(value) }
}

impl Add for Sats {
    type Output = Sats;
    fn add(self, rhs: Sats) -> Sats { Sats(self.0 + rhs.0) }
}

impl Sub for Sats {
    type Output = Sats;
    fn sub(self, rhs: Sats) -> Sats { Sats(self.0 - rhs.0) }
}

impl AddAssign for Sats {
    fn add_assign(&mut self, rhs: Sats) { self.0 += rhs.0; }
}

impl Sum for Sats {
    fn sum<I: Iterator<Item = Sats>>(iter: I) -> Self { iter.fold(Sats::ZERO, Add::add) }
}
