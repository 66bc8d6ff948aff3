// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Ledger storage.
//!
//! The [`LedgerStore`] trait is the only way the engine touches state.
//! Read methods return snapshots. Write methods are atomic units of work:
//! each one applies its balance change and its ledger row together or not
//! at all, and re-checks balance sufficiency at write time so that a
//! concurrent debit between the engine's validation and the write cannot
//! overdraw an account.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: process-local tables behind a single lock.
//! - [`SledStore`]: persistent trees in an embedded `sled` database.

mod memory;
mod sled;

pub use memory::MemoryStore;
pub use self::sled::SledStore;

use crate::LedgerError;
use crate::base::{Points, RewardId, UserCode, UserId};
use crate::record::{
    CooperativeDeposit, P2PTransaction, RecyclingTransaction, Reward, UserReward,
};
use crate::user::{NewUser, User};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Storage backend for users, the reward catalog, and ledger rows.
pub trait LedgerStore: Send + Sync {
    // === Users ===

    /// Registers a user with a zero balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::DuplicateUser`] if the email or user code is taken.
    fn insert_user(&self, user: NewUser) -> Result<User, LedgerError>;

    fn user(&self, id: UserId) -> Result<Option<User>, LedgerError>;

    fn user_by_code(&self, code: &UserCode) -> Result<Option<User>, LedgerError>;

    /// All users, ordered by id.
    fn users(&self) -> Result<Vec<User>, LedgerError>;

    // === Reward catalog ===

    fn insert_reward(&self, name: &str, points: Points) -> Result<Reward, LedgerError>;

    fn reward(&self, id: RewardId) -> Result<Option<Reward>, LedgerError>;

    /// All catalog entries, in no particular order.
    fn rewards(&self) -> Result<Vec<Reward>, LedgerError>;

    // === Atomic writes ===

    /// Inserts a recycling row and credits `points` to the user.
    fn record_recycling(
        &self,
        user_id: UserId,
        weight: Decimal,
        points: Points,
        at: DateTime<Utc>,
    ) -> Result<RecyclingTransaction, LedgerError>;

    /// Inserts a cooperative deposit row and credits `points` to the user.
    fn record_cooperative_deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
        points: Points,
        at: DateTime<Utc>,
    ) -> Result<CooperativeDeposit, LedgerError>;

    /// Moves `points` from `from` to `to` and records the sender-side leg.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotLoggedIn`] / [`LedgerError::ReceiverNotFound`] for unknown codes.
    /// - [`LedgerError::SelfTransfer`] when both codes resolve to one user.
    /// - [`LedgerError::InsufficientBalance`] when the sender's balance, read
    ///   inside the same unit of work, is below `points`.
    fn transfer(
        &self,
        from: &UserCode,
        to: &UserCode,
        points: Points,
        at: DateTime<Utc>,
    ) -> Result<P2PTransaction, LedgerError>;

    /// Debits the reward's cost and records the redemption.
    ///
    /// Returns the redemption row and the balance left after the debit.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InsufficientPoints`] when the balance, read inside the
    /// same unit of work, is below the cost.
    fn redeem(
        &self,
        user_code: &UserCode,
        reward: &Reward,
        at: DateTime<Utc>,
    ) -> Result<(UserReward, Points), LedgerError>;

    // === Ledger queries ===

    fn recycling_for(&self, user_id: UserId) -> Result<Vec<RecyclingTransaction>, LedgerError>;

    fn cooperative_deposits_for(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CooperativeDeposit>, LedgerError>;

    /// Transfers sent by `code`.
    fn transfers_from(&self, code: &UserCode) -> Result<Vec<P2PTransaction>, LedgerError>;

    /// Transfers received by `code`.
    fn transfers_to(&self, code: &UserCode) -> Result<Vec<P2PTransaction>, LedgerError>;

    fn user_rewards(&self, code: &UserCode) -> Result<Vec<UserReward>, LedgerError>;
}
