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

//! Points ledger engine.
//!
//! The [`Engine`] validates a caller's request against the current ledger
//! state and then hands the write to a single atomic [`LedgerStore`]
//! primitive. It holds no state of its own besides the injected store and
//! the conversion [`Rates`].
//!
//! # Operations
//!
//! - **Recycling**: normal users earn `weight × 10` points.
//! - **Cooperative deposits**: cooperatives earn `amount × 20` points.
//! - **P2P transfers**: move points between two user codes, subject to the
//!   role eligibility table on [`UserType::may_transfer_to`].
//! - **Redemptions**: spend points on a catalog reward.
//! - **Catalog**: admins create rewards.
//!
//! # Concurrency
//!
//! The engine's own checks are advisory. Sufficiency is re-checked by the
//! store inside the same unit of work that writes the balance, so two
//! concurrent debits can never overdraw an account.

use crate::base::{Points, RewardId, UserCode, UserId};
use crate::record::{
    CooperativeDeposit, RecyclingTransaction, Reward, TransactionView, UserReward,
};
use crate::store::{LedgerStore, MemoryStore};
use crate::user::{NewUser, User, UserType};
use crate::LedgerError;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Conversion rates from recycled weight and deposited cash to points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rates {
    /// Points per unit of recycled weight.
    pub recycling_points_per_unit: Points,
    /// Points per unit of cash deposited by a cooperative.
    pub cooperative_points_per_unit: Points,
}

impl Rates {
    pub const DEFAULT_RECYCLING: Points = 10;
    pub const DEFAULT_COOPERATIVE: Points = 20;

    /// Converts a positive decimal quantity to whole points.
    ///
    /// Rounds half away from zero.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidAmount`] if `quantity` is not positive, the
    /// product overflows, or it rounds to less than one point.
    pub fn points_for(quantity: Decimal, rate: Points) -> Result<Points, LedgerError> {
        if quantity <= Decimal::ZERO || rate <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let points = quantity
            .checked_mul(Decimal::from(rate))
            .ok_or(LedgerError::InvalidAmount)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .ok_or(LedgerError::InvalidAmount)?;
        if points < 1 {
            return Err(LedgerError::InvalidAmount);
        }
        Ok(points)
    }
}

impl Default for Rates {
    fn default() -> Self {
        Self {
            recycling_points_per_unit: Self::DEFAULT_RECYCLING,
            cooperative_points_per_unit: Self::DEFAULT_COOPERATIVE,
        }
    }
}

/// Result of a cooperative deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositReceipt {
    pub success: bool,
    pub points_earned: Points,
}

/// Result of a P2P transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub success: bool,
    pub sender_id: UserId,
    pub sender_full_name: String,
    pub receiver_id: UserId,
    pub receiver_full_name: String,
    pub points_transferred: Points,
}

/// Result of a reward redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionReceipt {
    pub success: bool,
    pub reward_name: String,
    pub points_spent: Points,
    pub remaining_points: Points,
}

/// Balance summary of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPoints {
    pub points: Points,
    pub can_redeem_rewards: bool,
}

/// Ledger engine over an injected store.
pub struct Engine<S> {
    store: S,
    rates: Rates,
}

impl Engine<MemoryStore> {
    /// Creates an engine over a fresh in-memory store with default rates.
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }
}

impl<S: LedgerStore> Engine<S> {
    pub fn new(store: S) -> Self {
        Self::with_rates(store, Rates::default())
    }

    pub fn with_rates(store: S, rates: Rates) -> Self {
        Engine { store, rates }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn rates(&self) -> Rates {
        self.rates
    }

    /// Registers a user with a zero balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidInput`] - Blank code, name, or email.
    /// - [`LedgerError::DuplicateUser`] - Code or email already registered.
    pub fn register_user(&self, user: NewUser) -> Result<User, LedgerError> {
        user.validate()?;
        let user = self
            .store
            .insert_user(user)
            .inspect_err(|err| warn!(%err, "user registration rejected"))?;
        info!(user_id = %user.id, user_code = %user.user_code, user_type = %user.user_type, "user registered");
        Ok(user)
    }

    /// Records a recycling deposit and credits the user.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - Unknown user.
    /// - [`LedgerError::RoleViolation`] - User is not a normal user.
    /// - [`LedgerError::InvalidAmount`] - Weight is not positive.
    pub fn record_recycling(
        &self,
        user_id: UserId,
        weight: Decimal,
    ) -> Result<RecyclingTransaction, LedgerError> {
        debug!(%user_id, %weight, "recording recycling");
        self.try_record_recycling(user_id, weight)
            .inspect(|row| info!(%user_id, points = row.points, "recycling recorded"))
            .inspect_err(|err| warn!(%user_id, %err, "recycling rejected"))
    }

    fn try_record_recycling(
        &self,
        user_id: UserId,
        weight: Decimal,
    ) -> Result<RecyclingTransaction, LedgerError> {
        let user = self.require_user(user_id)?;
        if user.user_type != UserType::Normal {
            return Err(LedgerError::RoleViolation);
        }
        let points = Rates::points_for(weight, self.rates.recycling_points_per_unit)?;
        self.store
            .record_recycling(user_id, weight, points, Utc::now())
    }

    /// Converts a cooperative's cash contribution to points.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - Unknown user.
    /// - [`LedgerError::RoleViolation`] - User is not a cooperative.
    /// - [`LedgerError::InvalidAmount`] - Amount is not positive.
    pub fn record_cooperative_deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<DepositReceipt, LedgerError> {
        debug!(%user_id, %amount, "recording cooperative deposit");
        self.try_record_cooperative_deposit(user_id, amount)
            .inspect(|receipt| info!(%user_id, points = receipt.points_earned, "cooperative deposit recorded"))
            .inspect_err(|err| warn!(%user_id, %err, "cooperative deposit rejected"))
    }

    fn try_record_cooperative_deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<DepositReceipt, LedgerError> {
        let user = self.require_user(user_id)?;
        if user.user_type != UserType::Cooperative {
            return Err(LedgerError::RoleViolation);
        }
        let points = Rates::points_for(amount, self.rates.cooperative_points_per_unit)?;
        let row = self
            .store
            .record_cooperative_deposit(user_id, amount, points, Utc::now())?;
        Ok(DepositReceipt {
            success: true,
            points_earned: row.points,
        })
    }

    /// Transfers points between two users addressed by code.
    ///
    /// # Checks
    ///
    /// Applied in this order; the first failure is returned.
    ///
    /// | Check | Error |
    /// |-------|-------|
    /// | Sender code resolves | [`LedgerError::NotLoggedIn`] |
    /// | Receiver code resolves | [`LedgerError::ReceiverNotFound`] |
    /// | Amount is positive | [`LedgerError::InvalidAmount`] |
    /// | Role pair is eligible | [`LedgerError::RoleViolation`] |
    /// | Sender balance covers amount | [`LedgerError::InsufficientBalance`] |
    /// | Sender differs from receiver | [`LedgerError::SelfTransfer`] |
    pub fn transfer_p2p(
        &self,
        sender_code: &UserCode,
        receiver_code: &UserCode,
        amount: Points,
    ) -> Result<TransferReceipt, LedgerError> {
        debug!(from = %sender_code, to = %receiver_code, amount, "transferring points");
        self.try_transfer_p2p(sender_code, receiver_code, amount)
            .inspect(|_| info!(from = %sender_code, to = %receiver_code, amount, "transfer committed"))
            .inspect_err(|err| warn!(from = %sender_code, to = %receiver_code, %err, "transfer rejected"))
    }

    fn try_transfer_p2p(
        &self,
        sender_code: &UserCode,
        receiver_code: &UserCode,
        amount: Points,
    ) -> Result<TransferReceipt, LedgerError> {
        let sender = self
            .store
            .user_by_code(sender_code)?
            .ok_or(LedgerError::NotLoggedIn)?;
        let receiver = self
            .store
            .user_by_code(receiver_code)?
            .ok_or(LedgerError::ReceiverNotFound)?;

        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if !sender.user_type.may_transfer_to(receiver.user_type) {
            return Err(LedgerError::RoleViolation);
        }
        if sender.total_points < amount {
            return Err(LedgerError::InsufficientBalance);
        }
        if sender.id == receiver.id {
            return Err(LedgerError::SelfTransfer);
        }

        self.store
            .transfer(&sender.user_code, &receiver.user_code, amount, Utc::now())?;

        Ok(TransferReceipt {
            success: true,
            sender_id: sender.id,
            sender_full_name: sender.full_name,
            receiver_id: receiver.id,
            receiver_full_name: receiver.full_name,
            points_transferred: amount,
        })
    }

    /// Spends points on a catalog reward.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - Unknown user or reward.
    /// - [`LedgerError::InsufficientPoints`] - Balance below the reward cost.
    pub fn exchange_points_for_reward(
        &self,
        user_code: &UserCode,
        reward_id: RewardId,
    ) -> Result<RedemptionReceipt, LedgerError> {
        debug!(%user_code, %reward_id, "redeeming reward");
        self.try_exchange_points_for_reward(user_code, reward_id)
            .inspect(|receipt| info!(%user_code, %reward_id, spent = receipt.points_spent, "reward redeemed"))
            .inspect_err(|err| warn!(%user_code, %reward_id, %err, "redemption rejected"))
    }

    fn try_exchange_points_for_reward(
        &self,
        user_code: &UserCode,
        reward_id: RewardId,
    ) -> Result<RedemptionReceipt, LedgerError> {
        let user = self
            .store
            .user_by_code(user_code)?
            .ok_or(LedgerError::NotFound("user"))?;
        let reward = self
            .store
            .reward(reward_id)?
            .ok_or(LedgerError::NotFound("reward"))?;

        if user.total_points < reward.points {
            return Err(LedgerError::InsufficientPoints);
        }

        let (_, remaining_points) = self.store.redeem(&user.user_code, &reward, Utc::now())?;

        Ok(RedemptionReceipt {
            success: true,
            reward_name: reward.reward,
            points_spent: reward.points,
            remaining_points,
        })
    }

    /// Adds a reward to the catalog. Admin only.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::RoleViolation`] - Caller is not an admin.
    /// - [`LedgerError::InvalidAmount`] - Cost is not positive.
    /// - [`LedgerError::InvalidInput`] - Blank name.
    pub fn create_reward(
        &self,
        caller: UserType,
        name: &str,
        points: Points,
    ) -> Result<Reward, LedgerError> {
        if caller != UserType::Admin {
            warn!(%caller, "reward creation rejected");
            return Err(LedgerError::RoleViolation);
        }
        if points <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::InvalidInput("blank reward name".into()));
        }
        let reward = self.store.insert_reward(name, points)?;
        info!(reward_id = %reward.rewards_id, reward = name, points, "reward created");
        Ok(reward)
    }

    // === Queries ===

    pub fn get_user(&self, user_id: UserId) -> Result<Option<User>, LedgerError> {
        self.store.user(user_id)
    }

    pub fn get_user_by_code(&self, code: &UserCode) -> Result<Option<User>, LedgerError> {
        self.store.user_by_code(code)
    }

    /// Snapshot of every user, ordered by id.
    pub fn users(&self) -> Result<Vec<User>, LedgerError> {
        self.store.users()
    }

    /// Balance of a user. Unknown users report zero points and no
    /// redemption rights rather than an error.
    pub fn get_user_points(&self, user_id: UserId) -> Result<UserPoints, LedgerError> {
        Ok(self
            .store
            .user(user_id)?
            .map(|user| UserPoints {
                points: user.total_points,
                can_redeem_rewards: user.can_redeem_rewards,
            })
            .unwrap_or_default())
    }

    /// Transfers involving `user_code`: outgoing legs (negative) followed by
    /// incoming legs (positive). No ordering is guaranteed beyond that.
    pub fn get_user_transactions(
        &self,
        user_code: &UserCode,
    ) -> Result<Vec<TransactionView>, LedgerError> {
        let outgoing = self.store.transfers_from(user_code)?;
        let incoming = self.store.transfers_to(user_code)?;
        Ok(outgoing
            .iter()
            .map(TransactionView::outgoing)
            .chain(incoming.iter().map(TransactionView::incoming))
            .collect())
    }

    /// The reward catalog, cheapest first.
    pub fn get_available_rewards(&self) -> Result<Vec<Reward>, LedgerError> {
        let mut rewards = self.store.rewards()?;
        rewards.sort_by_key(|reward| (reward.points, reward.rewards_id));
        Ok(rewards)
    }

    pub fn get_user_rewards(&self, user_code: &UserCode) -> Result<Vec<UserReward>, LedgerError> {
        self.store.user_rewards(user_code)
    }

    pub fn get_recycling_history(
        &self,
        user_id: UserId,
    ) -> Result<Vec<RecyclingTransaction>, LedgerError> {
        self.store.recycling_for(user_id)
    }

    pub fn get_cooperative_deposits(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CooperativeDeposit>, LedgerError> {
        self.store.cooperative_deposits_for(user_id)
    }

    fn require_user(&self, user_id: UserId) -> Result<User, LedgerError> {
        self.store
            .user(user_id)?
            .ok_or(LedgerError::NotFound("user"))
    }
}

impl Default for Engine<MemoryStore> {
    fn default() -> Self {
        Self::in_memory()
    }
}
