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

//! In-memory ledger store.
//!
//! Users and ledger rows live in one [`Tables`] value behind a
//! [`RwLock`]; every atomic write takes the write lock exactly once, so a
//! transfer sees and updates both balances under the same guard. The
//! reward catalog is append-only and independent of balances, so it lives
//! in a [`DashMap`] outside the lock.

use super::LedgerStore;
use crate::LedgerError;
use crate::base::{Points, RewardId, TransactionId, UserCode, UserId};
use crate::record::{
    CooperativeDeposit, P2PTransaction, RecyclingTransaction, Reward, UserReward,
};
use crate::user::{NewUser, User};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    /// Unique index on `user_code`.
    codes: HashMap<UserCode, UserId>,
    /// Unique index on `email`.
    emails: HashSet<String>,
    recycling: Vec<RecyclingTransaction>,
    deposits: Vec<CooperativeDeposit>,
    transfers: Vec<P2PTransaction>,
    redemptions: Vec<UserReward>,
    last_user_id: u64,
    last_row_id: u64,
}

impl Tables {
    fn next_row_id(&mut self) -> TransactionId {
        self.last_row_id += 1;
        TransactionId(self.last_row_id)
    }

    fn user_mut(&mut self, id: UserId) -> Result<&mut User, LedgerError> {
        self.users.get_mut(&id).ok_or(LedgerError::NotFound("user"))
    }

    fn id_for(&self, code: &UserCode) -> Option<UserId> {
        self.codes.get(code).copied()
    }

    fn get(&self, id: UserId) -> Result<&User, LedgerError> {
        self.users.get(&id).ok_or(LedgerError::NotFound("user"))
    }
}

/// Process-local [`LedgerStore`].
///
/// Nothing survives the process; intended for tests, demos, and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    rewards: DashMap<RewardId, Reward>,
    last_reward_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn insert_user(&self, user: NewUser) -> Result<User, LedgerError> {
        let mut tables = self.tables.write();
        if tables.codes.contains_key(&user.user_code) || tables.emails.contains(&user.email) {
            return Err(LedgerError::DuplicateUser);
        }

        tables.last_user_id += 1;
        let user = user.into_user(UserId(tables.last_user_id), Utc::now());
        tables.codes.insert(user.user_code.clone(), user.id);
        tables.emails.insert(user.email.clone());
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn user(&self, id: UserId) -> Result<Option<User>, LedgerError> {
        Ok(self.tables.read().users.get(&id).cloned())
    }

    fn user_by_code(&self, code: &UserCode) -> Result<Option<User>, LedgerError> {
        let tables = self.tables.read();
        Ok(tables
            .id_for(code)
            .and_then(|id| tables.users.get(&id))
            .cloned())
    }

    fn users(&self) -> Result<Vec<User>, LedgerError> {
        Ok(self.tables.read().users.values().cloned().collect())
    }

    fn insert_reward(&self, name: &str, points: Points) -> Result<Reward, LedgerError> {
        let id = RewardId(self.last_reward_id.fetch_add(1, Ordering::Relaxed) + 1);
        let reward = Reward {
            rewards_id: id,
            reward: name.to_owned(),
            points,
        };
        self.rewards.insert(id, reward.clone());
        Ok(reward)
    }

    fn reward(&self, id: RewardId) -> Result<Option<Reward>, LedgerError> {
        Ok(self.rewards.get(&id).map(|entry| entry.value().clone()))
    }

    fn rewards(&self) -> Result<Vec<Reward>, LedgerError> {
        Ok(self
            .rewards
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn record_recycling(
        &self,
        user_id: UserId,
        weight: Decimal,
        points: Points,
        at: DateTime<Utc>,
    ) -> Result<RecyclingTransaction, LedgerError> {
        let mut tables = self.tables.write();
        tables.user_mut(user_id)?.credit(points)?;

        let row = RecyclingTransaction {
            id: tables.next_row_id(),
            user_id,
            weight,
            points,
            transaction_date: at,
        };
        tables.recycling.push(row.clone());
        Ok(row)
    }

    fn record_cooperative_deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
        points: Points,
        at: DateTime<Utc>,
    ) -> Result<CooperativeDeposit, LedgerError> {
        let mut tables = self.tables.write();
        tables.user_mut(user_id)?.credit(points)?;

        let row = CooperativeDeposit {
            id: tables.next_row_id(),
            user_id,
            amount,
            points,
            transaction_date: at,
        };
        tables.deposits.push(row.clone());
        Ok(row)
    }

    fn transfer(
        &self,
        from: &UserCode,
        to: &UserCode,
        points: Points,
        at: DateTime<Utc>,
    ) -> Result<P2PTransaction, LedgerError> {
        let mut tables = self.tables.write();
        let sender_id = tables.id_for(from).ok_or(LedgerError::NotLoggedIn)?;
        let receiver_id = tables.id_for(to).ok_or(LedgerError::ReceiverNotFound)?;
        if sender_id == receiver_id {
            return Err(LedgerError::SelfTransfer);
        }

        // Apply both legs to copies first; nothing is written unless both succeed.
        let mut sender = tables.get(sender_id)?.clone();
        let mut receiver = tables.get(receiver_id)?.clone();
        sender.debit(points, LedgerError::InsufficientBalance)?;
        receiver.credit(points)?;
        tables.users.insert(sender_id, sender);
        tables.users.insert(receiver_id, receiver);

        let row = P2PTransaction {
            id: tables.next_row_id(),
            from: from.clone(),
            to: to.clone(),
            points: -points,
            transaction_date: at,
        };
        tables.transfers.push(row.clone());
        Ok(row)
    }

    fn redeem(
        &self,
        user_code: &UserCode,
        reward: &Reward,
        at: DateTime<Utc>,
    ) -> Result<(UserReward, Points), LedgerError> {
        let mut tables = self.tables.write();
        let user_id = tables.id_for(user_code).ok_or(LedgerError::NotFound("user"))?;
        let user = tables.user_mut(user_id)?;
        user.debit(reward.points, LedgerError::InsufficientPoints)?;
        let remaining = user.total_points;

        let row = UserReward {
            id: tables.next_row_id(),
            rewards_id: reward.rewards_id,
            user_code: user_code.clone(),
            reward: reward.reward.clone(),
            points: -reward.points,
            redeemed_at: at,
        };
        tables.redemptions.push(row.clone());
        Ok((row, remaining))
    }

    fn recycling_for(&self, user_id: UserId) -> Result<Vec<RecyclingTransaction>, LedgerError> {
        Ok(self
            .tables
            .read()
            .recycling
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect())
    }

    fn cooperative_deposits_for(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CooperativeDeposit>, LedgerError> {
        Ok(self
            .tables
            .read()
            .deposits
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect())
    }

    fn transfers_from(&self, code: &UserCode) -> Result<Vec<P2PTransaction>, LedgerError> {
        Ok(self
            .tables
            .read()
            .transfers
            .iter()
            .filter(|row| &row.from == code)
            .cloned()
            .collect())
    }

    fn transfers_to(&self, code: &UserCode) -> Result<Vec<P2PTransaction>, LedgerError> {
        Ok(self
            .tables
            .read()
            .transfers
            .iter()
            .filter(|row| &row.to == code)
            .cloned()
            .collect())
    }

    fn user_rewards(&self, code: &UserCode) -> Result<Vec<UserReward>, LedgerError> {
        Ok(self
            .tables
            .read()
            .redemptions
            .iter()
            .filter(|row| &row.user_code == code)
            .cloned()
            .collect())
    }
}
