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

//! Persistent ledger store backed by an embedded `sled` database.
//!
//! Each table is a tree keyed by the big-endian row id, so iteration
//! yields rows in insertion order. Values are JSON. Unique indexes on
//! user code and email are separate trees mapping the indexed value to
//! the user id.
//!
//! Every write that touches a balance runs inside one multi-tree sled
//! transaction; sled retries the closure on conflict, so the closures
//! must not move anything out of their environment.

use super::LedgerStore;
use crate::LedgerError;
use crate::base::{Points, RewardId, TransactionId, UserCode, UserId};
use crate::record::{
    CooperativeDeposit, P2PTransaction, RecyclingTransaction, Reward, UserReward,
};
use crate::user::{NewUser, User};
use ::sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    Transactional, TransactionalTree,
};
use ::sled::{Db, Tree};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::debug;

const USERS_TREE: &str = "users";
const USER_CODES_TREE: &str = "user_codes";
const USER_EMAILS_TREE: &str = "user_emails";
const REWARDS_TREE: &str = "rewards";
const RECYCLING_TREE: &str = "recycling_transactions";
const DEPOSITS_TREE: &str = "cooperative_deposits";
const TRANSFERS_TREE: &str = "p2p_transactions";
const REDEMPTIONS_TREE: &str = "user_rewards";

type TxResult<T> = ConflictableTransactionResult<T, LedgerError>;

/// [`LedgerStore`] persisted to disk with `sled`.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    users: Tree,
    user_codes: Tree,
    user_emails: Tree,
    rewards: Tree,
    recycling: Tree,
    deposits: Tree,
    transfers: Tree,
    redemptions: Tree,
}

impl SledStore {
    /// Opens or creates a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let db = ::sled::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened sled ledger store");
        Self::from_db(db)
    }

    /// Opens a throwaway store that is deleted when dropped.
    pub fn temporary() -> Result<Self, LedgerError> {
        let db = ::sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, LedgerError> {
        Ok(Self {
            users: db.open_tree(USERS_TREE)?,
            user_codes: db.open_tree(USER_CODES_TREE)?,
            user_emails: db.open_tree(USER_EMAILS_TREE)?,
            rewards: db.open_tree(REWARDS_TREE)?,
            recycling: db.open_tree(RECYCLING_TREE)?,
            deposits: db.open_tree(DEPOSITS_TREE)?,
            transfers: db.open_tree(TRANSFERS_TREE)?,
            redemptions: db.open_tree(REDEMPTIONS_TREE)?,
            db,
        })
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<(), LedgerError> {
        self.db.flush()?;
        Ok(())
    }

    /// Next id from the database-wide monotonic counter, starting at 1.
    ///
    /// Ids are drawn before a transaction starts, so an aborted write
    /// leaves a gap.
    fn next_id(&self) -> Result<u64, LedgerError> {
        Ok(self.db.generate_id()? + 1)
    }

    fn scan<T: DeserializeOwned>(
        tree: &Tree,
        mut keep: impl FnMut(&T) -> bool,
    ) -> Result<Vec<T>, LedgerError> {
        let mut rows = Vec::new();
        for item in tree.iter() {
            let (_, value) = item?;
            let row: T = decode(&value)?;
            if keep(&row) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Credits `points` to a user and inserts `row` into `table`, atomically.
    fn credit_with_row<R: Serialize>(
        &self,
        user_id: UserId,
        points: Points,
        table: &Tree,
        row: &R,
        row_id: u64,
    ) -> Result<(), LedgerError> {
        let row_bytes = encode(row)?;
        (&self.users, table)
            .transaction(|(users, table)| -> TxResult<()> {
                let mut user = load_user(users, user_id)?;
                user.credit(points).map_err(abort)?;
                store_user(users, &user)?;
                table.insert(&key(row_id)[..], row_bytes.clone())?;
                Ok(())
            })
            .map_err(flatten)
    }
}

impl LedgerStore for SledStore {
    fn insert_user(&self, user: NewUser) -> Result<User, LedgerError> {
        let user = user.into_user(UserId(self.next_id()?), Utc::now());
        (&self.users, &self.user_codes, &self.user_emails)
            .transaction(|(users, codes, emails)| -> TxResult<()> {
                let code = user.user_code.as_str().as_bytes();
                let email = user.email.as_bytes();
                if codes.get(code)?.is_some() || emails.get(email)?.is_some() {
                    return Err(abort(LedgerError::DuplicateUser));
                }
                codes.insert(code, &key(user.id.0)[..])?;
                emails.insert(email, &key(user.id.0)[..])?;
                store_user(users, &user)?;
                Ok(())
            })
            .map_err(flatten)?;
        Ok(user)
    }

    fn user(&self, id: UserId) -> Result<Option<User>, LedgerError> {
        self.users
            .get(&key(id.0)[..])?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn user_by_code(&self, code: &UserCode) -> Result<Option<User>, LedgerError> {
        match self.user_codes.get(code.as_str().as_bytes())? {
            Some(id) => self.user(UserId(id_from_bytes(&id)?)),
            None => Ok(None),
        }
    }

    fn users(&self) -> Result<Vec<User>, LedgerError> {
        Self::scan(&self.users, |_| true)
    }

    fn insert_reward(&self, name: &str, points: Points) -> Result<Reward, LedgerError> {
        let reward = Reward {
            rewards_id: RewardId(self.next_id()?),
            reward: name.to_owned(),
            points,
        };
        self.rewards
            .insert(&key(reward.rewards_id.0)[..], encode(&reward)?)?;
        Ok(reward)
    }

    fn reward(&self, id: RewardId) -> Result<Option<Reward>, LedgerError> {
        self.rewards
            .get(&key(id.0)[..])?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn rewards(&self) -> Result<Vec<Reward>, LedgerError> {
        Self::scan(&self.rewards, |_| true)
    }

    fn record_recycling(
        &self,
        user_id: UserId,
        weight: Decimal,
        points: Points,
        at: DateTime<Utc>,
    ) -> Result<RecyclingTransaction, LedgerError> {
        let id = self.next_id()?;
        let row = RecyclingTransaction {
            id: TransactionId(id),
            user_id,
            weight,
            points,
            transaction_date: at,
        };
        self.credit_with_row(user_id, points, &self.recycling, &row, id)?;
        Ok(row)
    }

    fn record_cooperative_deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
        points: Points,
        at: DateTime<Utc>,
    ) -> Result<CooperativeDeposit, LedgerError> {
        let id = self.next_id()?;
        let row = CooperativeDeposit {
            id: TransactionId(id),
            user_id,
            amount,
            points,
            transaction_date: at,
        };
        self.credit_with_row(user_id, points, &self.deposits, &row, id)?;
        Ok(row)
    }

    fn transfer(
        &self,
        from: &UserCode,
        to: &UserCode,
        points: Points,
        at: DateTime<Utc>,
    ) -> Result<P2PTransaction, LedgerError> {
        let id = self.next_id()?;
        let row = P2PTransaction {
            id: TransactionId(id),
            from: from.clone(),
            to: to.clone(),
            points: -points,
            transaction_date: at,
        };
        let row_bytes = encode(&row)?;

        (&self.users, &self.user_codes, &self.transfers)
            .transaction(|(users, codes, transfers)| -> TxResult<()> {
                let sender_id = resolve_code(codes, from)?.ok_or(abort(LedgerError::NotLoggedIn))?;
                let receiver_id =
                    resolve_code(codes, to)?.ok_or(abort(LedgerError::ReceiverNotFound))?;
                if sender_id == receiver_id {
                    return Err(abort(LedgerError::SelfTransfer));
                }

                let mut sender = load_user(users, sender_id)?;
                let mut receiver = load_user(users, receiver_id)?;
                sender
                    .debit(points, LedgerError::InsufficientBalance)
                    .map_err(abort)?;
                receiver.credit(points).map_err(abort)?;
                store_user(users, &sender)?;
                store_user(users, &receiver)?;
                transfers.insert(&key(id)[..], row_bytes.clone())?;
                Ok(())
            })
            .map_err(flatten)?;
        Ok(row)
    }

    fn redeem(
        &self,
        user_code: &UserCode,
        reward: &Reward,
        at: DateTime<Utc>,
    ) -> Result<(UserReward, Points), LedgerError> {
        let id = self.next_id()?;
        let row = UserReward {
            id: TransactionId(id),
            rewards_id: reward.rewards_id,
            user_code: user_code.clone(),
            reward: reward.reward.clone(),
            points: -reward.points,
            redeemed_at: at,
        };
        let row_bytes = encode(&row)?;

        let remaining = (&self.users, &self.user_codes, &self.redemptions)
            .transaction(|(users, codes, redemptions)| -> TxResult<Points> {
                let user_id =
                    resolve_code(codes, user_code)?.ok_or(abort(LedgerError::NotFound("user")))?;
                let mut user = load_user(users, user_id)?;
                user.debit(reward.points, LedgerError::InsufficientPoints)
                    .map_err(abort)?;
                store_user(users, &user)?;
                redemptions.insert(&key(id)[..], row_bytes.clone())?;
                Ok(user.total_points)
            })
            .map_err(flatten)?;
        Ok((row, remaining))
    }

    fn recycling_for(&self, user_id: UserId) -> Result<Vec<RecyclingTransaction>, LedgerError> {
        Self::scan(&self.recycling, |row: &RecyclingTransaction| {
            row.user_id == user_id
        })
    }

    fn cooperative_deposits_for(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CooperativeDeposit>, LedgerError> {
        Self::scan(&self.deposits, |row: &CooperativeDeposit| {
            row.user_id == user_id
        })
    }

    fn transfers_from(&self, code: &UserCode) -> Result<Vec<P2PTransaction>, LedgerError> {
        Self::scan(&self.transfers, |row: &P2PTransaction| &row.from == code)
    }

    fn transfers_to(&self, code: &UserCode) -> Result<Vec<P2PTransaction>, LedgerError> {
        Self::scan(&self.transfers, |row: &P2PTransaction| &row.to == code)
    }

    fn user_rewards(&self, code: &UserCode) -> Result<Vec<UserReward>, LedgerError> {
        Self::scan(&self.redemptions, |row: &UserReward| &row.user_code == code)
    }
}

// === Encoding helpers ===

fn key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn id_from_bytes(bytes: &[u8]) -> Result<u64, LedgerError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| LedgerError::Storage(format!("corrupt id of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, LedgerError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LedgerError> {
    Ok(serde_json::from_slice(bytes)?)
}

// === Transaction helpers ===

fn abort(err: LedgerError) -> ConflictableTransactionError<LedgerError> {
    ConflictableTransactionError::Abort(err)
}

fn flatten(err: TransactionError<LedgerError>) -> LedgerError {
    match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => err.into(),
    }
}

fn resolve_code(codes: &TransactionalTree, code: &UserCode) -> TxResult<Option<UserId>> {
    match codes.get(code.as_str().as_bytes())? {
        Some(id) => Ok(Some(UserId(id_from_bytes(&id).map_err(abort)?))),
        None => Ok(None),
    }
}

fn load_user(users: &TransactionalTree, id: UserId) -> TxResult<User> {
    let bytes = users
        .get(&key(id.0)[..])?
        .ok_or(abort(LedgerError::NotFound("user")))?;
    decode(&bytes).map_err(abort)
}

fn store_user(users: &TransactionalTree, user: &User) -> TxResult<()> {
    let bytes = encode(user).map_err(abort)?;
    users.insert(&key(user.id.0)[..], bytes)?;
    Ok(())
}
