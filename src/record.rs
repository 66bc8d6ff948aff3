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

//! Ledger rows.
//!
//! Rows are written once, together with the balance change they
//! account for, and never modified afterwards.

use crate::base::{Points, RewardId, TransactionId, UserCode, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A normal user's recycling deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecyclingTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub weight: Decimal,
    pub points: Points,
    pub transaction_date: DateTime<Utc>,
}

/// A cooperative's cash contribution converted to points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooperativeDeposit {
    pub id: TransactionId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub points: Points,
    pub transaction_date: DateTime<Utc>,
}

/// A peer-to-peer transfer.
///
/// Only the sender-side leg is stored, so `points` is negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct P2PTransaction {
    pub id: TransactionId,
    pub from: UserCode,
    pub to: UserCode,
    pub points: Points,
    pub transaction_date: DateTime<Utc>,
}

/// A reward catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub rewards_id: RewardId,
    pub reward: String,
    pub points: Points,
}

/// A redemption of a reward by a user.
///
/// `reward` snapshots the catalog name at redemption time; `points` is
/// negative (spent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserReward {
    pub id: TransactionId,
    pub rewards_id: RewardId,
    pub user_code: UserCode,
    pub reward: String,
    pub points: Points,
    pub redeemed_at: DateTime<Utc>,
}

/// A transfer as seen from one participant.
///
/// Outgoing legs carry negative points, incoming legs positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub id: TransactionId,
    pub points: Points,
    pub transaction_date: DateTime<Utc>,
    pub from: UserCode,
    pub to: UserCode,
}

impl TransactionView {
    /// View of a transfer from the sender's side.
    pub fn outgoing(tx: &P2PTransaction) -> Self {
        Self::with_points(tx, -tx.points.abs())
    }

    /// View of a transfer from the receiver's side.
    pub fn incoming(tx: &P2PTransaction) -> Self {
        Self::with_points(tx, tx.points.abs())
    }

    fn with_points(tx: &P2PTransaction, points: Points) -> Self {
        Self {
            id: tx.id,
            points,
            transaction_date: tx.transaction_date,
            from: tx.from.clone(),
            to: tx.to.clone(),
        }
    }
}
