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

//! Remote-procedure surface over the [`Engine`].
//!
//! One method per endpoint. Protected endpoints take the caller's resolved
//! [`Session`]; `None` means the session collaborator could not identify
//! the caller and yields [`LedgerError::NotLoggedIn`]. Request and response
//! bodies use camelCase field names; decimal inputs travel as strings.
//!
//! | Endpoint | Access |
//! |----------|--------|
//! | `addRecyclingTransaction` | protected, normal users |
//! | `addMoneyToCooperative` | protected, cooperatives |
//! | `sendPointsP2P` | protected |
//! | `getUserTransactions` | protected |
//! | `getAvailableRewards` | public |
//! | `getUserRewards` | protected |
//! | `exchangePointsForReward` | protected |
//! | `createReward` | protected, admins |
//! | `getUserPoints` | protected |

use crate::base::{Points, RewardId, UserCode, UserId};
use crate::engine::{DepositReceipt, Engine, RedemptionReceipt, TransferReceipt, UserPoints};
use crate::record::{Reward, TransactionView, UserReward};
use crate::store::LedgerStore;
use crate::user::{User, UserType};
use crate::LedgerError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Caller identity supplied by the session collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: UserId,
    pub user_type: UserType,
    pub user_code: UserCode,
}

impl Session {
    pub fn for_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            user_type: user.user_type,
            user_code: user.user_code.clone(),
        }
    }
}

// === Request DTOs ===

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRecyclingTransaction {
    pub weight: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMoneyToCooperative {
    pub amount: Decimal,
}

/// `receiver_id` is the receiver's user code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPointsP2P {
    pub receiver_id: UserCode,
    pub amount_points: Points,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangePointsForReward {
    pub reward_id: RewardId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReward {
    pub reward_name: String,
    pub points: Points,
}

/// Error body returned to RPC callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl From<&LedgerError> for ErrorBody {
    fn from(err: &LedgerError) -> Self {
        Self {
            error: err.to_string(),
            code: err.code().to_owned(),
        }
    }
}

/// Endpoint dispatcher.
pub struct Api<S> {
    engine: Engine<S>,
}

fn require(session: Option<&Session>) -> Result<&Session, LedgerError> {
    session.ok_or(LedgerError::NotLoggedIn)
}

impl<S: LedgerStore> Api<S> {
    pub fn new(engine: Engine<S>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine<S> {
        &self.engine
    }

    /// Resolves a session from a user code, as a code-bearing token would.
    pub fn session_for_code(&self, code: &UserCode) -> Result<Option<Session>, LedgerError> {
        Ok(self
            .engine
            .get_user_by_code(code)?
            .as_ref()
            .map(Session::for_user))
    }

    pub fn add_recycling_transaction(
        &self,
        session: Option<&Session>,
        request: AddRecyclingTransaction,
    ) -> Result<(), LedgerError> {
        let session = require(session)?;
        self.engine
            .record_recycling(session.user_id, request.weight)?;
        Ok(())
    }

    pub fn add_money_to_cooperative(
        &self,
        session: Option<&Session>,
        request: AddMoneyToCooperative,
    ) -> Result<DepositReceipt, LedgerError> {
        let session = require(session)?;
        self.engine
            .record_cooperative_deposit(session.user_id, request.amount)
    }

    pub fn send_points_p2p(
        &self,
        session: Option<&Session>,
        request: SendPointsP2P,
    ) -> Result<TransferReceipt, LedgerError> {
        let session = require(session)?;
        self.engine
            .transfer_p2p(&session.user_code, &request.receiver_id, request.amount_points)
    }

    pub fn get_user_transactions(
        &self,
        session: Option<&Session>,
    ) -> Result<Vec<TransactionView>, LedgerError> {
        let session = require(session)?;
        self.engine.get_user_transactions(&session.user_code)
    }

    pub fn get_available_rewards(&self) -> Result<Vec<Reward>, LedgerError> {
        self.engine.get_available_rewards()
    }

    pub fn get_user_rewards(&self, session: Option<&Session>) -> Result<Vec<UserReward>, LedgerError> {
        let session = require(session)?;
        self.engine.get_user_rewards(&session.user_code)
    }

    pub fn exchange_points_for_reward(
        &self,
        session: Option<&Session>,
        request: ExchangePointsForReward,
    ) -> Result<RedemptionReceipt, LedgerError> {
        let session = require(session)?;
        self.engine
            .exchange_points_for_reward(&session.user_code, request.reward_id)
    }

    pub fn create_reward(
        &self,
        session: Option<&Session>,
        request: CreateReward,
    ) -> Result<(), LedgerError> {
        let session = require(session)?;
        self.engine
            .create_reward(session.user_type, &request.reward_name, request.points)?;
        Ok(())
    }

    pub fn get_user_points(&self, session: Option<&Session>) -> Result<UserPoints, LedgerError> {
        let session = require(session)?;
        self.engine.get_user_points(session.user_id)
    }
}
