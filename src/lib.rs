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

//! # Recycle Ledger
//!
//! This library provides the points ledger of a recycling rewards program:
//! users earn points for recycling (by weight), cooperatives earn points for
//! cash contributions, points move peer-to-peer by user code, and points are
//! redeemed for catalog rewards.
//!
//! ## Core Components
//!
//! - [`Engine`]: Validates requests and applies them to an injected store
//! - [`LedgerStore`]: Storage trait whose writes are atomic units of work
//! - [`MemoryStore`] / [`SledStore`]: In-memory and persistent stores
//! - [`UserType`]: User roles and the transfer eligibility table
//! - [`Api`]: Endpoint-shaped surface taking the caller's [`Session`]
//! - [`LedgerError`]: Error types for ledger operation failures
//!
//! ## Example
//!
//! ```
//! use recycle_ledger::{Engine, NewUser, UserType};
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::in_memory();
//! let ana = engine
//!     .register_user(NewUser::new("ana", "Ana Souza", "ana@example.com", UserType::Normal))
//!     .unwrap();
//! let bia = engine
//!     .register_user(NewUser::new("bia", "Bia Lima", "bia@example.com", UserType::Normal))
//!     .unwrap();
//!
//! // 10 points per unit of weight
//! engine.record_recycling(ana.id, dec!(10)).unwrap();
//! let receipt = engine.transfer_p2p(&ana.user_code, &bia.user_code, 30).unwrap();
//! assert_eq!(receipt.points_transferred, 30);
//!
//! assert_eq!(engine.get_user_points(ana.id).unwrap().points, 70);
//! assert_eq!(engine.get_user_points(bia.id).unwrap().points, 30);
//! ```
//!
//! ## Thread Safety
//!
//! The engine is `Sync` whenever its store is. Balance sufficiency is
//! re-checked inside each store write, so concurrent callers cannot drive
//! a balance below zero.

pub mod api;
mod base;
mod engine;
pub mod error;
mod record;
pub mod store;
mod user;

pub use api::{Api, Session};
pub use base::{Points, RewardId, TransactionId, UserCode, UserId};
pub use engine::{DepositReceipt, Engine, Rates, RedemptionReceipt, TransferReceipt, UserPoints};
pub use error::LedgerError;
pub use record::{
    CooperativeDeposit, P2PTransaction, RecyclingTransaction, Reward, TransactionView, UserReward,
};
pub use store::{LedgerStore, MemoryStore, SledStore};
pub use user::{NewUser, User, UserType};
