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

//! Error types for ledger operations.

use thiserror::Error;

/// Ledger operation errors.
///
/// Every variant is surfaced to the caller as-is; nothing is retried
/// internally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Referenced user or reward does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Caller's role does not permit the operation
    #[error("operation not permitted for this user type")]
    RoleViolation,

    /// Amount, weight, or cost is zero, negative, or out of range
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Transfer exceeds the sender's balance
    #[error("insufficient balance")]
    InsufficientBalance,

    /// Reward cost exceeds the user's balance
    #[error("insufficient points for this reward")]
    InsufficientPoints,

    /// Sender and receiver are the same user
    #[error("cannot send points to yourself")]
    SelfTransfer,

    /// No resolvable session identity
    #[error("user is not logged in")]
    NotLoggedIn,

    /// Transfer target code does not belong to any account
    #[error("receiver code does not belong to any account")]
    ReceiverNotFound,

    /// Email or user code already registered
    #[error("email or user code already registered")]
    DuplicateUser,

    /// Required text field is blank or malformed
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::RoleViolation => "ROLE_VIOLATION",
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            LedgerError::InsufficientPoints => "INSUFFICIENT_POINTS",
            LedgerError::SelfTransfer => "SELF_TRANSFER",
            LedgerError::NotLoggedIn => "NOT_LOGGED_IN",
            LedgerError::ReceiverNotFound => "RECEIVER_NOT_FOUND",
            LedgerError::DuplicateUser => "DUPLICATE_USER",
            LedgerError::InvalidInput(_) => "INVALID_INPUT",
            LedgerError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Storage(format!("serialization failed: {err}"))
    }
}
