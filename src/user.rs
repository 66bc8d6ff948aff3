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

//! User accounts and role rules.
//!
//! Role Eligibility Table
//!
//! ```text
//!  sender \ receiver │ normal │ cooperative │ admin
//! ───────────────────┼────────┼─────────────┼───────
//!  normal            │  yes   │     no      │  yes
//!  cooperative       │  no    │     no      │  yes
//!  admin             │  yes   │     yes     │  yes
//! ```
//!
//! # Example
//!
//! ```
//! use recycle_ledger::UserType;
//!
//! assert!(UserType::Normal.may_transfer_to(UserType::Normal));
//! assert!(!UserType::Cooperative.may_transfer_to(UserType::Normal));
//! ```

use crate::LedgerError;
use crate::base::{Points, UserCode, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of a user within the rewards program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    /// Individual who earns points by recycling.
    Normal,
    /// Cooperative that earns points for cash contributions.
    Cooperative,
    /// Program operator; may transfer with anyone and manage the catalog.
    Admin,
}

impl UserType {
    /// Returns whether a user of this type may send points to `receiver`.
    pub fn may_transfer_to(self, receiver: UserType) -> bool {
        use UserType::*;
        match (self, receiver) {
            (Admin, _) | (_, Admin) => true,
            (Normal, Normal) => true,
            (Normal, Cooperative) | (Cooperative, Normal) | (Cooperative, Cooperative) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UserType::Normal => "normal",
            UserType::Cooperative => "cooperative",
            UserType::Admin => "admin",
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(UserType::Normal),
            "cooperative" => Ok(UserType::Cooperative),
            "admin" => Ok(UserType::Admin),
            other => Err(LedgerError::InvalidInput(format!("unknown user type '{other}'"))),
        }
    }
}

/// A ledger participant and their point balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub full_name: String,
    pub email: String,
    pub user_code: UserCode,
    pub user_type: UserType,
    pub total_points: Points,
    pub can_redeem_rewards: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Adds points to the balance.
    pub(crate) fn credit(&mut self, points: Points) -> Result<(), LedgerError> {
        if points <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        self.total_points = self
            .total_points
            .checked_add(points)
            .ok_or(LedgerError::InvalidAmount)?;
        Ok(())
    }

    /// Removes points from the balance, failing with `shortfall` when the
    /// balance does not cover them.
    pub(crate) fn debit(&mut self, points: Points, shortfall: LedgerError) -> Result<(), LedgerError> {
        if points <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if self.total_points < points {
            return Err(shortfall);
        }
        self.total_points -= points;
        self.assert_invariants();
        Ok(())
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.total_points >= 0,
            "Invariant violated: balance of {} went negative: {}",
            self.user_code,
            self.total_points
        );
    }
}

/// Registration input for a new user. Balances always start at zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub full_name: String,
    pub email: String,
    pub user_code: UserCode,
    pub user_type: UserType,
    pub can_redeem_rewards: bool,
}

impl NewUser {
    pub fn new(
        user_code: impl Into<UserCode>,
        full_name: impl Into<String>,
        email: impl Into<String>,
        user_type: UserType,
    ) -> Self {
        Self {
            full_name: full_name.into(),
            email: email.into(),
            user_code: user_code.into(),
            user_type,
            can_redeem_rewards: true,
        }
    }

    pub fn with_can_redeem(mut self, can_redeem_rewards: bool) -> Self {
        self.can_redeem_rewards = can_redeem_rewards;
        self
    }

    /// Rejects blank required fields.
    pub(crate) fn validate(&self) -> Result<(), LedgerError> {
        if self.user_code.as_str().trim().is_empty() {
            return Err(LedgerError::InvalidInput("blank user code".into()));
        }
        if self.full_name.trim().is_empty() {
            return Err(LedgerError::InvalidInput("blank full name".into()));
        }
        if self.email.trim().is_empty() {
            return Err(LedgerError::InvalidInput("blank email".into()));
        }
        Ok(())
    }

    /// Materializes the user row once the store has assigned an id.
    pub(crate) fn into_user(self, id: UserId, created_at: DateTime<Utc>) -> User {
        User {
            id,
            full_name: self.full_name,
            email: self.email,
            user_code: self.user_code,
            user_type: self.user_type,
            total_points: 0,
            can_redeem_rewards: self.can_redeem_rewards,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use UserType::*;

    #[test]
    fn eligibility_table() {
        let cases = [
            (Normal, Normal, true),
            (Normal, Cooperative, false),
            (Normal, Admin, true),
            (Cooperative, Normal, false),
            (Cooperative, Cooperative, false),
            (Cooperative, Admin, true),
            (Admin, Normal, true),
            (Admin, Cooperative, true),
            (Admin, Admin, true),
        ];
        for (sender, receiver, allowed) in cases {
            assert_eq!(
                sender.may_transfer_to(receiver),
                allowed,
                "{sender} -> {receiver}"
            );
        }
    }

    #[test]
    fn parses_user_type_case_insensitively() {
        assert_eq!(" Cooperative ".parse::<UserType>(), Ok(Cooperative));
        assert_eq!("ADMIN".parse::<UserType>(), Ok(Admin));
        assert!(matches!(
            "guest".parse::<UserType>(),
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[test]
    fn user_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Cooperative).unwrap(), "\"cooperative\"");
    }

    #[test]
    fn new_user_rejects_blank_fields() {
        let blank_code = NewUser::new("  ", "Ana", "ana@example.com", Normal);
        assert!(matches!(blank_code.validate(), Err(LedgerError::InvalidInput(_))));

        let blank_email = NewUser::new("ana", "Ana", "", Normal);
        assert!(matches!(blank_email.validate(), Err(LedgerError::InvalidInput(_))));

        let ok = NewUser::new("ana", "Ana", "ana@example.com", Normal);
        assert_eq!(ok.validate(), Ok(()));
    }

    fn user(points: Points) -> User {
        let mut user = NewUser::new("ana", "Ana", "ana@example.com", Normal).into_user(UserId(1), Utc::now());
        user.total_points = points;
        user
    }

    #[test]
    fn debit_rejects_overdraft_without_mutating() {
        let mut user = user(20);
        assert_eq!(
            user.debit(30, LedgerError::InsufficientBalance),
            Err(LedgerError::InsufficientBalance)
        );
        assert_eq!(user.total_points, 20);
        user.debit(20, LedgerError::InsufficientBalance).unwrap();
        assert_eq!(user.total_points, 0);
    }

    #[test]
    fn credit_rejects_non_positive_and_overflow() {
        let mut user = user(Points::MAX - 1);
        assert_eq!(user.credit(0), Err(LedgerError::InvalidAmount));
        assert_eq!(user.credit(2), Err(LedgerError::InvalidAmount));
        user.credit(1).unwrap();
        assert_eq!(user.total_points, Points::MAX);
    }

    #[test]
    fn new_user_starts_with_zero_points() {
        let user = NewUser::new("ana", "Ana", "ana@example.com", Normal)
            .with_can_redeem(false)
            .into_user(UserId(1), Utc::now());
        assert_eq!(user.total_points, 0);
        assert!(!user.can_redeem_rewards);
    }
}
