//! User data models and the reseller hierarchy.
//!
//! This module defines:
//! - `Role`: the tiers admin → master → super-dealer → dealer → agent → user
//! - `User`: Database entity, including wallet/profit/held balances
//! - Request/response types for registration, login and user management

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

text_enum! {
    /// Position in the reseller hierarchy.
    ///
    /// Lower rank means higher in the hierarchy. `Guest` is never stored;
    /// it stands for the anonymous storefront customer.
    pub enum Role {
        Admin => "admin",
        Master => "master",
        SuperDealer => "super_dealer",
        Dealer => "dealer",
        Agent => "agent",
        User => "user",
        Guest => "guest",
    }
}

impl Role {
    pub fn rank(&self) -> u8 {
        match self {
            Role::Admin => 0,
            Role::Master => 1,
            Role::SuperDealer => 2,
            Role::Dealer => 3,
            Role::Agent => 4,
            Role::User => 5,
            Role::Guest => 6,
        }
    }

    /// True when `self` sits strictly above `other` in the hierarchy.
    pub fn outranks(&self, other: Role) -> bool {
        self.rank() < other.rank()
    }

    /// Roles that may own a storefront and earn commission.
    pub fn is_reseller(&self) -> bool {
        matches!(
            self,
            Role::Master | Role::SuperDealer | Role::Dealer | Role::Agent
        )
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Roles that can be persisted on a user row.
    pub fn is_assignable(&self) -> bool {
        !matches!(self, Role::Guest)
    }
}

/// Represents a user record from the database.
///
/// # Balances
///
/// All balances are in pesewas (1 GHS = 100 pesewas):
/// - `wallet_balance`: prepaid funds for instant purchases
/// - `profit_balance`: earned commission, withdrawable
/// - `held_balance`: profit reserved by pending/approved withdrawals
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: Role,
    /// Upline; `None` only for admins.
    pub parent_id: Option<Uuid>,
    pub wallet_balance: i64,
    pub profit_balance: i64,
    pub held_balance: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public registration body. New accounts always get the `user` role.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
    /// Storefront slug that referred this customer; its owner becomes the upline.
    pub referral_slug: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

/// Body for creating a downline account (or any account, for admins).
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
    /// Only honoured for admins; other callers always become the parent.
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<Role>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Manual wallet correction by an admin. Positive credits, negative debits.
#[derive(Debug, Deserialize)]
pub struct WalletAdjustmentRequest {
    pub amount: i64,
    pub reason: String,
}

/// User as returned to clients (no password hash).
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub parent_id: Option<Uuid>,
    pub wallet_balance: i64,
    pub profit_balance: i64,
    pub held_balance: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            phone: user.phone,
            role: user.role,
            parent_id: user.parent_id,
            wallet_balance: user.wallet_balance,
            profit_balance: user.profit_balance,
            held_balance: user.held_balance,
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_is_strictly_ordered() {
        assert!(Role::Admin.outranks(Role::Master));
        assert!(Role::Master.outranks(Role::SuperDealer));
        assert!(Role::Dealer.outranks(Role::Agent));
        assert!(Role::Agent.outranks(Role::User));
        assert!(!Role::Agent.outranks(Role::Agent));
        assert!(!Role::User.outranks(Role::Dealer));
    }

    #[test]
    fn roles_round_trip_through_text() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), *role);
        }
        assert!("reseller".parse::<Role>().is_err());
        assert_eq!(
            serde_json::to_string(&Role::SuperDealer).unwrap(),
            "\"super_dealer\""
        );
    }

    #[test]
    fn only_middle_tiers_are_resellers() {
        assert!(!Role::Admin.is_reseller());
        assert!(Role::Master.is_reseller());
        assert!(Role::Agent.is_reseller());
        assert!(!Role::User.is_reseller());
        assert!(!Role::Guest.is_assignable());
    }
}
