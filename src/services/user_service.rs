//! User management: creating downline accounts, roles, activation and
//! manual wallet adjustments.
//!
//! Hierarchy rule: a user's parent always outranks them. Admins may place
//! any role under any suitable parent; resellers may only create strictly
//! lower roles, parented to themselves.

use uuid::Uuid;

use crate::{
    db::DbPool,
    error::{AppError, conflict_on_unique},
    middleware::auth::AuthContext,
    models::{
        ledger::{LedgerAccount, LedgerKind},
        user::{CreateUserRequest, ListUsersQuery, Role, User, WalletAdjustmentRequest},
    },
    services::{
        auth_service,
        ledger_service::{self, Posting},
        pricing::ChainMember,
    },
    validation,
};

/// Check that `parent` may sit directly above `role`.
pub fn check_parent(role: Role, parent: Option<Role>) -> Result<(), AppError> {
    match (role, parent) {
        (Role::Admin, None) => Ok(()),
        (Role::Admin, Some(_)) => Err(AppError::InvalidRequest(
            "Admins cannot have a parent".to_string(),
        )),
        (_, None) => Err(AppError::InvalidRequest(format!(
            "A {role} needs a parent account"
        ))),
        (_, Some(parent)) if parent.outranks(role) => Ok(()),
        (_, Some(parent)) => Err(AppError::InvalidRequest(format!(
            "A {parent} cannot be the parent of a {role}"
        ))),
    }
}

/// Check that the caller may create an account with `role`.
pub fn check_creator(caller: Role, role: Role) -> Result<(), AppError> {
    if !role.is_assignable() {
        return Err(AppError::InvalidRequest(format!("Role {role} cannot be assigned")));
    }
    if caller.is_admin() {
        return Ok(());
    }
    if !caller.is_reseller() || !caller.outranks(role) {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

pub async fn create_user(
    pool: &DbPool,
    auth: &AuthContext,
    request: CreateUserRequest,
) -> Result<User, AppError> {
    check_creator(auth.role, request.role)?;

    let parent_id = match (auth.is_admin(), request.role) {
        (_, Role::Admin) => None,
        (true, _) => Some(request.parent_id.unwrap_or(auth.user_id)),
        (false, _) => Some(auth.user_id),
    };

    let parent_role = match parent_id {
        Some(id) => Some(
            sqlx::query_scalar::<_, Role>("SELECT role FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?
                .ok_or(AppError::NotFound("Parent user"))?,
        ),
        None => None,
    };
    check_parent(request.role, parent_role)?;

    let email = validation::normalize_email(&request.email)?;
    let full_name = validation::require_text(&request.full_name, "full_name", 120)?;
    let phone = request
        .phone
        .as_deref()
        .map(validation::normalize_phone)
        .transpose()?;
    let password_hash = auth_service::hash_password(&request.password)?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, full_name, phone, password_hash, role, parent_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(email)
    .bind(full_name)
    .bind(phone)
    .bind(password_hash)
    .bind(request.role)
    .bind(parent_id)
    .fetch_one(pool)
    .await
    .map_err(|e| conflict_on_unique(e, "An account with this email already exists"))?;

    tracing::info!(
        user_id = %user.id,
        role = %user.role,
        created_by = %auth.user_id,
        "user created"
    );
    Ok(user)
}

/// Admins see everyone, other callers their direct downline.
pub async fn list_users(
    pool: &DbPool,
    auth: &AuthContext,
    query: &ListUsersQuery,
) -> Result<Vec<User>, AppError> {
    let users = sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users
        WHERE ($1 OR parent_id = $2)
          AND ($3::TEXT IS NULL OR role = $3)
        ORDER BY created_at DESC
        LIMIT $4 OFFSET $5
        "#,
    )
    .bind(auth.is_admin())
    .bind(auth.user_id)
    .bind(query.role)
    .bind(query.limit.clamp(1, 200))
    .bind(query.offset.max(0))
    .fetch_all(pool)
    .await?;

    Ok(users)
}

pub async fn get_user(pool: &DbPool, user_id: Uuid) -> Result<User, AppError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("User"))
}

/// Upline of `user_id`, nearest first, excluding the user itself.
pub async fn ancestors(pool: &DbPool, user_id: Uuid) -> Result<Vec<ChainMember>, AppError> {
    let rows: Vec<(Uuid, Role)> = sqlx::query_as(
        r#"
        WITH RECURSIVE chain AS (
            SELECT p.id, p.role, p.parent_id, 1 AS depth
            FROM users u JOIN users p ON p.id = u.parent_id
            WHERE u.id = $1
            UNION ALL
            SELECT p.id, p.role, p.parent_id, c.depth + 1
            FROM chain c JOIN users p ON p.id = c.parent_id
            WHERE c.depth < 16
        )
        SELECT id, role FROM chain ORDER BY depth
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(user_id, role)| ChainMember { user_id, role })
        .collect())
}

/// Change a user's role, keeping the hierarchy consistent with both the
/// parent and the direct children.
pub async fn set_role(pool: &DbPool, user_id: Uuid, role: Role) -> Result<User, AppError> {
    let mut tx = pool.begin().await?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    if !role.is_assignable() {
        return Err(AppError::InvalidRequest(format!("Role {role} cannot be assigned")));
    }

    let parent_role = match user.parent_id {
        Some(parent_id) => Some(
            sqlx::query_scalar::<_, Role>("SELECT role FROM users WHERE id = $1")
                .bind(parent_id)
                .fetch_one(&mut *tx)
                .await?,
        ),
        None => None,
    };
    check_parent(role, parent_role)?;

    let child_roles: Vec<Role> = sqlx::query_scalar("SELECT role FROM users WHERE parent_id = $1")
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;
    if let Some(child) = child_roles.iter().find(|child| !role.outranks(**child)) {
        return Err(AppError::InvalidRequest(format!(
            "A {role} cannot keep a {child} in its downline"
        )));
    }

    let updated = sqlx::query_as::<_, User>(
        "UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(user_id)
    .bind(role)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(user_id = %user_id, from = %user.role, to = %role, "role changed");
    Ok(updated)
}

/// Enable or disable a login. Disabling also ends every session.
pub async fn set_active(
    pool: &DbPool,
    auth: &AuthContext,
    user_id: Uuid,
    is_active: bool,
) -> Result<User, AppError> {
    if user_id == auth.user_id && !is_active {
        return Err(AppError::InvalidRequest(
            "You cannot disable your own account".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET is_active = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(user_id)
    .bind(is_active)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("User"))?;

    if !is_active {
        sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    tracing::info!(user_id = %user_id, is_active, "user activation changed");
    Ok(user)
}

/// Manual wallet credit (positive) or debit (negative) by an admin.
pub async fn adjust_wallet(
    pool: &DbPool,
    auth: &AuthContext,
    user_id: Uuid,
    request: WalletAdjustmentRequest,
) -> Result<User, AppError> {
    let reason = validation::require_text(&request.reason, "reason", 200)?;
    let reference = format!("ADJ-{}", Uuid::new_v4().simple());

    let mut tx = pool.begin().await?;
    ledger_service::post(
        &mut tx,
        Posting {
            user_id,
            account: LedgerAccount::Wallet,
            kind: LedgerKind::Adjustment,
            amount: request.amount,
            reference: &reference,
            description: Some(reason),
        },
    )
    .await?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %user_id,
        amount = request.amount,
        admin_id = %auth.user_id,
        "wallet adjusted"
    );
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parents_must_outrank_children() {
        assert!(check_parent(Role::Dealer, Some(Role::SuperDealer)).is_ok());
        assert!(check_parent(Role::Agent, Some(Role::Admin)).is_ok());
        assert!(check_parent(Role::Dealer, Some(Role::Dealer)).is_err());
        assert!(check_parent(Role::Master, Some(Role::Agent)).is_err());
        assert!(check_parent(Role::User, None).is_err());
        assert!(check_parent(Role::Admin, None).is_ok());
        assert!(check_parent(Role::Admin, Some(Role::Admin)).is_err());
    }

    #[test]
    fn resellers_only_create_lower_roles() {
        assert!(check_creator(Role::Dealer, Role::Agent).is_ok());
        assert!(check_creator(Role::Dealer, Role::User).is_ok());
        assert!(matches!(
            check_creator(Role::Dealer, Role::Dealer),
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            check_creator(Role::Agent, Role::Master),
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            check_creator(Role::User, Role::User),
            Err(AppError::Forbidden)
        ));
    }

    #[test]
    fn admins_create_anything_but_guests() {
        assert!(check_creator(Role::Admin, Role::Master).is_ok());
        assert!(check_creator(Role::Admin, Role::Admin).is_ok());
        assert!(matches!(
            check_creator(Role::Admin, Role::Guest),
            Err(AppError::InvalidRequest(_))
        ));
    }
}
