//! Price tiers and the commission cascade.
//!
//! Every bundle carries one price per role. A sale at some price walks up the
//! seller's upline: each reseller on the way keeps the difference between the
//! price paid by the level below and their own tier price.

use uuid::Uuid;

use crate::{
    error::AppError,
    models::{bundle::PriceTiers, user::Role},
};

/// Price a member of `role` pays for a bundle.
pub fn price_for(tiers: &PriceTiers, role: Role) -> i64 {
    match role {
        Role::Admin => tiers.base_price,
        Role::Master => tiers.master_price,
        Role::SuperDealer => tiers.super_dealer_price,
        Role::Dealer => tiers.dealer_price,
        Role::Agent => tiers.agent_price,
        Role::User | Role::Guest => tiers.user_price,
    }
}

/// Check `0 < base ≤ master ≤ super_dealer ≤ dealer ≤ agent ≤ user`.
pub fn validate_tiers(tiers: &PriceTiers) -> Result<(), AppError> {
    if tiers.base_price <= 0 {
        return Err(AppError::InvalidRequest(
            "Base price must be positive".to_string(),
        ));
    }

    let ladder = [
        ("base", tiers.base_price),
        ("master", tiers.master_price),
        ("super_dealer", tiers.super_dealer_price),
        ("dealer", tiers.dealer_price),
        ("agent", tiers.agent_price),
        ("user", tiers.user_price),
    ];

    for pair in ladder.windows(2) {
        let (lower_name, lower) = pair[0];
        let (upper_name, upper) = pair[1];
        if upper < lower {
            return Err(AppError::InvalidRequest(format!(
                "{upper_name} price ({upper}) must not be below {lower_name} price ({lower})"
            )));
        }
    }

    Ok(())
}

/// Check a storefront's custom price against what the owner pays.
pub fn validate_store_price(tiers: &PriceTiers, owner_role: Role, price: i64) -> Result<(), AppError> {
    let cost = price_for(tiers, owner_role);
    if price < cost {
        return Err(AppError::InvalidRequest(format!(
            "Store price ({price}) cannot be below your cost ({cost})"
        )));
    }
    Ok(())
}

/// One member of an upline chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainMember {
    pub user_id: Uuid,
    pub role: Role,
}

/// Margin earned by one member for one sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionShare {
    pub beneficiary_id: Uuid,
    pub amount: i64,
}

/// Split the margin of a sale across the upline.
///
/// `chain` is ordered nearest-first: for a storefront sale it starts with the
/// store owner, for a wallet purchase with the buyer's parent. Each non-admin
/// member earns `downstream_price - price_for(member)` when positive, and its
/// own tier price becomes the downstream price for the next member. Walking
/// stops at the first admin, whose margin is platform revenue.
pub fn commission_cascade(
    tiers: &PriceTiers,
    sale_price: i64,
    chain: &[ChainMember],
) -> Vec<CommissionShare> {
    let mut downstream = sale_price;
    let mut shares = Vec::new();

    for member in chain {
        if member.role.is_admin() {
            break;
        }
        let cost = price_for(tiers, member.role);
        let margin = downstream - cost;
        if margin > 0 {
            shares.push(CommissionShare {
                beneficiary_id: member.user_id,
                amount: margin,
            });
        }
        // A mis-parented chain must never raise the downstream price.
        downstream = downstream.min(cost);
    }

    shares
}
