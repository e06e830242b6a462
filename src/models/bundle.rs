//! Catalogue models: data bundles, result-checker products and vouchers.
//!
//! Both product kinds live in the `bundles` table and share the same price tiers;
//! data bundles are delivered by a network provider, result checkers by handing
//! out pre-loaded voucher serial/PIN pairs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::Role;

text_enum! {
    pub enum BundleKind {
        DataBundle => "data_bundle",
        ResultChecker => "result_checker",
    }
}

text_enum! {
    /// Mobile network a data bundle is delivered on.
    pub enum Network {
        Mtn => "mtn",
        Telecel => "telecel",
        AirtelTigo => "airteltigo",
    }
}

impl Network {
    /// Local three-digit prefixes (with leading zero) allocated to the network.
    pub fn prefixes(&self) -> &'static [&'static str] {
        match self {
            Network::Mtn => &["024", "025", "053", "054", "055", "059"],
            Network::Telecel => &["020", "050"],
            Network::AirtelTigo => &["026", "027", "056", "057"],
        }
    }

    /// Network owning a normalized local number (`0XXXXXXXXX`).
    pub fn for_number(local: &str) -> Option<Network> {
        let prefix = local.get(..3)?;
        Network::ALL
            .iter()
            .copied()
            .find(|n| n.prefixes().contains(&prefix))
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Network::Mtn => "MTN",
            Network::Telecel => "Telecel",
            Network::AirtelTigo => "AirtelTigo",
        }
    }
}

/// Per-role prices in pesewas.
///
/// Invariant (checked by `pricing::validate_tiers` and a table CHECK):
/// `0 < base ≤ master ≤ super_dealer ≤ dealer ≤ agent ≤ user`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceTiers {
    /// Admin cost price.
    pub base_price: i64,
    pub master_price: i64,
    pub super_dealer_price: i64,
    pub dealer_price: i64,
    pub agent_price: i64,
    /// Retail price for registered users and storefront guests.
    pub user_price: i64,
}

/// Represents a catalogue row from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Bundle {
    pub id: Uuid,
    pub kind: BundleKind,
    /// Set for data bundles only.
    pub network: Option<Network>,
    /// Set for result checkers only (e.g. "WAEC", "BECE").
    pub exam_board: Option<String>,
    pub name: String,
    pub capacity_mb: Option<i32>,
    pub validity_days: Option<i32>,
    #[sqlx(flatten)]
    pub prices: PriceTiers,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body for creating or replacing a catalogue entry.
#[derive(Debug, Deserialize)]
pub struct BundleRequest {
    pub kind: BundleKind,
    pub network: Option<Network>,
    pub exam_board: Option<String>,
    pub name: String,
    pub capacity_mb: Option<i32>,
    pub validity_days: Option<i32>,
    pub prices: PriceTiers,
}

/// Catalogue entry as seen by a non-admin caller: only their own price.
#[derive(Debug, Serialize)]
pub struct BundleResponse {
    pub id: Uuid,
    pub kind: BundleKind,
    pub network: Option<Network>,
    pub exam_board: Option<String>,
    pub name: String,
    pub capacity_mb: Option<i32>,
    pub validity_days: Option<i32>,
    pub price: i64,
}

impl BundleResponse {
    pub fn priced(bundle: Bundle, price: i64) -> Self {
        Self {
            id: bundle.id,
            kind: bundle.kind,
            network: bundle.network,
            exam_board: bundle.exam_board,
            name: bundle.name,
            capacity_mb: bundle.capacity_mb,
            validity_days: bundle.validity_days,
            price,
        }
    }

    pub fn for_role(bundle: Bundle, role: Role) -> Self {
        let price = crate::services::pricing::price_for(&bundle.prices, role);
        Self::priced(bundle, price)
    }
}

/// Full catalogue entry including every tier (admin view).
#[derive(Debug, Serialize)]
pub struct AdminBundleResponse {
    pub id: Uuid,
    pub kind: BundleKind,
    pub network: Option<Network>,
    pub exam_board: Option<String>,
    pub name: String,
    pub capacity_mb: Option<i32>,
    pub validity_days: Option<i32>,
    pub prices: PriceTiers,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<Bundle> for AdminBundleResponse {
    fn from(bundle: Bundle) -> Self {
        Self {
            id: bundle.id,
            kind: bundle.kind,
            network: bundle.network,
            exam_board: bundle.exam_board,
            name: bundle.name,
            capacity_mb: bundle.capacity_mb,
            validity_days: bundle.validity_days,
            prices: bundle.prices,
            is_active: bundle.is_active,
            updated_at: bundle.updated_at,
        }
    }
}

/// A result-checker voucher delivered to a buyer.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Voucher {
    pub serial: String,
    pub pin: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadVouchersRequest {
    pub vouchers: Vec<Voucher>,
}

#[derive(Debug, Serialize)]
pub struct VoucherUploadResponse {
    pub inserted: u64,
    pub duplicates: u64,
}

#[derive(Debug, Serialize)]
pub struct VoucherStockResponse {
    pub bundle_id: Uuid,
    pub available: i64,
    pub sold: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_map_to_their_network() {
        assert_eq!(Network::for_number("0241234567"), Some(Network::Mtn));
        assert_eq!(Network::for_number("0501234567"), Some(Network::Telecel));
        assert_eq!(Network::for_number("0571234567"), Some(Network::AirtelTigo));
        assert_eq!(Network::for_number("0311234567"), None);
        assert_eq!(Network::for_number("02"), None);
    }

    #[test]
    fn airteltigo_keeps_its_wire_name() {
        assert_eq!(
            serde_json::to_string(&Network::AirtelTigo).unwrap(),
            "\"airteltigo\""
        );
        assert_eq!("airteltigo".parse::<Network>().unwrap(), Network::AirtelTigo);
    }
}
