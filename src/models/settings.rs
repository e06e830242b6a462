//! Site-wide settings stored as JSON values in `site_settings`.

use serde::{Deserialize, Serialize};

/// Settings key for the break-mode banner.
pub const BREAK_MODE_KEY: &str = "break_mode";

/// When enabled, purchases and checkouts are paused and `message` is shown to buyers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakMode {
    pub enabled: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl BreakMode {
    pub fn buyer_message(&self) -> String {
        self.message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "Purchases are temporarily paused. Please try again later.".into())
    }
}
