//! Plain-text order receipts.

use std::fmt::Write;

use crate::models::{
    bundle::{Bundle, Voucher},
    transaction::{Transaction, TransactionStatus},
};

/// Format pesewas as `GHS 12.50`.
pub fn format_amount(pesewas: i64) -> String {
    let sign = if pesewas < 0 { "-" } else { "" };
    let abs = pesewas.unsigned_abs();
    format!("GHS {sign}{}.{:02}", abs / 100, abs % 100)
}

/// Render the receipt of `transaction`. Voucher PINs are included only once delivered.
pub fn render(transaction: &Transaction, bundle: &Bundle, vouchers: &[Voucher]) -> String {
    let mut out = String::new();

    // Writing to a String cannot fail
    let _ = writeln!(out, "RECEIPT {}", transaction.reference);
    let _ = writeln!(out, "Date:      {}", transaction.created_at.format("%Y-%m-%d %H:%M UTC"));
    let _ = writeln!(out, "Item:      {}", bundle.name);
    if let Some(network) = transaction.network {
        let _ = writeln!(out, "Network:   {}", network.display_name());
    }
    if let Some(phone) = &transaction.phone_number {
        let _ = writeln!(out, "Recipient: {phone}");
    }
    let _ = writeln!(out, "Quantity:  {}", transaction.quantity);
    let _ = writeln!(out, "Unit:      {}", format_amount(transaction.unit_price));
    let _ = writeln!(out, "Total:     {}", format_amount(transaction.amount));
    let _ = writeln!(out, "Paid by:   {}", transaction.payment_channel);
    let _ = writeln!(out, "Status:    {}", transaction.status);

    if transaction.status == TransactionStatus::Delivered && !vouchers.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Vouchers:");
        for voucher in vouchers {
            let _ = writeln!(out, "  Serial {}  PIN {}", voucher.serial, voucher.pin);
        }
    }

    out
}
