use std::collections::BTreeMap;

use super::{extract_merchant, BankFormat, DecimalConvention, Encoding, Table};
use crate::models::{RawTransaction, EXTRA_BALANCE, EXTRA_CATEGORY_HINT, EXTRA_SUBCATEGORY_HINT};

pub(super) const FORMAT: BankFormat = BankFormat {
    encoding: Encoding::Windows1252,
    delimiter: b';',
    header_skip: 0,
    required: &["dateOp", "label", "amount"],
    date_formats: &["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y"],
    decimal: DecimalConvention::Comma,
};

const DEFAULT_ACCOUNT: &str = "Boursorama Account";

/// Boursorama exports carry their own two-level categorisation, which is
/// surfaced as classification hints.
pub(super) fn rows(table: &Table) -> Vec<RawTransaction> {
    let mut rows = Vec::new();
    for row in table.records() {
        let Some(ts) = row.timestamp("dateOp") else {
            continue;
        };
        let description = row.get("label").to_string();

        let mut extra = BTreeMap::new();
        extra.insert(EXTRA_CATEGORY_HINT.to_string(), row.get("categoryParent").to_string());
        extra.insert(EXTRA_SUBCATEGORY_HINT.to_string(), row.get("category").to_string());
        if let Some(balance) = row.optional_amount("accountbalance") {
            extra.insert(EXTRA_BALANCE.to_string(), balance);
        }
        extra.insert("supplier_found".to_string(), row.get("supplierFound").to_string());
        extra.insert("comment".to_string(), row.get("comment").to_string());
        extra.insert("account_num".to_string(), row.get("accountNum").to_string());

        rows.push(RawTransaction {
            id: None,
            import_batch_id: None,
            bank: table.bank.key().to_string(),
            ts,
            merchant: extract_merchant(&description),
            description,
            amount_raw: row.get("amount").to_string(),
            amount: row.amount("amount"),
            currency: "EUR".to_string(),
            account_label: row.get_or("accountLabel", DEFAULT_ACCOUNT).to_string(),
            extra,
            source_file: None,
        });
    }
    rows
}
