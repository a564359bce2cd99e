use std::collections::BTreeMap;

use super::{extract_merchant, BankFormat, DecimalConvention, Encoding, Table};
use crate::models::RawTransaction;

// Two preamble lines (account, balance) precede the real header.
pub(super) const FORMAT: BankFormat = BankFormat {
    encoding: Encoding::Windows1252,
    delimiter: b';',
    header_skip: 2,
    required: &["Date operation", "Libelle", "Montant"],
    date_formats: &["%d-%m-%Y", "%d/%m/%Y"],
    decimal: DecimalConvention::Comma,
};

const DEFAULT_ACCOUNT: &str = "Compte de chèques";

pub(super) fn rows(table: &Table) -> Vec<RawTransaction> {
    let mut rows = Vec::new();
    for row in table.records() {
        let Some(ts) = row.timestamp("Date operation") else {
            continue;
        };
        let description = row.get("Libelle").to_string();
        let amount_raw = row.get("Montant").to_string();

        let mut extra = BTreeMap::new();
        extra.insert("bank_category".to_string(), row.get("Categorie operation").to_string());
        extra.insert("bank_subcategory".to_string(), row.get("Sous Categorie").to_string());

        rows.push(RawTransaction {
            id: None,
            import_batch_id: None,
            bank: table.bank.key().to_string(),
            ts,
            merchant: extract_merchant(&description),
            description,
            amount: row.amount("Montant"),
            amount_raw,
            currency: "EUR".to_string(),
            account_label: row.get_or("Compte", DEFAULT_ACCOUNT).to_string(),
            extra,
            source_file: None,
        });
    }
    rows
}
