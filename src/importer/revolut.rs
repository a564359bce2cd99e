use std::collections::BTreeMap;

use super::{extract_merchant, BankFormat, DecimalConvention, Encoding, Table};
use crate::models::{RawTransaction, EXTRA_BALANCE};

pub(super) const FORMAT: BankFormat = BankFormat {
    encoding: Encoding::Utf8OrLatin1,
    delimiter: b',',
    header_skip: 0,
    required: &["Completed Date", "Description", "Amount", "Currency"],
    date_formats: &["%Y-%m-%d %H:%M:%S", "%d-%m-%Y %H:%M:%S", "%Y-%m-%d", "%d-%m-%Y"],
    decimal: DecimalConvention::Dot,
};

const DEFAULT_ACCOUNT: &str = "Revolut Card";

pub(super) fn rows(table: &Table) -> Vec<RawTransaction> {
    let mut rows = Vec::new();
    for row in table.records() {
        // Pending and reverted rows never settled.
        let state = row.get("State");
        if !state.is_empty() && !state.eq_ignore_ascii_case("COMPLETED") {
            continue;
        }
        let Some(ts) = row.timestamp("Completed Date") else {
            continue;
        };

        let mut amount = row.amount("Amount");
        let fee_raw = row.get("Fee");
        if !fee_raw.is_empty() && fee_raw != "0" {
            amount -= row.amount("Fee").abs();
        }

        let description = row.get("Description").to_string();
        let mut extra = BTreeMap::new();
        extra.insert("type".to_string(), row.get("Type").to_string());
        extra.insert("started_date".to_string(), row.get("Started Date").to_string());
        extra.insert("state".to_string(), state.to_string());
        extra.insert("fee_raw".to_string(), fee_raw.to_string());
        if let Some(balance) = row.optional_amount("Balance") {
            extra.insert(EXTRA_BALANCE.to_string(), balance);
        }

        rows.push(RawTransaction {
            id: None,
            import_batch_id: None,
            bank: table.bank.key().to_string(),
            ts,
            merchant: extract_merchant(&description),
            description,
            amount_raw: row.get("Amount").to_string(),
            amount,
            currency: row.get("Currency").to_uppercase(),
            account_label: row.get_or("Product", DEFAULT_ACCOUNT).to_string(),
            extra,
            source_file: None,
        });
    }
    rows
}

#[cfg(test)]
mod tests {
    use crate::importer::BankKind;
    use crate::models::EXTRA_BALANCE;

    const HEADER: &str = "Type,Product,Started Date,Completed Date,Description,Amount,Fee,Currency,State,Balance\n";

    #[test]
    fn test_parse_completed_rows_and_fees() {
        let content = format!(
            "{HEADER}\
             CARD_PAYMENT,Current,2025-07-02 10:00:00,2025-07-02 10:01:12,Pret A Manger,-6.50,0.20,gbp,COMPLETED,93.30\n\
             TOPUP,Current,2025-07-03 09:00:00,2025-07-03 09:00:05,Top-Up by *1234,100.00,0,GBP,COMPLETED,193.30\n\
             CARD_PAYMENT,Current,2025-07-04 12:00:00,,Pending Shop,-3.00,0,GBP,PENDING,\n\
             CARD_PAYMENT,Current,2025-07-05 12:00:00,2025-07-05 12:00:00,Reverted,-9.00,0,GBP,REVERTED,\n"
        );
        let rows = BankKind::Revolut.parse(content.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);

        assert!((rows[0].amount + 6.7).abs() < 1e-9);
        assert_eq!(rows[0].amount_raw, "-6.50");
        assert_eq!(rows[0].currency, "GBP");
        assert_eq!(rows[0].account_label, "Current");
        assert_eq!(rows[0].ts.to_string(), "2025-07-02 10:01:12");
        assert_eq!(rows[0].extra_value(EXTRA_BALANCE), Some("93.3"));
        assert_eq!(rows[0].extra_value("fee_raw"), Some("0.20"));

        assert_eq!(rows[1].amount, 100.0);
        assert_eq!(rows[1].merchant, "TOP-UP BY *1234");
    }

    #[test]
    fn test_latin1_fallback() {
        let mut content = HEADER.as_bytes().to_vec();
        content.extend_from_slice(b"CARD_PAYMENT,,2025-07-02,02-07-2025,Caf\xe9 Nero,-3.10,0,EUR,COMPLETED,\n");
        let rows = BankKind::Revolut.parse(&content).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].description, "Café Nero");
        assert_eq!(rows[0].account_label, "Revolut Card");
        assert_eq!(rows[0].ts.to_string(), "2025-07-02 00:00:00");
    }

    #[test]
    fn test_missing_currency_column_fails() {
        let content = "Completed Date,Description,Amount\n2025-07-02,X,-1.00\n";
        let err = BankKind::Revolut.parse(content.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("Currency"));
    }
}
