use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TallyError};

/// Storage format for transaction timestamps.
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Extra-attribute keys with a meaning outside the parser that set them.
pub const EXTRA_CATEGORY_HINT: &str = "category_hint";
pub const EXTRA_SUBCATEGORY_HINT: &str = "subcategory_hint";
pub const EXTRA_BALANCE: &str = "balance";

/// One parsed row of a bank export, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransaction {
    pub id: Option<i64>,
    pub import_batch_id: Option<i64>,
    pub bank: String,
    pub ts: NaiveDateTime,
    pub description: String,
    pub merchant: String,
    pub amount_raw: String,
    pub amount: f64,
    pub currency: String,
    pub account_label: String,
    pub extra: BTreeMap<String, String>,
    pub source_file: Option<String>,
}

impl RawTransaction {
    pub fn extra_value(&self, key: &str) -> Option<&str> {
        self.extra
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub id: i64,
    pub bank: String,
    pub period_month: String,
    pub file_sha256: String,
    pub source_file: String,
    pub user_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleField {
    Merchant,
    Description,
}

impl RuleField {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Merchant => "merchant",
            Self::Description => "description",
        }
    }
}

impl std::str::FromStr for RuleField {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "merchant" => Ok(Self::Merchant),
            "description" => Ok(Self::Description),
            other => Err(TallyError::InvalidRule(format!("unknown field '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOperator {
    Contains,
    StartsWith,
    Equals,
    Regex,
}

impl RuleOperator {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::StartsWith => "startswith",
            Self::Equals => "equals",
            Self::Regex => "regex",
        }
    }
}

impl std::str::FromStr for RuleOperator {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "contains" => Ok(Self::Contains),
            "startswith" | "starts_with" => Ok(Self::StartsWith),
            "equals" => Ok(Self::Equals),
            "regex" => Ok(Self::Regex),
            other => Err(TallyError::InvalidRule(format!("unknown operator '{other}'"))),
        }
    }
}

/// What a rule or override sets. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effects {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub is_transfer: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub id: i64,
    pub field: RuleField,
    pub operator: RuleOperator,
    pub pattern: String,
    pub effects: Effects,
    pub priority: i64,
    pub active: bool,
    pub hit_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct TransactionOverride {
    pub id: i64,
    pub txn_id: i64,
    pub effects: Effects,
    pub note: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationSource {
    Unclassified,
    Hint,
    Rule(i64),
    Override,
}

/// A raw transaction after classification. `id` is the originating raw row's
/// id, so manual overrides keep pointing at the same row across recommits.
#[derive(Debug, Clone)]
pub struct DerivedTransaction {
    pub id: i64,
    pub raw_id: i64,
    pub import_batch_id: i64,
    pub ts: NaiveDateTime,
    pub account_id: String,
    pub account_label: String,
    pub description: String,
    pub merchant: String,
    pub amount: f64,
    pub currency: String,
    pub balance: Option<f64>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub is_transfer: bool,
    pub source_file: String,
    pub source: ClassificationSource,
    /// The rule that matched, even when an override later replaced its effects.
    pub matched_rule: Option<i64>,
}

/// A stored derived transaction as read back for listing and editing.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub id: i64,
    pub ts: String,
    pub account_id: String,
    pub account_label: Option<String>,
    pub description: String,
    pub merchant: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub is_transfer: bool,
    pub source_file: Option<String>,
}

impl TransactionRecord {
    pub fn month_key(&self) -> &str {
        self.ts.get(..7).unwrap_or(&self.ts)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RollupRow {
    pub account_id: String,
    pub month: String,
    pub category: String,
    pub subcategory: String,
    pub income: f64,
    pub expense: f64,
    pub net: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferProposal {
    pub transaction_ids: (i64, i64),
    pub date: String,
    pub from_account: String,
    pub to_account: String,
    pub amount: f64,
    pub descriptions: (String, String),
    pub date_difference_days: i64,
    pub confidence: f64,
}
