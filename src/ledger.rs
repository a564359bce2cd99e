use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::db::placeholders;
use crate::error::{Result, TallyError};
use crate::importer::BankKind;
use crate::models::{ImportRecord, RawTransaction, TS_FORMAT};
use crate::period::Period;
use crate::settings::Settings;

// ---------------------------------------------------------------------------
// Fingerprint & duplicate detection
// ---------------------------------------------------------------------------

pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn is_duplicate(
    conn: &Connection,
    bank: &str,
    period: Period,
    digest: &str,
    user: &str,
) -> Result<bool> {
    Ok(existing_import(conn, bank, period, digest, user)?.is_some())
}

fn existing_import(
    conn: &Connection,
    bank: &str,
    period: Period,
    digest: &str,
    user: &str,
) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM imports WHERE bank = ?1 AND period_month = ?2 AND file_sha256 = ?3 AND user_id = ?4",
            rusqlite::params![bank, period.to_string(), digest, user],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Returns the id of the matching import, creating it if needed. The first
/// writer's row is kept.
pub fn register_import(
    conn: &Connection,
    bank: &str,
    period: Period,
    digest: &str,
    filename: &str,
    user: &str,
) -> Result<i64> {
    if let Some(id) = existing_import(conn, bank, period, digest, user)? {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO imports (bank, period_month, file_sha256, source_file, user_id) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![bank, period.to_string(), digest, filename, user],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_imports(conn: &Connection, user: &str) -> Result<Vec<ImportRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, bank, period_month, file_sha256, source_file, user_id, created_at \
         FROM imports WHERE user_id = ?1 ORDER BY period_month DESC, id DESC",
    )?;
    let rows = stmt
        .query_map([user], |row| {
            Ok(ImportRecord {
                id: row.get(0)?,
                bank: row.get(1)?,
                period_month: row.get(2)?,
                file_sha256: row.get(3)?,
                source_file: row.get(4)?,
                user_id: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Raw transaction store
// ---------------------------------------------------------------------------

pub fn insert_raw_rows(conn: &Connection, import_id: i64, rows: &[RawTransaction]) -> Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO transactions_raw \
         (import_batch_id, bank, ts, description, merchant, amount_raw, amount, currency, account_label, extra) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for row in rows {
        stmt.execute(rusqlite::params![
            import_id,
            row.bank,
            row.ts.format(TS_FORMAT).to_string(),
            row.description,
            row.merchant,
            row.amount_raw,
            row.amount,
            row.currency,
            row.account_label,
            serde_json::to_string(&row.extra)?,
        ])?;
    }
    Ok(rows.len())
}

/// Raw rows of every import registered for `period` by `user`, optionally
/// restricted to some bank tags, in insertion order.
pub fn raw_for_period(
    conn: &Connection,
    period: Period,
    user: &str,
    accounts: &[String],
) -> Result<Vec<RawTransaction>> {
    let mut sql = String::from(
        "SELECT r.id, r.import_batch_id, r.bank, r.ts, r.description, r.merchant, r.amount_raw, \
         r.amount, r.currency, r.account_label, r.extra, i.source_file \
         FROM transactions_raw r JOIN imports i ON r.import_batch_id = i.id \
         WHERE i.period_month = ?1 AND i.user_id = ?2",
    );
    if !accounts.is_empty() {
        sql.push_str(&format!(" AND r.bank IN ({})", placeholders(3, accounts.len())));
    }
    sql.push_str(" ORDER BY r.id");

    let mut params: Vec<String> = vec![period.to_string(), user.to_string()];
    params.extend(accounts.iter().cloned());

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, f64>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, Option<String>>(10)?,
                row.get::<_, String>(11)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, batch, bank, ts, description, merchant, amount_raw, amount, currency, label, extra, file) in rows {
        let ts = NaiveDateTime::parse_from_str(&ts, TS_FORMAT)
            .map_err(|e| TallyError::Other(format!("Corrupt timestamp '{ts}' on raw row {id}: {e}")))?;
        let extra: BTreeMap<String, String> = match extra.as_deref() {
            Some(json) if !json.is_empty() => serde_json::from_str(json)?,
            _ => BTreeMap::new(),
        };
        out.push(RawTransaction {
            id: Some(id),
            import_batch_id: Some(batch),
            bank,
            ts,
            description,
            merchant: merchant.unwrap_or_default(),
            amount_raw: amount_raw.unwrap_or_default(),
            amount,
            currency,
            account_label: label.unwrap_or_default(),
            extra,
            source_file: Some(file),
        });
    }
    Ok(out)
}

pub fn banks_for_period(conn: &Connection, period: Period, user: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT bank FROM imports WHERE period_month = ?1 AND user_id = ?2 ORDER BY bank",
    )?;
    let banks = stmt
        .query_map(rusqlite::params![period.to_string(), user], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(banks)
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

pub fn validate_upload(filename: &str, bytes: &[u8], settings: &Settings) -> Result<()> {
    let reject = |reason: String| TallyError::UnsupportedFile {
        filename: filename.to_string(),
        reason,
    };
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if !settings
        .allowed_extensions
        .iter()
        .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    {
        return Err(reject(format!(
            "extension '.{ext}' not allowed (allowed: {})",
            settings.allowed_extensions.join(", ")
        )));
    }
    if bytes.is_empty() {
        return Err(reject("file is empty".to_string()));
    }
    if bytes.len() as u64 > settings.max_upload_size {
        return Err(reject(format!(
            "file is {} bytes, limit is {}",
            bytes.len(),
            settings.max_upload_size
        )));
    }
    Ok(())
}

#[derive(Debug)]
pub struct IngestResult {
    pub import_id: i64,
    pub duplicate: bool,
    pub row_count: usize,
}

/// Parses an export and records it with its raw rows in one transaction.
/// Identical bytes already ingested for the same bank, period and user are
/// reported as a duplicate and leave the store untouched.
pub fn ingest(
    conn: &mut Connection,
    bank: BankKind,
    period: Period,
    bytes: &[u8],
    filename: &str,
    user: &str,
) -> Result<IngestResult> {
    let digest = fingerprint(bytes);
    tracing::info!(bank = bank.key(), %period, filename, "ingest started");

    let rows = bank.parse(bytes).map_err(|e| match e {
        TallyError::MissingColumns { bank, missing } => TallyError::Format {
            bank,
            filename: filename.to_string(),
            reason: format!("missing required columns: {}", missing.join(", ")),
        },
        other => TallyError::Format {
            bank: bank.key().to_string(),
            filename: filename.to_string(),
            reason: other.to_string(),
        },
    })?;

    let tx = conn.transaction()?;
    if is_duplicate(&tx, bank.key(), period, &digest, user)? {
        let import_id = register_import(&tx, bank.key(), period, &digest, filename, user)?;
        tracing::warn!(bank = bank.key(), %period, digest = %digest, "duplicate file, nothing imported");
        return Ok(IngestResult {
            import_id,
            duplicate: true,
            row_count: 0,
        });
    }

    let import_id = register_import(&tx, bank.key(), period, &digest, filename, user)?;
    let row_count = insert_raw_rows(&tx, import_id, &rows)?;
    tx.commit()?;

    tracing::info!(bank = bank.key(), %period, import_id, rows = row_count, "ingest completed");
    Ok(IngestResult {
        import_id,
        duplicate: false,
        row_count,
    })
}
