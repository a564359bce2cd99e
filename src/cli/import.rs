use std::path::Path;

use colored::Colorize;

use crate::cli::{open_db, owner_or_default};
use crate::error::{Result, TallyError};
use crate::importer::{detect_bank, BankKind};
use crate::ledger::{ingest, validate_upload};
use crate::period::Period;

pub fn run(file: &str, period: Period, bank: Option<&str>, owner: Option<&str>) -> Result<()> {
    let (settings, mut conn) = open_db()?;
    let owner = owner_or_default(&settings, owner);

    let path = Path::new(file);
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.to_string());
    let bytes = std::fs::read(path)?;
    validate_upload(&filename, &bytes, &settings)?;

    let bank: BankKind = match bank {
        Some(key) => key.parse()?,
        None => detect_bank(&bytes).ok_or_else(|| TallyError::UnsupportedFile {
            filename: filename.clone(),
            reason: "could not detect the bank; pass --bank".to_string(),
        })?,
    };

    let result = ingest(&mut conn, bank, period, &bytes, &filename, &owner)?;
    if result.duplicate {
        println!(
            "{} already imported for {} {} (import #{}).",
            filename,
            bank.key(),
            period.month_key(),
            result.import_id
        );
        return Ok(());
    }

    println!(
        "{} {} rows from {} as {} {} (import #{})",
        "Imported".green().bold(),
        result.row_count,
        filename,
        bank.key(),
        period.month_key(),
        result.import_id
    );
    println!("Run `tally commit --period {}` to categorize.", period.month_key());
    Ok(())
}
