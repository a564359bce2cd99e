use crate::cli::open_db;
use crate::cli::report::print_summary;
use crate::error::Result;
use crate::period::Period;
use crate::rollup;

pub fn rebuild(month: Period, accounts: &[String]) -> Result<()> {
    let (_, mut conn) = open_db()?;
    let summary = rollup::rebuild(&mut conn, month, accounts)?;
    println!("Rebuilt rollup for {} ({} rows)", month.month_key(), summary.rows.len());
    print_summary(&summary);
    Ok(())
}
