use comfy_table::{Cell, Table};

use crate::cli::{open_db, owner_or_default};
use crate::error::Result;
use crate::ledger::list_imports;

pub fn run(owner: Option<&str>) -> Result<()> {
    let (settings, conn) = open_db()?;
    let owner = owner_or_default(&settings, owner);
    let imports = list_imports(&conn, &owner)?;

    if imports.is_empty() {
        println!("No imports yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Bank", "Period", "File", "SHA-256", "Imported"]);
    for imp in &imports {
        table.add_row(vec![
            Cell::new(imp.id),
            Cell::new(&imp.bank),
            Cell::new(imp.period_month.get(..7).unwrap_or(&imp.period_month)),
            Cell::new(&imp.source_file),
            Cell::new(imp.file_sha256.get(..12).unwrap_or(&imp.file_sha256)),
            Cell::new(&imp.created_at),
        ]);
    }
    println!("Imports ({})\n{table}", imports[0].user_id);
    Ok(())
}
