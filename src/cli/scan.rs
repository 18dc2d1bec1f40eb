//! Scan command.
//!
//! Regenerates the required variables report without running anything.

use crate::cli::output;
use crate::core::constants::REQUIRED_VARS_FILE;
use crate::core::scanner::{report, Scanner};
use crate::error::Result;

/// Scan `paths` (or the default roots) and write the report.
pub fn execute(paths: &[String]) -> Result<i32> {
    let dir = std::env::current_dir()?;
    let result = Scanner::new(&dir).scan(paths)?;
    let target = dir.join(REQUIRED_VARS_FILE);
    report::write(&target, &result)?;

    output::section("Scan");
    output::kv("files:     ", result.files_scanned);
    output::kv("references:", result.references);
    output::kv("required:  ", result.required().len());
    if !result.turbo.is_empty() {
        output::kv("turbo.json:", result.turbo.len());
    }

    let shared = result.shared();
    if !shared.is_empty() {
        output::section("Shared across directories");
        for (name, count) in shared.iter().take(10) {
            output::list_item(&format!("{} ({} dirs)", output::key(name), count));
        }
    }

    output::rule();
    output::success(&format!("wrote {}", output::path(&target.display().to_string())));
    Ok(0)
}
