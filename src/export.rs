use std::io::Write;

use anyhow::{Context, Result};
use chrono::SecondsFormat;

use crate::time_entry::TimeEntry;

const HEADER: &str = "Project,Member ID,Date,Duration (seconds),Status";

/// エントリーをCSVとして書き出す。
///
/// 日付はUTCのRFC 3339、オーナーのエントリーのメンバーIDは`Company`とする。
pub fn write_csv<W: Write>(writer: &mut W, entries: &[TimeEntry]) -> Result<()> {
    writeln!(writer, "{}", HEADER).context("Failed to write CSV header")?;
    for entry in entries {
        writeln!(
            writer,
            "{},{},{},{},{}",
            quote(&entry.project),
            quote(entry.member_id.as_deref().unwrap_or("Company")),
            entry.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            entry.duration.num_seconds(),
            entry.status
        )
        .with_context(|| format!("Failed to write time entry: {}", entry.id))?;
    }

    Ok(())
}

/// 値をダブルクォートで囲み、中のダブルクォートは2つ重ねる。
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}
