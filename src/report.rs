use std::{collections::BTreeMap, io::Write};

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};

use crate::console::MemberNames;
use crate::time_entry::{project_label, EntryStatus, TimeEntry};

/// 推移を集計する日数。
pub const TREND_DAYS: i64 = 30;

/// 会社のエントリーの集計結果。
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub by_project: BTreeMap<String, Duration>,
    /// メンバーIDごとの合計。`None`はオーナー自身のエントリー。
    pub by_member: BTreeMap<Option<String>, Duration>,
    /// 古い日付から順に並んだ直近`TREND_DAYS`日分の合計。記録のない日は0。
    pub daily: Vec<(NaiveDate, Duration)>,
}

/// プロジェクトごと、メンバーごと、日ごとの合計時間を計算する。
///
/// 却下されたエントリーは常に除外し、承認待ちは`include_pending`のときだけ含める。
///
/// # Arguments
///
/// * `entries` - 会社の全エントリー
/// * `today` - 推移の最終日とするローカルの日付
/// * `include_pending` - 承認待ちのエントリーも集計するか
pub fn build_report(
    entries: &[TimeEntry],
    today: NaiveDate,
    include_pending: bool,
) -> Report {
    let counted: Vec<&TimeEntry> = entries
        .iter()
        .filter(|entry| match entry.status {
            EntryStatus::Approved => true,
            EntryStatus::Pending => include_pending,
            EntryStatus::Rejected => false,
        })
        .collect();

    let by_project = counted.iter().fold(BTreeMap::new(), |mut acc, entry| {
        *acc.entry(project_label(&entry.project))
            .or_insert_with(Duration::zero) += entry.duration;
        acc
    });
    let by_member = counted.iter().fold(BTreeMap::new(), |mut acc, entry| {
        *acc.entry(entry.member_id.clone())
            .or_insert_with(Duration::zero) += entry.duration;
        acc
    });

    let first_day = today - Duration::days(TREND_DAYS - 1);
    let mut per_day: BTreeMap<NaiveDate, Duration> = first_day
        .iter_days()
        .take(TREND_DAYS as usize)
        .map(|day| (day, Duration::zero()))
        .collect();
    for entry in &counted {
        let day = entry.timestamp.with_timezone(&Local).date_naive();
        if let Some(total) = per_day.get_mut(&day) {
            *total += entry.duration;
        }
    }

    Report {
        by_project,
        by_member,
        daily: per_day.into_iter().collect(),
    }
}

/// 時間単位に換算する。
pub fn hours(duration: Duration) -> f64 {
    duration.num_seconds() as f64 / 3600.0
}

/// 集計結果を表示する。表示は時間単位で行う。
///
/// メンバーは表示名とIDを並べて表示するため、同名のメンバーも区別できる。
pub fn write_report<W: Write>(writer: &mut W, report: &Report, members: &MemberNames) -> Result<()> {
    writeln!(writer, "## Hours by project").context("Failed to write report")?;
    for (project, duration) in &report.by_project {
        writeln!(writer, "- {}: {:.2}", project, hours(*duration)).context("Failed to write report")?;
    }
    writeln!(writer, "## Hours by member").context("Failed to write report")?;
    for (member_id, duration) in &report.by_member {
        let name = members.name_of(member_id.as_deref());
        match member_id {
            Some(id) => writeln!(writer, "- {} ({}): {:.2}", name, id, hours(*duration)),
            None => writeln!(writer, "- {}: {:.2}", name, hours(*duration)),
        }
        .context("Failed to write report")?;
    }
    writeln!(writer, "## Last {} days", TREND_DAYS).context("Failed to write report")?;
    for (day, duration) in &report.daily {
        writeln!(writer, "- {}: {:.2}", day.format("%d/%m"), hours(*duration))
            .context("Failed to write report")?;
    }

    Ok(())
}
