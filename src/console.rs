use std::{
    collections::{BTreeMap, HashMap},
    io::Write,
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};

use crate::browser::Page;
use crate::datetime::day_label;
use crate::stopwatch::format_elapsed;
use crate::store::Member;
use crate::time_entry::{EntryStatus, TimeEntry};

/// コラボレーターIDから表示名を引く。
#[derive(Clone, Debug, Default)]
pub struct MemberNames {
    names: HashMap<String, String>,
}

impl MemberNames {
    pub fn new(members: &[Member]) -> Self {
        Self {
            names: members
                .iter()
                .map(|member| (member.id.clone(), member.name.clone()))
                .collect(),
        }
    }

    /// オーナーのエントリーは`Company`と表示する。
    pub fn name_of(&self, member_id: Option<&str>) -> String {
        match member_id {
            None => "Company".to_string(),
            Some(id) => self
                .names
                .get(id)
                .cloned()
                .unwrap_or_else(|| "Unknown member".to_string()),
        }
    }
}

/// Consoleにページを表示するためのtrait。
pub trait ConsolePresenter {
    /// 1ページ分のエントリーとページ送りの状態を表示する。
    fn show_page(&mut self, page: &Page) -> Result<()>;
}

/// エントリーを1行ずつ表形式で表示する。
pub struct ConsoleTable<'a, W: Write> {
    writer: &'a mut W,
    members: &'a MemberNames,
}

impl<'a, W: Write> ConsoleTable<'a, W> {
    pub fn new(writer: &'a mut W, members: &'a MemberNames) -> Self {
        Self { writer, members }
    }
}

impl<'a, W: Write> ConsolePresenter for ConsoleTable<'a, W> {
    fn show_page(&mut self, page: &Page) -> Result<()> {
        if write_empty(self.writer, page)? {
            return Ok(());
        }
        for entry in &page.entries {
            let local = entry.timestamp.with_timezone(&Local);
            writeln!(
                self.writer,
                "{}  {}  {}",
                local.format("%Y-%m-%d %H:%M"),
                entry_line(entry, self.members),
                entry.id
            )
            .with_context(|| format!("Failed to write time entry: {:?}", entry))?;
        }
        write_footer(self.writer, page)
    }
}

/// エントリーをローカルの日付ごとにまとめて表示する。
pub struct ConsoleDayGroups<'a, W: Write> {
    writer: &'a mut W,
    members: &'a MemberNames,
    today: NaiveDate,
}

impl<'a, W: Write> ConsoleDayGroups<'a, W> {
    /// # Arguments
    ///
    /// * `today` - `Today`/`Yesterday`の判定に使うローカルの日付
    pub fn new(writer: &'a mut W, members: &'a MemberNames, today: NaiveDate) -> Self {
        Self {
            writer,
            members,
            today,
        }
    }
}

impl<'a, W: Write> ConsolePresenter for ConsoleDayGroups<'a, W> {
    fn show_page(&mut self, page: &Page) -> Result<()> {
        if write_empty(self.writer, page)? {
            return Ok(());
        }
        let groups: BTreeMap<NaiveDate, Vec<&TimeEntry>> =
            page.entries.iter().fold(BTreeMap::new(), |mut acc, entry| {
                let date = entry.timestamp.with_timezone(&Local).date_naive();
                acc.entry(date).or_default().push(entry);
                acc
            });

        for (date, entries) in groups.iter().rev() {
            writeln!(self.writer, "## {}", day_label(*date, self.today))
                .context("Failed to write day header")?;
            for entry in entries {
                let local = entry.timestamp.with_timezone(&Local);
                writeln!(
                    self.writer,
                    "- {}  {}  {}",
                    local.format("%H:%M"),
                    entry_line(entry, self.members),
                    entry.id
                )
                .with_context(|| format!("Failed to write time entry: {:?}", entry))?;
            }
        }
        write_footer(self.writer, page)
    }
}

fn entry_line(entry: &TimeEntry, members: &MemberNames) -> String {
    let badge = match entry.status {
        EntryStatus::Approved => String::new(),
        status => format!(" [{}]", status),
    };
    format!(
        "{}  {} ({}){}",
        format_elapsed(entry.duration),
        entry.project,
        members.name_of(entry.member_id.as_deref()),
        badge
    )
}

/// ページが空なら案内を書いて`true`を返す。
fn write_empty<W: Write>(writer: &mut W, page: &Page) -> Result<bool> {
    if !page.entries.is_empty() {
        return Ok(false);
    }
    let message = if page.has_previous {
        "No more time entries."
    } else {
        "No time entries found."
    };
    writeln!(writer, "{}", message).context("Failed to write empty page")?;
    Ok(true)
}

fn write_footer<W: Write>(writer: &mut W, page: &Page) -> Result<()> {
    let previous = if page.has_previous { "[p]rev" } else { "-" };
    let next = if page.has_next { "[n]ext" } else { "-" };
    writeln!(writer, "Page {}  {}  {}", page.number, previous, next)
        .context("Failed to write page footer")
}
