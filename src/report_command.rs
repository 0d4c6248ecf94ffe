use std::{fs::File, io::Write, path::PathBuf};

use anyhow::{Context, Result};
use log::info;

use crate::auth::{Role, Session};
use crate::console::MemberNames;
use crate::datetime;
use crate::error::TrackerError;
use crate::export::write_csv;
use crate::report::{build_report, write_report, Report};
use crate::store::EntryRepository;
use crate::time_entry::TimeEntry;

/// 会社全体の作業時間を集計するためのサブコマンド。
#[derive(Debug, clap::Args)]
pub struct ReportArgs {
    #[clap(long = "include-pending", help = "Counts entries still waiting for approval")]
    pub include_pending: bool,
}

/// 会社の全エントリーをCSVに書き出すためのサブコマンド。
#[derive(Debug, clap::Args)]
pub struct ExportArgs {
    #[clap(short = 'o', long = "output", help = "Writes to this file instead of stdout")]
    pub output: Option<PathBuf>,
}

pub struct ReportCommand<'a, R: EntryRepository + ?Sized> {
    repository: &'a R,
    session: &'a Session,
}

impl<'a, R: EntryRepository + ?Sized> ReportCommand<'a, R> {
    /// 新しい`ReportCommand`を返す。
    ///
    /// # Arguments
    /// * `repository` - エントリーを保持するドキュメントストア
    /// * `session` - サインイン中のユーザー。会社のオーナーである必要がある
    pub fn new(repository: &'a R, session: &'a Session) -> Self {
        Self {
            repository,
            session,
        }
    }

    /// `report`サブコマンドの処理を行う。
    pub async fn report<W: Write>(&self, args: ReportArgs, output: &mut W) -> Result<Report> {
        let entries = self.company_entries().await?;
        let members = self
            .repository
            .list_members(&self.session.company_id)
            .await
            .context("Failed to load members")?;

        let report = build_report(&entries, datetime::local_today(), args.include_pending);
        write_report(output, &report, &MemberNames::new(&members))?;

        Ok(report)
    }

    /// `export`サブコマンドの処理を行う。
    ///
    /// 出力先のファイルが指定されていない場合は`stdout`に書き出す。
    pub async fn export<W: Write>(&self, args: ExportArgs, stdout: &mut W) -> Result<usize> {
        let entries = self.company_entries().await?;

        match &args.output {
            Some(path) => {
                let mut file = File::create(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                write_csv(&mut file, &entries)?;
                info!("Exported {} time entries to {}", entries.len(), path.display());
            }
            None => write_csv(stdout, &entries)?,
        }

        Ok(entries.len())
    }

    async fn company_entries(&self) -> Result<Vec<TimeEntry>> {
        if self.session.role != Role::Owner {
            return Err(TrackerError::Unauthorized(
                "reports are only available to the company account".to_string(),
            )
            .into());
        }

        let mut entries = self
            .repository
            .list_company_entries(&self.session.company_id)
            .await
            .context("Failed to load company time entries")?;
        entries.sort_by(|a, b| (b.timestamp, &b.id).cmp(&(a.timestamp, &a.id)));
        info!("Loaded {} time entries", entries.len());

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{ExportArgs, ReportArgs, ReportCommand};
    use crate::auth::{Role, Session};
    use crate::store::memory::{numbered_entries, MemoryRepository};
    use crate::store::MockEntryRepository;
    use crate::time_entry::EntryStatus;

    #[tokio::test]
    async fn test_report_counts_approved_entries() {
        let mut entries = numbered_entries(3);
        entries[2].status = EntryStatus::Pending;
        let repository = MemoryRepository::new(entries);
        let session = Session::dummy(Role::Owner);
        let mut output = Vec::new();

        let report = ReportCommand::new(&repository, &session)
            .report(
                ReportArgs {
                    include_pending: false,
                },
                &mut output,
            )
            .await
            .unwrap();

        assert_eq!(report.by_member.len(), 1);
        assert_eq!(report.by_member[&None::<String>].num_minutes(), 3);
        assert!(!report.by_project.contains_key("task 3"));
        assert!(String::from_utf8(output).unwrap().starts_with("## Hours by project\n"));
    }

    #[tokio::test]
    async fn test_report_requires_owner() {
        let mut repository = MockEntryRepository::new();
        repository.expect_list_company_entries().times(0);
        let session = Session::dummy(Role::Member);
        let mut output = Vec::new();

        let result = ReportCommand::new(&repository, &session)
            .report(
                ReportArgs {
                    include_pending: true,
                },
                &mut output,
            )
            .await;

        assert!(result.is_err());
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_export_to_stdout_newest_first() {
        let repository = MemoryRepository::new(numbered_entries(2));
        let session = Session::dummy(Role::Owner);
        let mut output = Vec::new();

        let count = ReportCommand::new(&repository, &session)
            .export(ExportArgs { output: None }, &mut output)
            .await
            .unwrap();

        assert_eq!(count, 2);
        let csv = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("\"task 2\",\"Company\",2024-01-01T11:00:00Z,120,approved"));
        assert!(lines[2].starts_with("\"task 1\""));
    }

    #[tokio::test]
    async fn test_export_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entries.csv");
        let repository = MemoryRepository::new(numbered_entries(4));
        let session = Session::dummy(Role::Owner);
        let mut stdout = Vec::new();

        ReportCommand::new(&repository, &session)
            .export(
                ExportArgs {
                    output: Some(path.clone()),
                },
                &mut stdout,
            )
            .await
            .unwrap();

        assert!(stdout.is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 5);
    }
}
