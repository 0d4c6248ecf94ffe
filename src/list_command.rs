use std::io::Write;

use anyhow::{Context, Result};
use log::{debug, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::auth::{Role, Session};
use crate::browser::{EntryBrowser, Page, PageLoad};
use crate::console::{ConsoleDayGroups, ConsolePresenter, ConsoleTable, MemberNames};
use crate::datetime;
use crate::error::TrackerError;
use crate::store::{EntryRepository, Member};
use crate::time_entry::{EntryFilters, EntryStatus, MemberFilter};

/// タイムエントリーを新しい順にページ単位で表示するためのサブコマンド。
#[derive(Debug, clap::Args)]
pub struct ListArgs {
    #[clap(
        short = 'm',
        long = "member",
        default_value = "all",
        help = "all, company, or a collaborator id"
    )]
    pub member: MemberFilter,

    #[clap(short = 's', long = "status", help = "pending, approved or rejected")]
    pub status: Option<EntryStatus>,

    #[clap(short = 'g', long = "group-by-day", help = "Groups entries under day headers")]
    pub group_by_day: bool,
}

pub struct ListCommand<'a, R: EntryRepository + ?Sized> {
    repository: &'a R,
    session: &'a Session,
}

impl<'a, R: EntryRepository + ?Sized> ListCommand<'a, R> {
    /// 新しい`ListCommand`を返す。
    ///
    /// # Arguments
    /// * `repository` - エントリーを保持するドキュメントストア
    /// * `session` - サインイン中のユーザー
    pub fn new(repository: &'a R, session: &'a Session) -> Self {
        Self {
            repository,
            session,
        }
    }

    /// `list`サブコマンドの処理を行う。
    ///
    /// 最初のページを表示したあと、`n`で次、`p`で前のページへ移動し、`q`か入力の終端で終わる。
    /// ページの取得に失敗した場合はエラーを表示し、表示中のページに留まる。
    /// コラボレーターは常に自分のエントリーだけを閲覧する。
    pub async fn run<I, W>(&self, args: ListArgs, input: I, output: &mut W) -> Result<()>
    where
        I: AsyncBufRead + Unpin,
        W: Write,
    {
        let filters = self.filters(args.member, args.status);
        let names = MemberNames::new(&self.members().await);
        let browser = EntryBrowser::new(self.repository, &self.session.company_id);

        let first = browser
            .load_first_page(filters)
            .await
            .context("Failed to load time entries")?;
        if let PageLoad::Loaded(page) = &first {
            show(output, &names, args.group_by_day, page)?;
        }

        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await.context("Failed to read input")? {
            let load = match line.trim() {
                "n" => browser.load_next_page().await,
                "p" => browser.load_previous_page().await,
                "q" => break,
                _ => {
                    writeln!(output, "n: next page, p: previous page, q: quit")
                        .context("Failed to write to console")?;
                    continue;
                }
            };

            match load {
                Ok(PageLoad::Loaded(page)) => show(output, &names, args.group_by_day, &page)?,
                Ok(PageLoad::Unchanged) => {
                    writeln!(output, "No page in that direction.")
                        .context("Failed to write to console")?;
                }
                Ok(PageLoad::Busy) => debug!("Page request ignored while loading"),
                Err(e) => {
                    warn!("Failed to load page: {}", e);
                    writeln!(output, "Error: {}", e).context("Failed to write to console")?;
                }
            }
        }

        Ok(())
    }

    fn filters(&self, member: MemberFilter, status: Option<EntryStatus>) -> EntryFilters {
        let member = match self.session.role {
            Role::Owner => member,
            Role::Member => {
                if member != MemberFilter::All {
                    debug!("Ignoring member filter {:?} for a collaborator", member);
                }
                MemberFilter::Member(self.session.user_id.clone())
            }
        };

        EntryFilters { member, status }
    }

    /// 表示名の解決に使うメンバー一覧。取得できなくても一覧表示は続ける。
    async fn members(&self) -> Vec<Member> {
        let members: Result<Vec<Member>, TrackerError> = match self.session.role {
            Role::Owner => self.repository.list_members(&self.session.company_id).await,
            Role::Member => self
                .repository
                .get_member(&self.session.user_id)
                .await
                .map(|member| vec![member]),
        };

        members.unwrap_or_else(|e| {
            warn!("Failed to load member names: {}", e);
            Vec::new()
        })
    }
}

fn show<W: Write>(output: &mut W, names: &MemberNames, group_by_day: bool, page: &Page) -> Result<()> {
    if group_by_day {
        ConsoleDayGroups::new(output, names, datetime::local_today()).show_page(page)
    } else {
        ConsoleTable::new(output, names).show_page(page)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tokio::io::{AsyncWriteExt, BufReader};

    use super::{ListArgs, ListCommand};
    use crate::auth::{Role, Session};
    use crate::store::memory::{numbered_entries, MemoryRepository};
    use crate::store::Member;
    use crate::time_entry::{EntryStatus, MemberFilter, TimeEntry};

    fn args() -> ListArgs {
        ListArgs {
            member: MemberFilter::All,
            status: None,
            group_by_day: false,
        }
    }

    async fn list(repository: &MemoryRepository, session: &Session, args: ListArgs, keys: &[u8]) -> String {
        let mut output = Vec::new();

        ListCommand::new(repository, session)
            .run(args, keys, &mut output)
            .await
            .unwrap();

        String::from_utf8(output).unwrap()
    }

    /// 出力に現れるエントリーIDを順に取り出す。
    fn shown_ids(output: &str) -> Vec<&str> {
        output
            .lines()
            .filter_map(|line| line.rsplit("  ").next())
            .filter(|last| last.starts_with('e'))
            .collect()
    }

    #[tokio::test]
    async fn test_list_pages_forward_and_back() {
        let repository = MemoryRepository::new(numbered_entries(12));
        let session = Session::dummy(Role::Owner);

        let output = list(&repository, &session, args(), b"n\nn\nn\np\nq\n").await;

        assert_eq!(
            shown_ids(&output),
            vec![
                "e012", "e011", "e010", "e009", "e008", // 1
                "e007", "e006", "e005", "e004", "e003", // 2
                "e002", "e001", // 3
                "e007", "e006", "e005", "e004", "e003", // 2
            ]
        );
        assert!(output.contains("Page 1  -  [n]ext"));
        assert!(output.contains("Page 3  [p]rev  -"));
        assert!(output.contains("No page in that direction."));
    }

    #[tokio::test]
    async fn test_list_reports_failed_page() {
        let repository = MemoryRepository::new(numbered_entries(7));
        let session = Session::dummy(Role::Owner);
        let mut output = Vec::new();
        let command = ListCommand::new(&repository, &session);
        let (mut client, server) = tokio::io::duplex(64);

        let run = command.run(args(), BufReader::new(server), &mut output);
        let drive = async {
            tokio::task::yield_now().await;
            repository.set_failing(true);
            client.write_all(b"n\n").await.unwrap();
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            repository.set_failing(false);
            client.write_all(b"n\n").await.unwrap();
            drop(client);
        };
        let (result, _) = tokio::join!(run, drive);
        result.unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("Error: backend unavailable: connection reset"));
        assert!(output.contains("Page 2  [p]rev  -"));
        assert_eq!(repository.query_count(), 4);
    }

    #[tokio::test]
    async fn test_list_member_sees_only_own_entries() {
        let mut entries = numbered_entries(4);
        entries[0].member_id = Some("m1".to_string());
        entries[1].member_id = Some("m2".to_string());
        entries[2].member_id = Some("m1".to_string());
        let repository = MemoryRepository::new(entries).with_members(vec![Member {
            id: "m1".to_string(),
            company_id: "owner-1".to_string(),
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
        }]);
        let session = Session::dummy(Role::Member);
        let mut args = args();
        args.member = MemberFilter::Company;

        let output = list(&repository, &session, args, b"").await;

        assert_eq!(shown_ids(&output), vec!["e003", "e001"]);
        assert!(output.contains("(Ana)"));
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let mut entries: Vec<TimeEntry> = numbered_entries(3);
        entries[1].status = EntryStatus::Pending;
        entries[1].duration = Duration::minutes(75);
        let repository = MemoryRepository::new(entries);
        let session = Session::dummy(Role::Owner);
        let mut args = args();
        args.status = Some(EntryStatus::Pending);

        let output = list(&repository, &session, args, b"q\n").await;

        assert_eq!(shown_ids(&output), vec!["e002"]);
        assert!(output.contains("01:15:00  task 2 (Company) [pending]"));
    }

    #[tokio::test]
    async fn test_list_empty() {
        let repository = MemoryRepository::default();
        let session = Session::dummy(Role::Owner);

        let output = list(&repository, &session, args(), b"n\n").await;

        assert!(output.starts_with("No time entries found.\n"));
    }

    #[tokio::test]
    async fn test_list_first_page_failure() {
        let repository = MemoryRepository::new(numbered_entries(3));
        repository.set_failing(true);
        let session = Session::dummy(Role::Owner);
        let mut output = Vec::new();

        let result = ListCommand::new(&repository, &session)
            .run(args(), &b""[..], &mut output)
            .await;

        assert!(result.is_err());
    }
}
