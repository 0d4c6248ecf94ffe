use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use log::info;

use crate::auth::{Role, Session};
use crate::datetime;
use crate::error::TrackerError;
use crate::store::EntryRepository;
use crate::time_entry::{
    duration_from_hms, project_label, EntryId, EntryStatus, EntryUpdate, NewTimeEntry, TimeEntry,
};

/// 手動でタイムエントリーを追加するためのサブコマンド。
#[derive(Debug, clap::Args)]
pub struct AddArgs {
    #[clap(short = 'p', long = "project", default_value = "", help = "Project name")]
    pub project: String,

    #[clap(short = 'H', long = "hours", default_value = "0")]
    pub hours: i64,

    #[clap(short = 'm', long = "minutes", default_value = "0")]
    pub minutes: i64,

    #[clap(short = 's', long = "seconds", default_value = "0")]
    pub seconds: i64,

    #[clap(
        short = 'd',
        long = "date",
        help = "Sets a custom date in the format YYYY-MM-DD",
        parse(try_from_str = parse_date),
    )]
    pub date: Option<NaiveDate>,
}

/// 既存のタイムエントリーを編集するためのサブコマンド。
///
/// 指定しなかった項目は元の値のまま残る。
#[derive(Debug, clap::Args)]
pub struct EditArgs {
    #[clap(help = "Time entry id")]
    pub id: String,

    #[clap(short = 'p', long = "project")]
    pub project: Option<String>,

    #[clap(short = 'H', long = "hours")]
    pub hours: Option<i64>,

    #[clap(short = 'm', long = "minutes")]
    pub minutes: Option<i64>,

    #[clap(short = 's', long = "seconds")]
    pub seconds: Option<i64>,

    #[clap(
        short = 'd',
        long = "date",
        help = "Moves the entry to another day in the format YYYY-MM-DD",
        parse(try_from_str = parse_date),
    )]
    pub date: Option<NaiveDate>,
}

/// IDでエントリーを指定するサブコマンド。
#[derive(Debug, clap::Args)]
pub struct EntryIdArgs {
    #[clap(help = "Time entry id")]
    pub id: String,
}

pub struct EntryCommand<'a, R: EntryRepository + ?Sized> {
    repository: &'a R,
    session: &'a Session,
}

impl<'a, R: EntryRepository + ?Sized> EntryCommand<'a, R> {
    /// 新しい`EntryCommand`を返す。
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

    /// `add`サブコマンドの処理を行う。
    ///
    /// 長さが0以下の場合はストアへ問い合わせる前にエラーを返す。
    /// 日付を指定した場合は、その日の現在時刻をエントリーの時刻とする。
    pub async fn add(&self, args: AddArgs) -> Result<EntryId> {
        let duration = duration_from_hms(args.hours, args.minutes, args.seconds)?;
        let now = datetime::now();
        let timestamp = match args.date {
            Some(date) => at_local_time(date, now.with_timezone(&Local).time())?,
            None => now,
        };

        let entry = NewTimeEntry::for_session(self.session, &args.project, duration, timestamp);
        let id = self
            .repository
            .insert_entry(&entry)
            .await
            .context("Failed to add time entry")?;
        info!("Added time entry {} for {}", id, entry.project);

        Ok(id)
    }

    /// `edit`サブコマンドの処理を行う。
    ///
    /// 日付を変更しても時刻は元のエントリーのものを使う。
    pub async fn edit(&self, args: EditArgs) -> Result<TimeEntry> {
        let duration = match (args.hours, args.minutes, args.seconds) {
            (None, None, None) => None,
            (hours, minutes, seconds) => Some(duration_from_hms(
                hours.unwrap_or(0),
                minutes.unwrap_or(0),
                seconds.unwrap_or(0),
            )?),
        };
        let id = EntryId(args.id);
        let entry = self.editable_entry(&id).await?;

        let timestamp = match args.date {
            Some(date) => at_local_time(date, entry.timestamp.with_timezone(&Local).time())?,
            None => entry.timestamp,
        };
        let update = EntryUpdate {
            project: args
                .project
                .as_deref()
                .map(project_label)
                .unwrap_or_else(|| entry.project.clone()),
            duration: duration.unwrap_or(entry.duration),
            timestamp,
        };
        self.repository
            .update_entry(&id, &update)
            .await
            .with_context(|| format!("Failed to update time entry: {}", id))?;
        info!("Updated time entry {}", id);

        Ok(TimeEntry {
            project: update.project,
            duration: update.duration,
            timestamp: update.timestamp,
            ..entry
        })
    }

    /// `approve`/`reject`サブコマンドの処理を行う。会社のオーナーのみ実行できる。
    ///
    /// 却下したエントリーは削除せず、状態だけを変える。
    pub async fn review(&self, args: EntryIdArgs, status: EntryStatus) -> Result<()> {
        if self.session.role != Role::Owner {
            return Err(TrackerError::Unauthorized(
                "only the company account can review time entries".to_string(),
            )
            .into());
        }
        let id = EntryId(args.id);
        self.company_entry(&id).await?;

        self.repository
            .set_status(&id, status)
            .await
            .with_context(|| format!("Failed to mark time entry {} as {}", id, status))?;
        info!("Time entry {} is now {}", id, status);

        Ok(())
    }

    /// `delete`サブコマンドの処理を行う。
    pub async fn delete(&self, args: EntryIdArgs) -> Result<()> {
        let id = EntryId(args.id);
        self.editable_entry(&id).await?;

        self.repository
            .delete_entry(&id)
            .await
            .with_context(|| format!("Failed to delete time entry: {}", id))?;
        info!("Deleted time entry {}", id);

        Ok(())
    }

    /// サインイン中の会社に属するエントリーを取得する。
    async fn company_entry(&self, id: &EntryId) -> Result<TimeEntry> {
        let entry = self
            .repository
            .get_entry(id)
            .await
            .with_context(|| format!("Failed to load time entry: {}", id))?;
        if entry.company_id != self.session.company_id {
            return Err(TrackerError::NotFound(format!("time entry {}", id)).into());
        }

        Ok(entry)
    }

    /// 変更できるエントリーを取得する。
    ///
    /// コラボレーターが変更できるのは、自分のエントリーのうち承認待ちのものだけ。
    async fn editable_entry(&self, id: &EntryId) -> Result<TimeEntry> {
        let entry = self.company_entry(id).await?;
        if self.session.role != Role::Member {
            return Ok(entry);
        }
        if entry.member_id.as_deref() != Some(self.session.user_id.as_str()) {
            return Err(TrackerError::Unauthorized(format!(
                "time entry {} belongs to someone else",
                id
            ))
            .into());
        }
        if entry.status != EntryStatus::Pending {
            return Err(TrackerError::Unauthorized(format!(
                "time entry {} has already been {}",
                id, entry.status
            ))
            .into());
        }

        Ok(entry)
    }
}

/// 日付をパースする。
fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("Failed to parse date: {}", s))
}

/// ローカルタイムゾーンの日付と時刻をUTCの時刻にする。
fn at_local_time(date: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>> {
    let datetime = Local
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .with_context(|| format!("{} {} does not exist in the local time zone", date, time))?
        .to_utc();

    Ok(datetime)
}
