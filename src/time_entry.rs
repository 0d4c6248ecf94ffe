use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{Role, Session};
use crate::error::TrackerError;

/// プロジェクト名が空のときに使う名前。
pub const PLACEHOLDER_PROJECT: &str = "Untitled project";

/// ドキュメントストア上のタイムエントリーのID。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub String);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntryId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// タイムエントリーの承認状態。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Approved,
    Rejected,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Approved => "approved",
            EntryStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(EntryStatus::Pending),
            "approved" => Ok(EntryStatus::Approved),
            "rejected" => Ok(EntryStatus::Rejected),
            _ => Err(TrackerError::Validation(format!("unknown status: {}", s))),
        }
    }
}

/// ストアから読み込んだタイムエントリー。
#[derive(Clone, Debug, PartialEq)]
pub struct TimeEntry {
    pub id: EntryId,
    pub project: String,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    pub company_id: String,
    /// `None`の場合は会社のオーナー自身のエントリー。
    pub member_id: Option<String>,
    pub status: EntryStatus,
}

impl TimeEntry {
    /// このエントリーの直後から続きを読むためのカーソル。
    pub fn cursor(&self) -> EntryCursor {
        EntryCursor {
            timestamp: self.timestamp,
            id: self.id.clone(),
        }
    }
}

/// ストアに書き込む前のタイムエントリー。
#[derive(Clone, Debug, PartialEq)]
pub struct NewTimeEntry {
    pub project: String,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    pub company_id: String,
    pub member_id: Option<String>,
    pub status: EntryStatus,
}

impl NewTimeEntry {
    /// サインイン中のユーザーとしてエントリーを作る。
    ///
    /// オーナーのエントリーは承認済み、コラボレーターのエントリーは承認待ちになる。
    pub fn for_session(
        session: &Session,
        project: &str,
        duration: Duration,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let (member_id, status) = match session.role {
            Role::Owner => (None, EntryStatus::Approved),
            Role::Member => (Some(session.user_id.clone()), EntryStatus::Pending),
        };

        Self {
            project: project_label(project),
            duration,
            timestamp,
            company_id: session.company_id.clone(),
            member_id,
            status,
        }
    }
}

/// 手動編集で変更できる項目。
#[derive(Clone, Debug, PartialEq)]
pub struct EntryUpdate {
    pub project: String,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

/// ページ境界を表すカーソル。
///
/// 並び順は`timestamp`の降順、同時刻はIDの降順なので、この組で位置が一意に決まる。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryCursor {
    pub timestamp: DateTime<Utc>,
    pub id: EntryId,
}

/// 誰のエントリーを表示するか。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MemberFilter {
    #[default]
    All,
    /// オーナー自身のエントリーのみ。
    Company,
    Member(String),
}

impl FromStr for MemberFilter {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(TrackerError::Validation("member filter is empty".to_string())),
            "all" => Ok(MemberFilter::All),
            "company" => Ok(MemberFilter::Company),
            id => Ok(MemberFilter::Member(id.to_string())),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryFilters {
    pub member: MemberFilter,
    pub status: Option<EntryStatus>,
}

/// 空白のみのプロジェクト名をプレースホルダーに置き換える。
pub fn project_label(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        PLACEHOLDER_PROJECT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// 時・分・秒の入力から長さを組み立て、0以下なら拒否する。
pub fn duration_from_hms(hours: i64, minutes: i64, seconds: i64) -> Result<Duration, TrackerError> {
    if hours < 0 || minutes < 0 || seconds < 0 {
        return Err(TrackerError::Validation(
            "duration parts must not be negative".to_string(),
        ));
    }
    let duration = Duration::try_hours(hours)
        .zip(Duration::try_minutes(minutes))
        .zip(Duration::try_seconds(seconds))
        .and_then(|((hours, minutes), seconds)| hours.checked_add(&minutes)?.checked_add(&seconds))
        .ok_or_else(|| TrackerError::Validation("duration is too long".to_string()))?;
    if duration <= Duration::zero() {
        return Err(TrackerError::Validation(
            "duration must be greater than zero".to_string(),
        ));
    }

    Ok(duration)
}
