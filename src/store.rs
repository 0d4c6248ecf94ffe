use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::error::TrackerError;
use crate::time_entry::{
    EntryCursor, EntryFilters, EntryId, EntryStatus, EntryUpdate, NewTimeEntry, TimeEntry,
};

/// 範囲クエリの条件。
///
/// 結果は常に`timestamp`の降順、同時刻はIDの降順で返る。
#[derive(Clone, Debug, PartialEq)]
pub struct EntryQuery {
    pub company_id: String,
    pub filters: EntryFilters,
    /// このカーソルより後ろ（厳密に）から読み始める。
    pub start_after: Option<EntryCursor>,
    pub limit: usize,
}

/// 会社に属するコラボレーター。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub email: String,
}

/// メンバーの名前とメールアドレスの変更内容。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberUpdate {
    pub name: String,
    pub email: String,
}

/// 会社があらかじめ用意した作業の名前。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub company_id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTask {
    pub company_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// タイムエントリーを保持するリモートのドキュメントストア。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EntryRepository: Send + Sync {
    async fn insert_entry(&self, entry: &NewTimeEntry) -> Result<EntryId, TrackerError>;

    async fn get_entry(&self, id: &EntryId) -> Result<TimeEntry, TrackerError>;

    /// 条件に合うエントリーを最大`limit`件取得する。
    async fn query_entries(&self, query: &EntryQuery) -> Result<Vec<TimeEntry>, TrackerError>;

    async fn update_entry(&self, id: &EntryId, update: &EntryUpdate) -> Result<(), TrackerError>;

    async fn set_status(&self, id: &EntryId, status: EntryStatus) -> Result<(), TrackerError>;

    async fn delete_entry(&self, id: &EntryId) -> Result<(), TrackerError>;

    /// 会社の全エントリーを取得する。集計とエクスポート用。
    async fn list_company_entries(&self, company_id: &str) -> Result<Vec<TimeEntry>, TrackerError>;

    async fn get_member(&self, member_id: &str) -> Result<Member, TrackerError>;

    async fn list_members(&self, company_id: &str) -> Result<Vec<Member>, TrackerError>;
}

/// 会社のメンバーとタスク一覧を管理するためのドキュメントストア。
///
/// メンバーの追加とログイントークンの発行は特権関数が行うため、ここには含まない。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CompanyDirectory: Send + Sync {
    async fn update_member(&self, member_id: &str, update: &MemberUpdate) -> Result<(), TrackerError>;

    /// メンバーを削除する。記録済みのエントリーは残る。
    async fn delete_member(&self, member_id: &str) -> Result<(), TrackerError>;

    async fn list_tasks(&self, company_id: &str) -> Result<Vec<Task>, TrackerError>;

    async fn get_task(&self, task_id: &str) -> Result<Task, TrackerError>;

    async fn insert_task(&self, task: &NewTask) -> Result<Task, TrackerError>;

    async fn rename_task(&self, task_id: &str, name: &str) -> Result<(), TrackerError>;

    async fn delete_task(&self, task_id: &str) -> Result<(), TrackerError>;
}

/// テスト用のメモリ上のリポジトリ。
///
/// ドキュメントストアと同じ並び順とカーソルの意味で範囲クエリに答える。
#[cfg(test)]
pub mod memory {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    };

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};

    use super::{CompanyDirectory, EntryQuery, EntryRepository, Member, MemberUpdate, NewTask, Task};
    use crate::error::TrackerError;
    use crate::time_entry::{
        EntryId, EntryStatus, EntryUpdate, MemberFilter, NewTimeEntry, TimeEntry,
    };

    #[derive(Default)]
    pub struct MemoryRepository {
        entries: Mutex<Vec<TimeEntry>>,
        members: Mutex<Vec<Member>>,
        tasks: Mutex<Vec<Task>>,
        failing: AtomicBool,
        queries: AtomicUsize,
        failing_query: AtomicUsize,
    }

    impl MemoryRepository {
        pub fn new(entries: Vec<TimeEntry>) -> Self {
            Self {
                entries: Mutex::new(entries),
                ..Default::default()
            }
        }

        pub fn with_members(self, members: Vec<Member>) -> Self {
            Self {
                members: Mutex::new(members),
                ..self
            }
        }

        pub fn with_tasks(self, tasks: Vec<Task>) -> Self {
            Self {
                tasks: Mutex::new(tasks),
                ..self
            }
        }

        /// `true`の間、すべての呼び出しが一時的なエラーになる。
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// 次の`skip`回の範囲クエリは成功させ、その次の1回だけを一時的なエラーにする。
        pub fn fail_query_after(&self, skip: usize) {
            let target = self.queries.load(Ordering::SeqCst) + skip + 1;
            self.failing_query.store(target, Ordering::SeqCst);
        }

        pub fn query_count(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }

        pub fn entries(&self) -> Vec<TimeEntry> {
            self.entries.lock().unwrap().clone()
        }

        pub fn members(&self) -> Vec<Member> {
            self.members.lock().unwrap().clone()
        }

        pub fn tasks(&self) -> Vec<Task> {
            self.tasks.lock().unwrap().clone()
        }

        fn check(&self) -> Result<(), TrackerError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(TrackerError::Transient("connection reset".to_string()))
            } else {
                Ok(())
            }
        }
    }

    /// 番号1が最も古く、番号が大きいほど新しいエントリーを`count`件作る。
    pub fn numbered_entries(count: usize) -> Vec<TimeEntry> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        (1..=count)
            .map(|number| TimeEntry {
                id: EntryId(format!("e{:03}", number)),
                project: format!("task {}", number),
                duration: Duration::minutes(number as i64),
                timestamp: base + Duration::hours(number as i64),
                company_id: "owner-1".to_string(),
                member_id: None,
                status: EntryStatus::Approved,
            })
            .collect()
    }

    #[async_trait]
    impl EntryRepository for MemoryRepository {
        async fn insert_entry(&self, entry: &NewTimeEntry) -> Result<EntryId, TrackerError> {
            self.check()?;
            let mut entries = self.entries.lock().unwrap();
            let id = EntryId(format!("new{:03}", entries.len() + 1));
            entries.push(TimeEntry {
                id: id.clone(),
                project: entry.project.clone(),
                duration: entry.duration,
                timestamp: entry.timestamp,
                company_id: entry.company_id.clone(),
                member_id: entry.member_id.clone(),
                status: entry.status,
            });
            Ok(id)
        }

        async fn get_entry(&self, id: &EntryId) -> Result<TimeEntry, TrackerError> {
            self.check()?;
            self.entries()
                .into_iter()
                .find(|entry| &entry.id == id)
                .ok_or_else(|| TrackerError::NotFound(id.to_string()))
        }

        async fn query_entries(&self, query: &EntryQuery) -> Result<Vec<TimeEntry>, TrackerError> {
            let number = self.queries.fetch_add(1, Ordering::SeqCst) + 1;
            if number == self.failing_query.load(Ordering::SeqCst) {
                return Err(TrackerError::Transient("deadline exceeded".to_string()));
            }
            self.check()?;
            let mut matching: Vec<TimeEntry> = self
                .entries()
                .into_iter()
                .filter(|entry| entry.company_id == query.company_id)
                .filter(|entry| match &query.filters.member {
                    MemberFilter::All => true,
                    MemberFilter::Company => entry.member_id.is_none(),
                    MemberFilter::Member(id) => entry.member_id.as_deref() == Some(id.as_str()),
                })
                .filter(|entry| query.filters.status.map_or(true, |status| entry.status == status))
                .collect();
            matching.sort_by(|a, b| (b.timestamp, &b.id).cmp(&(a.timestamp, &a.id)));

            Ok(matching
                .into_iter()
                .filter(|entry| match &query.start_after {
                    Some(cursor) => (entry.timestamp, &entry.id) < (cursor.timestamp, &cursor.id),
                    None => true,
                })
                .take(query.limit)
                .collect())
        }

        async fn update_entry(&self, id: &EntryId, update: &EntryUpdate) -> Result<(), TrackerError> {
            self.check()?;
            let mut entries = self.entries.lock().unwrap();
            let entry = entries
                .iter_mut()
                .find(|entry| &entry.id == id)
                .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
            entry.project = update.project.clone();
            entry.duration = update.duration;
            entry.timestamp = update.timestamp;
            Ok(())
        }

        async fn set_status(&self, id: &EntryId, status: EntryStatus) -> Result<(), TrackerError> {
            self.check()?;
            let mut entries = self.entries.lock().unwrap();
            let entry = entries
                .iter_mut()
                .find(|entry| &entry.id == id)
                .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
            entry.status = status;
            Ok(())
        }

        async fn delete_entry(&self, id: &EntryId) -> Result<(), TrackerError> {
            self.check()?;
            let mut entries = self.entries.lock().unwrap();
            let before = entries.len();
            entries.retain(|entry| &entry.id != id);
            if entries.len() == before {
                return Err(TrackerError::NotFound(id.to_string()));
            }
            Ok(())
        }

        async fn list_company_entries(&self, company_id: &str) -> Result<Vec<TimeEntry>, TrackerError> {
            self.check()?;
            Ok(self
                .entries()
                .into_iter()
                .filter(|entry| entry.company_id == company_id)
                .collect())
        }

        async fn get_member(&self, member_id: &str) -> Result<Member, TrackerError> {
            self.check()?;
            self.members()
                .into_iter()
                .find(|member| member.id == member_id)
                .ok_or_else(|| TrackerError::NotFound(member_id.to_string()))
        }

        async fn list_members(&self, company_id: &str) -> Result<Vec<Member>, TrackerError> {
            self.check()?;
            Ok(self
                .members()
                .into_iter()
                .filter(|member| member.company_id == company_id)
                .collect())
        }
    }

    #[async_trait]
    impl CompanyDirectory for MemoryRepository {
        async fn update_member(&self, member_id: &str, update: &MemberUpdate) -> Result<(), TrackerError> {
            self.check()?;
            let mut members = self.members.lock().unwrap();
            let member = members
                .iter_mut()
                .find(|member| member.id == member_id)
                .ok_or_else(|| TrackerError::NotFound(member_id.to_string()))?;
            member.name = update.name.clone();
            member.email = update.email.clone();
            Ok(())
        }

        async fn delete_member(&self, member_id: &str) -> Result<(), TrackerError> {
            self.check()?;
            let mut members = self.members.lock().unwrap();
            let before = members.len();
            members.retain(|member| member.id != member_id);
            if members.len() == before {
                return Err(TrackerError::NotFound(member_id.to_string()));
            }
            Ok(())
        }

        async fn list_tasks(&self, company_id: &str) -> Result<Vec<Task>, TrackerError> {
            self.check()?;
            Ok(self
                .tasks()
                .into_iter()
                .filter(|task| task.company_id == company_id)
                .collect())
        }

        async fn get_task(&self, task_id: &str) -> Result<Task, TrackerError> {
            self.check()?;
            self.tasks()
                .into_iter()
                .find(|task| task.id == task_id)
                .ok_or_else(|| TrackerError::NotFound(task_id.to_string()))
        }

        async fn insert_task(&self, task: &NewTask) -> Result<Task, TrackerError> {
            self.check()?;
            let mut tasks = self.tasks.lock().unwrap();
            let inserted = Task {
                id: format!("t{:03}", tasks.len() + 1),
                company_id: task.company_id.clone(),
                name: task.name.clone(),
            };
            tasks.push(inserted.clone());
            Ok(inserted)
        }

        async fn rename_task(&self, task_id: &str, name: &str) -> Result<(), TrackerError> {
            self.check()?;
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks
                .iter_mut()
                .find(|task| task.id == task_id)
                .ok_or_else(|| TrackerError::NotFound(task_id.to_string()))?;
            task.name = name.to_string();
            Ok(())
        }

        async fn delete_task(&self, task_id: &str) -> Result<(), TrackerError> {
            self.check()?;
            let mut tasks = self.tasks.lock().unwrap();
            let before = tasks.len();
            tasks.retain(|task| task.id != task_id);
            if tasks.len() == before {
                return Err(TrackerError::NotFound(task_id.to_string()));
            }
            Ok(())
        }
    }
}
