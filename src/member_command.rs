use std::io::Write;

use anyhow::{Context, Result};
use log::info;

use crate::auth::{Role, Session};
use crate::datetime;
use crate::error::TrackerError;
use crate::functions::MemberInvitations;
use crate::store::{CompanyDirectory, EntryRepository, Member, MemberUpdate, NewTask, Task};

/// 会社のメンバーを管理するためのサブコマンド。
#[derive(Debug, clap::Args)]
pub struct MemberArgs {
    #[clap(subcommand)]
    pub action: MemberAction,
}

#[derive(Debug, clap::Subcommand)]
pub enum MemberAction {
    /// Adds a collaborator and prints their login token
    Invite(InviteArgs),
    /// Lists the company's collaborators
    List,
    /// Changes a collaborator's name or email
    Edit(MemberEditArgs),
    /// Removes a collaborator, their time entries are kept
    Remove(MemberIdArgs),
    /// Issues a new login token, the old one stops working
    RegenerateToken(MemberIdArgs),
}

#[derive(Debug, clap::Args)]
pub struct InviteArgs {
    #[clap(short = 'n', long = "name")]
    pub name: String,

    #[clap(short = 'e', long = "email")]
    pub email: String,
}

#[derive(Debug, clap::Args)]
pub struct MemberEditArgs {
    #[clap(help = "Member id")]
    pub id: String,

    #[clap(short = 'n', long = "name")]
    pub name: Option<String>,

    #[clap(short = 'e', long = "email")]
    pub email: Option<String>,
}

#[derive(Debug, clap::Args)]
pub struct MemberIdArgs {
    #[clap(help = "Member id")]
    pub id: String,
}

/// 会社のタスク一覧を管理するためのサブコマンド。
#[derive(Debug, clap::Args)]
pub struct TaskArgs {
    #[clap(subcommand)]
    pub action: TaskAction,
}

#[derive(Debug, clap::Subcommand)]
pub enum TaskAction {
    /// Adds a task name to the company catalog
    Add(TaskNameArgs),
    /// Lists the company's tasks
    List,
    /// Renames a task
    Rename(TaskRenameArgs),
    /// Removes a task from the catalog
    Remove(TaskIdArgs),
}

#[derive(Debug, clap::Args)]
pub struct TaskNameArgs {
    #[clap(help = "Task name")]
    pub name: String,
}

#[derive(Debug, clap::Args)]
pub struct TaskRenameArgs {
    #[clap(help = "Task id")]
    pub id: String,

    #[clap(help = "New task name")]
    pub name: String,
}

#[derive(Debug, clap::Args)]
pub struct TaskIdArgs {
    #[clap(help = "Task id")]
    pub id: String,
}

fn require_owner(session: &Session, action: &str) -> Result<()> {
    if session.role != Role::Owner {
        return Err(TrackerError::Unauthorized(format!(
            "only the company account can {}",
            action
        ))
        .into());
    }
    Ok(())
}

fn required(value: &str, field: &str) -> Result<String, TrackerError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(TrackerError::Validation(format!("{} must not be empty", field)));
    }
    Ok(value.to_string())
}

pub struct MemberCommand<'a, R, F>
where
    R: EntryRepository + CompanyDirectory + ?Sized,
    F: MemberInvitations + ?Sized,
{
    repository: &'a R,
    invitations: &'a F,
    session: &'a Session,
}

impl<'a, R, F> MemberCommand<'a, R, F>
where
    R: EntryRepository + CompanyDirectory + ?Sized,
    F: MemberInvitations + ?Sized,
{
    /// 新しい`MemberCommand`を返す。
    ///
    /// # Arguments
    /// * `repository` - メンバーを保持するドキュメントストア
    /// * `invitations` - メンバーの追加とトークン発行を行う特権関数
    /// * `session` - サインイン中のユーザー。会社のオーナーである必要がある
    pub fn new(repository: &'a R, invitations: &'a F, session: &'a Session) -> Self {
        Self {
            repository,
            invitations,
            session,
        }
    }

    /// `member`サブコマンドの処理を行う。
    pub async fn run<W: Write>(&self, args: MemberArgs, output: &mut W) -> Result<()> {
        match args.action {
            MemberAction::Invite(invite) => {
                let token = self.invite(invite).await?;
                writeln!(output, "Member added. Share this login token: {}", token)
            }
            MemberAction::List => {
                let members = self.list().await?;
                if members.is_empty() {
                    writeln!(output, "No members yet.").context("Failed to write to console")?;
                }
                for member in &members {
                    writeln!(output, "{}  {}  <{}>", member.id, member.name, member.email)
                        .context("Failed to write to console")?;
                }
                Ok(())
            }
            MemberAction::Edit(edit) => {
                let member = self.edit(edit).await?;
                writeln!(output, "Updated member {} ({}).", member.name, member.id)
            }
            MemberAction::Remove(target) => {
                let member = self.remove(target).await?;
                writeln!(output, "Removed member {} ({}).", member.name, member.id)
            }
            MemberAction::RegenerateToken(target) => {
                let token = self.regenerate_token(target).await?;
                writeln!(output, "New login token: {}", token)
            }
        }
        .context("Failed to write to console")?;

        Ok(())
    }

    /// メンバーを追加し、ログイントークンを返す。
    ///
    /// 名前とメールアドレスが空の場合は関数を呼び出す前にエラーを返す。
    pub async fn invite(&self, args: InviteArgs) -> Result<String> {
        require_owner(self.session, "invite members")?;
        let name = required(&args.name, "member name")?;
        let email = required(&args.email, "member email")?;

        let token = self
            .invitations
            .create_member(&name, &email)
            .await
            .with_context(|| format!("Failed to add member {}", name))?;
        info!("Member {} added to {}", name, self.session.company_id);

        Ok(token)
    }

    /// 会社のメンバーを名前順で返す。
    pub async fn list(&self) -> Result<Vec<Member>> {
        require_owner(self.session, "list members")?;
        let mut members = self
            .repository
            .list_members(&self.session.company_id)
            .await
            .context("Failed to load members")?;
        members.sort_by_key(|member| member.name.to_lowercase());

        Ok(members)
    }

    /// 名前かメールアドレスを変更する。指定しなかった項目は元の値のまま残る。
    pub async fn edit(&self, args: MemberEditArgs) -> Result<Member> {
        require_owner(self.session, "edit members")?;
        if args.name.is_none() && args.email.is_none() {
            return Err(TrackerError::Validation("nothing to change".to_string()).into());
        }
        let name = args.name.as_deref().map(|name| required(name, "member name")).transpose()?;
        let email = args.email.as_deref().map(|email| required(email, "member email")).transpose()?;
        let member = self.company_member(&args.id).await?;

        let update = MemberUpdate {
            name: name.unwrap_or_else(|| member.name.clone()),
            email: email.unwrap_or_else(|| member.email.clone()),
        };
        self.repository
            .update_member(&member.id, &update)
            .await
            .with_context(|| format!("Failed to update member: {}", member.id))?;

        Ok(Member {
            name: update.name,
            email: update.email,
            ..member
        })
    }

    /// メンバーを削除する。
    pub async fn remove(&self, args: MemberIdArgs) -> Result<Member> {
        require_owner(self.session, "remove members")?;
        let member = self.company_member(&args.id).await?;

        self.repository
            .delete_member(&member.id)
            .await
            .with_context(|| format!("Failed to remove member: {}", member.id))?;
        info!("Member {} removed", member.id);

        Ok(member)
    }

    /// ログイントークンを再発行する。
    pub async fn regenerate_token(&self, args: MemberIdArgs) -> Result<String> {
        require_owner(self.session, "issue login tokens")?;
        let member = self.company_member(&args.id).await?;

        let token = self
            .invitations
            .regenerate_member_token(&member.id)
            .await
            .with_context(|| format!("Failed to issue a new login token for {}", member.id))?;
        info!("Login token regenerated for {}", member.id);

        Ok(token)
    }

    /// サインイン中の会社に属するメンバーを取得する。
    async fn company_member(&self, id: &str) -> Result<Member> {
        let member = self
            .repository
            .get_member(id)
            .await
            .with_context(|| format!("Failed to load member: {}", id))?;
        if member.company_id != self.session.company_id {
            return Err(TrackerError::NotFound(format!("member {}", id)).into());
        }

        Ok(member)
    }
}

pub struct TaskCommand<'a, R: CompanyDirectory + ?Sized> {
    repository: &'a R,
    session: &'a Session,
}

impl<'a, R: CompanyDirectory + ?Sized> TaskCommand<'a, R> {
    /// 新しい`TaskCommand`を返す。
    ///
    /// # Arguments
    /// * `repository` - タスクを保持するドキュメントストア
    /// * `session` - サインイン中のユーザー。一覧以外はオーナーのみ実行できる
    pub fn new(repository: &'a R, session: &'a Session) -> Self {
        Self {
            repository,
            session,
        }
    }

    /// `task`サブコマンドの処理を行う。
    pub async fn run<W: Write>(&self, args: TaskArgs, output: &mut W) -> Result<()> {
        match args.action {
            TaskAction::Add(add) => {
                let task = self.add(add).await?;
                writeln!(output, "Added task {} ({}).", task.name, task.id)
            }
            TaskAction::List => {
                let tasks = self.list().await?;
                if tasks.is_empty() {
                    writeln!(output, "No tasks yet.").context("Failed to write to console")?;
                }
                for task in &tasks {
                    writeln!(output, "{}  {}", task.id, task.name)
                        .context("Failed to write to console")?;
                }
                Ok(())
            }
            TaskAction::Rename(rename) => {
                let task = self.rename(rename).await?;
                writeln!(output, "Renamed task {} to {}.", task.id, task.name)
            }
            TaskAction::Remove(target) => {
                let task = self.remove(target).await?;
                writeln!(output, "Removed task {}.", task.name)
            }
        }
        .context("Failed to write to console")?;

        Ok(())
    }

    /// タスクを追加する。大文字小文字を区別せず同じ名前のタスクがあればエラーを返す。
    pub async fn add(&self, args: TaskNameArgs) -> Result<Task> {
        require_owner(self.session, "manage tasks")?;
        let name = required(&args.name, "task name")?;
        self.ensure_unique(&name, None).await?;

        let task = self
            .repository
            .insert_task(&NewTask {
                company_id: self.session.company_id.clone(),
                name,
                created_at: datetime::now(),
            })
            .await
            .context("Failed to add task")?;
        info!("Added task {}", task.id);

        Ok(task)
    }

    /// 会社のタスクを名前順で返す。コラボレーターも参照できる。
    pub async fn list(&self) -> Result<Vec<Task>> {
        let mut tasks = self
            .repository
            .list_tasks(&self.session.company_id)
            .await
            .context("Failed to load tasks")?;
        tasks.sort_by_key(|task| task.name.to_lowercase());

        Ok(tasks)
    }

    pub async fn rename(&self, args: TaskRenameArgs) -> Result<Task> {
        require_owner(self.session, "manage tasks")?;
        let name = required(&args.name, "task name")?;
        let task = self.company_task(&args.id).await?;
        self.ensure_unique(&name, Some(&task.id)).await?;

        self.repository
            .rename_task(&task.id, &name)
            .await
            .with_context(|| format!("Failed to rename task: {}", task.id))?;

        Ok(Task { name, ..task })
    }

    pub async fn remove(&self, args: TaskIdArgs) -> Result<Task> {
        require_owner(self.session, "manage tasks")?;
        let task = self.company_task(&args.id).await?;

        self.repository
            .delete_task(&task.id)
            .await
            .with_context(|| format!("Failed to remove task: {}", task.id))?;
        info!("Removed task {}", task.id);

        Ok(task)
    }

    async fn company_task(&self, id: &str) -> Result<Task> {
        let task = self
            .repository
            .get_task(id)
            .await
            .with_context(|| format!("Failed to load task: {}", id))?;
        if task.company_id != self.session.company_id {
            return Err(TrackerError::NotFound(format!("task {}", id)).into());
        }

        Ok(task)
    }

    /// `except`以外に同じ名前のタスクがないことを確かめる。
    async fn ensure_unique(&self, name: &str, except: Option<&str>) -> Result<()> {
        let tasks = self
            .repository
            .list_tasks(&self.session.company_id)
            .await
            .context("Failed to load tasks")?;
        let duplicate = tasks.iter().any(|task| {
            task.name.to_lowercase() == name.to_lowercase() && Some(task.id.as_str()) != except
        });
        if duplicate {
            return Err(TrackerError::Validation(format!("task {} already exists", name)).into());
        }

        Ok(())
    }
}
