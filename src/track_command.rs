use std::io::Write;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Duration;
use log::{info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::auth::Session;
use crate::datetime;
use crate::error::TrackerError;
use crate::stopwatch::{format_elapsed, EntrySink, StopOutcome, Stopwatch};
use crate::store::EntryRepository;
use crate::time_entry::{project_label, EntryId, NewTimeEntry};

/// ストップウォッチで作業時間を計測するためのサブコマンド。
#[derive(Debug, clap::Args)]
pub struct TrackArgs {
    #[clap(help = "Task or project name, blank for an untitled project")]
    pub label: Option<String>,
}

/// 停止したストップウォッチの計測結果をサインイン中のユーザーのエントリーとして保存する。
pub struct RepositorySink<'a, R: EntryRepository + ?Sized> {
    repository: &'a R,
    session: &'a Session,
}

impl<'a, R: EntryRepository + ?Sized> RepositorySink<'a, R> {
    pub fn new(repository: &'a R, session: &'a Session) -> Self {
        Self {
            repository,
            session,
        }
    }
}

#[async_trait]
impl<'a, R: EntryRepository + ?Sized> EntrySink for RepositorySink<'a, R> {
    async fn save(&self, label: &str, elapsed: Duration) -> Result<EntryId, TrackerError> {
        let entry = NewTimeEntry::for_session(self.session, label, elapsed, datetime::now());
        self.repository.insert_entry(&entry).await
    }
}

/// 入力行の解釈。
#[derive(Debug, PartialEq, Eq)]
enum Action {
    Stop,
    Reset,
    Unknown,
}

impl Action {
    fn parse(line: Option<&str>) -> Self {
        match line.map(str::trim) {
            None | Some("") => Action::Stop,
            Some("r") | Some("R") => Action::Reset,
            Some(_) => Action::Unknown,
        }
    }
}

pub struct TrackCommand<'a, R: EntryRepository + ?Sized> {
    repository: &'a R,
    session: &'a Session,
}

impl<'a, R: EntryRepository + ?Sized> TrackCommand<'a, R> {
    /// 新しい`TrackCommand`を返す。
    ///
    /// # Arguments
    /// * `repository` - エントリーを保存するドキュメントストア
    /// * `session` - サインイン中のユーザー
    pub fn new(repository: &'a R, session: &'a Session) -> Self {
        Self {
            repository,
            session,
        }
    }

    /// `track`サブコマンドの処理を行う。
    ///
    /// Enter（または入力の終端）で停止して保存し、`r`で破棄する。
    /// 計測中は経過時間を1秒ごとに`output`へ書き直す。
    ///
    /// # Arguments
    ///
    /// * `args` - `track`サブコマンドの引数
    /// * `input` - 操作を読み取る入力
    /// * `output` - 経過時間と結果を書き込む出力
    pub async fn run<I, W>(&self, args: TrackArgs, input: I, output: &mut W) -> Result<StopOutcome>
    where
        I: AsyncBufRead + Unpin,
        W: Write,
    {
        let label = project_label(args.label.as_deref().unwrap_or_default());
        let sink = RepositorySink::new(self.repository, self.session);
        let mut stopwatch = Stopwatch::new();
        let mut display = stopwatch.subscribe();
        let mut lines = input.lines();

        stopwatch.start(&label)?;
        writeln!(output, "Tracking {}. Press Enter to stop and save, r then Enter to discard.", label)
            .context("Failed to write to console")?;

        while stopwatch.is_running() {
            tokio::select! {
                line = lines.next_line() => {
                    let line = line.context("Failed to read input")?;
                    match Action::parse(line.as_deref()) {
                        Action::Stop => break,
                        Action::Reset => {
                            stopwatch.reset();
                            writeln!(output, "\nDiscarded {}.", label)
                                .context("Failed to write to console")?;
                            return Ok(StopOutcome::NotRunning);
                        }
                        Action::Unknown => {
                            if let (Some(elapsed), Some(running)) = (stopwatch.elapsed(), stopwatch.label()) {
                                writeln!(
                                    output,
                                    "\n{} on {}. Press Enter to stop, r to discard.",
                                    format_elapsed(elapsed),
                                    running
                                )
                                .context("Failed to write to console")?;
                            }
                        }
                    }
                }
                changed = display.changed() => {
                    if changed.is_ok() {
                        let elapsed = display.borrow_and_update().clone();
                        write!(output, "\r{}  {}", elapsed, label)
                            .context("Failed to write to console")?;
                        output.flush().context("Failed to flush console")?;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, stopping the stopwatch");
                    break;
                }
            }
        }

        let outcome = stopwatch
            .stop(&sink)
            .await
            .with_context(|| format!("Failed to save time entry for {}", label))?;
        match &outcome {
            StopOutcome::Saved { id, elapsed, .. } => {
                info!("Time entry {} saved", id);
                writeln!(output, "\nSaved {} for {} ({}).", format_elapsed(*elapsed), label, id)
            }
            StopOutcome::Discarded { elapsed, .. } => writeln!(
                output,
                "\nDiscarded {}: sessions shorter than one second are not saved.",
                format_elapsed(*elapsed)
            ),
            StopOutcome::NotRunning => Ok(()),
        }
        .context("Failed to write to console")?;

        Ok(outcome)
    }
}
