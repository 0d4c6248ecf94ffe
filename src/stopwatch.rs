use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
#[cfg(test)]
use mockall::automock;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::datetime;
use crate::error::TrackerError;
use crate::time_entry::EntryId;

/// これより短い計測は保存せずに捨てる。
pub const MINIMUM_ELAPSED_MS: i64 = 1_000;

/// 表示を更新する間隔。
const REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// 停止したストップウォッチの計測結果を受け取る保存先。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EntrySink: Send + Sync {
    async fn save(&self, label: &str, elapsed: Duration) -> Result<EntryId, TrackerError>;
}

/// `Stopwatch::stop`の結果。
#[derive(Clone, Debug, PartialEq)]
pub enum StopOutcome {
    /// 動いていなかったので何もしなかった。
    NotRunning,
    /// 最小計測時間に満たないため保存しなかった。
    Discarded { label: String, elapsed: Duration },
    Saved {
        id: EntryId,
        label: String,
        elapsed: Duration,
    },
}

struct Running {
    label: String,
    started_at: DateTime<Utc>,
    ticker: JoinHandle<()>,
}

/// 1つのタスクの経過時間を計測するストップウォッチ。
///
/// 停止すると計測結果を`EntrySink`へ1度だけ渡す。表示用の文字列は
/// `subscribe`で得られるチャンネルに1秒ごとに流れる。
pub struct Stopwatch {
    running: Option<Running>,
    display: Arc<watch::Sender<String>>,
}

impl Stopwatch {
    pub fn new() -> Self {
        let (display, _) = watch::channel(format_elapsed(Duration::zero()));
        Self {
            running: None,
            display: Arc::new(display),
        }
    }

    /// `HH:MM:SS`形式の経過時間を受け取るレシーバーを返す。
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.display.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn label(&self) -> Option<&str> {
        self.running.as_ref().map(|running| running.label.as_str())
    }

    /// 現在の経過時間。停止中は`None`。
    pub fn elapsed(&self) -> Option<Duration> {
        self.running
            .as_ref()
            .map(|running| datetime::now() - running.started_at)
    }

    /// 計測を開始する。
    ///
    /// 既に動いている場合は開始時刻を変えずに`Ok(false)`を返す。
    /// ラベルが空の場合はエラーを返す。プレースホルダーへの置き換えは呼び出し側で行う。
    ///
    /// # Arguments
    ///
    /// * `label` - 計測するタスクまたはプロジェクトの名前
    pub fn start(&mut self, label: &str) -> Result<bool, TrackerError> {
        if let Some(running) = &self.running {
            debug!("Stopwatch already running for {}", running.label);
            return Ok(false);
        }
        if label.trim().is_empty() {
            return Err(TrackerError::Validation(
                "a task name is required to start the stopwatch".to_string(),
            ));
        }

        let started_at = datetime::now();
        let ticker = spawn_ticker(started_at, Arc::clone(&self.display));
        self.running = Some(Running {
            label: label.to_string(),
            started_at,
            ticker,
        });
        info!("Stopwatch started for {} at {}", label, started_at);

        Ok(true)
    }

    /// 計測を止め、結果を保存先へ渡す。
    ///
    /// 保存先を呼ぶ前に停止状態へ戻すため、保存に失敗してもストップウォッチはリセットされる。
    /// 失敗はそのまま呼び出し側へ返す。
    pub async fn stop<S>(&mut self, sink: &S) -> Result<StopOutcome, TrackerError>
    where
        S: EntrySink + ?Sized,
    {
        let Some(running) = self.running.take() else {
            return Ok(StopOutcome::NotRunning);
        };
        let elapsed = datetime::now() - running.started_at;
        running.ticker.abort();
        self.clear_display();

        if elapsed.num_milliseconds() < MINIMUM_ELAPSED_MS {
            info!(
                "Discarding {} ms for {}: below minimum",
                elapsed.num_milliseconds(),
                running.label
            );
            return Ok(StopOutcome::Discarded {
                label: running.label,
                elapsed,
            });
        }

        let id = sink.save(&running.label, elapsed).await?;
        info!("Saved {} for {} as {}", format_elapsed(elapsed), running.label, id);

        Ok(StopOutcome::Saved {
            id,
            label: running.label,
            elapsed,
        })
    }

    /// 計測を破棄して停止状態に戻す。保存先は呼ばない。
    pub fn reset(&mut self) {
        if let Some(running) = self.running.take() {
            running.ticker.abort();
            info!("Stopwatch reset, discarded session for {}", running.label);
        }
        self.clear_display();
    }

    fn clear_display(&self) {
        self.display.send_replace(format_elapsed(Duration::zero()));
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Stopwatch {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.ticker.abort();
        }
    }
}

fn spawn_ticker(started_at: DateTime<Utc>, display: Arc<watch::Sender<String>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(REFRESH_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            display.send_replace(format_elapsed(datetime::now() - started_at));
        }
    })
}

/// 経過時間を`HH:MM:SS`形式にする。
///
/// 時間は24で折り返さない。負の値は0として扱う。
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_seconds = elapsed.num_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use mockall::Sequence;
    use rstest::rstest;

    use super::{format_elapsed, MockEntrySink, StopOutcome, Stopwatch};
    use crate::datetime::mock_clock;
    use crate::error::TrackerError;
    use crate::time_entry::EntryId;

    fn freeze_clock() {
        mock_clock::freeze(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
    }

    #[rstest]
    #[case::zero(0, "00:00:00")]
    #[case::two_seconds(2_000, "00:00:02")]
    #[case::truncates_millis(2_999, "00:00:02")]
    #[case::ninety_seconds(90_000, "00:01:30")]
    #[case::over_a_day(90_061_000, "25:01:01")]
    #[case::negative(-5_000, "00:00:00")]
    fn test_format_elapsed(#[case] millis: i64, #[case] expected: &str) {
        assert_eq!(format_elapsed(Duration::milliseconds(millis)), expected);
    }

    #[tokio::test]
    async fn test_stop_below_minimum_is_discarded() {
        freeze_clock();
        let mut sink = MockEntrySink::new();
        sink.expect_save().times(0);
        let mut stopwatch = Stopwatch::new();

        stopwatch.start("design").unwrap();
        mock_clock::advance(Duration::milliseconds(999));
        let outcome = stopwatch.stop(&sink).await.unwrap();

        assert_eq!(
            outcome,
            StopOutcome::Discarded {
                label: "design".to_string(),
                elapsed: Duration::milliseconds(999),
            }
        );
        assert!(!stopwatch.is_running());
    }

    #[tokio::test]
    async fn test_stop_at_minimum_saves_once() {
        freeze_clock();
        let mut sink = MockEntrySink::new();
        sink.expect_save()
            .withf(|label, elapsed| label == "design" && *elapsed == Duration::milliseconds(1_000))
            .times(1)
            .returning(|_, _| Ok(EntryId::from("entry-1")));
        let mut stopwatch = Stopwatch::new();

        stopwatch.start("design").unwrap();
        mock_clock::advance(Duration::milliseconds(1_000));
        let outcome = stopwatch.stop(&sink).await.unwrap();

        assert!(matches!(outcome, StopOutcome::Saved { .. }));
    }

    /// 500ms, 2000ms, 90000msの計測のうち後の2つだけが保存される。
    #[tokio::test]
    async fn test_only_sessions_over_minimum_are_saved() {
        freeze_clock();
        let mut seq = Sequence::new();
        let mut sink = MockEntrySink::new();
        sink.expect_save()
            .withf(|_, elapsed| format_elapsed(*elapsed) == "00:00:02")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(EntryId::from("entry-2")));
        sink.expect_save()
            .withf(|_, elapsed| format_elapsed(*elapsed) == "00:01:30")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(EntryId::from("entry-3")));
        let mut stopwatch = Stopwatch::new();

        let mut saved = vec![];
        for millis in [500, 2_000, 90_000] {
            stopwatch.start("support").unwrap();
            mock_clock::advance(Duration::milliseconds(millis));
            if let StopOutcome::Saved { id, .. } = stopwatch.stop(&sink).await.unwrap() {
                saved.push(id);
            }
        }

        assert_eq!(saved, vec![EntryId::from("entry-2"), EntryId::from("entry-3")]);
    }

    #[tokio::test]
    async fn test_start_twice_keeps_first_start_time() {
        freeze_clock();
        let mut sink = MockEntrySink::new();
        sink.expect_save()
            .withf(|label, elapsed| label == "first" && *elapsed == Duration::seconds(10))
            .times(1)
            .returning(|_, _| Ok(EntryId::from("entry-1")));
        let mut stopwatch = Stopwatch::new();

        assert!(stopwatch.start("first").unwrap());
        mock_clock::advance(Duration::seconds(4));
        assert!(!stopwatch.start("second").unwrap());
        mock_clock::advance(Duration::seconds(6));

        assert_eq!(stopwatch.label(), Some("first"));
        stopwatch.stop(&sink).await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_never_saves() {
        freeze_clock();
        let mut sink = MockEntrySink::new();
        sink.expect_save().times(0);
        let mut stopwatch = Stopwatch::new();

        stopwatch.reset();
        stopwatch.start("meeting").unwrap();
        mock_clock::advance(Duration::minutes(5));
        stopwatch.reset();
        let outcome = stopwatch.stop(&sink).await.unwrap();

        assert_eq!(outcome, StopOutcome::NotRunning);
        assert_eq!(*stopwatch.subscribe().borrow(), "00:00:00");
    }

    #[tokio::test]
    async fn test_sink_failure_still_resets() {
        freeze_clock();
        let mut sink = MockEntrySink::new();
        sink.expect_save()
            .times(1)
            .returning(|_, _| Err(TrackerError::Transient("offline".to_string())));
        let mut stopwatch = Stopwatch::new();

        stopwatch.start("review").unwrap();
        mock_clock::advance(Duration::seconds(30));
        let result = stopwatch.stop(&sink).await;

        assert!(matches!(result, Err(TrackerError::Transient(_))));
        assert!(!stopwatch.is_running());
        assert_eq!(stopwatch.elapsed(), None);
    }

    #[tokio::test]
    async fn test_start_rejects_empty_label() {
        let mut stopwatch = Stopwatch::new();

        let result = stopwatch.start("  ");

        assert!(matches!(result, Err(TrackerError::Validation(_))));
        assert!(!stopwatch.is_running());
    }

    #[tokio::test]
    async fn test_display_refreshes_while_running() {
        freeze_clock();
        let mut stopwatch = Stopwatch::new();
        let mut display = stopwatch.subscribe();

        stopwatch.start("design").unwrap();
        mock_clock::advance(Duration::seconds(3));
        // 最初のtickは即座に発火する
        display.changed().await.unwrap();

        assert_eq!(*display.borrow_and_update(), "00:00:03");
        stopwatch.reset();
    }
}
