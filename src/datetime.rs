use chrono::{DateTime, Local, NaiveDate, Utc};

/// 現在のUTC時刻を取得する。
///
/// ストップウォッチや日付ラベルは必ずこの関数を経由して時刻を読む。
#[cfg(not(test))]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}


#[cfg(test)]
pub use mock_clock::now;

/// ローカルタイムゾーンでの今日の日付。
pub fn local_today() -> NaiveDate {
    now().with_timezone(&Local).date_naive()
}

/// 日付の見出しを返す。
///
/// 今日と昨日はローカルの0時を境界として`Today`/`Yesterday`と表示し、
/// それ以外は日付をそのまま表示する。
pub fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_string()
    } else if today.pred_opt() == Some(date) {
        "Yesterday".to_string()
    } else {
        date.format("%d %B %Y").to_string()
    }
}
