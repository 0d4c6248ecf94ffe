use thiserror::Error;

/// バックエンドとのやり取りやユーザー入力の検証で発生するエラー。
///
/// どのエラーも致命的ではなく、呼び出し側で表示して操作を中断する。
#[derive(Debug, Error)]
pub enum TrackerError {
    /// ネットワーク呼び出しの前に弾かれる入力エラー。
    #[error("invalid input: {0}")]
    Validation(String),

    /// 通信失敗やバックエンドの一時的な障害。
    #[error("backend unavailable: {0}")]
    Transient(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// レスポンスの形式が想定と異なる。
    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("not signed in, run `punchclock login` first")]
    NotSignedIn,
}

impl TrackerError {
    /// HTTPステータスコードとレスポンス本文からエラーを分類する。
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            400 => Self::Validation(body.to_string()),
            401 | 403 => Self::Unauthorized(body.to_string()),
            404 => Self::NotFound(body.to_string()),
            _ => Self::Transient(format!("{}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
