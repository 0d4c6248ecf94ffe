use std::{env, path::PathBuf};

use anyhow::{Context, Result};

const DEFAULT_FUNCTIONS_REGION: &str = "us-central1";
const DEFAULT_IDENTITY_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const DEFAULT_FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";
const DEFAULT_SECURETOKEN_URL: &str = "https://securetoken.googleapis.com/v1";

/// ホスト型バックエンドへの接続設定。
#[derive(Clone, Debug)]
pub struct Config {
    pub api_key: String,
    pub project_id: String,
    pub identity_url: String,
    pub firestore_url: String,
    pub functions_url: String,
    pub securetoken_url: String,
    pub session_path: PathBuf,
}

impl Config {
    /// 環境変数から設定を読み込む。
    ///
    /// `PUNCHCLOCK_API_KEY`と`PUNCHCLOCK_PROJECT_ID`が設定されていない場合はエラーを返す。
    /// エンドポイントは`PUNCHCLOCK_*_URL`で上書きできる。
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("PUNCHCLOCK_API_KEY").context("PUNCHCLOCK_API_KEY must be set")?;
        let project_id =
            env::var("PUNCHCLOCK_PROJECT_ID").context("PUNCHCLOCK_PROJECT_ID must be set")?;
        let region = env::var("PUNCHCLOCK_FUNCTIONS_REGION")
            .unwrap_or_else(|_| DEFAULT_FUNCTIONS_REGION.to_string());

        let functions_url = env::var("PUNCHCLOCK_FUNCTIONS_URL")
            .unwrap_or_else(|_| format!("https://{}-{}.cloudfunctions.net", region, project_id));
        let session_path = match env::var("PUNCHCLOCK_SESSION_FILE") {
            Ok(path) => PathBuf::from(path),
            Err(_) => default_session_path()?,
        };

        Ok(Self {
            api_key,
            project_id,
            identity_url: env::var("PUNCHCLOCK_IDENTITY_URL")
                .unwrap_or_else(|_| DEFAULT_IDENTITY_URL.to_string()),
            firestore_url: env::var("PUNCHCLOCK_FIRESTORE_URL")
                .unwrap_or_else(|_| DEFAULT_FIRESTORE_URL.to_string()),
            functions_url,
            securetoken_url: env::var("PUNCHCLOCK_SECURETOKEN_URL")
                .unwrap_or_else(|_| DEFAULT_SECURETOKEN_URL.to_string()),
            session_path,
        })
    }
}

/// ユーザーの設定ディレクトリ配下のセッションファイルのパスを返す。
fn default_session_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("Failed to locate the user config directory")?;
    Ok(dir.join("punchclock").join("session.json"))
}
