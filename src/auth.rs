use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Config;
use crate::datetime;
use crate::error::TrackerError;

/// IDトークンの期限が切れるこの秒数前から更新する。
const REFRESH_MARGIN_SECONDS: i64 = 300;

/// サインインしているユーザーの立場。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// 会社のアカウント。会社IDはユーザーIDと同じ。
    Owner,
    /// 会社に招待されたコラボレーター。
    Member,
}

/// CLIの起動をまたいで保持するセッション。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub id_token: String,
    pub refresh_token: String,
    pub email: String,
    pub role: Role,
    pub company_id: String,
    /// IDトークンの有効期限。古いセッションファイルには含まれない。
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// IDトークンの期限が近いか、期限が分からない場合に`true`を返す。
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - Duration::seconds(REFRESH_MARGIN_SECONDS) <= now,
            None => true,
        }
    }

    /// 更新したトークンで置き換えたセッションを返す。
    pub fn with_tokens(self, tokens: RefreshedTokens) -> Self {
        Self {
            id_token: tokens.id_token,
            refresh_token: tokens.refresh_token,
            expires_at: tokens.expires_at,
            ..self
        }
    }
}

#[cfg(test)]
impl Session {
    /// テスト用のセッション。会社は`owner-1`、メンバーのIDは`m1`。
    pub fn dummy(role: Role) -> Self {
        let user_id = match role {
            Role::Owner => "owner-1",
            Role::Member => "m1",
        };
        Self {
            user_id: user_id.to_string(),
            id_token: "id-token".to_string(),
            refresh_token: "refresh-token".to_string(),
            email: format!("{}@example.com", user_id),
            role,
            company_id: "owner-1".to_string(),
            expires_at: None,
        }
    }
}

/// 認証プロバイダーが発行した資格情報。会社との紐付けはまだ持たない。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub id_token: String,
    pub refresh_token: String,
    pub email: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// リフレッシュトークンで取り直したトークン。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub user_id: String,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn into_owner_session(self) -> Session {
        Session {
            company_id: self.user_id.clone(),
            user_id: self.user_id,
            id_token: self.id_token,
            refresh_token: self.refresh_token,
            email: self.email,
            role: Role::Owner,
            expires_at: self.expires_at,
        }
    }

    pub fn into_member_session(self, company_id: String) -> Session {
        Session {
            user_id: self.user_id,
            id_token: self.id_token,
            refresh_token: self.refresh_token,
            email: self.email,
            role: Role::Member,
            company_id,
            expires_at: self.expires_at,
        }
    }
}

/// ホスト型の認証サービス。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, TrackerError>;

    /// 特権関数が発行したカスタムトークンでサインインする。
    async fn sign_in_with_custom_token(&self, token: &str) -> Result<Identity, TrackerError>;

    /// リフレッシュトークンで新しいIDトークンを取得する。
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, TrackerError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordSignInResponse {
    local_id: String,
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    email: String,
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomTokenSignInResponse {
    id_token: String,
    refresh_token: String,
    expires_in: Option<String>,
}

/// トークン更新APIのレスポンス。こちらだけフィールド名がsnake_caseになる。
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    user_id: String,
    id_token: String,
    refresh_token: String,
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// 認証サービスのREST APIと通信するクライアント。
pub struct IdentityClient {
    client: Client,
    base_url: String,
    securetoken_url: String,
    api_key: String,
}

impl IdentityClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.identity_url.trim_end_matches('/').to_string(),
            securetoken_url: config.securetoken_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, TrackerError> {
        let response = self
            .client
            .post(format!("{}/accounts:{}", self.base_url, method))
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await?;

        decode_response(response).await
    }
}

async fn decode_response<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, TrackerError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(classify_error(status, &text));
    }

    Ok(response.json::<T>().await?)
}

/// `expiresIn`（秒数の文字列）から有効期限を求める。
fn expires_at(expires_in: Option<&str>) -> Option<DateTime<Utc>> {
    let seconds = expires_in?.parse().ok()?;
    datetime::now().checked_add_signed(Duration::try_seconds(seconds)?)
}

#[async_trait]
impl AuthProvider for IdentityClient {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, TrackerError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(TrackerError::Validation(
                "email and password are required".to_string(),
            ));
        }

        let response: PasswordSignInResponse = self
            .post(
                "signInWithPassword",
                json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;
        info!("Signed in as {}", response.local_id);

        Ok(Identity {
            user_id: response.local_id,
            id_token: response.id_token,
            refresh_token: response.refresh_token,
            email: response.email,
            expires_at: expires_at(response.expires_in.as_deref()),
        })
    }

    async fn sign_in_with_custom_token(&self, token: &str) -> Result<Identity, TrackerError> {
        let signed_in: CustomTokenSignInResponse = self
            .post(
                "signInWithCustomToken",
                json!({ "token": token, "returnSecureToken": true }),
            )
            .await?;

        // カスタムトークンのレスポンスにはユーザーIDが含まれないため問い合わせる
        let lookup: LookupResponse = self
            .post("lookup", json!({ "idToken": signed_in.id_token }))
            .await?;
        let user = lookup
            .users
            .into_iter()
            .next()
            .ok_or_else(|| TrackerError::Decode("lookup returned no user".to_string()))?;
        info!("Signed in with custom token as {}", user.local_id);

        Ok(Identity {
            user_id: user.local_id,
            id_token: signed_in.id_token,
            refresh_token: signed_in.refresh_token,
            email: user.email,
            expires_at: expires_at(signed_in.expires_in.as_deref()),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, TrackerError> {
        let response = self
            .client
            .post(format!("{}/token", self.securetoken_url))
            .query(&[("key", &self.api_key)])
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await?;
        let refreshed: RefreshResponse = decode_response(response).await?;
        debug!("Refreshed ID token for {}", refreshed.user_id);

        Ok(RefreshedTokens {
            user_id: refreshed.user_id,
            id_token: refreshed.id_token,
            refresh_token: refreshed.refresh_token,
            expires_at: expires_at(refreshed.expires_in.as_deref()),
        })
    }
}

/// 認証サービスのエラーメッセージを分類する。
fn classify_error(status: reqwest::StatusCode, body: &str) -> TrackerError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.to_string());
    debug!("Identity error {}: {}", status, message);

    let code = message.split(':').next().unwrap_or_default().trim();
    match code {
        "EMAIL_NOT_FOUND"
        | "INVALID_PASSWORD"
        | "INVALID_LOGIN_CREDENTIALS"
        | "USER_DISABLED"
        | "INVALID_CUSTOM_TOKEN"
        | "INVALID_ID_TOKEN"
        | "TOKEN_EXPIRED"
        | "USER_NOT_FOUND"
        | "INVALID_REFRESH_TOKEN" => TrackerError::Unauthorized(message),
        "INVALID_EMAIL" | "MISSING_PASSWORD" => TrackerError::Validation(message),
        _ => TrackerError::from_status(status, &message),
    }
}

/// セッションをJSONファイルとして保存する。
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// 保存済みのセッションを読み込む。ファイルがなければ`None`を返す。
    pub fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session file: {}", self.path.display()))?;
        let session = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse session file: {}", self.path.display()))?;

        Ok(Some(session))
    }

    /// サインイン中のセッションを返す。サインインしていなければエラーを返す。
    pub fn current_session(&self) -> Result<Session> {
        self.load()?.ok_or_else(|| TrackerError::NotSignedIn.into())
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(session).context("Failed to serialize session")?;
        fs::write(&self.path, text)
            .with_context(|| format!("Failed to write session file: {}", self.path.display()))?;
        debug!("Session saved to {}", self.path.display());

        Ok(())
    }

    /// セッションを破棄する。サインインしていない場合は何もしない。
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove session file: {}", self.path.display()))?;
        }
        Ok(())
    }
}
