use async_trait::async_trait;
use log::debug;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::TrackerError;

/// コラボレーターのログイントークンをカスタム認証トークンに交換する。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange_token(&self, login_token: &str) -> Result<String, TrackerError>;
}

/// メンバーの招待とログイントークンの再発行。会社のアカウントだけが呼び出せる。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MemberInvitations: Send + Sync {
    /// メンバーを追加し、共有するログイントークンを返す。
    async fn create_member(&self, name: &str, email: &str) -> Result<String, TrackerError>;

    /// 新しいログイントークンを発行して返す。古いトークンは使えなくなる。
    async fn regenerate_member_token(&self, member_id: &str) -> Result<String, TrackerError>;
}

#[derive(Debug, Deserialize)]
struct CallableError {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct CallableResponse {
    result: Option<Value>,
    error: Option<CallableError>,
}

/// トークンを返す関数の結果。
#[derive(Debug, Deserialize)]
struct TokenResult {
    token: String,
}

/// サーバーレスのcallable関数を呼び出すクライアント。
pub struct FunctionsClient {
    client: Client,
    base_url: String,
    id_token: Option<String>,
}

impl FunctionsClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.functions_url.trim_end_matches('/').to_string(),
            id_token: None,
        }
    }

    /// サインイン中ユーザーのIDトークンを付けて呼び出すクライアントを返す。
    pub fn with_id_token(self, id_token: &str) -> Self {
        Self {
            id_token: Some(id_token.to_string()),
            ..self
        }
    }

    /// 関数を呼び出し、`result`を`T`として返す。
    ///
    /// # Arguments
    ///
    /// * `name` - 関数名
    /// * `payload` - `data`として送る引数
    pub async fn call<T: DeserializeOwned>(
        &self,
        name: &str,
        payload: Value,
    ) -> Result<T, TrackerError> {
        let mut request = self
            .client
            .post(format!("{}/{}", self.base_url, name))
            .json(&json!({ "data": payload }));
        if let Some(id_token) = &self.id_token {
            request = request.bearer_auth(id_token);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!("Callable {} returned {}", name, status);

        let body: CallableResponse = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(_) if !status.is_success() => return Err(TrackerError::from_status(status, &text)),
            Err(err) => return Err(err.into()),
        };
        if let Some(error) = body.error {
            return Err(classify_callable_error(&error));
        }
        let result = body
            .result
            .ok_or_else(|| TrackerError::Decode(format!("{} returned no result", name)))?;

        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl TokenExchange for FunctionsClient {
    async fn exchange_token(&self, login_token: &str) -> Result<String, TrackerError> {
        if login_token.trim().is_empty() {
            return Err(TrackerError::Validation("login token is empty".to_string()));
        }
        let result: TokenResult = self
            .call("exchangeToken", json!({ "token": login_token.trim() }))
            .await?;
        Ok(result.token)
    }
}

#[async_trait]
impl MemberInvitations for FunctionsClient {
    async fn create_member(&self, name: &str, email: &str) -> Result<String, TrackerError> {
        let (name, email) = (name.trim(), email.trim());
        if name.is_empty() || email.is_empty() {
            return Err(TrackerError::Validation(
                "member name and email are required".to_string(),
            ));
        }
        let result: TokenResult = self
            .call("createMemberAndToken", json!({ "name": name, "email": email }))
            .await?;
        Ok(result.token)
    }

    async fn regenerate_member_token(&self, member_id: &str) -> Result<String, TrackerError> {
        let result: TokenResult = self
            .call("regenerateMemberToken", json!({ "memberId": member_id }))
            .await?;
        Ok(result.token)
    }
}

fn classify_callable_error(error: &CallableError) -> TrackerError {
    let message = format!("{} ({})", error.message, error.status);
    match error.status.as_str() {
        "NOT_FOUND" => TrackerError::NotFound(message),
        "PERMISSION_DENIED" | "UNAUTHENTICATED" => TrackerError::Unauthorized(message),
        "INVALID_ARGUMENT" => TrackerError::Validation(message),
        _ => TrackerError::Transient(message),
    }
}
