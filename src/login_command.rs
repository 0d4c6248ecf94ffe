use anyhow::{Context, Result};
use log::{debug, info};

use crate::auth::{AuthProvider, Identity, Session};
use crate::datetime;
use crate::error::TrackerError;
use crate::functions::TokenExchange;
use crate::store::EntryRepository;

/// 会社のアカウントでサインインするためのサブコマンド。
#[derive(Debug, clap::Args)]
pub struct LoginArgs {
    #[clap(short = 'e', long = "email", help = "Company account email")]
    pub email: String,

    #[clap(
        short = 'p',
        long = "password",
        help = "Account password, read from PUNCHCLOCK_PASSWORD or a hidden prompt when omitted"
    )]
    pub password: Option<String>,
}

/// コラボレーターとしてサインインするためのサブコマンド。
#[derive(Debug, clap::Args)]
pub struct MemberLoginArgs {
    #[clap(help = "Login token shared by the company")]
    pub token: String,
}

pub struct LoginCommand<'a, A: AuthProvider> {
    auth: &'a A,
}

impl<'a, A: AuthProvider> LoginCommand<'a, A> {
    /// 新しい`LoginCommand`を返す。
    ///
    /// # Arguments
    /// * `auth` - 認証サービス
    pub fn new(auth: &'a A) -> Self {
        Self { auth }
    }

    /// メールアドレスとパスワードでサインインし、オーナーのセッションを返す。
    pub async fn run(&self, email: &str, password: &str) -> Result<Session> {
        let identity = self
            .auth
            .sign_in(email, password)
            .await
            .context("Failed to sign in")?;
        info!("Signed in as company {}", identity.user_id);

        Ok(identity.into_owner_session())
    }
}

pub struct MemberLoginCommand<'a, A: AuthProvider, X: TokenExchange> {
    auth: &'a A,
    exchange: &'a X,
}

impl<'a, A: AuthProvider, X: TokenExchange> MemberLoginCommand<'a, A, X> {
    pub fn new(auth: &'a A, exchange: &'a X) -> Self {
        Self { auth, exchange }
    }

    /// ログイントークンを特権関数でカスタムトークンに交換してサインインする。
    ///
    /// 会社IDはまだ分からないため、認証済みの資格情報のみを返す。
    pub async fn run(&self, login_token: &str) -> Result<Identity> {
        let custom_token = self
            .exchange
            .exchange_token(login_token)
            .await
            .context("Failed to exchange login token")?;
        let identity = self
            .auth
            .sign_in_with_custom_token(&custom_token)
            .await
            .context("Failed to sign in with custom token")?;

        Ok(identity)
    }
}

/// メンバーのドキュメントから所属する会社を引き、コラボレーターのセッションを作る。
pub async fn member_session<R: EntryRepository + ?Sized>(
    repository: &R,
    identity: Identity,
) -> Result<Session> {
    let member = repository
        .get_member(&identity.user_id)
        .await
        .with_context(|| format!("Failed to load member profile for {}", identity.user_id))?;
    info!("Signed in as {} of company {}", member.name, member.company_id);

    Ok(identity.into_member_session(member.company_id))
}

/// IDトークンの期限が近ければリフレッシュトークンで取り直したセッションを返す。
///
/// 期限に余裕がある場合はセッションをそのまま返し、認証サービスには問い合わせない。
pub async fn refresh_session<A: AuthProvider + ?Sized>(auth: &A, session: Session) -> Result<Session> {
    if !session.needs_refresh(datetime::now()) {
        return Ok(session);
    }

    let tokens = auth
        .refresh(&session.refresh_token)
        .await
        .context("Failed to refresh the session, sign in again")?;
    if tokens.user_id != session.user_id {
        return Err(TrackerError::Unauthorized(format!(
            "refreshed token belongs to {}, not {}",
            tokens.user_id, session.user_id
        ))
        .into());
    }
    debug!("Session for {} refreshed", session.user_id);

    Ok(session.with_tokens(tokens))
}
