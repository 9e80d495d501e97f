use chrono::{Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthUrl, ClientId, ClientSecret, RefreshToken, Scope, TokenResponse, TokenUrl};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::storage::Database;
use crate::types::now_ts;

const AUTH_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

// Treat tokens expiring within this window as already expired so a token
// cannot lapse mid-folder.
const TOKEN_SKEW_SECONDS: i64 = 60;

/// Resolves a usable Graph access token for an (org, user) pair, refreshing
/// the stored credential when it has expired. Constructed once and injected
/// wherever a token is needed.
pub struct Authenticator {
    client: BasicClient,
}

impl Authenticator {
    pub fn new(client_id: &str, client_secret: &str, token_url: &str) -> AppResult<Self> {
        let client = BasicClient::new(
            ClientId::new(client_id.to_string()),
            Some(ClientSecret::new(client_secret.to_string())),
            AuthUrl::new(AUTH_URL.to_string())
                .map_err(|e| AppError::Config(format!("invalid auth url: {e}")))?,
            Some(
                TokenUrl::new(token_url.to_string())
                    .map_err(|e| AppError::Config(format!("invalid token url {token_url}: {e}")))?,
            ),
        )
        .set_auth_type(oauth2::AuthType::RequestBody);

        Ok(Self { client })
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        Self::new(
            &config.oauth_client_id,
            &config.oauth_client_secret,
            &config.token_url,
        )
    }

    /// Returns the stored access token when still valid; otherwise exchanges
    /// the refresh token and persists the renewed credential. Any failure
    /// here is an authentication error that fails the whole invocation.
    pub async fn resolve_access_token(
        &self,
        db: &Database,
        org_id: &str,
        user_id: &str,
    ) -> AppResult<String> {
        let account = db
            .load_mail_account(org_id, user_id)
            .await
            .map_err(AppError::db)?
            .ok_or_else(|| {
                AppError::Auth(format!("no mail account for user {user_id} in org {org_id}"))
            })?;

        if let (Some(token), Some(expires_at)) =
            (account.access_token.as_deref(), account.token_expires_at)
        {
            if expires_at > now_ts() + TOKEN_SKEW_SECONDS {
                return Ok(token.to_string());
            }
        }

        let refresh = account.refresh_token.as_deref().ok_or_else(|| {
            AppError::Auth(format!(
                "credential for user {user_id} expired and no refresh token is stored"
            ))
        })?;

        info!(org = %org_id, user = %user_id, "Access token expired; refreshing");
        let token_res = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh.to_string()))
            .add_scope(Scope::new(GRAPH_SCOPE.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| {
                warn!(org = %org_id, user = %user_id, error = %e, "Token refresh failed");
                AppError::Auth(format!("token refresh failed: {e}"))
            })?;

        let access_token = token_res.access_token().secret().to_string();
        let new_refresh = token_res.refresh_token().map(|r| r.secret().to_string());
        let expires_at = token_res.expires_in().map(|d| {
            (Utc::now() + Duration::from_std(d).unwrap_or_else(|_| Duration::seconds(0)))
                .timestamp()
        });

        db.update_mail_account_tokens(
            org_id,
            user_id,
            &access_token,
            new_refresh.as_deref(),
            expires_at,
        )
        .await
        .map_err(AppError::db)?;

        Ok(access_token)
    }
}
