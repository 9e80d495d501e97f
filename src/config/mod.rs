use std::env;

use crate::errors::{AppError, AppResult};

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_TOKEN_URL: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const DEFAULT_PAGE_SIZE: usize = 50;

/// Service configuration, env-var driven. There is no CLI surface: the
/// pipeline is only ever invoked over HTTP.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub graph_base_url: String,
    pub token_url: String,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub page_size: usize,
}

impl AppConfig {
    pub fn load() -> AppResult<Self> {
        let bind_addr =
            env::var("ASEMAIL_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let graph_base_url = env::var("ASEMAIL_GRAPH_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_GRAPH_BASE_URL.to_string());
        let token_url =
            env::var("ASEMAIL_TOKEN_URL").unwrap_or_else(|_| DEFAULT_TOKEN_URL.to_string());
        let oauth_client_id = env::var("MS_CLIENT_ID")
            .map_err(|_| AppError::Config("MS_CLIENT_ID missing".into()))?;
        let oauth_client_secret = env::var("MS_CLIENT_SECRET")
            .map_err(|_| AppError::Config("MS_CLIENT_SECRET missing".into()))?;
        let page_size = env::var("ASEMAIL_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_PAGE_SIZE);

        Ok(Self {
            bind_addr,
            graph_base_url,
            token_url,
            oauth_client_id,
            oauth_client_secret,
            page_size,
        })
    }
}
