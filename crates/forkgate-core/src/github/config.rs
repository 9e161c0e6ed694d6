//! GitHub client configuration.

use crate::commit::RepoRef;
use crate::secrets::SecretValue;

use super::error::{GitHubError, GitHubResult};

/// Public GitHub REST endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

/// Variables holding the API token, in lookup order.
pub const TOKEN_ENV_VARS: &[&str] = &["FORKGATE_TOKEN", "GITHUB_TOKEN"];

/// Upper bound for configuration string fields.
const MAX_CONFIG_STRING_LENGTH: usize = 2048;

/// GitHub client configuration.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// API base URL (GitHub Enterprise uses `https://<host>/api/v3`).
    pub api_base_url: String,

    /// Base repository the workflow runs in.
    pub repo: RepoRef,

    /// Token scoped to the base repository.
    pub token: Option<SecretValue>,

    /// `User-Agent` header value.
    pub user_agent: String,
}

impl GitHubConfig {
    /// Create a configuration with required fields.
    pub fn new(api_base_url: impl Into<String>, repo: RepoRef) -> GitHubResult<Self> {
        let api_base_url = api_base_url.into();
        validate_field("api_base_url", &api_base_url)?;
        if !(api_base_url.starts_with("https://") || api_base_url.starts_with("http://")) {
            return Err(GitHubError::InvalidConfig(format!(
                "api_base_url must be an http(s) URL, got '{}'",
                api_base_url
            )));
        }
        validate_field("owner", &repo.owner)?;
        validate_field("repo", &repo.name)?;

        Ok(Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            repo,
            token: None,
            user_agent: format!("forkgate/{}", crate::VERSION),
        })
    }

    /// Set the API token.
    pub fn with_token(mut self, token: impl Into<String>) -> GitHubResult<Self> {
        let token = token.into();
        validate_field("token", &token)?;
        self.token = Some(SecretValue::new(token));
        Ok(self)
    }

    /// Use `explicit` as the token, else the first non-empty variable in
    /// [`TOKEN_ENV_VARS`]. No token at all is allowed.
    pub fn with_token_or_env(self, explicit: Option<String>) -> GitHubResult<Self> {
        self.with_token_from(explicit, |name| std::env::var(name).ok())
    }

    fn with_token_from(
        self,
        explicit: Option<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> GitHubResult<Self> {
        let token = explicit.or_else(|| {
            TOKEN_ENV_VARS
                .iter()
                .find_map(|&name| lookup(name).filter(|v| !v.is_empty()))
        });
        match token {
            Some(token) => self.with_token(token),
            None => Ok(self),
        }
    }
}

fn validate_field(field_name: &str, value: &str) -> GitHubResult<()> {
    if value.is_empty() {
        return Err(GitHubError::InvalidConfig(format!(
            "{field_name} cannot be empty"
        )));
    }
    if value.len() > MAX_CONFIG_STRING_LENGTH {
        return Err(GitHubError::InvalidConfig(format!(
            "{field_name} exceeds maximum length ({} > {MAX_CONFIG_STRING_LENGTH})",
            value.len()
        )));
    }
    Ok(())
}
