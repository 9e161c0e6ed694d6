//! HTTPS client for the GitHub REST API.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::check_run::{CheckRun, CheckRunStatus, Conclusion};
use crate::commit::{CommitId, RepoRef};

use super::config::GitHubConfig;
use super::error::{GitHubError, GitHubResult};
use super::{CheckRunApi, PullRequest, PullRequestApi};

const API_VERSION: &str = "2022-11-28";
const PER_PAGE: usize = 100;
// A commit never carries this many runs of one name; fail rather than loop.
const MAX_PAGES: u32 = 20;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// GitHub REST client.
pub struct GitHubClient {
    config: GitHubConfig,
    http_client: reqwest::Client,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> GitHubResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| GitHubError::InvalidConfig(e.to_string()))?;

        Ok(GitHubClient {
            config,
            http_client,
        })
    }

    fn url(&self, repo: &RepoRef, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.config.api_base_url, repo.owner, repo.name, tail
        )
    }

    fn request(&self, method: Method, url: &str) -> GitHubResult<RequestBuilder> {
        let mut builder = self.http_client.request(method, url);
        if let Some(token) = &self.config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
                .map_err(|_| GitHubError::InvalidConfig("token is not a valid header".into()))?;
            value.set_sensitive(true);
            builder = builder.header(AUTHORIZATION, value);
        }
        Ok(builder)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> GitHubResult<T> {
        let response = builder.send().await?;
        let response = check_response(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| GitHubError::Decode(e.to_string()))
    }
}

/// Map an HTTP response onto the error taxonomy.
async fn check_response(response: Response) -> GitHubResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::UNAUTHORIZED {
        return Err(GitHubError::Unauthorized);
    }

    if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
        let headers = response.headers();
        let retry_after = headers
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        let exhausted = headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "0");
        if status == StatusCode::TOO_MANY_REQUESTS || retry_after.is_some() || exhausted {
            return Err(GitHubError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            });
        }
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.message)
        .unwrap_or_else(|_| {
            if body.is_empty() {
                format!("HTTP {}", status)
            } else {
                body
            }
        });

    Err(GitHubError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl PullRequestApi for GitHubClient {
    async fn get_pull_request(&self, repo: &RepoRef, number: u64) -> GitHubResult<PullRequest> {
        let url = self.url(repo, &format!("pulls/{}", number));
        debug!(url = %url, "fetching pull request");
        let wire: WirePullRequest = self.send(self.request(Method::GET, &url)?).await?;
        Ok(PullRequest {
            number: wire.number,
            head_sha: CommitId::new(wire.head.sha),
            head_repo: wire.head.repo.map(|r| r.full_name),
        })
    }
}

#[async_trait]
impl CheckRunApi for GitHubClient {
    async fn list_check_runs_for_ref(
        &self,
        repo: &RepoRef,
        git_ref: &str,
        check_name: Option<&str>,
    ) -> GitHubResult<Vec<CheckRun>> {
        let url = self.url(repo, &format!("commits/{}/check-runs", git_ref));
        let mut runs = Vec::new();

        // No `filter`: GitHub's default (`latest`) keeps only the newest run
        // per name, so a re-run workflow does not leave duplicates behind.
        for page in 1..=MAX_PAGES {
            let mut query = vec![
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            if let Some(name) = check_name {
                query.push(("check_name", name.to_string()));
            }

            debug!(url = %url, page = page, "listing check runs");
            let list: WireCheckRunList = self
                .send(self.request(Method::GET, &url)?.query(&query))
                .await?;
            let received = list.check_runs.len();
            runs.extend(list.check_runs.into_iter().map(CheckRun::from));

            if received < PER_PAGE || runs.len() as u64 >= list.total_count {
                return Ok(runs);
            }
        }

        // A partial list could hide a duplicate name.
        Err(GitHubError::Decode(format!(
            "check runs for {} exceed {} pages",
            git_ref, MAX_PAGES
        )))
    }

    async fn update_check_run(
        &self,
        repo: &RepoRef,
        check_run_id: u64,
        status: CheckRunStatus,
        conclusion: Option<Conclusion>,
    ) -> GitHubResult<CheckRun> {
        let url = self.url(repo, &format!("check-runs/{}", check_run_id));
        let mut body = json!({ "status": status.as_str() });
        if let Some(conclusion) = conclusion {
            body["conclusion"] = json!(conclusion.as_str());
            body["completed_at"] = json!(Utc::now().to_rfc3339());
        }

        debug!(url = %url, status = status.as_str(), "updating check run");
        let wire: WireCheckRun = self
            .send(self.request(Method::PATCH, &url)?.json(&body))
            .await?;
        Ok(wire.into())
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct WirePullRequest {
    number: u64,
    head: WireHead,
}

#[derive(Deserialize)]
struct WireHead {
    sha: String,
    repo: Option<WireRepo>,
}

#[derive(Deserialize)]
struct WireRepo {
    full_name: String,
}

#[derive(Deserialize)]
struct WireCheckRunList {
    total_count: u64,
    check_runs: Vec<WireCheckRun>,
}

#[derive(Deserialize)]
struct WireCheckRun {
    id: u64,
    name: String,
    head_sha: String,
    status: CheckRunStatus,
    // GitHub has conclusions this crate never writes (skipped, stale)
    conclusion: Option<String>,
}

impl From<WireCheckRun> for CheckRun {
    fn from(wire: WireCheckRun) -> Self {
        let conclusion = wire
            .conclusion
            .and_then(|c| serde_json::from_value(serde_json::Value::String(c)).ok());
        CheckRun {
            id: wire.id,
            name: wire.name,
            head_sha: CommitId::new(wire.head_sha),
            status: wire.status,
            conclusion,
        }
    }
}
