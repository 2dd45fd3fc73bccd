//! Ticket backend: the issue-tracker collaborator interface and its GitHub
//! REST implementation.
//!
//! The core depends only on the narrow [`TicketBackend`] trait; tests
//! substitute in-memory doubles. `GithubBackend` is the production
//! implementation over the GitHub v3 API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

const DEFAULT_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "foreman";

/// One comment on a ticket, as seen by the signal poller.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueComment {
    pub id: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub body: String,
}

/// Issue-tracker operations the orchestrator depends on.
#[async_trait]
pub trait TicketBackend: Send + Sync {
    /// Create an issue, returning its number.
    async fn create_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<u64>;

    /// Post a comment, returning the comment id.
    async fn post_comment(&self, ticket_id: u64, body: &str) -> Result<String>;

    async fn add_label(&self, ticket_id: u64, label: &str) -> Result<()>;

    async fn remove_label(&self, ticket_id: u64, label: &str) -> Result<()>;

    /// Current labels on the ticket.
    async fn get_labels(&self, ticket_id: u64) -> Result<Vec<String>>;

    /// Ensure a label exists in the repository with the given color.
    async fn create_label(&self, name: &str, color: &str) -> Result<()>;

    /// Comments on the ticket in chronological order. `since`, when given,
    /// is a server-side hint; callers still filter by timestamp themselves.
    async fn get_comments(
        &self,
        ticket_id: u64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<IssueComment>>;

    /// Create a branch at the head of the default branch.
    async fn create_branch(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    id: u64,
    user: UserResponse,
    created_at: DateTime<Utc>,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct LabelResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

impl From<CommentResponse> for IssueComment {
    fn from(c: CommentResponse) -> Self {
        IssueComment {
            id: c.id.to_string(),
            author: c.user.login,
            created_at: c.created_at,
            body: c.body.unwrap_or_default(),
        }
    }
}

/// GitHub REST implementation of [`TicketBackend`].
pub struct GithubBackend {
    client: reqwest::Client,
    api_base: String,
    repo: String,
    token: String,
}

impl GithubBackend {
    /// Create a backend for `owner/repo` authenticated with `token`.
    pub fn new(repo: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            repo: repo.to_string(),
            token: token.to_string(),
        }
    }

    /// Point the backend at a different API base (test servers).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}{}", self.api_base, self.repo, path)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
    }
}

#[async_trait]
impl TicketBackend for GithubBackend {
    async fn create_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<u64> {
        let resp: IssueResponse = self
            .request(reqwest::Method::POST, &self.url("/issues"))
            .json(&serde_json::json!({
                "title": title,
                "body": body,
                "labels": labels,
            }))
            .send()
            .await
            .context("Failed to send issue creation request")?
            .error_for_status()
            .context("GitHub issue creation returned error status")?
            .json()
            .await
            .context("Failed to parse issue creation response")?;
        Ok(resp.number)
    }

    async fn post_comment(&self, ticket_id: u64, body: &str) -> Result<String> {
        let resp: CommentResponse = self
            .request(
                reqwest::Method::POST,
                &self.url(&format!("/issues/{ticket_id}/comments")),
            )
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .context("Failed to send comment request")?
            .error_for_status()
            .context("GitHub comment creation returned error status")?
            .json()
            .await
            .context("Failed to parse comment response")?;
        Ok(resp.id.to_string())
    }

    async fn add_label(&self, ticket_id: u64, label: &str) -> Result<()> {
        self.request(
            reqwest::Method::POST,
            &self.url(&format!("/issues/{ticket_id}/labels")),
        )
        .json(&serde_json::json!({ "labels": [label] }))
        .send()
        .await
        .context("Failed to send add-label request")?
        .error_for_status()
        .context("GitHub add-label returned error status")?;
        Ok(())
    }

    async fn remove_label(&self, ticket_id: u64, label: &str) -> Result<()> {
        self.request(
            reqwest::Method::DELETE,
            &self.url(&format!("/issues/{ticket_id}/labels/{label}")),
        )
        .send()
        .await
        .context("Failed to send remove-label request")?
        .error_for_status()
        .context("GitHub remove-label returned error status")?;
        Ok(())
    }

    async fn get_labels(&self, ticket_id: u64) -> Result<Vec<String>> {
        let resp: Vec<LabelResponse> = self
            .request(
                reqwest::Method::GET,
                &self.url(&format!("/issues/{ticket_id}/labels")),
            )
            .send()
            .await
            .context("Failed to send labels request")?
            .error_for_status()
            .context("GitHub labels API returned error status")?
            .json()
            .await
            .context("Failed to parse labels response")?;
        Ok(resp.into_iter().map(|l| l.name).collect())
    }

    async fn create_label(&self, name: &str, color: &str) -> Result<()> {
        let resp = self
            .request(reqwest::Method::POST, &self.url("/labels"))
            .json(&serde_json::json!({ "name": name, "color": color }))
            .send()
            .await
            .context("Failed to send create-label request")?;

        // 422 means the label already exists; treat as success.
        if resp.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            return Ok(());
        }
        resp.error_for_status()
            .context("GitHub create-label returned error status")?;
        Ok(())
    }

    async fn get_comments(
        &self,
        ticket_id: u64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<IssueComment>> {
        let url = self.url(&format!("/issues/{ticket_id}/comments"));
        let mut comments = Vec::new();
        let mut page = 1u32;

        loop {
            let mut req = self.request(reqwest::Method::GET, &url).query(&[
                ("per_page", "100".to_string()),
                ("page", page.to_string()),
            ]);
            if let Some(since) = since {
                req = req.query(&[("since", since.to_rfc3339())]);
            }

            let resp: Vec<CommentResponse> = req
                .send()
                .await
                .context("Failed to send comments request")?
                .error_for_status()
                .context("GitHub comments API returned error status")?
                .json()
                .await
                .context("Failed to parse comments response")?;

            let count = resp.len();
            comments.extend(resp.into_iter().map(IssueComment::from));
            if count < 100 {
                break;
            }
            page += 1;
        }

        Ok(comments)
    }

    async fn create_branch(&self, name: &str) -> Result<()> {
        // Resolve the default branch head, then create the ref from it.
        let repo: RepoResponse = self
            .request(
                reqwest::Method::GET,
                &format!("{}/repos/{}", self.api_base, self.repo),
            )
            .send()
            .await
            .context("Failed to send repo request")?
            .error_for_status()
            .context("GitHub repo API returned error status")?
            .json()
            .await
            .context("Failed to parse repo response")?;

        let head: RefResponse = self
            .request(
                reqwest::Method::GET,
                &self.url(&format!("/git/ref/heads/{}", repo.default_branch)),
            )
            .send()
            .await
            .context("Failed to send ref request")?
            .error_for_status()
            .context("GitHub ref API returned error status")?
            .json()
            .await
            .context("Failed to parse ref response")?;

        self.request(reqwest::Method::POST, &self.url("/git/refs"))
            .json(&serde_json::json!({
                "ref": format!("refs/heads/{name}"),
                "sha": head.object.sha,
            }))
            .send()
            .await
            .context("Failed to send branch creation request")?
            .error_for_status()
            .context("GitHub branch creation returned error status")?;
        Ok(())
    }
}
