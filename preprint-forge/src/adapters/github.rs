//! GitHub repository and Pages publishing.
//!
//! Repositories are created through the REST API and filled with the `git`
//! CLI. Publishing a slug that already has a repository pushes an update
//! commit instead of creating anything.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use super::http::{check, transport_error, USER_AGENT};
use crate::errors::AdapterError;
use crate::stages::ports::{PublishBundle, RepositoryPublisher, RepositoryUrl, SitePublisher, SiteUrl};

/// Default REST API root.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Longest repository description GitHub accepts without complaint.
pub const MAX_DESCRIPTION_LEN: usize = 100;

const GITIGNORE: &str = "# LaTeX
*.aux
*.log
*.out
*.toc
*.fls
*.fdb_latexmk
*.synctex.gz
*.bbl
*.blg

# Keep these files
!*.tex
!*.md
!*.pdf
!README.md
";

#[derive(Debug, Deserialize)]
struct Repo {
    html_url: String,
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct Pages {
    html_url: Option<String>,
}

/// Repository description for a topic, capped at [`MAX_DESCRIPTION_LEN`].
#[must_use]
pub fn repo_description(topic: &str) -> String {
    let description = format!("Research paper: {}", topic.split_whitespace().collect::<Vec<_>>().join(" "));
    if description.chars().count() <= MAX_DESCRIPTION_LEN {
        return description;
    }
    let mut cut: String = description.chars().take(MAX_DESCRIPTION_LEN - 3).collect();
    cut.push_str("...");
    cut
}

/// Parses `owner/repo` out of a GitHub URL.
///
/// Accepts `https://github.com/owner/repo`, a trailing `.git`, and
/// `x-access-token:` credentials in the authority.
#[must_use]
pub fn parse_owner_repo(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("https://")?;
    let rest = rest.rsplit_once('@').map_or(rest, |(_, host)| host);
    let path = rest.strip_prefix("github.com/")?;
    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let (owner, repo) = path.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

/// A clone URL with the token embedded, for a single push.
#[must_use]
pub fn authenticated_url(clone_url: &str, token: &str) -> String {
    clone_url.strip_prefix("https://").map_or_else(
        || clone_url.to_string(),
        |rest| format!("https://x-access-token:{token}@{rest}"),
    )
}

/// Writes `.gitignore` and `README.md` unless they already exist.
pub async fn ensure_scaffold(workspace: &Path, topic: &str) -> Result<(), AdapterError> {
    tokio::fs::create_dir_all(workspace).await?;
    let gitignore = workspace.join(".gitignore");
    if !tokio::fs::try_exists(&gitignore).await? {
        tokio::fs::write(&gitignore, GITIGNORE).await?;
    }
    let readme = workspace.join("README.md");
    if !tokio::fs::try_exists(&readme).await? {
        let body = format!(
            "# {topic}\n\n\
             ## Overview\n\nThis repository holds a research paper on {topic}.\n\n\
             ## Contents\n\n- Markdown source\n- LaTeX source\n- Compiled PDF\n\n\
             ## How to Cite\n\nPlease cite the PDF in this repository.\n"
        );
        tokio::fs::write(&readme, body).await?;
    }
    Ok(())
}

/// Replaces embedded `x-access-token:<token>@` credentials with `***`.
#[must_use]
pub fn redact_credentials(text: &str) -> String {
    const MARKER: &str = "x-access-token:";
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(MARKER) {
        let after = &rest[start + MARKER.len()..];
        let Some(end) = after.find('@') else {
            break;
        };
        out.push_str(&rest[..start + MARKER.len()]);
        out.push_str("***");
        rest = &after[end..];
    }
    out.push_str(rest);
    out
}

/// Runs git with a committer identity that does not depend on global config.
async fn git(workspace: &Path, args: &[&str], identity: &(String, String)) -> Result<String, AdapterError> {
    let output = Command::new("git")
        .arg("-c")
        .arg(format!("user.name={}", identity.0))
        .arg("-c")
        .arg(format!("user.email={}", identity.1))
        .args(args)
        .current_dir(workspace)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AdapterError::not_found("git is not installed")
            } else {
                e.into()
            }
        })?;

    if !output.status.success() {
        // Never echo the authenticated remote back into logs or reports.
        let stderr = redact_credentials(&String::from_utf8_lossy(&output.stderr));
        let command = args.first().copied().unwrap_or("git");
        let message = format!("git {command} failed: {}", stderr.trim());
        return Err(if command == "push" {
            AdapterError::network(message)
        } else {
            AdapterError::other(message)
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// [`RepositoryPublisher`] for GitHub.
#[derive(Clone)]
pub struct GitHubPublisher {
    client: reqwest::Client,
    token: String,
    owner: String,
    public: bool,
    api_url: String,
    committer: (String, String),
}

impl std::fmt::Debug for GitHubPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubPublisher")
            .field("owner", &self.owner)
            .field("public", &self.public)
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl GitHubPublisher {
    /// Publishes as `owner` using `token`; repositories are private unless
    /// [`GitHubPublisher::with_public`] says otherwise.
    pub fn new(token: impl Into<String>, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            committer: (owner.clone(), format!("{owner}@users.noreply.github.com")),
            owner,
            public: false,
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    /// Sets repository visibility.
    #[must_use]
    pub fn with_public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    /// Points at a different API root.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the commit author.
    #[must_use]
    pub fn with_committer(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.committer = (name.into(), email.into());
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.api_url))
            .bearer_auth(&self.token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
    }

    async fn find_repo(&self, slug: &str) -> Result<Option<Repo>, AdapterError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/repos/{}/{slug}", self.owner))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let repo = check(response, "repository lookup")
            .await?
            .json()
            .await
            .map_err(|e| transport_error(&e))?;
        Ok(Some(repo))
    }

    async fn create_repo(&self, slug: &str, topic: &str) -> Result<Repo, AdapterError> {
        let response = self
            .request(reqwest::Method::POST, "/user/repos")
            .json(&json!({
                "name": slug,
                "private": !self.public,
                "description": repo_description(topic),
                "auto_init": false,
            }))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        // 422: created concurrently by an earlier attempt whose response was lost.
        if response.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            if let Some(repo) = self.find_repo(slug).await? {
                return Ok(repo);
            }
        }
        check(response, "repository creation")
            .await?
            .json()
            .await
            .map_err(|e| transport_error(&e))
    }

    async fn push(&self, workspace: &Path, clone_url: &str, created: bool) -> Result<(), AdapterError> {
        let id = &self.committer;
        if !tokio::fs::try_exists(workspace.join(".git")).await? {
            git(workspace, &["init"], id).await?;
            git(workspace, &["checkout", "-b", "main"], id).await?;
            git(workspace, &["remote", "add", "origin", clone_url], id).await?;
        } else {
            git(workspace, &["remote", "set-url", "origin", clone_url], id).await?;
        }

        git(workspace, &["add", "-A"], id).await?;
        let status = git(workspace, &["status", "--porcelain"], id).await?;
        if status.trim().is_empty() {
            debug!(workspace = %workspace.display(), "Nothing new to commit");
        } else {
            let message = if created { "Initial commit" } else { "Update content" };
            git(workspace, &["commit", "-m", message], id).await?;
        }
        git(workspace, &["branch", "-M", "main"], id).await?;
        let remote = authenticated_url(clone_url, &self.token);
        git(workspace, &["push", remote.as_str(), "main"], id).await?;
        Ok(())
    }
}

#[async_trait]
impl RepositoryPublisher for GitHubPublisher {
    async fn publish(&self, slug: &str, bundle: &PublishBundle) -> Result<RepositoryUrl, AdapterError> {
        if self.token.trim().is_empty() || self.owner.trim().is_empty() {
            return Err(AdapterError::unauthorized("GitHub token and owner must be configured"));
        }
        ensure_scaffold(&bundle.workspace, &bundle.topic).await?;

        let (repo, created) = match self.find_repo(slug).await? {
            Some(repo) => {
                info!(slug, "Updating existing repository");
                (repo, false)
            }
            None => {
                info!(slug, public = self.public, "Creating repository");
                (self.create_repo(slug, &bundle.topic).await?, true)
            }
        };

        self.push(&bundle.workspace, &repo.clone_url, created).await?;
        info!(slug, url = %repo.html_url, "Repository published");
        Ok(RepositoryUrl(repo.html_url))
    }
}

/// [`SitePublisher`] that enables GitHub Pages from `main`.
#[derive(Clone)]
pub struct GitHubPagesPublisher {
    client: reqwest::Client,
    token: String,
    api_url: String,
}

impl std::fmt::Debug for GitHubPagesPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubPagesPublisher")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl GitHubPagesPublisher {
    /// Creates a Pages publisher using `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    /// Points at a different API root.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.api_url))
            .bearer_auth(&self.token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
    }
}

#[async_trait]
impl SitePublisher for GitHubPagesPublisher {
    async fn publish(&self, slug: &str, repository: &RepositoryUrl) -> Result<SiteUrl, AdapterError> {
        let (owner, repo) = parse_owner_repo(&repository.0)
            .ok_or_else(|| AdapterError::invalid_input(format!("not a GitHub repository URL: {}", repository.0)))?;
        let path = format!("/repos/{owner}/{repo}/pages");
        let fallback = format!("https://{}.github.io/{repo}/", owner.to_lowercase());

        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&json!({ "source": { "branch": "main", "path": "/" } }))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let pages: Pages = if response.status() == reqwest::StatusCode::CONFLICT {
            debug!(slug, "Pages already enabled");
            let existing = self
                .request(reqwest::Method::GET, &path)
                .send()
                .await
                .map_err(|e| transport_error(&e))?;
            check(existing, "pages lookup")
                .await?
                .json()
                .await
                .map_err(|e| transport_error(&e))?
        } else {
            check(response, "pages creation")
                .await?
                .json()
                .await
                .map_err(|e| transport_error(&e))?
        };

        let url = pages.html_url.unwrap_or(fallback);
        info!(slug, url = %url, "Site published");
        Ok(SiteUrl(url))
    }
}
