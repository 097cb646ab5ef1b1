//! Runtime configuration.
//!
//! Configuration comes from an optional JSON file, then environment
//! variables, then validation. Every field has a default so an empty file
//! (or no file) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::adapters::{MarkdownLatexRenderer, PdfLatexCompiler};
use crate::core::{ContentConstraints, FeatureFlags};
use crate::errors::{ForgeError, ForgeResult};
use crate::identity::{FileNameLedger, IdentityRegistry};
use crate::observability::LogFormat;
use crate::pipeline::{Orchestrator, StagePolicies};
use crate::stages::StageAdapters;
use crate::store::FileRunStateStore;

/// Environment variable overriding [`ForgeConfig::data_dir`].
pub const ENV_DATA_DIR: &str = "FORGE_DATA_DIR";
/// Environment variable overriding [`ForgeConfig::log_format`].
pub const ENV_LOG_FORMAT: &str = "FORGE_LOG_FORMAT";
/// Environment variable holding the OpenAI key.
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
/// Environment variable overriding the OpenAI model.
pub const ENV_OPENAI_MODEL: &str = "OPENAI_MODEL";
/// Environment variable holding the GitHub token.
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
/// Environment variable holding the GitHub owner.
pub const ENV_GITHUB_USERNAME: &str = "GITHUB_USERNAME";
/// Environment variable toggling public repositories.
pub const ENV_REPO_PUBLIC: &str = "FORGE_REPO_PUBLIC";

/// Content generator settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    /// API key; usually supplied through `OPENAI_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model name.
    pub model: String,
    /// API root.
    pub base_url: String,
    /// Completion token limit.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_tokens: 4000,
            temperature: 0.7,
            timeout_secs: 180,
        }
    }
}

impl std::fmt::Debug for OpenAiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Repository and site hosting settings.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubSettings {
    /// Access token; usually supplied through `GITHUB_TOKEN`.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Account that owns the repositories.
    pub owner: Option<String>,
    /// Create public repositories.
    pub public: bool,
    /// API root.
    pub api_url: Option<String>,
}

impl std::fmt::Debug for GitHubSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubSettings")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("owner", &self.owner)
            .field("public", &self.public)
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// `pdflatex` settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatexSettings {
    /// Executable.
    pub program: String,
    /// Number of passes.
    pub passes: u32,
    /// Per-pass timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LatexSettings {
    fn default() -> Self {
        Self {
            program: "pdflatex".to_string(),
            passes: 2,
            timeout_secs: 120,
        }
    }
}

/// One announcement channel.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Name used in reports and for idempotency.
    pub name: String,
    /// Incoming webhook URL.
    pub webhook_url: String,
}

impl std::fmt::Debug for ChannelSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSettings").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Announcement settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnounceSettings {
    /// Channels, posted in order.
    pub channels: Vec<ChannelSettings>,
    /// Pause between two posts, in seconds.
    pub delay_secs: u64,
}

impl Default for AnnounceSettings {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            delay_secs: 300,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// Root of `names/`, `projects/` and `workspace/`.
    pub data_dir: PathBuf,
    /// Log output format.
    pub log_format: LogFormat,
    /// Stages enabled for new projects.
    pub flags: FeatureFlags,
    /// Retry policies.
    pub retry: StagePolicies,
    /// Paper metadata for new projects.
    pub paper: ContentConstraints,
    /// Content generator.
    pub openai: OpenAiSettings,
    /// Repository and site hosting.
    pub github: GitHubSettings,
    /// PDF compilation.
    pub latex: LatexSettings,
    /// Announcements.
    pub announce: AnnounceSettings,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("forge-data"),
            log_format: LogFormat::default(),
            flags: FeatureFlags::default(),
            retry: StagePolicies::default(),
            paper: ContentConstraints::default(),
            openai: OpenAiSettings::default(),
            github: GitHubSettings::default(),
            latex: LatexSettings::default(),
            announce: AnnounceSettings::default(),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> ForgeResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ForgeError::Config(format!("{key} must be a boolean, got '{other}'"))),
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl ForgeConfig {
    /// Parses a JSON document.
    pub fn from_json_str(json: &str) -> ForgeResult<Self> {
        serde_json::from_str(json).map_err(|e| ForgeError::Config(format!("invalid configuration: {e}")))
    }

    /// Reads a JSON file.
    pub fn from_file(path: &Path) -> ForgeResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ForgeError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// File (when given), then process environment, then validation.
    pub fn load(path: Option<&Path>) -> ForgeResult<Self> {
        let mut config = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration");
                Self::from_file(path)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> ForgeResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DATA_DIR).and_then(non_empty) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT).and_then(non_empty) {
            self.log_format = format.parse()?;
        }
        if let Some(key) = lookup(ENV_OPENAI_API_KEY).and_then(non_empty) {
            self.openai.api_key = Some(key);
        }
        if let Some(model) = lookup(ENV_OPENAI_MODEL).and_then(non_empty) {
            self.openai.model = model;
        }
        if let Some(token) = lookup(ENV_GITHUB_TOKEN).and_then(non_empty) {
            self.github.token = Some(token);
        }
        if let Some(owner) = lookup(ENV_GITHUB_USERNAME).and_then(non_empty) {
            self.github.owner = Some(owner);
        }
        if let Some(public) = lookup(ENV_REPO_PUBLIC) {
            self.github.public = parse_bool(ENV_REPO_PUBLIC, &public)?;
        }
        Ok(())
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> ForgeResult<()> {
        self.retry.validate()?;
        if self.paper.min_words > self.paper.max_words {
            return Err(ForgeError::Config(format!(
                "paper.min_words ({}) exceeds paper.max_words ({})",
                self.paper.min_words, self.paper.max_words
            )));
        }
        if self.latex.passes == 0 {
            return Err(ForgeError::Config("latex.passes must be at least 1".to_string()));
        }
        let mut names = BTreeSet::new();
        for channel in &self.announce.channels {
            if channel.name.trim().is_empty() || channel.webhook_url.trim().is_empty() {
                return Err(ForgeError::Config("announce channels need a name and a webhook_url".to_string()));
            }
            if !names.insert(channel.name.as_str()) {
                return Err(ForgeError::Config(format!("duplicate announce channel '{}'", channel.name)));
            }
        }
        Ok(())
    }

    /// Directory of the name ledger.
    pub fn names_dir(&self) -> PathBuf {
        self.data_dir.join("names")
    }

    /// Directory of the run state store.
    pub fn projects_dir(&self) -> PathBuf {
        self.data_dir.join("projects")
    }

    /// Root of the per-project working directories.
    pub fn workspace_dir(&self) -> PathBuf {
        self.data_dir.join("workspace")
    }

    /// The adapters this configuration can supply.
    ///
    /// Rendering and compilation are always local. Network collaborators are
    /// only registered when the `http` feature is on and their credentials
    /// are present; a stage without an adapter fails with `not_found`.
    pub fn adapters(&self) -> StageAdapters {
        let compiler = PdfLatexCompiler::new()
            .with_program(self.latex.program.clone())
            .with_passes(self.latex.passes)
            .with_pass_timeout(Duration::from_secs(self.latex.timeout_secs));
        let adapters = StageAdapters::new()
            .with_document_renderer(Arc::new(MarkdownLatexRenderer::new()))
            .with_binary_compiler(Arc::new(compiler));

        #[cfg(feature = "http")]
        let adapters = self.network_adapters(adapters);

        debug!(stages = ?adapters.registered(), "Adapters configured");
        adapters
    }

    #[cfg(feature = "http")]
    fn network_adapters(&self, mut adapters: StageAdapters) -> StageAdapters {
        use crate::adapters::{
            ChannelBroadcaster, GitHubPagesPublisher, GitHubPublisher, OpenAiContentGenerator, WebhookChannel,
        };

        if let Some(key) = &self.openai.api_key {
            let generator = OpenAiContentGenerator::new(key.clone())
                .with_model(self.openai.model.clone())
                .with_base_url(self.openai.base_url.clone())
                .with_max_tokens(self.openai.max_tokens)
                .with_temperature(self.openai.temperature)
                .with_timeout(Duration::from_secs(self.openai.timeout_secs));
            adapters = adapters.with_content_generator(Arc::new(generator));
        }

        if let Some(token) = &self.github.token {
            if let Some(owner) = &self.github.owner {
                let mut publisher = GitHubPublisher::new(token.clone(), owner.clone()).with_public(self.github.public);
                if let Some(api) = &self.github.api_url {
                    publisher = publisher.with_api_url(api.clone());
                }
                adapters = adapters.with_repository_publisher(Arc::new(publisher));
            }
            let mut pages = GitHubPagesPublisher::new(token.clone());
            if let Some(api) = &self.github.api_url {
                pages = pages.with_api_url(api.clone());
            }
            adapters = adapters.with_site_publisher(Arc::new(pages));
        }

        if !self.announce.channels.is_empty() {
            let broadcaster = self.announce.channels.iter().fold(
                ChannelBroadcaster::new().with_delay(Duration::from_secs(self.announce.delay_secs)),
                |b, c| b.with_channel(Arc::new(WebhookChannel::new(c.name.clone(), c.webhook_url.clone()))),
            );
            adapters = adapters.with_channel_announcer(Arc::new(broadcaster));
        }
        adapters
    }

    /// Opens the file-backed stores under [`ForgeConfig::data_dir`] and wires an orchestrator.
    pub async fn build_orchestrator(&self) -> ForgeResult<Orchestrator> {
        let ledger = FileNameLedger::open(self.names_dir())?;
        let store = FileRunStateStore::open(self.projects_dir()).await?;
        info!(data_dir = %self.data_dir.display(), "Stores opened");

        Ok(Orchestrator::new(
            Arc::new(IdentityRegistry::new(Arc::new(ledger))),
            Arc::new(store),
            self.adapters(),
        )
        .with_policies(self.retry.clone())
        .with_workspace_root(self.workspace_dir())
        .with_default_flags(self.flags)
        .with_default_constraints(self.paper.clone()))
    }
}
