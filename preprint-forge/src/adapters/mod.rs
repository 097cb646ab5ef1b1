//! Concrete collaborators behind the stage ports.
//!
//! This module provides:
//! - Local Markdown to LaTeX rendering and `pdflatex` compilation
//! - Announcement fan-out over named channels
//! - With the `http` feature: OpenAI content generation, GitHub repository
//!   and Pages publishing, and webhook channels

mod broadcast;
mod latex;
mod pdflatex;

#[cfg(feature = "http")]
mod github;
#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
mod openai;
#[cfg(feature = "http")]
mod webhook;

pub use broadcast::{AnnouncementChannel, ChannelBroadcaster};
pub use latex::{escape_latex, markdown_to_latex, restructure_latex, strip_code_fences, MarkdownLatexRenderer, LATEX_PREAMBLE};
pub use pdflatex::{PdfLatexCompiler, DEFAULT_PASS_TIMEOUT};

#[cfg(feature = "http")]
pub use github::{
    authenticated_url, ensure_scaffold, parse_owner_repo, redact_credentials, repo_description, GitHubPagesPublisher,
    GitHubPublisher, MAX_DESCRIPTION_LEN,
};
#[cfg(feature = "http")]
pub use openai::{user_prompt, OpenAiContentGenerator, DEFAULT_BASE_URL, DEFAULT_MODEL};
#[cfg(feature = "http")]
pub use webhook::WebhookChannel;
