//! Argument parsing and command dispatch.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use preprint_forge::cancellation::CancellationToken;
use preprint_forge::config::ForgeConfig;
use preprint_forge::core::{ContentConstraints, FeatureFlags, RunOutcome, RunReport, StageName};
use preprint_forge::events::{EventSink, LoggingEventSink};
use preprint_forge::observability::{init_tracing, LogFormat};
use preprint_forge::pipeline::{Orchestrator, RunRequest};
use preprint_forge::store::{ProjectFilter, ProjectStatus};

/// Exit code for a fully successful run.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for a failed or aborted run.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for a partially successful run.
pub const EXIT_PARTIAL: i32 = 2;

/// Turn a topic into a published paper, resumably.
#[derive(Debug, Parser)]
#[command(name = "preprint-forge", version, about)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, env = "FORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a new project for a topic
    Generate(GenerateArgs),
    /// Continue an existing project
    Resume(ResumeArgs),
    /// List projects
    List {
        /// Only projects with this status (succeeded, partial, failed, incomplete)
        #[arg(long, value_parser = parse_status)]
        status: Option<ProjectStatus>,
    },
    /// Print the report of a project
    Show {
        /// Project slug
        slug: String,
    },
    /// Delete a project's state and release its name
    Delete {
        /// Project slug
        slug: String,
    },
}

/// Arguments of `generate`.
#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Topic to write about
    pub topic: String,

    /// Use this slug instead of deriving one
    #[arg(long)]
    pub slug: Option<String>,

    /// Continue the newest project already started for this topic, if any
    #[arg(long, conflicts_with = "slug")]
    pub reuse: bool,

    /// Skip content generation
    #[arg(long)]
    pub no_content: bool,
    /// Skip LaTeX rendering
    #[arg(long)]
    pub no_render: bool,
    /// Skip PDF compilation
    #[arg(long)]
    pub no_compile: bool,
    /// Skip repository publishing
    #[arg(long)]
    pub no_publish: bool,
    /// Enable the companion site
    #[arg(long)]
    pub pages: bool,
    /// Announce on the configured channels
    #[arg(long)]
    pub announce: bool,

    /// Author name
    #[arg(long)]
    pub author: Option<String>,
    /// Author institution
    #[arg(long)]
    pub institution: Option<String>,
    /// Author department
    #[arg(long)]
    pub department: Option<String>,
    /// Contact email
    #[arg(long)]
    pub email: Option<String>,
    /// Date printed on the paper
    #[arg(long)]
    pub date: Option<String>,
}

impl GenerateArgs {
    /// Applies the switches to the configured defaults.
    pub fn flags(&self, defaults: FeatureFlags) -> FeatureFlags {
        let mut flags = defaults;
        flags.content_generation &= !self.no_content;
        flags.document_rendering &= !self.no_render;
        flags.binary_compilation &= !self.no_compile;
        flags.repository_publish &= !self.no_publish;
        flags.site_publish |= self.pages;
        flags.channel_announce |= self.announce;
        flags
    }

    /// Applies the metadata options to the configured defaults.
    pub fn constraints(&self, defaults: &ContentConstraints) -> ContentConstraints {
        let mut constraints = defaults.clone();
        let pairs = [
            (&self.author, &mut constraints.author),
            (&self.institution, &mut constraints.institution),
            (&self.department, &mut constraints.department),
            (&self.email, &mut constraints.email),
            (&self.date, &mut constraints.date),
        ];
        for (value, field) in pairs {
            if let Some(value) = value {
                field.clone_from(value);
            }
        }
        constraints
    }
}

/// Arguments of `resume`.
#[derive(Debug, Args)]
pub struct ResumeArgs {
    /// Project slug
    pub slug: String,

    /// Re-run a stage and everything downstream of it, even if it succeeded
    #[arg(long = "force", value_parser = parse_stage)]
    pub force: Vec<StageName>,

    /// Enable the companion site
    #[arg(long)]
    pub pages: bool,
    /// Announce on the configured channels
    #[arg(long)]
    pub announce: bool,
}

/// Builds the `generate` request, continuing `existing` when one was found.
pub fn generate_request(args: &GenerateArgs, config: &ForgeConfig, existing: Option<&str>) -> RunRequest {
    let flags = args.flags(config.flags);
    let constraints = args.constraints(&config.paper);
    let request = match (existing, &args.slug) {
        (Some(slug), _) => RunRequest::resume(slug),
        (None, Some(slug)) => RunRequest::new(args.topic.clone()).with_slug(slug.clone()),
        (None, None) => RunRequest::new(args.topic.clone()),
    };
    request.with_flags(flags).with_constraints(constraints)
}

/// Lifecycle events are logged at debug verbosity and above.
pub fn event_sink(verbose: u8) -> Option<Arc<dyn EventSink>> {
    (verbose > 0).then(|| Arc::new(LoggingEventSink::debug()) as Arc<dyn EventSink>)
}

fn parse_stage(s: &str) -> Result<StageName, String> {
    s.parse()
}

fn parse_status(s: &str) -> Result<ProjectStatus, String> {
    s.parse().map_err(|e: preprint_forge::errors::ForgeError| e.to_string())
}

/// Exit code for a finished run.
pub fn exit_code(outcome: RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Succeeded => EXIT_SUCCESS,
        RunOutcome::PartialSuccess => EXIT_PARTIAL,
        RunOutcome::Failed => EXIT_FAILURE,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_to_report(orchestrator: Orchestrator, request: RunRequest) -> Result<RunReport> {
    let cancel = Arc::new(CancellationToken::new());
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                cancel.cancel("interrupted by user");
            }
        })
    };

    let result = orchestrator.run_with_cancel(request, &cancel).await;
    watcher.abort();
    Ok(result?)
}

/// Runs a parsed command line and returns the process exit code.
pub async fn run(cli: Cli) -> Result<i32> {
    let mut config = ForgeConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if cli.json_logs {
        config.log_format = LogFormat::Json;
    }
    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    init_tracing(config.log_format, filter);
    info!(data_dir = %config.data_dir.display(), "Configuration loaded");

    let mut orchestrator = config.build_orchestrator().await.context("opening data directory")?;
    if let Some(sink) = event_sink(cli.verbose) {
        orchestrator = orchestrator.with_event_sink(sink);
    }

    match cli.command {
        Command::Generate(args) => {
            let existing = if args.reuse {
                orchestrator.lookup(&args.topic).await?.map(|record| record.slug)
            } else {
                None
            };
            if let Some(slug) = &existing {
                info!(slug = %slug, "Continuing existing project for topic");
            }
            let request = generate_request(&args, &config, existing.as_deref());
            let report = run_to_report(orchestrator, request).await?;
            print_json(&report)?;
            Ok(exit_code(report.outcome))
        }
        Command::Resume(args) => {
            let mut request = RunRequest::resume(args.slug.clone()).with_forced(args.force.iter().copied());
            if args.pages || args.announce {
                let project = orchestrator.project(&args.slug).await?;
                let mut flags = project.flags;
                flags.site_publish |= args.pages;
                flags.channel_announce |= args.announce;
                request = request.with_flags(flags);
            }
            let report = run_to_report(orchestrator, request).await?;
            print_json(&report)?;
            Ok(exit_code(report.outcome))
        }
        Command::List { status } => {
            let filter = status.map_or_else(ProjectFilter::all, ProjectFilter::with_status);
            print_json(&orchestrator.list(&filter).await?)?;
            Ok(EXIT_SUCCESS)
        }
        Command::Show { slug } => {
            print_json(&orchestrator.report(&slug).await?)?;
            Ok(EXIT_SUCCESS)
        }
        Command::Delete { slug } => {
            orchestrator.delete(&slug).await?;
            info!(slug = %slug, "Project deleted");
            Ok(EXIT_SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use preprint_forge::pipeline::RunTarget;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("preprint-forge").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_generate_flags() {
        let cli = parse(&["generate", "quantum noise", "--no-compile", "--pages", "--author", "Ada"]);
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };

        let flags = args.flags(FeatureFlags::default());
        assert!(!flags.binary_compilation);
        assert!(flags.site_publish);
        assert!(!flags.channel_announce);
        assert!(flags.document_rendering);

        let constraints = args.constraints(&ContentConstraints::default());
        assert_eq!(constraints.author, "Ada");
        assert_eq!(constraints.min_words, ContentConstraints::default().min_words);
    }

    #[test]
    fn test_resume_force_accepts_both_spellings() {
        let cli = parse(&["resume", "qn", "--force", "binary-compilation", "--force", "site_publish"]);
        let Command::Resume(args) = cli.command else {
            panic!("expected resume");
        };
        assert_eq!(args.force, vec![StageName::BinaryCompilation, StageName::SitePublish]);
    }

    #[test]
    fn test_unknown_stage_is_rejected() {
        assert!(Cli::try_parse_from(["preprint-forge", "resume", "qn", "--force", "typeset"]).is_err());
    }

    #[test]
    fn test_list_status() {
        let cli = parse(&["list", "--status", "partial", "-vv", "--json-logs"]);
        assert_eq!(cli.verbose, 2);
        assert!(cli.json_logs);
        assert!(matches!(
            cli.command,
            Command::List {
                status: Some(ProjectStatus::PartialSuccess)
            }
        ));
    }

    #[test]
    fn test_reuse_continues_existing_project() {
        let cli = parse(&["generate", "quantum noise", "--reuse", "--no-compile"]);
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert!(args.reuse);
        let config = ForgeConfig::default();

        let request = generate_request(&args, &config, Some("quantum-noise-240101"));
        assert!(matches!(&request.target, RunTarget::Existing { slug } if slug == "quantum-noise-240101"));
        assert!(!request.flags.unwrap().binary_compilation);

        let request = generate_request(&args, &config, None);
        assert!(matches!(&request.target, RunTarget::New { topic, slug: None } if topic == "quantum noise"));
    }

    #[test]
    fn test_reuse_conflicts_with_explicit_slug() {
        assert!(Cli::try_parse_from(["preprint-forge", "generate", "t", "--reuse", "--slug", "s"]).is_err());
    }

    #[test]
    fn test_event_sink_only_when_verbose() {
        assert!(event_sink(0).is_none());
        assert!(event_sink(1).is_some());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(RunOutcome::Succeeded), 0);
        assert_eq!(exit_code(RunOutcome::PartialSuccess), 2);
        assert_eq!(exit_code(RunOutcome::Failed), 1);
    }
}
