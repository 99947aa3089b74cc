use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tally::kernel::event::RecordOutcome;
use tally::kernel::permission::ExtensionState;
use tally::kernel::policy::{self, SendMode, UserChoice};
use tally::kernel::scheduler::{PendingPrompt, UploadOutcome, UploadReport};
use tally::{AgentConfig, TelemetryAgent};

#[derive(Parser)]
#[command(name = "tally", about = "Local usage-telemetry agent")]
struct Cli {
    /// Record file (defaults to the user data dir)
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Settings file (defaults to the user data dir)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Collector URL
    #[arg(long, global = true)]
    endpoint: Option<String>,
    /// Days between upload prompts in ask mode
    #[arg(long, global = true, value_parser = clap::value_parser!(i64).range(0..))]
    interval_days: Option<i64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record one occurrence of a feature
    Record { component: String, event: String },
    /// Run the upload check, prompting on stdin if needed
    Check {
        /// Send now regardless of policy and interval
        #[arg(long)]
        force: bool,
        /// Answer to use if a prompt is raised
        #[arg(long)]
        answer: Option<UserChoice>,
        /// Remember a one-time answer for later checks
        #[arg(long)]
        remember: bool,
    },
    /// Show policy and pending records
    Status,
    /// Print usage totals as JSON
    Summary,
    /// Classify an extension
    Extension { name: String, state: StateArg },
    /// Register a newly installed extension under the default permission
    Installed { name: String },
    /// Global permission for default-governed extensions
    DefaultPermission { value: PermissionArg },
    /// Recurring send policy
    SendPolicy { mode: ModeArg },
}

#[derive(Clone, Copy, ValueEnum)]
enum StateArg {
    Enable,
    Disable,
    Default,
}

#[derive(Clone, Copy, ValueEnum)]
enum PermissionArg {
    Allow,
    Deny,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Ask,
    Always,
    Never,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AgentConfig::default();
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(settings) = cli.settings {
        config.settings_path = settings;
    }
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(days) = cli.interval_days {
        config.upload_interval = chrono::Duration::days(days);
    }

    let agent = TelemetryAgent::from_config(&config);
    let settings = agent.settings();

    match cli.command {
        Command::Record { component, event } => match agent.record_occurrence(&component, &event) {
            RecordOutcome::Recorded => println!("recorded {component}/{event}"),
            RecordOutcome::Denied => println!("{component} is not permitted, event not logged"),
            RecordOutcome::Dropped => bail!("failed to persist {component}/{event}"),
        },
        Command::Check { force, answer, remember } => {
            let outcome = agent.check_and_maybe_upload(force);
            let outcome = match outcome {
                UploadOutcome::AwaitingUserChoice(prompt) => {
                    let choice = match answer {
                        Some(choice) => choice,
                        None => ask(&prompt)?,
                    };
                    agent.resolve_user_choice(choice, remember)
                }
                other => other,
            };
            report(outcome).await?;
        }
        Command::Status => {
            let send = agent.send_policy();
            let perms = agent.permission_policy();
            println!("send policy:        {:?}", send.mode);
            println!("remembered answer:  {:?}", send.user_response);
            match (send.last_sent, policy::days_since_last_sent(&send, chrono::Utc::now())) {
                (Some(at), Some(days)) => println!("last sent:          {} ({days} days ago)", at.to_rfc3339()),
                _ => println!("last sent:          never"),
            }
            if let Some(due) = agent.next_due() {
                println!("next prompt after:  {}", due.to_rfc3339());
            }
            if agent.default_permission_unset() {
                println!("default permission: not yet chosen (extensions not logged)");
            } else {
                println!("default permission: {:?}", perms.default_permission);
            }
            println!("enabled:            {:?}", perms.enabled);
            println!("disabled:           {:?}", perms.disabled);
            println!("default-governed:   {:?}", perms.default_governed);
            println!("pending records:    {}", agent.snapshot().len());
        }
        Command::Summary => {
            let summary = serde_json::to_string_pretty(&agent.summary())?;
            println!("{summary}");
        }
        Command::Extension { name, state } => {
            let state = match state {
                StateArg::Enable => ExtensionState::Enabled,
                StateArg::Disable => ExtensionState::Disabled,
                StateArg::Default => ExtensionState::Default,
            };
            settings
                .set_extension_state(&name, state)
                .context("failed to save extension state")?;
        }
        Command::Installed { name } => {
            if !agent.on_extension_installed(&name) {
                println!("{name} is already classified");
            }
        }
        Command::DefaultPermission { value } => {
            settings
                .set_default_permission(matches!(value, PermissionArg::Allow))
                .context("failed to save default permission")?;
        }
        Command::SendPolicy { mode } => {
            let mode = match mode {
                ModeArg::Ask => SendMode::Ask,
                ModeArg::Always => SendMode::Always,
                ModeArg::Never => SendMode::Never,
            };
            settings
                .set_send_mode(mode)
                .context("failed to save send policy")?;
        }
    }
    Ok(())
}

fn ask(prompt: &PendingPrompt) -> Result<UserChoice> {
    println!("Would you like to send telemetry data to the server?");
    println!("{}", prompt.preview);
    let stdin = std::io::stdin();
    loop {
        print!("[send-once / dont-send-once / always / never / ask-later] > ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(UserChoice::AskLater);
        }
        match line.trim().parse() {
            Ok(choice) => return Ok(choice),
            Err(e) => println!("{e}"),
        }
    }
}

async fn report(outcome: UploadOutcome) -> Result<()> {
    match outcome {
        UploadOutcome::Dispatched(ticket) => match ticket.wait().await {
            UploadReport::Delivered { records, .. } => println!("sent {records} records"),
            UploadReport::Failed { reason, .. } => bail!("upload failed: {reason}"),
        },
        UploadOutcome::Skipped(reason) => println!("not uploading: {reason:?}"),
        UploadOutcome::NothingToSend => println!("no logged events to send"),
        UploadOutcome::Declined(choice) => println!("not sending ({choice:?})"),
        UploadOutcome::InFlight(attempt) => println!("upload {} already running", attempt.id),
        UploadOutcome::AwaitingUserChoice(_) | UploadOutcome::NoPendingPrompt => {
            println!("waiting for an answer")
        }
        UploadOutcome::NotStarted(reason) => bail!("upload not started: {reason}"),
    }
    Ok(())
}
