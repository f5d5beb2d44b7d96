//! Command-line interface

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::auth::{build_gmail_hub, load_client_secret, GMAIL_READONLY_SCOPE, GMAIL_SEND_SCOPE};
use crate::client::{with_timeout, GmailProvider, MailProvider};
use crate::config::Config;
use crate::connections::ConnectionManager;
use crate::error::{FootprintError, Result};
use crate::jobs::{ChannelQueue, Job, JobHandler, TaskQueue, Worker};
use crate::lifecycle::RequestLifecycle;
use crate::models::{OutgoingEmail, OwnerId, RequestStatus};
use crate::rate_limiter::{Action, RateLimitKey, RateLimiter};
use crate::registry::ServiceRegistry;
use crate::scanner::Scanner;
use crate::sqlite_store::SqliteStore;
use crate::vault::{generate_key, SecretVault};

#[derive(Parser, Debug)]
#[command(name = "footprint")]
#[command(version)]
#[command(about = "Find the services your inbox knows about and send them privacy requests", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "footprint.toml")]
    pub config: PathBuf,

    /// Local user the command acts for
    #[arg(long, default_value_t = 1)]
    pub owner: OwnerId,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "footprint.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Print a fresh encryption key for ENCRYPTION_KEY
    Keygen,

    /// Store a Gmail refresh token for this owner
    Connect {
        /// Refresh token (prompted for when omitted)
        #[arg(long)]
        refresh_token: Option<String>,

        /// Space-separated scopes granted with the token
        #[arg(long)]
        scope: Option<String>,
    },

    /// Scan the mailbox for service sign-ups
    Scan {
        /// Run through the job queue instead of inline
        #[arg(long)]
        background: bool,
    },

    /// List discovered services
    Services,

    /// Preview a privacy request
    Draft {
        /// Service id (see `services`)
        #[arg(long)]
        service: i64,

        /// unsubscribe or delete_close
        #[arg(long = "type", value_name = "TYPE")]
        request_type: String,

        /// gdpr or ccpa
        #[arg(long)]
        regime: Option<String>,
    },

    /// Send a privacy request
    Send {
        /// Service id (see `services`)
        #[arg(long)]
        service: i64,

        /// unsubscribe or delete_close
        #[arg(long = "type", value_name = "TYPE")]
        request_type: String,

        /// gdpr or ccpa
        #[arg(long)]
        regime: Option<String>,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Check reply threads of open requests
    Sync {
        /// Run through the job queue instead of inline
        #[arg(long)]
        background: bool,
    },

    /// List privacy requests
    Requests {
        /// Only show these statuses (repeatable): pending, needs_info, completed
        #[arg(long)]
        status: Vec<String>,
    },

    /// Show the audit trail of one request
    Events {
        /// Request id (see `requests`)
        #[arg(long)]
        request: i64,
    },
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi,
            spinner_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi
    }
}

/// Open the configured database
fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&config.database.path)
}

/// Decrypt the owner's stored token and build a live Gmail provider
async fn connect_provider(config: &Config, store: &SqliteStore, owner: OwnerId) -> Result<GmailProvider> {
    let secret = load_client_secret(&config.provider)?;
    let connections = ConnectionManager::new(store.clone(), SecretVault::new(&config.vault.encryption_key));
    let refresh_token = connections.refresh_token(owner).await?;
    let hub = build_gmail_hub(&secret, &refresh_token).await?;
    Ok(GmailProvider::new(
        hub,
        config.scan.max_concurrent_requests,
        config.scan.max_results,
    ))
}

/// Runs queued scan and sync jobs against the local database
pub struct LocalJobHandler {
    config: Config,
    store: SqliteStore,
}

impl LocalJobHandler {
    pub fn new(config: Config, store: SqliteStore) -> Self {
        Self { config, store }
    }
}

#[async_trait]
impl JobHandler for LocalJobHandler {
    async fn handle(&self, job: Job) -> Result<()> {
        let provider = connect_provider(&self.config, &self.store, job.owner()).await?;
        let timeout = self.config.provider.request_timeout();

        match job {
            Job::Scan { owner } => {
                let scanner = Scanner::new(
                    provider,
                    ServiceRegistry::new(self.store.clone()),
                    self.config.scan.clone(),
                    timeout,
                );
                let summary = scanner.scan(owner).await?;
                info!("Background scan for owner {}: {:?}", owner, summary);
            }
            Job::Sync { owner } => {
                let lifecycle = RequestLifecycle::new(self.store.clone());
                let summary = lifecycle.sync(owner, &provider, timeout).await?;
                info!("Background sync for owner {}: {:?}", owner, summary);
            }
        }
        Ok(())
    }
}

/// Hand one job to a worker and wait for it to drain
async fn run_in_background(config: Config, store: SqliteStore, job: Job) -> Result<()> {
    let (queue, rx) = ChannelQueue::new(16);
    let worker = tokio::spawn(Worker::new(rx, LocalJobHandler::new(config, store)).run());
    let job_id = queue.submit(job).await?;
    println!("Queued {} job {}", job.kind(), job_id);
    drop(queue);

    let stats = worker
        .await
        .map_err(|e| FootprintError::Storage(format!("worker panicked: {}", e)))?;
    println!("Jobs processed: {} (failed: {})", stats.processed, stats.failed);
    Ok(())
}

/// Ask before sending; `--yes` skips the prompt
fn confirm_send(reporter: &ProgressReporter, to: &str) -> Result<bool> {
    reporter.multi_progress().suspend(|| {
        inquire::Confirm::new(&format!("Send this request to {}?", to))
            .with_default(false)
            .prompt()
            .map_err(|e| FootprintError::Validation(format!("Confirmation aborted: {}", e)))
    })
}

/// Execute the parsed command
pub async fn execute(cli: Cli, multi: MultiProgress) -> Result<()> {
    let reporter = ProgressReporter::new(multi);
    let owner = cli.owner;

    match cli.command {
        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                return Err(FootprintError::Config(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                )));
            }
            Config::create_example(&output).await?;
            println!("Created example configuration file at: {:?}", output);
            println!("\nSecrets are best supplied through the environment:");
            println!("  - ENCRYPTION_KEY (run `footprint keygen`)");
            println!("  - GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET");
            Ok(())
        }

        Commands::Keygen => {
            println!("{}", generate_key());
            Ok(())
        }

        Commands::Connect {
            refresh_token,
            scope,
        } => {
            let config = Config::load(&cli.config).await?;
            let refresh_token = match refresh_token {
                Some(token) => token,
                None => reporter.multi_progress().suspend(|| {
                    inquire::Password::new("Gmail refresh token:")
                        .without_confirmation()
                        .prompt()
                        .map_err(|e| FootprintError::Validation(format!("No token entered: {}", e)))
                })?,
            };
            let scope =
                scope.unwrap_or_else(|| format!("{} {}", GMAIL_READONLY_SCOPE, GMAIL_SEND_SCOPE));

            let store = open_store(&config)?;
            let connections =
                ConnectionManager::new(store, SecretVault::new(&config.vault.encryption_key));
            connections.store(owner, &refresh_token, &scope).await?;
            println!("Mail account connected for owner {}", owner);
            Ok(())
        }

        Commands::Scan { background } => {
            let config = Config::load(&cli.config).await?;
            let store = open_store(&config)?;
            RateLimiter::new(store.clone(), &config.rate_limit)
                .check(&RateLimitKey::new(Action::Scan, owner))
                .await?;

            if background {
                return run_in_background(config, store, Job::Scan { owner }).await;
            }

            let auth_spinner = reporter.add_spinner("Authenticating with Gmail API...");
            let provider = connect_provider(&config, &store, owner).await?;
            reporter.finish_spinner(&auth_spinner, "Gmail API authenticated");

            let scan_spinner = reporter.add_spinner("Scanning mailbox...");
            let scanner = Scanner::new(
                provider,
                ServiceRegistry::new(store.clone()),
                config.scan.clone(),
                config.provider.request_timeout(),
            );
            let summary = scanner.scan(owner).await?;
            reporter.finish_spinner(
                &scan_spinner,
                &format!(
                    "Scanned {} messages: {} attributed, {} skipped",
                    summary.scanned, summary.matched, summary.skipped
                ),
            );
            Ok(())
        }

        Commands::Services => {
            let config = Config::load(&cli.config).await?;
            let registry = ServiceRegistry::new(open_store(&config)?);
            let services = registry.list(owner).await?;
            if services.is_empty() {
                println!("No services discovered yet. Run `footprint scan` first.");
                return Ok(());
            }

            println!("{:>5}  {:<30} {:<25} {:>8}  {}", "ID", "DOMAIN", "NAME", "EVIDENCE", "LAST SEEN");
            for s in services {
                println!(
                    "{:>5}  {:<30} {:<25} {:>8}  {}",
                    s.id,
                    s.domain,
                    s.name,
                    s.evidence_count,
                    s.last_seen.format("%Y-%m-%d")
                );
            }
            Ok(())
        }

        Commands::Draft {
            service,
            request_type,
            regime,
        } => {
            let config = Config::load(&cli.config).await?;
            let lifecycle = RequestLifecycle::new(open_store(&config)?);
            let draft = lifecycle
                .create_draft(owner, service, &request_type, regime.as_deref())
                .await?;
            println!("To: {}\nSubject: {}\n\n{}", draft.to, draft.subject, draft.body);
            Ok(())
        }

        Commands::Send {
            service,
            request_type,
            regime,
            yes,
        } => {
            let config = Config::load(&cli.config).await?;
            let store = open_store(&config)?;
            let lifecycle = RequestLifecycle::new(store.clone());
            let draft = lifecycle
                .create_draft(owner, service, &request_type, regime.as_deref())
                .await?;

            println!("To: {}\nSubject: {}\n\n{}\n", draft.to, draft.subject, draft.body);
            if !yes && !confirm_send(&reporter, &draft.to)? {
                println!("Aborted.");
                return Ok(());
            }

            RateLimiter::new(store.clone(), &config.rate_limit)
                .check(&RateLimitKey::new(Action::Send, owner))
                .await?;

            let provider = connect_provider(&config, &store, owner).await?;
            let sent = with_timeout(
                config.provider.request_timeout(),
                provider.send(OutgoingEmail::from(draft)),
            )
            .await?;
            let request = lifecycle.send(owner, service, &request_type, sent).await?;
            println!("Request {} sent, status: {}", request.id, request.status);
            Ok(())
        }

        Commands::Sync { background } => {
            let config = Config::load(&cli.config).await?;
            let store = open_store(&config)?;
            if background {
                return run_in_background(config, store, Job::Sync { owner }).await;
            }
            let provider = connect_provider(&config, &store, owner).await?;

            let spinner = reporter.add_spinner("Checking reply threads...");
            let lifecycle = RequestLifecycle::new(store);
            let summary = lifecycle
                .sync(owner, &provider, config.provider.request_timeout())
                .await?;
            reporter.finish_spinner(
                &spinner,
                &format!(
                    "Checked {} open requests, {} updated",
                    summary.checked, summary.updated
                ),
            );
            Ok(())
        }

        Commands::Requests { status } => {
            let statuses = status
                .iter()
                .map(|s| s.parse::<RequestStatus>())
                .collect::<Result<Vec<_>>>()?;
            let config = Config::load(&cli.config).await?;
            let lifecycle = RequestLifecycle::new(open_store(&config)?);
            let requests = lifecycle.list_by_status(owner, &statuses).await?;
            if requests.is_empty() {
                println!("No privacy requests yet.");
                return Ok(());
            }

            println!("{:>5}  {:>7}  {:<13} {:<11} {}", "ID", "SERVICE", "TYPE", "STATUS", "UPDATED");
            for r in requests {
                println!(
                    "{:>5}  {:>7}  {:<13} {:<11} {}",
                    r.id,
                    r.service_id,
                    r.request_type,
                    r.status,
                    r.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }

        Commands::Events { request } => {
            let config = Config::load(&cli.config).await?;
            let lifecycle = RequestLifecycle::new(open_store(&config)?);
            for event in lifecycle.events(owner, request).await? {
                println!(
                    "{}  {:<6} {}",
                    event.created_at.format("%Y-%m-%d %H:%M:%S"),
                    event.event_type,
                    event.payload
                );
            }
            Ok(())
        }
    }
}
