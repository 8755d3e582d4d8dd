//! Argus daemon entry point.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::broadcast;

use argus::domain::errors::{DomainError, DomainResult};
use argus::domain::models::{AgentCommand, Config};
use argus::domain::ports::approval::{ApprovalDecision, ApproveAll, PendingApprovalStore};
use argus::domain::ports::{
    AgentRunner, AlertNotifier, MetricQueryService, Persona, PersonaStore,
};
use argus::infrastructure::config::ConfigLoader;
use argus::infrastructure::database::{
    DatabaseConnection, RetentionSweeper, SqliteAlertRepository, SqliteJobRepository,
    SqliteMcpServerRepository, SqliteMetricQueryService, SqliteMetricStore,
    SqliteTenantRepository,
};
use argus::infrastructure::logging::init_logging;
use argus::infrastructure::mcp::{DefaultTransportFactory, McpConnectionManager, StoreSync};
use argus::infrastructure::notify::{WebhookAlertNotifier, WebhookJobNotifier};
use argus::services::{
    AlertEvaluator, AlertScheduler, BaselineCalculator, CircuitBreaker, CircuitBreakerConfig,
    HookRegistry, JobScheduler, MetricCollector, MetricPipeline, PipelineHealth, PipelineWriter,
    QuotaEnforcer, SloService,
};

#[derive(Parser)]
#[command(name = "argus", about = "Observability and control plane for AI-agent runtimes")]
struct Cli {
    /// Path to a configuration file (defaults to ./argus.yaml + env).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control plane daemon.
    Serve,
    /// Scheduled job operations.
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// MCP server operations.
    Mcp {
        #[command(subcommand)]
        command: McpCommands,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// Run a job once by name.
    Run {
        name: String,
        /// Execute without touching the job's run state.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum McpCommands {
    /// List persisted MCP servers.
    List,
}

/// Placeholder agent executor: AGENT jobs fail until a real executor is
/// wired by the embedding application.
struct UnconfiguredAgentRunner;

#[async_trait]
impl AgentRunner for UnconfiguredAgentRunner {
    async fn run(&self, command: AgentCommand) -> DomainResult<String> {
        tracing::warn!(prompt = %command.prompt, "No agent executor configured");
        Err(DomainError::ExecutionFailed(
            "AGENT_FAILURE: no agent executor configured".to_string(),
        ))
    }
}

struct NoPersonas;

#[async_trait]
impl PersonaStore for NoPersonas {
    async fn find_by_id(&self, _id: &str) -> DomainResult<Option<Persona>> {
        Ok(None)
    }
    async fn default_persona(&self) -> DomainResult<Option<Persona>> {
        Ok(None)
    }
}

/// Auto-approving stand-in used until an approval backend is wired.
struct AutoApprove;

#[async_trait]
impl PendingApprovalStore for AutoApprove {
    async fn request_approval(
        &self,
        _server_name: &str,
        _tool_name: &str,
        _arguments: &serde_json::Value,
        _requested_by: &str,
    ) -> DomainResult<ApprovalDecision> {
        Ok(ApprovalDecision::Approved)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    let _log_guard = init_logging(&config.logging)?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Job { command } => match command {
            JobCommands::Run { name, dry_run } => run_job(config, &name, dry_run).await,
        },
        Commands::Mcp { command } => match command {
            McpCommands::List => list_mcp_servers(config).await,
        },
    }
}

async fn connect_database(config: &Config) -> Result<DatabaseConnection> {
    let db = DatabaseConnection::new(&config.database.path, config.database.max_connections)
        .await
        .context("Failed to open database")?;
    db.migrate().await?;
    Ok(db)
}

fn build_mcp_manager(config: &Config, db: &DatabaseConnection) -> Arc<McpConnectionManager> {
    McpConnectionManager::new(
        config.mcp.clone(),
        Arc::new(DefaultTransportFactory),
        StoreSync::new(Arc::new(SqliteMcpServerRepository::new(db.pool().clone()))),
    )
}

#[allow(clippy::too_many_lines)]
async fn serve(config: Config) -> Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Argus");

    let db = connect_database(&config).await?;
    let (shutdown_tx, _) = broadcast::channel(4);

    // Ingestion pipeline.
    let health = Arc::new(PipelineHealth::new());
    let pipeline = Arc::new(MetricPipeline::new(&config.pipeline, health.clone()));
    let metric_store = Arc::new(SqliteMetricStore::new(db.pool().clone()));
    let writer = Arc::new(PipelineWriter::new(
        pipeline.clone(),
        metric_store,
        config.pipeline.clone(),
    ));
    let writer_handle = writer.start(shutdown_tx.subscribe());

    // Tenant surface + quota enforcement.
    let tenants = Arc::new(SqliteTenantRepository::new(db.pool().clone()));
    let metrics: Arc<dyn MetricQueryService> =
        Arc::new(SqliteMetricQueryService::new(db.pool().clone()));
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: config.quota.breaker_failure_threshold,
        reset_timeout: chrono::Duration::milliseconds(
            i64::try_from(config.quota.breaker_reset_timeout_ms).unwrap_or(30_000),
        ),
        half_open_trials: config.quota.breaker_half_open_trials,
    }));

    let mut hooks = HookRegistry::new();
    hooks.register(Arc::new(QuotaEnforcer::new(
        tenants.clone(),
        metrics.clone(),
        breaker,
        pipeline.clone(),
        config.hooks.quota_enforcer_order,
    )));
    hooks.register(Arc::new(MetricCollector::new(
        pipeline.clone(),
        config.hooks.metric_collector_order,
    )));
    let hooks = Arc::new(hooks);

    // MCP connection manager.
    let mcp = build_mcp_manager(&config, &db);
    let restored = mcp.restore_from_store().await;
    tracing::info!(restored, "Restored MCP servers from store");

    // Job scheduler.
    let job_store = Arc::new(SqliteJobRepository::new(db.pool().clone()));
    let job_notifier = Arc::new(WebhookJobNotifier::new(
        config.scheduler.slack_webhook_url.clone(),
    ));
    let scheduler = JobScheduler::new(
        job_store,
        mcp.clone(),
        Arc::new(UnconfiguredAgentRunner),
        Arc::new(NoPersonas),
        hooks.clone(),
        Arc::new(ApproveAll),
        Arc::new(AutoApprove),
        Some(job_notifier),
        config.scheduler.tick_interval_ms,
    );
    let registered = scheduler.load_jobs().await?;
    tracing::info!(registered, "Loaded scheduled jobs");
    let scheduler_handle = scheduler.start(shutdown_tx.subscribe());

    // Alerting.
    let notifiers: Vec<Arc<dyn AlertNotifier>> = config
        .alerting
        .webhook_urls
        .iter()
        .enumerate()
        .map(|(i, url)| {
            Arc::new(WebhookAlertNotifier::new(format!("webhook-{i}"), url))
                as Arc<dyn AlertNotifier>
        })
        .collect();
    let evaluator = Arc::new(AlertEvaluator::new(
        metrics.clone(),
        tenants,
        Arc::new(SqliteAlertRepository::new(db.pool().clone())),
        notifiers,
        SloService::new(metrics.clone()),
        BaselineCalculator::new(metrics, config.alerting.baseline_ttl_seconds),
        health,
    ));
    let alert_scheduler = AlertScheduler::new(evaluator, config.alerting.interval_seconds);
    alert_scheduler.start(shutdown_tx.subscribe());

    // Retention.
    let sweeper = RetentionSweeper::new(db.pool().clone(), config.retention.clone());
    let sweeper_handle = sweeper.start(shutdown_tx.subscribe());

    tracing::info!("Argus is running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    // Ordered shutdown: stop producers of work first, flush the pipeline,
    // then close external sessions and the pool.
    let _ = shutdown_tx.send(());
    alert_scheduler.destroy();
    let _ = scheduler_handle.await;
    let _ = writer_handle.await;
    let _ = sweeper_handle.await;
    mcp.shutdown().await;
    db.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_job(config: Config, name: &str, dry_run: bool) -> Result<()> {
    let db = connect_database(&config).await?;
    let job_store = Arc::new(SqliteJobRepository::new(db.pool().clone()));

    let mcp = build_mcp_manager(&config, &db);
    mcp.restore_from_store().await;

    let scheduler = JobScheduler::new(
        job_store.clone(),
        mcp.clone(),
        Arc::new(UnconfiguredAgentRunner),
        Arc::new(NoPersonas),
        Arc::new(HookRegistry::new()),
        Arc::new(ApproveAll),
        Arc::new(AutoApprove),
        None,
        config.scheduler.tick_interval_ms,
    );

    let job = argus::domain::ports::JobStore::find_by_name(job_store.as_ref(), name)
        .await?
        .with_context(|| format!("No job named '{name}'"))?;

    let execution = scheduler.run_now(job.id, dry_run).await?;
    println!(
        "{}: {} ({} ms){}",
        execution.job_name,
        execution.status.as_str(),
        execution.duration_ms,
        if execution.dry_run { " [dry-run]" } else { "" }
    );
    if let Some(result) = execution.result {
        println!("{result}");
    }

    mcp.shutdown().await;
    db.close().await;
    Ok(())
}

async fn list_mcp_servers(config: Config) -> Result<()> {
    let db = connect_database(&config).await?;
    let store = SqliteMcpServerRepository::new(db.pool().clone());
    let servers = argus::domain::ports::McpServerStore::load_all(&store).await?;

    if servers.is_empty() {
        println!("No MCP servers registered.");
    }
    for server in servers {
        println!(
            "{}\t{}\tauto_connect={}",
            server.name,
            server.transport.as_str(),
            server.auto_connect
        );
    }

    db.close().await;
    Ok(())
}
