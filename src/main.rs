use std::sync::Arc;

use anyhow::Context;
use dealflow::config::AppConfig;
use dealflow::crm::{AffinityClient, Reconciler};
use dealflow::extract::EntityExtractor;
use dealflow::llm::create_provider;
use dealflow::mail::GmailClient;
use dealflow::pipeline::{PipelineOrchestrator, spawn_scheduler};
use dealflow::server::{AppState, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    eprintln!("dealflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Alias: {}", config.mail.alias);
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   CRM list: {}", config.crm.list_id);
    eprintln!("   Interval: every {} min", config.schedule.interval_minutes);
    eprintln!("   HTTP: http://0.0.0.0:{}\n", config.port);

    let llm = create_provider(&config.llm).context("failed to create LLM provider")?;
    let mail = Arc::new(GmailClient::new(config.mail.clone()));
    let crm = Arc::new(AffinityClient::new(&config.crm));

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        mail,
        EntityExtractor::new(llm),
        Arc::new(Reconciler::new(crm, config.crm.clone())),
        config.mail.batch_size,
        config.schedule.message_delay,
    ));

    let (_scheduler, shutdown) = spawn_scheduler(
        Arc::clone(&orchestrator),
        config.schedule.interval(),
    );

    let app = routes(AppState {
        orchestrator,
        interval_minutes: config.schedule.interval_minutes,
    });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    tracing::info!("Shut down");
    Ok(())
}
