use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use querymon_common::settings::SettingsHandle;
use querymon_engine::{Clock, MonitorRunner, SystemClock};
use querymon_notify::{PlaceholderTemplateEngine, WebhookNotifier};
use querymon_query::HttpPqlExecutor;
use querymon_storage::memory::InMemoryCluster;
use querymon_storage::{AlertStore, BackoffPolicy, MonitorStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;

use querymon_server::config::ServerConfig;
use querymon_server::leader::LeaderState;
use querymon_server::scheduler::MonitorScheduler;
use querymon_server::sweeper::{AlertSweeper, SweeperScheduler};

#[tokio::main]
async fn main() -> Result<()> {
    querymon_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("querymon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());
    let config = if Path::new(&config_path).exists() {
        ServerConfig::load(&config_path)?
    } else {
        tracing::warn!(path = %config_path, "config file not found, using defaults");
        ServerConfig::default()
    };

    tracing::info!(
        pql_endpoint = %config.pql_endpoint,
        scheduler_tick_secs = config.scheduler.tick_secs,
        sweep_delay_secs = config.sweeper.sweep_delay_secs,
        "querymon-server starting"
    );

    let settings = SettingsHandle::new(config.alerting.clone());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cluster = Arc::new(InMemoryCluster::new());

    let executor = Arc::new(HttpPqlExecutor::new(
        config.pql_endpoint.clone(),
        Duration::from_secs(config.request_timeout_secs),
    )?);

    let notifier = Arc::new(WebhookNotifier::new());
    for destination in &config.destinations {
        notifier.register_destination(&destination.id, &destination.url);
        tracing::info!(destination_id = %destination.id, "registered webhook destination");
    }

    let store = Arc::new(AlertStore::new(
        cluster.clone(),
        cluster.clone(),
        BackoffPolicy::default(),
    ));

    let runner = Arc::new(MonitorRunner::new(
        executor,
        store,
        notifier,
        Arc::new(PlaceholderTemplateEngine),
        clock.clone(),
        settings.clone(),
    ));

    let sweeper = Arc::new(AlertSweeper::new(
        cluster.clone(),
        cluster.clone(),
        settings.clone(),
        clock.clone(),
    ));
    let leader = Arc::new(LeaderState::new());
    let sweep_scheduler = Arc::new(SweeperScheduler::new(
        sweeper,
        cluster.clone() as Arc<dyn MonitorStore>,
        leader,
        Duration::from_secs(config.sweeper.sweep_delay_secs),
    ));
    // single-node deployment: this process always holds leadership
    sweep_scheduler.on_leader_elected();

    let scheduler = MonitorScheduler::new(
        cluster.clone(),
        runner,
        clock,
        Duration::from_secs(config.scheduler.tick_secs),
        config.scheduler.max_concurrent,
    );
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run().await;
    });

    tracing::info!("querymon-server started");

    signal::ctrl_c().await?;
    tracing::info!("shutting down");
    scheduler_handle.abort();
    sweep_scheduler.on_leader_lost();

    Ok(())
}
