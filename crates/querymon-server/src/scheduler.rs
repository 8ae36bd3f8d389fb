use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use querymon_engine::{Clock, MonitorRunner};
use querymon_storage::MonitorStore;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::interval;

const MONITOR_SCAN_LIMIT: usize = 10000;

/// Ticks over the scheduled-jobs collection and hands due monitors to the
/// runner. Executions of the same monitor are serialized here (the runner
/// does not self-lock): a monitor whose previous run is still in flight is
/// skipped for the tick.
pub struct MonitorScheduler {
    monitors: Arc<dyn MonitorStore>,
    runner: Arc<MonitorRunner>,
    clock: Arc<dyn Clock>,
    tick: Duration,
    max_concurrent: usize,
    running: Arc<Mutex<HashSet<String>>>,
}

impl MonitorScheduler {
    pub fn new(
        monitors: Arc<dyn MonitorStore>,
        runner: Arc<MonitorRunner>,
        clock: Arc<dyn Clock>,
        tick: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            monitors,
            runner,
            clock,
            tick,
            max_concurrent,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn run(&self) {
        tracing::info!(
            tick_secs = self.tick.as_secs(),
            max_concurrent = self.max_concurrent,
            "monitor scheduler started"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut last_runs: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut tick = interval(self.tick);
        loop {
            tick.tick().await;
            if let Err(e) = self.run_due_monitors(&mut last_runs, &semaphore).await {
                tracing::error!(error = %e, "monitor scheduling cycle failed");
            }
        }
    }

    async fn run_due_monitors(
        &self,
        last_runs: &mut HashMap<String, DateTime<Utc>>,
        semaphore: &Arc<Semaphore>,
    ) -> Result<()> {
        let now = self.clock.now();
        let monitors = self.monitors.search_monitors(MONITOR_SCAN_LIMIT).await?;

        for monitor in monitors {
            if !monitor.enabled {
                continue;
            }
            let due = last_runs
                .get(&monitor.id)
                .map(|last| now - *last >= monitor.schedule.period())
                .unwrap_or(true);
            if !due {
                continue;
            }

            {
                let mut running = self.running.lock().await;
                if running.contains(&monitor.id) {
                    tracing::warn!(
                        monitor_id = %monitor.id,
                        "previous execution still in flight, skipping this period"
                    );
                    continue;
                }
                running.insert(monitor.id.clone());
            }
            last_runs.insert(monitor.id.clone(), now);

            let permit = semaphore.clone().acquire_owned().await?;
            let runner = self.runner.clone();
            let running = self.running.clone();
            let monitor_id = monitor.id.clone();
            let period_end = now;
            let period_start = now - monitor.schedule.period();

            tokio::spawn(async move {
                let execution_id = querymon_common::id::next_id();
                let result = runner
                    .run(&monitor, period_start, period_end, false, false, &execution_id)
                    .await;

                match &result.error {
                    Some(error) => tracing::error!(
                        monitor_id = %monitor_id,
                        execution_id = %execution_id,
                        error = %error,
                        "monitor run failed"
                    ),
                    None => {
                        let fired = result
                            .trigger_results
                            .values()
                            .filter(|t| t.fired)
                            .count();
                        tracing::debug!(
                            monitor_id = %monitor_id,
                            execution_id = %execution_id,
                            fired,
                            "monitor run finished"
                        );
                    }
                }

                drop(permit);
                running.lock().await.remove(&monitor_id);
            });
        }

        Ok(())
    }
}
