use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use querymon_common::error::{AlertError, Result};
use querymon_common::principal;
use querymon_common::settings::SettingsHandle;
use querymon_common::types::{Alert, Monitor, MonitorType, QueryResponse, Trigger, TriggerCondition};
use querymon_notify::{Notifier, TemplateEngine, TriggerContext};
use querymon_query::{composer, PqlExecutor, PqlQueryRequest};
use querymon_storage::AlertStore;

use crate::clock::Clock;
use crate::{evaluator, materializer, throttle};

/// Outcome of one trigger within a run.
#[derive(Debug, Clone, Default)]
pub struct TriggerRunResult {
    pub trigger_name: String,
    pub fired: bool,
    pub throttled: bool,
    pub alert_ids: Vec<String>,
    pub action_errors: Vec<String>,
    pub error: Option<String>,
}

/// Outcome of one monitor execution, returned to the scheduler and, for
/// manual executions, to the API caller. `trigger_responses` holds the raw
/// uncapped executor responses; any size limiting there is the transport
/// layer's concern.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub monitor_name: String,
    pub error: Option<String>,
    pub trigger_results: HashMap<String, TriggerRunResult>,
    pub trigger_responses: HashMap<String, QueryResponse>,
}

impl RunResult {
    fn failed(monitor_name: &str, error: &AlertError) -> Self {
        Self {
            monitor_name: monitor_name.to_string(),
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

/// Executes PQL monitors. One instance is shared by all workers; per-monitor
/// serialization is the scheduler's job, the runner does not self-lock.
pub struct MonitorRunner {
    executor: Arc<dyn PqlExecutor>,
    store: Arc<AlertStore>,
    notifier: Arc<dyn Notifier>,
    templates: Arc<dyn TemplateEngine>,
    clock: Arc<dyn Clock>,
    settings: SettingsHandle,
}

impl MonitorRunner {
    pub fn new(
        executor: Arc<dyn PqlExecutor>,
        store: Arc<AlertStore>,
        notifier: Arc<dyn Notifier>,
        templates: Arc<dyn TemplateEngine>,
        clock: Arc<dyn Clock>,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            executor,
            store,
            notifier,
            templates,
            clock,
            settings,
        }
    }

    /// Execute `monitor` for the period `[period_start, period_end]`.
    ///
    /// Triggers run in declaration order; a trigger's alert writes complete
    /// before the next trigger begins. A single trigger's failure records an
    /// error alert and moves on; only a non-retryable storage failure aborts
    /// the run. `last_fired_time`s are persisted exactly when at least one
    /// trigger fired.
    pub async fn run(
        &self,
        monitor: &Monitor,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        manual: bool,
        dry_run: bool,
        execution_id: &str,
    ) -> RunResult {
        if let Err(e) = self.check_runnable(monitor) {
            return RunResult::failed(&monitor.name, &e);
        }

        // Alert collections must exist before anything is evaluated; without
        // them there is nowhere to record an error alert either.
        if let Err(e) = self.ensure_collections().await {
            tracing::error!(monitor_id = %monitor.id, error = %e, "alert collection bootstrap failed");
            return RunResult::failed(&monitor.name, &e);
        }

        let now = self.clock.now();
        let settings = self.settings.load();

        tracing::debug!(
            monitor_id = %monitor.id,
            %period_start,
            %period_end,
            manual,
            dry_run,
            execution_id,
            "monitor run starting"
        );

        let time_filtered = match monitor.look_back_window {
            Some(window) => composer::time_filtered(
                &monitor.query,
                period_end - Duration::minutes(window),
                period_end,
                &monitor.timestamp_field,
            ),
            None => monitor.query.clone(),
        };

        let mut monitor = monitor.clone();
        let mut result = RunResult {
            monitor_name: monitor.name.clone(),
            ..Default::default()
        };
        let mut any_fired = false;

        for index in 0..monitor.triggers.len() {
            let trigger = &monitor.triggers[index];
            let mut trigger_result = TriggerRunResult {
                trigger_name: trigger.name.clone(),
                ..Default::default()
            };

            if throttle::is_throttled(trigger, now, manual) {
                tracing::debug!(
                    monitor_id = %monitor.id,
                    trigger_id = %trigger.id,
                    "trigger throttled, skipping execution"
                );
                trigger_result.throttled = true;
                result.trigger_results.insert(trigger.id.clone(), trigger_result);
                continue;
            }

            let mut query = time_filtered.clone();
            if let TriggerCondition::Custom { fragment } = &trigger.condition {
                query = composer::with_custom_condition(&query, fragment);
            }
            let query = composer::cap(&query, settings.query_results_max_datarows);

            let request = PqlQueryRequest::new(query);
            let executed = principal::with_principal(
                monitor.user.clone(),
                self.executor.execute(&request),
            )
            .await;

            let response = match executed {
                Ok(response) => response,
                Err(e) => {
                    self.record_trigger_failure(&monitor, trigger, &e, execution_id, now)
                        .await;
                    trigger_result.error = Some(e.to_string());
                    result.trigger_results.insert(trigger.id.clone(), trigger_result);
                    continue;
                }
            };

            result
                .trigger_responses
                .insert(trigger.id.clone(), response.clone());

            let fired = match evaluator::evaluate(trigger, &response) {
                Ok(fired) => fired,
                Err(e) => {
                    self.record_trigger_failure(&monitor, trigger, &e, execution_id, now)
                        .await;
                    trigger_result.error = Some(e.to_string());
                    result.trigger_results.insert(trigger.id.clone(), trigger_result);
                    continue;
                }
            };

            if !fired {
                result.trigger_results.insert(trigger.id.clone(), trigger_result);
                continue;
            }

            let slices = match evaluator::result_slices(
                trigger,
                &response,
                settings.query_results_max_size_bytes,
                settings.per_result_max_alerts,
            ) {
                Ok(slices) => slices,
                Err(e) => {
                    self.record_trigger_failure(&monitor, trigger, &e, execution_id, now)
                        .await;
                    trigger_result.error = Some(e.to_string());
                    result.trigger_results.insert(trigger.id.clone(), trigger_result);
                    continue;
                }
            };

            let alerts = materializer::build_alerts(&monitor, trigger, slices, execution_id, now);
            trigger_result.fired = true;
            trigger_result.alert_ids = alerts.iter().map(|a| a.id.clone()).collect();

            if !dry_run {
                trigger_result.action_errors =
                    self.dispatch_actions(&monitor, trigger, &alerts).await;
            }

            if let Err(e) = self.store.save_alerts(&alerts, &monitor).await {
                // non-retryable storage failure: the run stops here
                tracing::error!(
                    monitor_id = %monitor.id,
                    trigger_id = %trigger.id,
                    error = %e,
                    "persisting alerts failed, aborting run"
                );
                trigger_result.error = Some(e.to_string());
                result.trigger_results.insert(trigger.id.clone(), trigger_result);
                result.error = Some(e.to_string());
                return result;
            }

            monitor.triggers[index].last_fired_time = Some(now);
            any_fired = true;
            result
                .trigger_results
                .insert(monitor.triggers[index].id.clone(), trigger_result);
        }

        if any_fired {
            if let Err(e) = self.store.update_monitor_last_fired_times(&monitor).await {
                tracing::error!(
                    monitor_id = %monitor.id,
                    error = %e,
                    "persisting last_fired_time failed"
                );
                result.error = Some(e.to_string());
            }
        }

        result
    }

    fn check_runnable(&self, monitor: &Monitor) -> Result<()> {
        if monitor.id.is_empty() {
            return Err(AlertError::Validation(
                "monitor has no identity; only persisted monitors can run".to_string(),
            ));
        }
        if monitor.monitor_type != MonitorType::Pql {
            return Err(AlertError::Validation(format!(
                "monitor '{}' is not a PQL monitor",
                monitor.name
            )));
        }
        Ok(())
    }

    async fn ensure_collections(&self) -> Result<()> {
        let index = self.store.index();
        index.ensure_active_index().await?;
        index.ensure_history_alias().await?;
        Ok(())
    }

    /// Persist the single error alert for a failed trigger. A storage
    /// failure here is logged and swallowed so the remaining triggers still
    /// run.
    async fn record_trigger_failure(
        &self,
        monitor: &Monitor,
        trigger: &Trigger,
        error: &AlertError,
        execution_id: &str,
        now: DateTime<Utc>,
    ) {
        tracing::warn!(
            monitor_id = %monitor.id,
            trigger_id = %trigger.id,
            error = %error,
            "trigger execution failed"
        );
        let alert =
            materializer::build_error_alert(monitor, trigger, &error.to_string(), execution_id, now);
        if let Err(save_err) = self.store.save_alerts(&[alert], monitor).await {
            tracing::error!(
                monitor_id = %monitor.id,
                trigger_id = %trigger.id,
                error = %save_err,
                "failed to persist error alert"
            );
        }
    }

    /// Render and send every action for every fired slice. Returns the
    /// collected per-action failures; dispatch errors never fail the run.
    async fn dispatch_actions(
        &self,
        monitor: &Monitor,
        trigger: &Trigger,
        alerts: &[Alert],
    ) -> Vec<String> {
        let mut errors = Vec::new();

        for alert in alerts {
            let ctx = TriggerContext::new(monitor, trigger).with_results(&alert.query_results);

            for action in &trigger.actions {
                let rendered = self
                    .templates
                    .render(&action.subject_template, &ctx)
                    .and_then(|subject| {
                        self.templates
                            .render(&action.message_template, &ctx)
                            .map(|message| (subject, message))
                    });

                let (subject, message) = match rendered {
                    Ok(parts) => parts,
                    Err(e) => {
                        errors.push(format!("action '{}': template error: {e}", action.name));
                        continue;
                    }
                };

                if message.trim().is_empty() {
                    errors.push(format!(
                        "action '{}': rendered message is empty",
                        action.name
                    ));
                    continue;
                }

                let sent = principal::with_principal(
                    monitor.user.clone(),
                    self.notifier.send(
                        &action.id,
                        &action.destination_id,
                        &subject,
                        &message,
                        monitor.user.as_ref(),
                    ),
                )
                .await;

                if let Err(e) = sent {
                    tracing::error!(
                        monitor_id = %monitor.id,
                        action_id = %action.id,
                        error = %e,
                        "notification send failed"
                    );
                    errors.push(format!("action '{}': {e}", action.name));
                }
            }
        }

        errors
    }
}
