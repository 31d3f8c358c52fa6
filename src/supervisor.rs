//! Supervisor: owns the authoritative prefix state and drives BIRD.
//!
//! One probe task per service feeds state transitions into a bounded
//! channel; the supervisor applies them to its [`PrefixCollection`],
//! pushes a status string and runs the write+reload pipeline inline. The
//! pipeline deliberately blocks the event loop so fragment writes stay
//! totally ordered — there is exactly one writer for the fragment file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::bird::{self, WriteOutcome};
use crate::config::{Config, ServiceSpec};
use crate::metrics::Metrics;
use crate::prefix::PrefixCollection;
use crate::probe::{Probe, ServiceState};

/// Capacity of the action channel. Probes block on a full channel, which
/// slows probing down instead of queueing unbounded work.
const ACTION_BUFFER: usize = 16;

pub struct Supervisor {
    config_file: PathBuf,
    reload_command: String,
    services: Vec<Arc<ServiceSpec>>,
    collection: PrefixCollection,
    /// Last observed state per service name; absent means never observed,
    /// i.e. still down.
    states: HashMap<String, ServiceState>,
    /// Whether the reload command has ever exited zero. Until it has, even
    /// an unchanged fragment triggers a reload, because the running daemon
    /// may not have loaded the current file yet.
    reloaded_before: bool,
}

impl Supervisor {
    pub fn new(config: &Config) -> Self {
        Self {
            config_file: config.config_file.clone(),
            reload_command: config.reload_command.clone(),
            services: config.services.clone(),
            collection: PrefixCollection::new(),
            states: HashMap::new(),
            reloaded_before: false,
        }
    }

    /// Spawns the probes and processes their actions until `shutdown`.
    ///
    /// `ready` fires once all probe tasks are running. Each applied action
    /// pushes a human-readable status string onto `status`; a full status
    /// buffer drops the update rather than stalling the event loop.
    pub async fn run(
        &mut self,
        ready: oneshot::Sender<()>,
        status: mpsc::Sender<String>,
        shutdown: CancellationToken,
    ) {
        let (tx, mut rx) = mpsc::channel(ACTION_BUFFER);

        let mut probes = JoinSet::new();
        for spec in &self.services {
            info!(service = %spec.name, "starting service check");
            let probe = Probe::new(spec.clone());
            probes.spawn(probe.run(tx.clone(), shutdown.child_token()));
        }
        // only probes hold senders from here on
        drop(tx);

        let _ = ready.send(());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("received stop signal");
                    break;
                }
                action = rx.recv() => {
                    match action {
                        Some(action) => {
                            debug!(
                                service = %action.service.name,
                                state = %action.state,
                                "incoming action"
                            );
                            self.handle_action(&action, &status).await;
                        }
                        // every probe exited; nothing left to supervise
                        None => break,
                    }
                }
            }
        }

        while probes.join_next().await.is_some() {}
        info!("all service checks stopped");
    }

    /// Applies an action to the collection and runs the apply pipeline.
    async fn handle_action(&mut self, action: &Action, status: &mpsc::Sender<String>) {
        self.states
            .insert(action.service.name.clone(), action.state);

        for prefix in &action.prefixes {
            match action.state {
                ServiceState::Up => {
                    self.collection.add(&action.service.function_name, *prefix);
                }
                ServiceState::Down => {
                    self.collection
                        .remove(&action.service.function_name, *prefix);
                }
            }

            if let Some(metrics) = Metrics::get() {
                let value = match action.state {
                    ServiceState::Up => 1.0,
                    ServiceState::Down => 0.0,
                };
                metrics
                    .prefix_state
                    .with_label_values(&[&action.service.name, &prefix.to_string()])
                    .set(value);
            }
        }

        if status.try_send(self.status_update()).is_err() {
            warn!("status channel full, dropping update");
        }

        self.apply_config().await;
    }

    /// One line summarizing the current up/down split.
    fn status_update(&self) -> String {
        let down: Vec<&str> = self
            .services
            .iter()
            .filter(|s| !matches!(self.states.get(&s.name), Some(ServiceState::Up)))
            .map(|s| s.name.as_str())
            .collect();
        let total = self.services.len();

        if down.is_empty() {
            format!("all {total} service(s) up")
        } else if down.len() == total {
            format!("all {total} service(s) down")
        } else {
            format!(
                "service(s) {} down, {} service(s) up",
                down.join(","),
                total - down.len()
            )
        }
    }

    /// Writes the fragment and reloads BIRD when needed.
    ///
    /// Errors are logged and abort this cycle only; the next action retries.
    async fn apply_config(&mut self) {
        let outcome = match bird::update_config(&self.config_file, &self.collection) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    file = %self.config_file.display(),
                    error = %err,
                    "error updating configuration"
                );
                return;
            }
        };

        if outcome == WriteOutcome::Identical {
            if self.reloaded_before {
                debug!(
                    file = %self.config_file.display(),
                    "config did not change, skipping reload"
                );
                return;
            }
            // first apply since startup: the fragment matches, but the
            // running daemon's state is unknown, so reload anyway
            info!(
                file = %self.config_file.display(),
                "config unchanged but not reloaded yet, reloading"
            );
        } else {
            info!(
                file = %self.config_file.display(),
                command = %self.reload_command,
                "prefixes updated, reloading"
            );
        }

        if bird::reload(&self.reload_command).await.is_ok() {
            self.reloaded_before = true;
        }
    }
}
