//! Per-service health probe.
//!
//! A [`Probe`] ticks on its service's interval, runs the check command
//! under a deadline and feeds the result into a rise/fail debouncer. Only
//! actual state transitions emit an [`Action`] on the channel; everything
//! in between just moves the counters.
//!
//! ```text
//!   tick ──► run command ──► success ──► observe_success() ─┐
//!               (deadline)   failure ──► observe_failure() ─┤
//!                                                           ▼
//!                                           Some(state)? ──► Action
//! ```
//!
//! A probe starts out `Down` and stays silent until its first `rise`
//! consecutive successes, so a service that never comes up never touches
//! the BIRD configuration.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::config::ServiceSpec;
use crate::error::ProbeError;
use crate::metrics::Metrics;

/// Debounced health state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Up,
    Down,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Up => write!(f, "up"),
            ServiceState::Down => write!(f, "down"),
        }
    }
}

/// Long-running health check for a single service.
pub struct Probe {
    spec: Arc<ServiceSpec>,
    state: ServiceState,
    up_counter: u32,
    down_counter: u32,
}

impl Probe {
    /// Creates a probe in the initial `Down` state.
    pub fn new(spec: Arc<ServiceSpec>) -> Self {
        Self {
            spec,
            state: ServiceState::Down,
            up_counter: 0,
            down_counter: 0,
        }
    }

    /// Runs the check loop until cancelled or the receiver goes away.
    ///
    /// Checks run synchronously within the loop so they never queue up;
    /// sending on a full action channel delays the next tick, which is the
    /// intended backpressure when the supervisor falls behind.
    pub async fn run(mut self, actions: mpsc::Sender<Action>, token: CancellationToken) {
        let mut ticker = time::interval(self.spec.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately; consume it so the first
        // check runs one interval after start
        ticker.tick().await;

        if let Some(metrics) = Metrics::get() {
            metrics.info_for(&self.spec).set(1.0);
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(service = %self.spec.name, "received stop signal");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let begin = Instant::now();
            let result = self.perform_check().await;

            if let Some(metrics) = Metrics::get() {
                metrics
                    .service_check_duration
                    .with_label_values(&[&self.spec.name])
                    .set(begin.elapsed().as_secs_f64() * 1000.0);
            }

            let transition = match result {
                Ok(()) => {
                    debug!(service = %self.spec.name, "check command exited without error");
                    if let Some(metrics) = Metrics::get() {
                        metrics
                            .service_success_total
                            .with_label_values(&[&self.spec.name])
                            .inc();
                    }
                    self.observe_success()
                }
                Err(err) => {
                    debug!(service = %self.spec.name, error = %err, "check command failed");
                    if let Some(metrics) = Metrics::get() {
                        metrics
                            .service_fail_total
                            .with_label_values(&[&self.spec.name])
                            .inc();
                        if err.is_timeout() {
                            metrics
                                .service_timeout_total
                                .with_label_values(&[&self.spec.name])
                                .inc();
                        }
                    }
                    self.observe_failure()
                }
            };

            if let Some(state) = transition {
                info!(service = %self.spec.name, %state, "service transitioning");

                if let Some(metrics) = Metrics::get() {
                    let value = match state {
                        ServiceState::Up => 1.0,
                        ServiceState::Down => 0.0,
                    };
                    metrics
                        .service_state
                        .with_label_values(&[&self.spec.name])
                        .set(value);
                    metrics
                        .service_transition_total
                        .with_label_values(&[&self.spec.name])
                        .inc();
                }

                let action = Action {
                    service: self.spec.clone(),
                    state,
                    prefixes: self.spec.prefixes.clone(),
                };

                tokio::select! {
                    sent = actions.send(action) => {
                        if sent.is_err() {
                            // supervisor is gone
                            return;
                        }
                    }
                    _ = token.cancelled() => return,
                }
            }
        }
    }

    /// Records a successful check. Returns the new state on transition.
    fn observe_success(&mut self) -> Option<ServiceState> {
        self.down_counter = 0;

        if self.up_counter >= self.spec.rise - 1 {
            if self.state != ServiceState::Up {
                self.state = ServiceState::Up;
                return Some(ServiceState::Up);
            }
        } else {
            self.up_counter += 1;
            debug!(
                service = %self.spec.name,
                successes = self.up_counter,
                "service moving towards up"
            );
        }

        None
    }

    /// Records a failed check. Returns the new state on transition.
    fn observe_failure(&mut self) -> Option<ServiceState> {
        self.up_counter = 0;

        if self.down_counter >= self.spec.fail - 1 {
            if self.state != ServiceState::Down {
                self.state = ServiceState::Down;
                return Some(ServiceState::Down);
            }
        } else {
            self.down_counter += 1;
            debug!(
                service = %self.spec.name,
                failures = self.down_counter,
                "service moving towards down"
            );
        }

        None
    }

    /// Runs the check command once, killing it at the deadline.
    async fn perform_check(&self) -> Result<(), ProbeError> {
        let mut argv = self.spec.command.split(' ');
        // validated non-empty at config load
        let program = argv.next().unwrap_or_default();

        let mut command = Command::new(program);
        command
            .args(argv)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn()?;

        // dropping the wait future on deadline expiry kills the child
        let output = match time::timeout(self.spec.timeout, child.wait_with_output()).await {
            Err(_) => {
                warn!(
                    service = %self.spec.name,
                    timeout = ?self.spec.timeout,
                    "check command timed out"
                );
                return Err(ProbeError::Timeout {
                    timeout: self.spec.timeout,
                });
            }
            Ok(result) => result?,
        };

        if !output.status.success() {
            return Err(ProbeError::Failed {
                status: output.status,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn spec(command: &str, rise: u32, fail: u32, timeout: Duration) -> Arc<ServiceSpec> {
        Arc::new(ServiceSpec {
            name: "test".to_string(),
            function_name: "match_route".to_string(),
            command: command.to_string(),
            interval: Duration::from_secs(1),
            timeout,
            rise,
            fail,
            prefixes: vec!["1.2.3.0/24".parse().unwrap()],
        })
    }

    fn probe(rise: u32, fail: u32) -> Probe {
        Probe::new(spec("/usr/bin/true", rise, fail, Duration::from_secs(2)))
    }

    #[test]
    fn exactly_rise_successes_produce_one_up_transition() {
        let mut p = probe(3, 1);

        assert_eq!(p.observe_success(), None);
        assert_eq!(p.observe_success(), None);
        assert_eq!(p.observe_success(), Some(ServiceState::Up));
        // further successes stay silent
        assert_eq!(p.observe_success(), None);
        assert_eq!(p.observe_success(), None);
    }

    #[test]
    fn rise_of_one_transitions_on_first_success() {
        let mut p = probe(1, 1);
        assert_eq!(p.observe_success(), Some(ServiceState::Up));
        assert_eq!(p.observe_success(), None);
    }

    #[test]
    fn exactly_fail_failures_produce_one_down_transition() {
        let mut p = probe(1, 3);
        assert_eq!(p.observe_success(), Some(ServiceState::Up));

        assert_eq!(p.observe_failure(), None);
        assert_eq!(p.observe_failure(), None);
        assert_eq!(p.observe_failure(), Some(ServiceState::Down));
        assert_eq!(p.observe_failure(), None);
    }

    #[test]
    fn success_resets_the_failure_counter() {
        let mut p = probe(1, 2);
        assert_eq!(p.observe_success(), Some(ServiceState::Up));

        assert_eq!(p.observe_failure(), None);
        // back up: failure streak starts over
        assert_eq!(p.observe_success(), None);
        assert_eq!(p.observe_failure(), None);
        assert_eq!(p.observe_failure(), Some(ServiceState::Down));
    }

    #[test]
    fn flapping_never_reaches_rise_threshold() {
        let mut p = probe(2, 1);

        for _ in 0..10 {
            assert_eq!(p.observe_success(), None);
            assert_eq!(p.observe_failure(), None);
        }
        assert_eq!(p.state, ServiceState::Down);
    }

    #[test]
    fn fresh_probe_stays_silent_on_failures() {
        let mut p = probe(1, 1);

        // down-to-down from a fresh start emits nothing
        assert_eq!(p.observe_failure(), None);
        assert_eq!(p.observe_failure(), None);
        assert_eq!(p.state, ServiceState::Down);
    }

    #[tokio::test]
    async fn perform_check_reports_exit_status() {
        let ok = Probe::new(spec("true", 1, 1, Duration::from_secs(2)));
        assert!(ok.perform_check().await.is_ok());

        let failed = Probe::new(spec("false", 1, 1, Duration::from_secs(2)));
        assert!(matches!(
            failed.perform_check().await,
            Err(ProbeError::Failed { .. })
        ));

        let missing = Probe::new(spec("/nonexistent/command", 1, 1, Duration::from_secs(2)));
        assert!(matches!(
            missing.perform_check().await,
            Err(ProbeError::Io(_))
        ));
    }

    #[tokio::test]
    async fn perform_check_kills_command_at_deadline() {
        let p = Probe::new(spec("sleep 5", 1, 1, Duration::from_millis(100)));

        let begin = Instant::now();
        let result = p.perform_check().await;
        assert!(matches!(result, Err(ProbeError::Timeout { .. })));
        assert!(result.unwrap_err().is_timeout());
        // the deadline cut the command short
        assert!(begin.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn probe_emits_up_action_after_rise_checks() {
        let spec = spec("true", 2, 1, Duration::from_secs(2));
        let (tx, mut rx) = mpsc::channel(16);
        let token = CancellationToken::new();

        let handle = tokio::spawn(Probe::new(spec.clone()).run(tx, token.clone()));

        let action = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("no action within deadline")
            .expect("channel closed");

        assert_eq!(action.state, ServiceState::Up);
        assert_eq!(action.prefixes, spec.prefixes);
        assert_eq!(action.service.name, spec.name);

        token.cancel();
        handle.await.unwrap();
    }
}
