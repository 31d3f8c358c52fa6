//! Prometheus metrics.
//!
//! All metrics live in the default registry behind a process-wide
//! [`OnceLock`]. [`Metrics::init`] is called once from `main` when the
//! prometheus endpoint is enabled; probes and the supervisor update
//! metrics only when [`Metrics::get`] returns one, so the rest of the code
//! (and the tests) runs fine without a registry.

use std::sync::OnceLock;

use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};

use crate::config::ServiceSpec;

static METRICS: OnceLock<Metrics> = OnceLock::new();

const NAMESPACE: &str = "birdwatcher";
const SUBSYSTEM: &str = "service";

/// All exported metrics.
pub struct Metrics {
    /// Static service configuration, exported as labels.
    pub service_info: GaugeVec,

    /// Current health state per service (1 = up, 0 = down).
    pub service_state: GaugeVec,

    /// Duration of the last check in milliseconds.
    pub service_check_duration: GaugeVec,

    /// State transitions per service.
    pub service_transition_total: CounterVec,

    /// Successful checks per service.
    pub service_success_total: CounterVec,

    /// Failed checks per service.
    pub service_fail_total: CounterVec,

    /// Checks killed at the deadline per service.
    pub service_timeout_total: CounterVec,

    /// Per-prefix advertisement state (1 = advertised, 0 = withdrawn).
    pub prefix_state: GaugeVec,
}

impl Metrics {
    /// Registers all metrics in the default registry. Idempotent.
    pub fn init() -> Result<(), prometheus::Error> {
        if METRICS.get().is_some() {
            return Ok(());
        }

        let metrics = Self::register()?;
        let _ = METRICS.set(metrics);
        Ok(())
    }

    /// The registered metrics, if [`Metrics::init`] has run.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    fn register() -> Result<Self, prometheus::Error> {
        let opts = |name: &str, help: &str| {
            prometheus::Opts::new(name, help)
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM)
        };

        Ok(Self {
            service_info: register_gauge_vec!(
                opts("info", "Services and their configuration"),
                &[
                    "service",
                    "function_name",
                    "command",
                    "interval",
                    "timeout",
                    "rise",
                    "fail"
                ]
            )?,
            service_state: register_gauge_vec!(
                opts("state", "Current health state per service"),
                &["service"]
            )?,
            service_check_duration: register_gauge_vec!(
                opts("check_duration", "Service check duration in milliseconds"),
                &["service"]
            )?,
            service_transition_total: register_counter_vec!(
                opts("transition_total", "Number of transitions per service"),
                &["service"]
            )?,
            service_success_total: register_counter_vec!(
                opts("success_total", "Number of successful probes per service"),
                &["service"]
            )?,
            service_fail_total: register_counter_vec!(
                opts("fail_total", "Number of failed probes per service"),
                &["service"]
            )?,
            service_timeout_total: register_counter_vec!(
                opts("timeout_total", "Number of timed out probes per service"),
                &["service"]
            )?,
            prefix_state: register_gauge_vec!(
                opts("prefix_state", "Advertisement state per prefix"),
                &["service", "prefix"]
            )?,
        })
    }

    /// The info gauge for a service, with its configuration as labels.
    pub fn info_for(&self, spec: &ServiceSpec) -> prometheus::Gauge {
        self.service_info.with_label_values(&[
            &spec.name,
            &spec.function_name,
            &spec.command,
            &spec.interval.as_secs().to_string(),
            &format!("{:?}", spec.timeout),
            &spec.rise.to_string(),
            &spec.fail.to_string(),
        ])
    }
}

/// Text encoding of the default registry, for the HTTP endpoint.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
