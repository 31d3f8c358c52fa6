//! State-transition events flowing from probes to the supervisor.

use std::sync::Arc;

use ipnet::IpNet;

use crate::config::ServiceSpec;
use crate::probe::ServiceState;

/// A service changed state.
///
/// Carries the full static prefix list of the service regardless of
/// direction; the consumer applies per-state semantics (add on up, remove
/// on down).
#[derive(Debug, Clone)]
pub struct Action {
    pub service: Arc<ServiceSpec>,
    pub state: ServiceState,
    pub prefixes: Vec<IpNet>,
}
