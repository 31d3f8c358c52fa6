//! # birdwatcher
//!
//! **birdwatcher** keeps BIRD route advertisements in sync with the health
//! of local services. Operators register services, each with an external
//! check command and one or more prefixes; birdwatcher probes them, keeps
//! a debounced up/down state per service and rewrites a BIRD configuration
//! fragment whenever that state changes. Each fragment defines filter
//! functions returning whether a route's prefix belongs to a currently
//! healthy service, so BIRD advertises exactly the prefixes whose services
//! are up.
//!
//! | Area | Description | Key types |
//! |------|-------------|-----------|
//! | **Probing** | Periodic check commands with rise/fail hysteresis and deadlines. | [`Probe`], [`ServiceState`] |
//! | **Aggregation** | One supervisor task owning the prefix state, fed by probe events. | [`Supervisor`], [`Action`] |
//! | **Fragments** | Deterministic rendering, atomic replace, no-op detection. | [`PrefixCollection`], [`bird::update_config`] |
//! | **Reloading** | Deadline-bounded reload command with startup reconciliation. | [`bird::reload`] |
//! | **Configuration** | TOML loading with validation and defaulting. | [`Config`], [`ServiceSpec`] |
//!
//! The supervisor is the single writer of the fragment file: probes only
//! ever talk to it over a bounded channel, and the write+reload pipeline
//! runs inline on the supervisor task.

pub mod action;
pub mod bird;
pub mod config;
pub mod error;
pub mod metrics;
pub mod metrics_server;
pub mod prefix;
pub mod probe;
pub mod signals;
pub mod supervisor;

pub use action::Action;
pub use config::{Config, ServiceSpec};
pub use error::{ConfigError, ProbeError, ReloadError};
pub use prefix::{PrefixCollection, PrefixSet};
pub use probe::{Probe, ServiceState};
pub use supervisor::Supervisor;
