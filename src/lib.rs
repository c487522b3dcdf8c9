//! Flare RPC Platform
//!
//! Service registration, discovery and weighted priority load balancing on top of etcd.
//!
//! - Servers publish their address and attributes under a lease with [`Registrar`] and keep it alive.
//! - Clients resolve the live membership of a service with [`Resolver`] and keep it fresh via watch.
//! - [`Balancer`] keeps one connection per instance and rebuilds a weighted, priority-tiered
//!   [`Picker`] on every change; [`BalancedChannel`] consults it once per call.

pub mod attributes;
pub mod balancer;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod platform;
pub mod registry;
pub mod retry;
pub mod store;

// Re-exports
pub use attributes::{Attributes, MAX_WEIGHT, PRIORITY_KEY, WEIGHT_KEY};
pub use balancer::{
    Balancer, ChildState, ConnectivityState, Connector, PickError, Picker, PickerBuilder, ResolverTarget,
    TonicConnector, UpdateArbiter,
};
pub use client::BalancedChannel;
pub use config::{ClientConfig, EtcdConfig, PlatformConfig, RegistrarConfig};
pub use discovery::{InstanceRecord, MembershipSnapshot, MembershipStream, Resolver};
pub use error::{ErrorCategory, ErrorCode, PlatformError, Result};
pub use platform::{Platform, normalize_prefix, validate_server_name, validate_target};
pub use registry::Registrar;
pub use retry::{ExponentialBackoffPolicy, FixedRetryPolicy, RetryPolicy};
pub use store::{CoordinationStore, EtcdStore, MemoryStore};
