//! Shared foundation for the switchboard engine: errors, configuration,
//! logging, event fan-out and backoff reconnection.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod reconnect;

pub use config::{Config, HealthConfig, LoggingConfig, ProvidersConfig, RelayConfig};
pub use error::{Error, ErrorKind, Result};
pub use events::{EventBus, EventReceiver};
pub use reconnect::{ReconnectEvent, ReconnectHandler, ReconnectPolicy, ReconnectionScheduler};
