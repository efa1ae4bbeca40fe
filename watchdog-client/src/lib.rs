//! Watchdog client side.
//!
//! The agent loads its [`config`], runs each task on its own schedule
//! ([`scheduler`]) through the [`engine`], and reports failures to the hub
//! over a [`transport`]. [`observer`] backs the `wdc` terminal client.

pub mod config;
pub mod engine;
pub mod observer;
pub mod scheduler;
pub mod transport;

pub use config::{Action, AgentConfig, ConfigError, Task};
pub use engine::{Engine, EscalationPolicy, ExecutionReport};
pub use scheduler::{Runner, SchedulerHandle};
pub use transport::{AlertTransport, DeliveryPolicy, RpcTransport, TransportError};
