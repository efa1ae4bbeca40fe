// # -----------------------------
// # crates/common/src/lib.rs
// # -----------------------------
//! Shared building blocks for the watchdog agent, hub and observer.
//!
//! Every process writes through a [`logsink::DailyLog`], speaks the alert
//! model from [`alert`], and stops on a single [`shutdown::Shutdown`] signal.

pub mod alert;
pub mod logsink;
pub mod rpc;
pub mod shutdown;
pub mod telemetry;

pub use alert::{AlertMsg, AlertRecord, Origin, PushFrame, Status};
pub use logsink::{DailyLog, RotationBoundary};
pub use shutdown::{Shutdown, ShutdownListener};

/// Default address of the hub's alert RPC listener.
pub const DEFAULT_RPC_ADDR: &str = "localhost:40090";
/// Default address of the hub's observer push channel.
pub const DEFAULT_PUSH_ADDR: &str = "localhost:40080";
/// Path observers upgrade on.
pub const PUSH_ENDPOINT: &str = "/ws/connect";
