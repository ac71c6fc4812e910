//! Client-side network stack: heartbeat, sequence tracking, request-API rate
//! limiting, reconciliation, and the connection-owning network manager.

pub mod heartbeat;
pub mod network;
pub mod rate_limit;
pub mod reconciler;
pub mod sequence;

pub use heartbeat::HeartbeatMonitor;
pub use network::{NetCommand, NetEvent, NetworkConfig, NetworkHandle, NetworkManager};
pub use rate_limit::{RestRateLimiter, RestRateLimiterConfig};
pub use reconciler::{ReconcileEvent, Reconciler};
pub use sequence::{Gap, SequenceTracker};
