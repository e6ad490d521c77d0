//! Job daemon: owns persistent jobs independently of any shell session.
//!
//! [`Daemon`] schedules cron and interval jobs, supervises their processes,
//! records every execution in the [`Registry`](crate::registry::Registry) and
//! serves clients over a Unix socket. [`DaemonClient`] is the client side and
//! implements [`JobManager`](crate::jobs::JobManager).
//!
//! # Example
//!
//! ```rust,no_run
//! use jobsh::daemon::{Daemon, DaemonClient, DaemonConfig};
//! use jobsh::jobs::{JobManager, NewJob, Schedule};
//!
//! # #[tokio::main]
//! # async fn main() -> jobsh::Result<()> {
//! let config = DaemonConfig::in_dir("/tmp/jobsh-demo");
//! let daemon = Daemon::start(config.clone()).await?;
//! tokio::spawn(daemon.run());
//!
//! let client = DaemonClient::from_config(&config);
//! let job = client
//!     .add(NewJob::new("heartbeat", "date").schedule(Schedule::IntervalMs(60_000)))
//!     .await?;
//! println!("added {}", job.id);
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod events;
mod lock;
pub mod protocol;
mod server;
pub(crate) mod store;
mod supervisor;

pub use client::{DaemonClient, TriggerResult};
pub use config::{DaemonConfig, default_socket_path, default_state_dir};
pub use events::{DaemonEvent, EventBus};
pub use lock::InstanceLock;
pub use protocol::DaemonStatus;
pub use server::{Daemon, DaemonContext};
pub use store::JobStore;
