//! # engine
//!
//! ```text
//!            ┌────────────┐  analyze → transform → open   ┌──────────────────┐
//!  cycle ──▶ │ Scheduler  │ ────────────────────────────▶ │ ExecutionGateway │
//!            └─────┬──────┘                               └────────▲─────────┘
//!                  │ start(symbol)                                 │ get / modify / close
//!            ┌─────▼──────────────┐   spawn 1 per symbol   ┌───────┴─────────┐
//!            │ MonitorSupervisor  │ ─────────────────────▶ │ PositionMonitor │
//!            └────────────────────┘                        └───────┬─────────┘
//!                                   put / get                      │
//!                          SignalStore ◀───────────────────────────┘
//! ```

pub mod monitor;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod signal_store;
pub mod supervisor;
pub mod transform;

pub use monitor::{MonitorConfig, MonitorContext};
pub use report::Journal;
pub use retry::CallPolicy;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerDeps};
pub use signal_store::SignalStore;
pub use supervisor::MonitorSupervisor;
