//! Domain models shared across the whole engine.

pub mod instrument;
pub mod policy;
pub mod position;
pub mod signal;

pub use instrument::InstrumentProfile;
pub use policy::RiskPolicy;
pub use position::{MonitorPhase, MonitorState, Position, Ticket};
pub use signal::{Direction, Signal};
