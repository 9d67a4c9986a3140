//! Operator HTTP surface. Read-mostly: the only writes are the risk kill switch.

pub mod monitor;
pub mod risk;
