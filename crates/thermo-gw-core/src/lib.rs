//! ---
//! tgw_section: "01-core-functionality"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Gateway scheduling loop and lifecycle."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
//! Scan, read and publish loop bounded by a total runtime budget.

pub mod scheduler;

pub use scheduler::{
    GatewayScheduler, RunSummary, ScanWindow, SchedulerError, SchedulerState,
};
