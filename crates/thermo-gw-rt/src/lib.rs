//! ---
//! tgw_section: "01-core-functionality"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Runtime helpers supporting the scheduler."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
//! Deadline and task-tracking helpers for the gateway runtime.

pub mod scheduling;

pub use scheduling::{Deadline, DrainReport, TaskTracker};
