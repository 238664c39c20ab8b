//! Spiral CLI - command line front end for the spiral mission planner.
//!
//! Binaries:
//! - plan_mission: plan a multi-battery spiral mission and print its JSON

pub mod config;
pub mod report;

pub use config::{load_planner_config, planner_config_from_lookup};
pub use report::summary_line;
