//! Tool modules for Switchbox agent.

pub mod base;
pub mod registry;
pub mod filesystem;
pub mod shell;
pub mod web;
pub mod message;
pub mod spawn;
pub mod cron;

pub use base::{
    AsyncCallback, AsyncTool, ContextualTool, Tool, optional_bool, optional_i64, optional_string,
    require_string,
};
pub use registry::ToolRegistry;
