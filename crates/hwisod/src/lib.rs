//! Hardware isolation daemon library - exposes modules for testing.

pub mod config;
pub mod eco;
pub mod errorlog;
pub mod manager;
pub mod policy;
pub mod publisher;
pub mod registry;
pub mod reporter;
pub mod resolver;
pub mod store;
pub mod watcher;
