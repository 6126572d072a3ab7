pub mod check;
pub mod config;
pub mod history;
pub mod logging;
pub mod manifest;
pub mod orchestrator;
pub mod remote;
pub mod version;
