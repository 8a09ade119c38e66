//! Command handlers -- one module per subcommand

pub mod config;
pub mod replay;
pub mod run;
pub mod validate_events;
pub mod verify;
