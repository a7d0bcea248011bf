//! Structured console logging (spec §6 ambient logging surface).

pub mod logger;

pub use logger::configure_logger;
