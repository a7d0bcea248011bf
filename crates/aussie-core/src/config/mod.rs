//! Platform configuration loading and validation (spec §6).

pub mod settings;
pub mod validation;

pub use settings::{load_settings, AussieSettings};
pub use validation::{ConfigValidator, ValidationResult};
