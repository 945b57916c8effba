//! Stepper Common Library
//!
//! Shared constants, configuration model, error taxonomy and hardware
//! traits for the stepper motion core.
//!
//! # Module Structure
//!
//! - [`consts`] - Table sizes and hardware limits
//! - [`config`] - Configuration model, validation and TOML loading
//! - [`error`] - Configuration, request, runtime and fatal errors
//! - [`hal`] - Hardware abstraction traits
//! - [`report`] - Outbound report types
//! - [`types`] - Direction and lock-out enums
//! - [`prelude`] - Common re-exports for convenience

pub mod config;
pub mod consts;
pub mod error;
pub mod hal;
pub mod prelude;
pub mod report;
pub mod types;
