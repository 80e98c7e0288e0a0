//! # Docketflow Common Library
//!
//! Shared code for the docketflow delivery service including:
//! - Error types
//! - Event types (DeliveryEvent enum) and the EventBus
//! - Settings model and configuration loading

pub mod config;
pub mod error;
pub mod events;

pub use config::{Settings, SettingsProvider};
pub use error::{Error, Result};
