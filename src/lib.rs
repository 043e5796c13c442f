//! Key rotation and provider fallback controller.
//!
//! Tracks per-key health for OpenRouter credentials, rotates keys when they
//! exhaust their error budget, and fails over across the fixed provider
//! chain OPENROUTER -> OLLAMA -> PHIND. All mutation of shared state is
//! serialized behind [`controller::Controller`]; the web dashboard and the
//! account-provisioning flow are external collaborators reached through
//! [`api::ControlApi`] and [`provision`].

pub mod api;
pub mod controller;
pub mod error;
pub mod monitor;
pub mod pool;
pub mod probe;
pub mod provision;
pub mod rotation;
pub mod state;
pub mod store;
pub mod util;

pub use api::{ApiResponse, ControlApi};
pub use controller::Controller;
pub use error::{ControllerError, Result};
pub use monitor::HealthMonitor;
pub use state::{ControllerState, Provider, Settings, SettingsUpdate};
pub use store::ConfigStore;
