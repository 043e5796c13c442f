//! Seam for the account-provisioning collaborator.
//!
//! The browser-automation subsystem that signs up accounts and mints fresh
//! credentials lives outside this crate. The controller never initiates or
//! awaits that flow; it only accepts its result through
//! [`crate::controller::Controller::adopt_key`].

use serde::{Deserialize, Serialize};

/// A freshly minted credential handed over by the provisioning flow.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProvisionedCredential {
    pub key: String,
    /// Account the key was minted under, when the collaborator knows it.
    pub account: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("account provisioning failed: {0}")]
    Failed(String),
}

pub type ProvisionOutcome = Result<ProvisionedCredential, ProvisionError>;
