//! The ControlAPI envelope: every externally reachable operation returns a
//! uniform `{success, message, error, data}` document the web layer can
//! render directly. No operation throws past this boundary; failures come
//! back as a stable `{code, message}` pair.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::controller::Controller;
use crate::error::ControllerError;
use crate::provision::ProvisionOutcome;
use crate::state::{Provider, SettingsUpdate};

#[derive(Serialize, Clone, Debug)]
pub struct ApiErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    fn ok(message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            data,
        }
    }

    fn err(e: ControllerError) -> Self {
        error!(code = e.code(), error = %e, "operation failed");
        Self {
            success: false,
            message: None,
            error: Some(ApiErrorBody {
                code: e.code(),
                message: e.to_string(),
            }),
            data: None,
        }
    }
}

fn respond<T: Serialize>(
    result: crate::error::Result<T>,
    message: impl FnOnce(&T) -> String,
) -> ApiResponse {
    match result {
        Ok(value) => {
            let msg = message(&value);
            ApiResponse::ok(msg, serde_json::to_value(&value).ok())
        }
        Err(e) => ApiResponse::err(e),
    }
}

/// The synchronized façade handed to the web layer.
#[derive(Clone)]
pub struct ControlApi {
    controller: Arc<Controller>,
}

impl ControlApi {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn status(&self, full: bool) -> ApiResponse {
        let report = self.controller.status(full);
        ApiResponse::ok("status", serde_json::to_value(&report).ok())
    }

    pub fn add_key(&self, key: &str) -> ApiResponse {
        respond(self.controller.add_key(key), |added| {
            format!("added API key {}", added.key)
        })
    }

    pub fn remove_key(&self, key: &str) -> ApiResponse {
        match self.controller.remove_key(key) {
            Ok(()) => ApiResponse::ok("removed API key", None),
            Err(e) => ApiResponse::err(e),
        }
    }

    pub fn activate_key(&self, key: &str) -> ApiResponse {
        match self.controller.activate_key(key) {
            Ok(masked) => ApiResponse::ok(
                format!("activated API key {masked}"),
                Some(json!({ "active_key": masked })),
            ),
            Err(e) => ApiResponse::err(e),
        }
    }

    pub fn rotate(&self) -> ApiResponse {
        match self.controller.rotate() {
            Ok(masked) => ApiResponse::ok(
                format!("rotated to API key {masked}"),
                Some(json!({ "active_key": masked })),
            ),
            Err(e) => ApiResponse::err(e),
        }
    }

    pub async fn test_current_key(&self) -> ApiResponse {
        respond(self.controller.test_current_key().await, |report| {
            report.message.clone()
        })
    }

    pub async fn switch_provider(&self, provider: Provider) -> ApiResponse {
        match self.controller.switch_provider(provider).await {
            Ok(provider) => ApiResponse::ok(
                format!("switched to {provider}"),
                Some(json!({ "current_provider": provider })),
            ),
            Err(e) => ApiResponse::err(e),
        }
    }

    pub fn update_model(&self, model_id: &str) -> ApiResponse {
        match self.controller.update_model(model_id) {
            Ok(()) => ApiResponse::ok(format!("updated model to {model_id}"), None),
            Err(e) => ApiResponse::err(e),
        }
    }

    pub fn update_settings(&self, update: SettingsUpdate) -> ApiResponse {
        respond(self.controller.update_settings(update), |_| {
            "updated settings".to_string()
        })
    }

    pub fn adopt_key(&self, outcome: ProvisionOutcome) -> ApiResponse {
        respond(self.controller.adopt_key(outcome), |added| {
            format!("adopted provisioned API key {}", added.key)
        })
    }
}
