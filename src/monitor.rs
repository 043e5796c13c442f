//! Background health-check loop.
//!
//! One task, sequential ticks: a slow probe delays the next tick instead of
//! overlapping it (single-flight). The interval is re-read from settings on
//! every iteration so `update_settings` takes effect without a restart. A
//! failed tick is logged and the loop continues; only the shutdown signal
//! ends it.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::controller::Controller;

pub struct HealthMonitor {
    controller: Arc<Controller>,
    shutdown: watch::Receiver<bool>,
}

impl HealthMonitor {
    pub fn new(controller: Arc<Controller>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            controller,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!("health monitor started");
        loop {
            let interval = self.controller.check_interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown.changed() => break,
            }

            match self.controller.run_health_check().await {
                Ok(outcome) => debug!(?outcome, "health check tick"),
                Err(e) => error!(error = %e, "health check tick failed"),
            }
        }
        info!("health monitor stopped");
    }
}
