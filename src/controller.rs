//! The controller: provider fallback state machine plus the guarded
//! operations every external caller funnels through.
//!
//! Concurrency contract: all shared state lives behind one mutex. A critical
//! section covers exactly one read-modify-write plus its persistence and is
//! never held across a network call; probes run between two short critical
//! sections and only their outcome is applied under the lock. Operations
//! mutate a draft and install it only after a successful save, so a caller
//! is never left in a "maybe persisted" state.

use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::{ControllerError, Result};
use crate::probe::ProbeClient;
use crate::provision::ProvisionOutcome;
use crate::rotation;
use crate::state::{ControllerState, ModelInfo, Provider, Settings, SettingsUpdate};
use crate::store::ConfigStore;
use crate::util::{mask_key, validate_openrouter_key};

pub struct Controller {
    store: ConfigStore,
    probe: ProbeClient,
    state: Mutex<ControllerState>,
}

/// Masked view of one credential, safe for the status endpoint.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct KeyStatus {
    pub key: String,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_used: Option<OffsetDateTime>,
    pub error_count: u32,
}

#[derive(Serialize, Clone, Debug)]
pub struct StatusReport {
    pub current_provider: Provider,
    pub current_model: Option<String>,
    pub active_key: Option<KeyStatus>,
    pub active_keys: usize,
    pub total_keys: usize,
    pub auto_rotate: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_check: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<StatusDetail>,
}

#[derive(Serialize, Clone, Debug)]
pub struct StatusDetail {
    pub keys: Vec<KeyStatus>,
    pub models: Vec<ModelInfo>,
    pub check_interval_secs: u64,
    pub max_error_count: u32,
}

#[derive(Serialize, Clone, Debug)]
pub struct AddedKey {
    pub key: String,
    pub key_count: usize,
    pub activated: bool,
}

#[derive(Serialize, Clone, Debug)]
pub struct KeyTestReport {
    pub passed: bool,
    pub message: String,
}

/// What a reported failure led to.
#[derive(Clone, Debug, PartialEq)]
pub enum FailureOutcome {
    /// Failure recorded; the key stays active (budget not yet exhausted, or
    /// auto-rotate is off).
    Recorded { error_count: u32 },
    /// The pool rotated to a fresh key.
    Rotated { new_active: String },
    /// The pool was exhausted and the fallback chain switched providers.
    SwitchedProvider(Provider),
}

#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    KeyHealthy,
    KeyFailed(FailureOutcome),
    NoKey,
    ProviderHealthy,
    ProviderUnreachable,
    FellBack(Provider),
    Idle,
}

enum FailureStep {
    Done(FailureOutcome),
    Fallback,
}

impl Controller {
    /// Load persisted state (or defaults) and take ownership of the store.
    pub fn open(store: ConfigStore) -> Result<Self> {
        let state = store.load_or_default()?;
        let probe = ProbeClient::new().map_err(|e| ControllerError::Network(e.to_string()))?;
        Ok(Self {
            store,
            probe,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        // A panicked holder has not installed a draft, so the data is sound.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read<T>(&self, f: impl FnOnce(&ControllerState) -> T) -> T {
        f(&self.lock())
    }

    /// One critical section: mutate a draft, persist it, install it.
    fn mutate<T>(&self, f: impl FnOnce(&mut ControllerState) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        self.store.save(&draft)?;
        *guard = draft;
        Ok(out)
    }

    fn touch(&self) -> Result<()> {
        self.mutate(|state| {
            state.last_check = Some(OffsetDateTime::now_utc());
            Ok(())
        })
    }

    // --- status ---

    pub fn status(&self, full: bool) -> StatusReport {
        self.read(|state| {
            let pool = &state.providers.openrouter.keys;
            let key_status = |k: &crate::state::ApiKey| KeyStatus {
                key: mask_key(&k.value),
                is_active: k.is_active,
                last_used: k.last_used,
                error_count: k.error_count,
            };
            let detail = full.then(|| StatusDetail {
                keys: pool.iter().map(key_status).collect(),
                models: state.models_for(state.current_provider).to_vec(),
                check_interval_secs: state.settings.check_interval_secs,
                max_error_count: state.settings.max_error_count,
            });
            StatusReport {
                current_provider: state.current_provider,
                current_model: state.current_model().map(str::to_string),
                active_key: pool.active().map(key_status),
                active_keys: pool.iter().filter(|k| k.is_active).count(),
                total_keys: pool.len(),
                auto_rotate: state.settings.auto_rotate,
                last_check: state.last_check,
                detail,
            }
        })
    }

    pub fn settings(&self) -> Settings {
        self.read(|state| state.settings)
    }

    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.read(|state| state.settings.check_interval_secs))
    }

    // --- key management ---

    pub fn add_key(&self, value: &str) -> Result<AddedKey> {
        validate_openrouter_key(value)?;
        let value = value.trim();
        self.mutate(|state| {
            let pool = &mut state.providers.openrouter.keys;
            let activated = pool.is_empty();
            pool.add(value)?;
            info!(key = %mask_key(value), activated, "added API key");
            Ok(AddedKey {
                key: mask_key(value),
                key_count: pool.len(),
                activated,
            })
        })
    }

    /// Remove a key. Removing the active key while standbys exist hands the
    /// active slot to the healthiest standby first; removing the sole
    /// remaining key is always rejected.
    pub fn remove_key(&self, value: &str) -> Result<()> {
        self.mutate(|state| {
            let pool = &mut state.providers.openrouter.keys;
            if !pool.contains(value) {
                return Err(ControllerError::NotFound(mask_key(value)));
            }
            let is_active = pool.active().is_some_and(|k| k.value == value);
            if is_active && pool.len() > 1 {
                // Threshold-free rotation: for removal any standby will do.
                rotation::rotate(pool, u32::MAX)?;
            }
            pool.remove(value)?;
            info!(key = %mask_key(value), "removed API key");
            Ok(())
        })
    }

    pub fn activate_key(&self, value: &str) -> Result<String> {
        self.mutate(|state| {
            state.providers.openrouter.keys.activate(value)?;
            let masked = mask_key(value);
            info!(key = %masked, "activated API key");
            Ok(masked)
        })
    }

    /// Manual rotation. Bypasses the error-threshold trigger; the exhaustion
    /// signal is surfaced to the caller instead of entering the fallback
    /// chain, since the caller asked for a rotation, not a provider change.
    pub fn rotate(&self) -> Result<String> {
        self.mutate(|state| {
            let max = state.settings.max_error_count;
            let value = rotation::rotate(&mut state.providers.openrouter.keys, max)?;
            Ok(mask_key(&value))
        })
    }

    /// Register a credential handed over by the account-provisioning
    /// collaborator and make it active.
    pub fn adopt_key(&self, outcome: ProvisionOutcome) -> Result<AddedKey> {
        let credential = outcome.map_err(|e| ControllerError::Validation(e.to_string()))?;
        validate_openrouter_key(&credential.key)?;
        let value = credential.key.trim().to_string();
        self.mutate(|state| {
            let pool = &mut state.providers.openrouter.keys;
            pool.add(&value)?;
            pool.activate(&value)?;
            info!(key = %mask_key(&value), "adopted provisioned API key");
            Ok(AddedKey {
                key: mask_key(&value),
                key_count: pool.len(),
                activated: true,
            })
        })
    }

    // --- probe outcome reporting (shared by monitor and foreground) ---

    pub fn report_success(&self, key: &str) -> Result<()> {
        self.mutate(|state| {
            state.providers.openrouter.keys.record_success(key)?;
            state.last_check = Some(OffsetDateTime::now_utc());
            Ok(())
        })
    }

    /// Record a failed probe outcome. Under `auto_rotate`, an exhausted error
    /// budget rotates the pool, and an exhausted pool enters the fallback
    /// chain (OPENROUTER -> OLLAMA -> PHIND).
    pub async fn report_failure(&self, key: &str) -> Result<FailureOutcome> {
        let step = self.mutate(|state| {
            let max = state.settings.max_error_count;
            let auto = state.settings.auto_rotate;
            let pool = &mut state.providers.openrouter.keys;
            let error_count = pool.record_failure(key)?;
            state.last_check = Some(OffsetDateTime::now_utc());

            if !auto || error_count < max {
                return Ok(FailureStep::Done(FailureOutcome::Recorded { error_count }));
            }
            match rotation::rotate(pool, max) {
                Ok(value) => Ok(FailureStep::Done(FailureOutcome::Rotated {
                    new_active: mask_key(&value),
                })),
                Err(ControllerError::PoolExhausted) => Ok(FailureStep::Fallback),
                Err(e) => Err(e),
            }
        })?;

        match step {
            FailureStep::Done(outcome) => Ok(outcome),
            FailureStep::Fallback => self.fall_back_from_openrouter().await,
        }
    }

    async fn fall_back_from_openrouter(&self) -> Result<FailureOutcome> {
        warn!("OpenRouter key pool exhausted, entering fallback chain");
        match self.switch_provider(Provider::Ollama).await {
            Ok(provider) => Ok(FailureOutcome::SwitchedProvider(provider)),
            Err(ControllerError::ProviderUnavailable { reason, .. }) => {
                warn!(%reason, "Ollama unavailable, falling back to Phind");
                let provider = self.switch_provider(Provider::Phind).await?;
                Ok(FailureOutcome::SwitchedProvider(provider))
            }
            Err(e) => Err(e),
        }
    }

    // --- provider switching ---

    fn commit_switch(&self, provider: Provider) -> Result<()> {
        self.mutate(|state| {
            if provider == Provider::Openrouter && state.providers.openrouter.keys.is_empty() {
                return Err(ControllerError::NoActiveKey(Provider::Openrouter));
            }
            state.current_provider = provider;
            state.last_check = Some(OffsetDateTime::now_utc());
            Ok(())
        })
    }

    /// Explicit provider switch. Ollama is probed before committing, so a
    /// failed switch leaves `current_provider` unchanged. Phind always
    /// succeeds; the browser launch belongs to the dashboard, the controller
    /// only records the change.
    pub async fn switch_provider(&self, provider: Provider) -> Result<Provider> {
        match provider {
            Provider::Openrouter => self.commit_switch(Provider::Openrouter)?,
            Provider::Ollama => {
                let api_base = self.read(|s| s.providers.ollama.api_base.clone());
                if let Err(e) = self.probe.check_ollama(&api_base).await {
                    return Err(ControllerError::ProviderUnavailable {
                        provider: Provider::Ollama,
                        reason: e.to_string(),
                    });
                }
                self.commit_switch(Provider::Ollama)?;
            }
            Provider::Phind => self.commit_switch(Provider::Phind)?,
        }
        info!(%provider, "switched provider");
        Ok(provider)
    }

    pub fn update_model(&self, model_id: &str) -> Result<()> {
        self.mutate(|state| {
            let provider = state.current_provider;
            if provider == Provider::Phind {
                return Err(ControllerError::Validation(
                    "phind has no selectable models".to_string(),
                ));
            }
            if !state.models_for(provider).iter().any(|m| m.id == model_id) {
                return Err(ControllerError::Validation(format!(
                    "invalid model id for {provider}: {model_id}"
                )));
            }
            match provider {
                Provider::Openrouter => {
                    state.providers.openrouter.current_model = model_id.to_string();
                }
                Provider::Ollama => {
                    state.providers.ollama.current_model = model_id.to_string();
                }
                Provider::Phind => {}
            }
            info!(%provider, model = %model_id, "updated model");
            Ok(())
        })
    }

    pub fn update_settings(&self, update: SettingsUpdate) -> Result<Settings> {
        if update.check_interval_secs == Some(0) {
            return Err(ControllerError::Validation(
                "check_interval_secs must be positive".to_string(),
            ));
        }
        if update.max_error_count == Some(0) {
            return Err(ControllerError::Validation(
                "max_error_count must be positive".to_string(),
            ));
        }
        self.mutate(|state| {
            if let Some(auto_rotate) = update.auto_rotate {
                state.settings.auto_rotate = auto_rotate;
            }
            if let Some(interval) = update.check_interval_secs {
                state.settings.check_interval_secs = interval;
            }
            if let Some(max) = update.max_error_count {
                state.settings.max_error_count = max;
            }
            info!(settings = ?state.settings, "updated settings");
            Ok(state.settings)
        })
    }

    // --- probing ---

    /// Synchronous probe of the active OpenRouter key, for user-triggered
    /// verification. The outcome flows through the same reporting entry
    /// points the monitor uses.
    pub async fn test_current_key(&self) -> Result<KeyTestReport> {
        let snapshot = self.read(|state| {
            let or = &state.providers.openrouter;
            or.keys
                .active()
                .map(|k| (or.api_base.clone(), k.value.clone()))
        });
        let (api_base, key) =
            snapshot.ok_or(ControllerError::NoActiveKey(Provider::Openrouter))?;

        match self.probe.test_openrouter_key(&api_base, &key).await {
            Ok(()) => {
                self.report_success(&key)?;
                Ok(KeyTestReport {
                    passed: true,
                    message: "API key is valid".to_string(),
                })
            }
            Err(e) => {
                let outcome = self.report_failure(&key).await?;
                let message = match outcome {
                    FailureOutcome::Recorded { error_count } => {
                        format!("API key test failed ({error_count} consecutive errors): {e}")
                    }
                    FailureOutcome::Rotated { new_active } => {
                        format!("API key test failed, rotated to {new_active}: {e}")
                    }
                    FailureOutcome::SwitchedProvider(p) => {
                        format!("API key test failed, fell back to {p}: {e}")
                    }
                };
                Ok(KeyTestReport {
                    passed: false,
                    message,
                })
            }
        }
    }

    /// One health-check tick. Never panics the caller's loop; probe failures
    /// become bookkeeping, and `last_check` is stamped even on no-op ticks so
    /// a stalled monitor is observable from the status endpoint.
    pub async fn run_health_check(&self) -> Result<TickOutcome> {
        let provider = self.read(|state| state.current_provider);
        match provider {
            Provider::Openrouter => {
                let snapshot = self.read(|state| {
                    let or = &state.providers.openrouter;
                    or.keys
                        .active()
                        .map(|k| (or.api_base.clone(), k.value.clone()))
                });
                let Some((api_base, key)) = snapshot else {
                    warn!("no active OpenRouter key to check");
                    self.touch()?;
                    return Ok(TickOutcome::NoKey);
                };
                match self.probe.test_openrouter_key(&api_base, &key).await {
                    Ok(()) => {
                        self.report_success(&key)?;
                        Ok(TickOutcome::KeyHealthy)
                    }
                    Err(e) => {
                        warn!(key = %mask_key(&key), error = %e, "active key failed its probe");
                        let outcome = self.report_failure(&key).await?;
                        Ok(TickOutcome::KeyFailed(outcome))
                    }
                }
            }
            Provider::Ollama => {
                let api_base = self.read(|state| state.providers.ollama.api_base.clone());
                match self.probe.check_ollama(&api_base).await {
                    Ok(()) => {
                        self.touch()?;
                        Ok(TickOutcome::ProviderHealthy)
                    }
                    Err(e) => {
                        warn!(error = %e, "Ollama unreachable");
                        if self.read(|state| state.settings.auto_rotate) {
                            let provider = self.switch_provider(Provider::Phind).await?;
                            Ok(TickOutcome::FellBack(provider))
                        } else {
                            self.touch()?;
                            Ok(TickOutcome::ProviderUnreachable)
                        }
                    }
                }
            }
            // Phind is browser-delegated; nothing to probe.
            Provider::Phind => {
                self.touch()?;
                Ok(TickOutcome::Idle)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn with_state(&self, f: impl FnOnce(&mut ControllerState)) {
        self.mutate(|state| {
            f(state);
            Ok(())
        })
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::{ProvisionError, ProvisionedCredential};

    fn test_controller() -> (Controller, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("state.json"));
        (Controller::open(store).unwrap(), dir)
    }

    fn key(n: u32) -> String {
        format!("sk-or-test-0123456789abcdef0123456789-{n:04}")
    }

    #[test]
    fn add_key_bootstraps_an_empty_pool() {
        let (ctl, _dir) = test_controller();
        let added = ctl.add_key(&key(1)).unwrap();
        assert!(added.activated);
        assert_eq!(added.key_count, 1);

        let added = ctl.add_key(&key(2)).unwrap();
        assert!(!added.activated);
        assert_eq!(added.key_count, 2);
    }

    #[test]
    fn add_key_rejects_malformed_input_before_touching_state() {
        let (ctl, _dir) = test_controller();
        assert!(matches!(
            ctl.add_key("not-a-key"),
            Err(ControllerError::Validation(_))
        ));
        assert_eq!(ctl.status(false).total_keys, 0);
    }

    #[test]
    fn remove_sole_key_is_rejected() {
        let (ctl, _dir) = test_controller();
        ctl.add_key(&key(1)).unwrap();
        assert!(matches!(
            ctl.remove_key(&key(1)),
            Err(ControllerError::Validation(_))
        ));
        assert_eq!(ctl.status(false).total_keys, 1);
    }

    #[test]
    fn remove_active_key_rotates_away_first() {
        let (ctl, _dir) = test_controller();
        ctl.add_key(&key(1)).unwrap();
        ctl.add_key(&key(2)).unwrap();

        ctl.remove_key(&key(1)).unwrap();
        let status = ctl.status(false);
        assert_eq!(status.total_keys, 1);
        assert_eq!(status.active_keys, 1);
        assert_eq!(status.active_key.unwrap().key, mask_key(&key(2)));
    }

    #[test]
    fn manual_rotate_surfaces_exhaustion() {
        let (ctl, _dir) = test_controller();
        ctl.add_key(&key(1)).unwrap();
        ctl.add_key(&key(2)).unwrap();
        ctl.with_state(|s| s.providers.openrouter.keys.set_error_count(&key(2), 3));

        assert!(matches!(ctl.rotate(), Err(ControllerError::PoolExhausted)));
        // The failed rotation changed nothing.
        assert_eq!(ctl.status(false).active_key.unwrap().key, mask_key(&key(1)));
    }

    #[test]
    fn update_model_validates_membership() {
        let (ctl, _dir) = test_controller();
        ctl.update_model("anthropic/claude-3-haiku").unwrap();
        assert!(matches!(
            ctl.update_model("no/such-model"),
            Err(ControllerError::Validation(_))
        ));
        assert_eq!(
            ctl.status(false).current_model.as_deref(),
            Some("anthropic/claude-3-haiku")
        );
    }

    #[test]
    fn update_settings_validates_positivity() {
        let (ctl, _dir) = test_controller();
        assert!(ctl
            .update_settings(SettingsUpdate {
                check_interval_secs: Some(0),
                ..Default::default()
            })
            .is_err());
        assert!(ctl
            .update_settings(SettingsUpdate {
                max_error_count: Some(0),
                ..Default::default()
            })
            .is_err());

        let settings = ctl
            .update_settings(SettingsUpdate {
                auto_rotate: Some(false),
                check_interval_secs: Some(60),
                max_error_count: None,
            })
            .unwrap();
        assert!(!settings.auto_rotate);
        assert_eq!(settings.check_interval_secs, 60);
        assert_eq!(settings.max_error_count, 3);
    }

    #[test]
    fn adopt_key_registers_and_activates() {
        let (ctl, _dir) = test_controller();
        ctl.add_key(&key(1)).unwrap();

        let added = ctl
            .adopt_key(Ok(ProvisionedCredential {
                key: key(2),
                account: Some("fresh@example.com".to_string()),
            }))
            .unwrap();
        assert!(added.activated);
        assert_eq!(ctl.status(false).active_key.unwrap().key, mask_key(&key(2)));
    }

    #[test]
    fn adopt_key_surfaces_provisioning_failure() {
        let (ctl, _dir) = test_controller();
        let outcome = Err(ProvisionError::Failed("mailbox verification timed out".into()));
        assert!(matches!(
            ctl.adopt_key(outcome),
            Err(ControllerError::Validation(_))
        ));
    }

    #[test]
    fn status_masks_key_material() {
        let (ctl, _dir) = test_controller();
        ctl.add_key(&key(1)).unwrap();
        let report = ctl.status(true);
        let detail = report.detail.unwrap();
        assert!(!detail.keys[0].key.contains("0123456789abcdef"));
        assert_eq!(detail.max_error_count, 3);
    }

    #[test]
    fn switch_to_openrouter_requires_a_key() {
        let (ctl, _dir) = test_controller();
        let err = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(ctl.switch_provider(Provider::Openrouter))
            .unwrap_err();
        assert!(matches!(err, ControllerError::NoActiveKey(_)));
    }
}
