/*
 * This file is part of Fancontrol Center.
 *
 * Copyright (C) 2025 Fancontrol Center contributors
 *
 * Fancontrol Center is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Fancontrol Center is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Fancontrol Center. If not, see <https://www.gnu.org/licenses/>.
 */

//! Orchestration of settings, daemon config, profiles and the service
//! manager.
//!
//! The coordinator owns the single mutable instance of everything: the
//! settings store, the config document, the profile list, the device
//! snapshot, the display models and the service-manager handle. All errors
//! that reach the user funnel through [`ApplyCoordinator::handle_error`],
//! which suppresses consecutive duplicates.

use std::path::PathBuf;

use serde_json::json;

use crate::document::ConfigDocument;
use crate::hwmon::{self, Device};
use crate::logger;
use crate::models::DisplayModels;
use crate::profiles::{ApplyOutcome, ProfileError, ProfileManager, SaveOutcome};
use crate::service::ServiceManager;
use crate::settings::{SettingsStore, PREFERENCES};

pub const MIN_TEMP_KEY: &str = "MinTemp";
pub const MAX_TEMP_KEY: &str = "MaxTemp";
pub const SERVICE_NAME_KEY: &str = "ServiceName";
pub const CONFIG_URL_KEY: &str = "ConfigUrl";
pub const SHOW_TRAY_KEY: &str = "ShowTray";
pub const START_MINIMIZED_KEY: &str = "StartMinimized";

pub const DEFAULT_MIN_TEMP: f64 = 0.0;
pub const DEFAULT_MAX_TEMP: f64 = 100.0;
pub const DEFAULT_SERVICE_NAME: &str = "fancontrol";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/fancontrol";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Recoverable; the user should know but can continue.
    Warning,
    /// Blocks the primary purpose (applying fan settings).
    Critical,
}

pub struct ApplyCoordinator {
    settings: SettingsStore,
    document: ConfigDocument,
    profiles: ProfileManager,
    devices: Vec<Device>,
    models: DisplayModels,
    service: Box<dyn ServiceManager>,
    config_valid: bool,
    last_error: Option<String>,
    error_log: Vec<(String, Severity)>,
}

impl ApplyCoordinator {
    /// Construct and scan the host's device tree once.
    pub fn new(settings: SettingsStore, service: Box<dyn ServiceManager>) -> Self {
        let mut coordinator = Self::with_devices(settings, service, Vec::new());
        match hwmon::scan() {
            Ok(devices) => coordinator.devices = devices,
            Err(e) => {
                coordinator.handle_error(&format!("sensor scan failed: {}", e), Severity::Warning)
            }
        }
        coordinator
    }

    /// Construct with an already-scanned device snapshot (hosts that ran
    /// [`hwmon::spawn_scan`], tests).
    pub fn with_devices(
        settings: SettingsStore,
        service: Box<dyn ServiceManager>,
        devices: Vec<Device>,
    ) -> Self {
        Self {
            settings,
            document: ConfigDocument::new(),
            profiles: ProfileManager::default(),
            devices,
            models: DisplayModels::new(),
            service,
            config_valid: false,
            last_error: None,
            error_log: Vec::new(),
        }
    }

    /// Replace the device snapshot, e.g. when an async scan completes.
    pub fn set_devices(&mut self, devices: Vec<Device>) {
        self.devices = devices;
        self.models.rebuild_sensors(&self.devices, &self.document);
    }

    /// Load preferences, the daemon config they point at, and the profile
    /// slots; refresh the service manager's notion of the target unit and
    /// every derived read view.
    pub fn load(&mut self) {
        if let Err(e) = self.settings.load() {
            self.handle_error(
                &format!("could not read preferences, using defaults: {}", e),
                Severity::Warning,
            );
        }

        let url = self.config_url();
        self.load_document(&url);

        let name = self.service_name();
        self.service.set_service_name(&name);
        self.service.reset();

        self.reload_profiles();
        self.models.rebuild_sensors(&self.devices, &self.document);

        logger::log_event(
            "loaded",
            json!({
                "config": url.display().to_string(),
                "valid": self.config_valid,
                "profiles": self.profiles.len(),
            }),
        );
    }

    fn load_document(&mut self, url: &std::path::Path) {
        match self.document.load(url) {
            Ok(issues) => {
                self.config_valid = true;
                for issue in issues {
                    self.handle_error(&issue.to_string(), Severity::Warning);
                }
            }
            Err(e) => {
                self.config_valid = false;
                self.handle_error(
                    &format!("could not load {}: {}", url.display(), e),
                    Severity::Critical,
                );
            }
        }
    }

    fn reload_profiles(&mut self) {
        let (profiles, healed) = ProfileManager::from_store(&self.settings);
        self.profiles = profiles;
        if healed {
            self.handle_error(
                "stored profiles were misaligned and have been repaired",
                Severity::Warning,
            );
            self.profiles.sync_to_store(&mut self.settings);
        }
        self.models.reset_profiles(self.profiles.names());
    }

    /// Anything waiting to be written or reloaded? Pure read, no side
    /// effects.
    pub fn needs_apply(&self) -> bool {
        self.document.needs_save() || self.settings.is_dirty() || self.service.needs_apply()
    }

    /// Persist the document and the preferences, then hand the service
    /// manager its pending work together with whether the config file
    /// actually changed. Safe to call when nothing changed.
    pub fn apply(&mut self) {
        if !running_as_root() {
            self.handle_info("applying without root privileges; writing the daemon config may fail");
        }

        let url = self.config_url();
        let changed = match self.document.save(&url) {
            Ok(changed) => Some(changed),
            Err(e) => {
                self.handle_error(
                    &format!("could not save {}: {}", url.display(), e),
                    Severity::Critical,
                );
                None
            }
        };

        if let Err(e) = self.settings.save() {
            self.handle_error(
                &format!("could not save preferences: {}", e),
                Severity::Critical,
            );
        }

        if let Some(changed) = changed {
            if let Err(e) = self.service.apply(changed) {
                self.handle_error(&format!("service manager: {}", e), Severity::Critical);
            }
        }

        logger::log_event("applied", json!({ "config_changed": changed }));
    }

    /// Discard in-memory edits: reload preferences, reload the document if
    /// it diverged, and put the service manager back in line with the
    /// (now reverted) service name.
    pub fn reset(&mut self) {
        if let Err(e) = self.settings.load() {
            self.handle_error(
                &format!("could not re-read preferences: {}", e),
                Severity::Warning,
            );
        }

        let url = self.config_url();
        if self.document.needs_save() || self.document.path() != Some(url.as_path()) {
            self.load_document(&url);
        }

        let name = self.service_name();
        self.service.set_service_name(&name);
        self.service.reset();

        self.reload_profiles();
        self.models.rebuild_sensors(&self.devices, &self.document);

        logger::log_event("reset", json!({}));
    }

    // Typed preference views. A missing key falls back to the documented
    // default; the store itself never invents values.

    pub fn min_temp(&self) -> f64 {
        self.settings
            .get_real(PREFERENCES, MIN_TEMP_KEY)
            .unwrap_or(DEFAULT_MIN_TEMP)
    }

    pub fn max_temp(&self) -> f64 {
        self.settings
            .get_real(PREFERENCES, MAX_TEMP_KEY)
            .unwrap_or(DEFAULT_MAX_TEMP)
    }

    pub fn service_name(&self) -> String {
        self.settings
            .get_str(PREFERENCES, SERVICE_NAME_KEY)
            .unwrap_or(DEFAULT_SERVICE_NAME)
            .to_string()
    }

    pub fn config_url(&self) -> PathBuf {
        PathBuf::from(
            self.settings
                .get_str(PREFERENCES, CONFIG_URL_KEY)
                .unwrap_or(DEFAULT_CONFIG_PATH),
        )
    }

    pub fn show_tray(&self) -> bool {
        self.settings
            .get_bool(PREFERENCES, SHOW_TRAY_KEY)
            .unwrap_or(false)
    }

    pub fn start_minimized(&self) -> bool {
        self.settings
            .get_bool(PREFERENCES, START_MINIMIZED_KEY)
            .unwrap_or(false)
    }

    pub fn set_min_temp(&mut self, temp: f64) {
        if temp != self.min_temp() {
            self.settings.set(PREFERENCES, MIN_TEMP_KEY, temp);
        }
    }

    pub fn set_max_temp(&mut self, temp: f64) {
        if temp != self.max_temp() {
            self.settings.set(PREFERENCES, MAX_TEMP_KEY, temp);
        }
    }

    pub fn set_service_name(&mut self, name: &str) {
        if name != self.service_name() {
            self.settings.set(PREFERENCES, SERVICE_NAME_KEY, name);
            self.service.set_service_name(name);
        }
    }

    /// Point at a different daemon config file. The document reloads from
    /// the new location immediately, discarding unsaved edits — callers who
    /// care check [`needs_apply`](Self::needs_apply) first.
    pub fn set_config_url(&mut self, url: impl Into<PathBuf>) {
        let url = url.into();
        if url != self.config_url() {
            self.load_document(&url);
            self.settings.set(
                PREFERENCES,
                CONFIG_URL_KEY,
                url.to_string_lossy().to_string(),
            );
            self.models.rebuild_sensors(&self.devices, &self.document);
        }
    }

    pub fn set_show_tray(&mut self, on: bool) {
        if on != self.show_tray() {
            self.settings.set(PREFERENCES, SHOW_TRAY_KEY, on);
        }
    }

    pub fn set_start_minimized(&mut self, on: bool) {
        if on != self.start_minimized() {
            self.settings.set(PREFERENCES, START_MINIMIZED_KEY, on);
        }
    }

    // Profiles. `update_model` keeps headless callers from paying for
    // display-model churn they do not render.

    /// Load profile `index` into the live document. Returns whether the
    /// profile is now current.
    pub fn apply_profile(&mut self, index: usize, update_model: bool) -> bool {
        match self.profiles.apply(index, &mut self.document) {
            Ok(outcome) => {
                self.profiles.sync_to_store(&mut self.settings);
                if outcome == ApplyOutcome::Applied {
                    self.models.rebuild_sensors(&self.devices, &self.document);
                }
                logger::log_event(
                    "profile_applied",
                    json!({ "index": index, "noop": outcome == ApplyOutcome::Unchanged }),
                );
                true
            }
            Err(e @ ProfileError::Corrupt { .. }) => {
                self.profiles.sync_to_store(&mut self.settings);
                if update_model {
                    self.models.profile_removed(index);
                }
                self.handle_error(&e.to_string(), Severity::Warning);
                false
            }
            Err(e) => {
                self.handle_error(&e.to_string(), Severity::Warning);
                false
            }
        }
    }

    /// Snapshot the live document under `name`.
    pub fn save_profile(&mut self, name: &str, update_model: bool) -> SaveOutcome {
        let outcome = self.profiles.save(name, &self.document);
        self.profiles.sync_to_store(&mut self.settings);
        if update_model {
            match outcome {
                SaveOutcome::Appended(i) => self.models.profile_inserted(i, name),
                SaveOutcome::Updated(i) => self.models.profile_updated(i, name),
            }
        }
        logger::log_event("profile_saved", json!({ "name": name }));
        outcome
    }

    /// Delete profile `index`; out-of-range is a no-op.
    pub fn delete_profile(&mut self, index: usize, update_model: bool) -> bool {
        if !self.profiles.delete(index) {
            return false;
        }
        self.profiles.sync_to_store(&mut self.settings);
        if update_model {
            self.models.profile_removed(index);
        }
        logger::log_event("profile_deleted", json!({ "index": index }));
        true
    }

    pub fn list_profiles(&self) -> &[String] {
        self.profiles.names()
    }

    pub fn current_profile(&self) -> Option<usize> {
        self.profiles.current()
    }

    // Service passthroughs.

    pub fn service_active(&self) -> bool {
        self.service.is_active()
    }

    pub fn set_service_active(&mut self, active: bool) {
        if let Err(e) = self.service.set_service_active(active) {
            self.handle_error(&format!("service manager: {}", e), Severity::Critical);
        }
    }

    // Error path. Everything surfaced to the user goes through here.

    /// Record and surface an error; consecutive identical messages are
    /// surfaced only once.
    pub fn handle_error(&mut self, message: &str, severity: Severity) {
        if message.is_empty() || self.last_error.as_deref() == Some(message) {
            return;
        }
        self.last_error = Some(message.to_string());
        self.error_log.push((message.to_string(), severity));
        logger::log_event(
            "error",
            json!({
                "message": message,
                "severity": match severity {
                    Severity::Warning => "warning",
                    Severity::Critical => "critical",
                },
            }),
        );
    }

    /// Informational messages go to the event log only.
    pub fn handle_info(&self, message: &str) {
        if message.is_empty() {
            return;
        }
        logger::log_event("info", json!({ "message": message }));
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn error_log(&self) -> &[(String, Severity)] {
        &self.error_log
    }

    /// Did the last document load succeed?
    pub fn config_valid(&self) -> bool {
        self.config_valid
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn document(&self) -> &ConfigDocument {
        &self.document
    }

    /// The one mutable handle to the document; presentation edits flow
    /// through here, never through a second reference.
    pub fn document_mut(&mut self) -> &mut ConfigDocument {
        &mut self.document
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn models(&self) -> &DisplayModels {
        &self.models
    }

    pub fn models_mut(&mut self) -> &mut DisplayModels {
        &mut self.models
    }
}

fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{PwmRef, TempRef};
    use crate::service::MockServiceManager;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use tempfile::TempDir;

    fn seeded_settings(dir: &TempDir) -> SettingsStore {
        let mut settings = SettingsStore::new(dir.path().join("settings.json"));
        let config_path = dir.path().join("fancontrol");
        settings.set(
            PREFERENCES,
            CONFIG_URL_KEY,
            config_path.to_string_lossy().to_string(),
        );
        settings.save().unwrap();
        settings
    }

    fn passive_mock() -> MockServiceManager {
        let mut mock = MockServiceManager::new();
        mock.expect_set_service_name().return_const(());
        mock.expect_reset().return_const(());
        mock.expect_needs_apply().return_const(false);
        mock
    }

    #[test]
    fn test_load_then_nothing_needs_apply() {
        let dir = TempDir::new().unwrap();
        let mut coord =
            ApplyCoordinator::with_devices(seeded_settings(&dir), Box::new(passive_mock()), Vec::new());
        coord.load();

        assert!(coord.config_valid());
        assert!(!coord.needs_apply());
    }

    #[test]
    fn test_document_edit_raises_needs_apply() {
        let dir = TempDir::new().unwrap();
        let mut coord =
            ApplyCoordinator::with_devices(seeded_settings(&dir), Box::new(passive_mock()), Vec::new());
        coord.load();

        coord
            .document_mut()
            .add_control(PwmRef::new(1, 1), TempRef::new(0, 1))
            .unwrap();
        assert!(coord.needs_apply());
    }

    #[test]
    fn test_preference_edit_raises_needs_apply() {
        let dir = TempDir::new().unwrap();
        let mut mock = passive_mock();
        mock.expect_apply().returning(|_| Ok(()));
        let mut coord =
            ApplyCoordinator::with_devices(seeded_settings(&dir), Box::new(mock), Vec::new());
        coord.load();

        assert_eq!(coord.max_temp(), DEFAULT_MAX_TEMP);
        coord.set_max_temp(60.0);
        assert_eq!(coord.max_temp(), 60.0);
        assert!(coord.needs_apply());

        // Setting the same value again is not an edit.
        coord.apply();
        assert!(!coord.needs_apply());
        coord.set_max_temp(60.0);
        assert!(!coord.needs_apply());
    }

    #[test]
    fn test_pending_service_change_raises_needs_apply() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockServiceManager::new();
        mock.expect_set_service_name().return_const(());
        mock.expect_reset().return_const(());
        mock.expect_needs_apply().return_const(true);

        let mut coord =
            ApplyCoordinator::with_devices(seeded_settings(&dir), Box::new(mock), Vec::new());
        coord.load();
        assert!(coord.needs_apply());
    }

    #[test]
    fn test_apply_is_idempotent_for_the_service() {
        let dir = TempDir::new().unwrap();
        let mut mock = passive_mock();
        let mut seq = Sequence::new();
        mock.expect_apply()
            .with(eq(true))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_apply()
            .with(eq(false))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut coord =
            ApplyCoordinator::with_devices(seeded_settings(&dir), Box::new(mock), Vec::new());
        coord.load();
        coord
            .document_mut()
            .add_control(PwmRef::new(1, 1), TempRef::new(0, 1))
            .unwrap();

        // First apply writes the config: the service gets config_changed =
        // true. The immediate second apply changes nothing on disk, so no
        // reload is requested.
        coord.apply();
        coord.apply();
        assert!(!coord.needs_apply());
    }

    #[test]
    fn test_service_name_setter_propagates_once() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockServiceManager::new();
        mock.expect_reset().return_const(());
        mock.expect_needs_apply().return_const(false);
        mock.expect_set_service_name()
            .with(eq("fancontrol"))
            .times(1)
            .return_const(());
        mock.expect_set_service_name()
            .with(eq("fancontrol@custom"))
            .times(1)
            .return_const(());

        let mut coord =
            ApplyCoordinator::with_devices(seeded_settings(&dir), Box::new(mock), Vec::new());
        coord.load();
        coord.set_service_name("fancontrol@custom");
        // Same name again: no second propagation.
        coord.set_service_name("fancontrol@custom");
        assert_eq!(coord.service_name(), "fancontrol@custom");
    }

    #[test]
    fn test_reset_discards_edits() {
        let dir = TempDir::new().unwrap();
        let mut coord =
            ApplyCoordinator::with_devices(seeded_settings(&dir), Box::new(passive_mock()), Vec::new());
        coord.load();

        coord
            .document_mut()
            .add_control(PwmRef::new(1, 1), TempRef::new(0, 1))
            .unwrap();
        coord.set_max_temp(42.0);
        assert!(coord.needs_apply());

        coord.reset();
        assert!(!coord.needs_apply());
        assert!(coord.document().controls().is_empty());
        assert_eq!(coord.max_temp(), DEFAULT_MAX_TEMP);
    }

    #[test]
    fn test_reset_keeps_applied_state() {
        let dir = TempDir::new().unwrap();
        let mut mock = passive_mock();
        mock.expect_apply().returning(|_| Ok(()));

        let mut coord =
            ApplyCoordinator::with_devices(seeded_settings(&dir), Box::new(mock), Vec::new());
        coord.load();
        coord
            .document_mut()
            .add_control(PwmRef::new(1, 1), TempRef::new(0, 1))
            .unwrap();
        coord.apply();

        coord.reset();
        assert_eq!(coord.document().controls().len(), 1);
    }

    #[test]
    fn test_handle_error_deduplicates_consecutive() {
        let dir = TempDir::new().unwrap();
        let mut coord =
            ApplyCoordinator::with_devices(seeded_settings(&dir), Box::new(passive_mock()), Vec::new());

        coord.handle_error("disk on fire", Severity::Critical);
        coord.handle_error("disk on fire", Severity::Critical);
        coord.handle_error("", Severity::Warning);
        assert_eq!(coord.error_log().len(), 1);
        assert_eq!(coord.last_error(), Some("disk on fire"));

        coord.handle_error("something else", Severity::Warning);
        coord.handle_error("disk on fire", Severity::Critical);
        assert_eq!(coord.error_log().len(), 3);
    }

    #[test]
    fn test_malformed_config_line_reported_once() {
        let dir = TempDir::new().unwrap();
        let settings = seeded_settings(&dir);
        std::fs::write(
            dir.path().join("fancontrol"),
            "INTERVAL=10\nFCTEMPS=hwmon0/pwm1=hwmon0/temp1_input hwmon0/pwm2=bogus\n",
        )
        .unwrap();

        let mut coord =
            ApplyCoordinator::with_devices(settings, Box::new(passive_mock()), Vec::new());
        coord.load();

        assert!(coord.config_valid());
        assert_eq!(coord.document().controls().len(), 1);
        assert_eq!(coord.error_log().len(), 1);
    }

    #[test]
    fn test_unreadable_config_is_critical() {
        let dir = TempDir::new().unwrap();
        let settings = seeded_settings(&dir);
        std::fs::write(dir.path().join("fancontrol"), "garbage everywhere\n").unwrap();

        let mut coord =
            ApplyCoordinator::with_devices(settings, Box::new(passive_mock()), Vec::new());
        coord.load();

        assert!(!coord.config_valid());
        assert!(matches!(
            coord.error_log().last(),
            Some((_, Severity::Critical))
        ));
    }

    #[test]
    fn test_set_config_url_reloads_document() {
        let dir = TempDir::new().unwrap();
        let other = dir.path().join("fancontrol-other");
        std::fs::write(
            &other,
            "INTERVAL=3\nFCTEMPS=hwmon0/pwm1=hwmon0/temp1_input\n",
        )
        .unwrap();

        let mut coord =
            ApplyCoordinator::with_devices(seeded_settings(&dir), Box::new(passive_mock()), Vec::new());
        coord.load();
        coord
            .document_mut()
            .add_control(PwmRef::new(9, 9), TempRef::new(0, 1))
            .unwrap();

        // Switching files is an explicit reload that discards unsaved edits.
        coord.set_config_url(&other);
        assert_eq!(coord.config_url(), other);
        assert_eq!(coord.document().interval(), 3);
        assert!(coord.document().control(PwmRef::new(9, 9)).is_none());
    }

    #[test]
    fn test_service_error_is_surfaced_critical() {
        let dir = TempDir::new().unwrap();
        let mut mock = passive_mock();
        mock.expect_apply().returning(|_| {
            Err(crate::service::ServiceError::RequestFailed(
                "unit not found".into(),
            ))
        });

        let mut coord =
            ApplyCoordinator::with_devices(seeded_settings(&dir), Box::new(mock), Vec::new());
        coord.load();
        coord.document_mut().set_interval(5);
        coord.apply();

        assert!(matches!(
            coord.error_log().last(),
            Some((msg, Severity::Critical)) if msg.contains("unit not found")
        ));
    }
}
