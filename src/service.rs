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

//! Interface to the external service manager that runs the daemon.
//!
//! This crate only consumes the interface; the real implementation (systemd
//! over D-Bus, an init script wrapper, ...) lives with the shell that embeds
//! it. Hosts without any service integration install [`NoopServiceManager`]
//! so calling code never branches on availability.

use std::time::Duration;

use thiserror::Error;

/// Requests must be bounded; implementations report [`ServiceError::Timeout`]
/// past this rather than hanging the caller.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("service request failed: {0}")]
    RequestFailed(String),
    #[error("service request timed out after {0:?}")]
    Timeout(Duration),
}

/// External service-manager collaborator.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceManager {
    /// Point the manager at a different service unit.
    fn set_service_name(&mut self, name: &str);

    /// Drop any pending service-level change, re-reading actual state.
    fn reset(&mut self);

    /// Is the daemon currently running?
    fn is_active(&self) -> bool;

    /// Is a service-level change (start/stop/enable) waiting to be applied?
    fn needs_apply(&self) -> bool;

    /// Carry out pending service-level changes; `config_changed` tells the
    /// manager whether the daemon must also reload its config file.
    fn apply(&mut self, config_changed: bool) -> Result<(), ServiceError>;

    /// Request the daemon be started or stopped on the next apply.
    fn set_service_active(&mut self, active: bool) -> Result<(), ServiceError>;
}

/// The capability-absent implementation: never active, never pending, every
/// request succeeds without doing anything.
#[derive(Debug, Default)]
pub struct NoopServiceManager {
    service_name: String,
}

impl NoopServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl ServiceManager for NoopServiceManager {
    fn set_service_name(&mut self, name: &str) {
        self.service_name = name.to_string();
    }

    fn reset(&mut self) {}

    fn is_active(&self) -> bool {
        false
    }

    fn needs_apply(&self) -> bool {
        false
    }

    fn apply(&mut self, _config_changed: bool) -> Result<(), ServiceError> {
        Ok(())
    }

    fn set_service_active(&mut self, _active: bool) -> Result<(), ServiceError> {
        Ok(())
    }
}
