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

//! Fancontrol Center - configuration and profile management core for the
//! fancontrol daemon.
//!
//! This library edits the daemon's config file, discovers hwmon sensors and
//! PWM outputs, snapshots whole configurations as named profiles, and
//! coordinates apply/reset against a pluggable service manager. The GUI
//! shell consuming it lives elsewhere.

pub mod coordinator;
pub mod document;
pub mod hwmon;
pub mod logger;
pub mod models;
pub mod profiles;
pub mod service;
pub mod settings;

#[cfg(test)]
pub mod test_utils;
