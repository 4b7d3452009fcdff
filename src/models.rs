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

//! Read-only row models for the presentation layer.
//!
//! The rendering layer consumes these rows and registers a callback for
//! change events. Events always fire after the backing rows are updated,
//! so a subscriber reading the model inside its callback sees new state.

use crate::document::{ConfigDocument, ControlCurve, PwmRef, TempRef};
use crate::hwmon::{Device, PwmMode};

/// Display unit for temperatures; readings are stored in Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Celsius,
    Fahrenheit,
}

impl Unit {
    pub fn suffix(self) -> &'static str {
        match self {
            Unit::Celsius => "°C",
            Unit::Fahrenheit => "°F",
        }
    }

    pub fn convert(self, celsius: f64) -> f64 {
        match self {
            Unit::Celsius => celsius,
            Unit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        }
    }
}

/// One controllable fan output with its configured curve, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct FanRow {
    pub pwm: PwmRef,
    /// "chip:channel" label for display.
    pub label: String,
    pub value: u8,
    pub mode: PwmMode,
    pub curve: Option<ControlCurve>,
    /// Label of the driving temperature input, when one is configured.
    pub temp_label: Option<String>,
}

/// One temperature reading.
#[derive(Debug, Clone, PartialEq)]
pub struct TempRow {
    pub temp: TempRef,
    pub label: String,
    pub value_c: f64,
}

impl TempRow {
    pub fn display_value(&self, unit: Unit) -> f64 {
        unit.convert(self.value_c)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    FansReset,
    TempsReset,
    ProfilesReset,
    ProfileInserted(usize),
    ProfileUpdated(usize),
    ProfileRemoved(usize),
}

type Subscriber = Box<dyn Fn(&ModelEvent)>;

/// The fan, temperature and profile row models, with change notification.
#[derive(Default)]
pub struct DisplayModels {
    fan_rows: Vec<FanRow>,
    temp_rows: Vec<TempRow>,
    profile_rows: Vec<String>,
    subscribers: Vec<Subscriber>,
}

impl std::fmt::Debug for DisplayModels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayModels")
            .field("fan_rows", &self.fan_rows)
            .field("temp_rows", &self.temp_rows)
            .field("profile_rows", &self.profile_rows)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl DisplayModels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: impl Fn(&ModelEvent) + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    fn notify(&self, event: ModelEvent) {
        for subscriber in &self.subscribers {
            subscriber(&event);
        }
    }

    pub fn fans(&self) -> &[FanRow] {
        &self.fan_rows
    }

    pub fn temps(&self) -> &[TempRow] {
        &self.temp_rows
    }

    pub fn profiles(&self) -> &[String] {
        &self.profile_rows
    }

    /// Rebuild fan and temp rows from a device snapshot and the document's
    /// associations.
    pub fn rebuild_sensors(&mut self, devices: &[Device], doc: &ConfigDocument) {
        self.temp_rows = devices
            .iter()
            .flat_map(|dev| {
                dev.temps.iter().map(move |t| TempRow {
                    temp: TempRef::new(dev.hwmon, t.index),
                    label: format!("{}:{}", dev.name, t.label),
                    value_c: t.corrected_c(),
                })
            })
            .collect();

        self.fan_rows = devices
            .iter()
            .flat_map(|dev| {
                dev.pwms.iter().map(move |p| {
                    let pwm = PwmRef::new(dev.hwmon, p.index);
                    let curve = doc.control(pwm).map(|c| c.curve.clone());
                    let temp_label = curve.as_ref().map(|c| {
                        temp_label_for(devices, c.temp)
                            .unwrap_or_else(|| c.temp.to_string())
                    });
                    FanRow {
                        pwm,
                        label: format!("{}:{}", dev.name, p.label),
                        value: p.value,
                        mode: p.mode,
                        curve,
                        temp_label,
                    }
                })
            })
            .collect();

        self.notify(ModelEvent::TempsReset);
        self.notify(ModelEvent::FansReset);
    }

    pub fn reset_profiles(&mut self, names: &[String]) {
        self.profile_rows = names.to_vec();
        self.notify(ModelEvent::ProfilesReset);
    }

    pub fn profile_inserted(&mut self, index: usize, name: &str) {
        let index = index.min(self.profile_rows.len());
        self.profile_rows.insert(index, name.to_string());
        self.notify(ModelEvent::ProfileInserted(index));
    }

    pub fn profile_updated(&mut self, index: usize, name: &str) {
        if let Some(row) = self.profile_rows.get_mut(index) {
            *row = name.to_string();
            self.notify(ModelEvent::ProfileUpdated(index));
        }
    }

    pub fn profile_removed(&mut self, index: usize) {
        if index < self.profile_rows.len() {
            self.profile_rows.remove(index);
            self.notify(ModelEvent::ProfileRemoved(index));
        }
    }
}

fn temp_label_for(devices: &[Device], temp: TempRef) -> Option<String> {
    devices
        .iter()
        .find(|d| d.hwmon == temp.hwmon)
        .and_then(|d| d.temp(temp.index))
        .map(|t| t.label.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_utils::{sample_document, write_hwmon_chip};
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn scanned_devices() -> Vec<Device> {
        let dir = TempDir::new().unwrap();
        write_hwmon_chip(
            dir.path(),
            0,
            "coretemp",
            &[(1, 45000, Some("Package id 0")), (2, 38000, None)],
            &[],
        );
        write_hwmon_chip(dir.path(), 1, "nct6779", &[], &[(1, 128, Some(2))]);
        crate::hwmon::scan_at(dir.path()).unwrap()
    }

    #[test]
    fn test_unit_conversion() {
        assert_eq!(Unit::Celsius.convert(25.0), 25.0);
        assert_eq!(Unit::Fahrenheit.convert(0.0), 32.0);
        assert_eq!(Unit::Fahrenheit.convert(100.0), 212.0);
        assert_eq!(Unit::Celsius.suffix(), "°C");
        assert_eq!(Unit::Fahrenheit.suffix(), "°F");
    }

    #[test]
    fn test_rebuild_sensors_builds_rows() {
        let devices = scanned_devices();
        let doc = sample_document();
        let mut models = DisplayModels::new();
        models.rebuild_sensors(&devices, &doc);

        assert_eq!(models.temps().len(), 2);
        assert_eq!(models.temps()[0].label, "coretemp:Package id 0");
        assert_eq!(models.temps()[0].value_c, 45.0);

        assert_eq!(models.fans().len(), 1);
        let fan = &models.fans()[0];
        assert_eq!(fan.label, "nct6779:pwm1");
        assert_eq!(fan.value, 128);
        assert_eq!(fan.mode, PwmMode::Auto);
        // The sample document drives hwmon1/pwm1 from hwmon0/temp1.
        assert!(fan.curve.is_some());
        assert_eq!(fan.temp_label.as_deref(), Some("Package id 0"));
    }

    #[test]
    fn test_fan_without_association_has_no_curve() {
        let devices = scanned_devices();
        let doc = ConfigDocument::new();
        let mut models = DisplayModels::new();
        models.rebuild_sensors(&devices, &doc);
        assert!(models.fans()[0].curve.is_none());
        assert!(models.fans()[0].temp_label.is_none());
    }

    #[test]
    fn test_events_fire_after_rows_updated() {
        let seen: Rc<RefCell<Vec<ModelEvent>>> = Rc::new(RefCell::new(Vec::new()));
        let mut models = DisplayModels::new();

        models.reset_profiles(&["a".to_string()]);
        let seen_clone = Rc::clone(&seen);
        models.subscribe(move |ev| seen_clone.borrow_mut().push(ev.clone()));

        models.profile_inserted(1, "b");
        models.profile_updated(0, "a2");
        models.profile_removed(1);

        assert_eq!(
            *seen.borrow(),
            vec![
                ModelEvent::ProfileInserted(1),
                ModelEvent::ProfileUpdated(0),
                ModelEvent::ProfileRemoved(1),
            ]
        );
        assert_eq!(models.profiles(), &["a2".to_string()]);
    }

    #[test]
    fn test_profile_row_edits_out_of_range_are_noops() {
        let mut models = DisplayModels::new();
        models.profile_updated(3, "x");
        models.profile_removed(3);
        assert!(models.profiles().is_empty());
    }
}
