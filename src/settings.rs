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

//! Group-scoped key/value preferences store.
//!
//! Persisted as pretty-printed JSON so users can read and diff their own
//! settings file. Lookup of an unknown key is an error, never a silent
//! default; callers that want a default handle `NotFound` themselves.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Group holding the GUI preferences and profile slots.
pub const PREFERENCES: &str = "preferences";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("setting {group}/{key} not found")]
    NotFound { group: String, key: String },
    #[error("setting {group}/{key} has an unexpected type")]
    TypeMismatch { group: String, key: String },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed settings file: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One dynamically-typed scalar or string-list value.
///
/// Untagged so the persisted JSON stays plain (`true`, `60`, `"fancontrol"`,
/// `["quiet"]`); variant order matters for deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
    List(Vec<String>),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SettingValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers coerce to real; the JSON representation does not keep the
    /// distinction stable across edits by hand.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            SettingValue::Real(r) => Some(*r),
            SettingValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            SettingValue::List(l) => Some(l),
            _ => None,
        }
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Int(v)
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        SettingValue::Real(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Str(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        SettingValue::Str(v)
    }
}

impl From<Vec<String>> for SettingValue {
    fn from(v: Vec<String>) -> Self {
        SettingValue::List(v)
    }
}

type Groups = BTreeMap<String, BTreeMap<String, SettingValue>>;

/// Persistent, group-scoped preferences.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    groups: Groups,
    dirty: bool,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            groups: Groups::new(),
            dirty: false,
        }
    }

    /// Default on-disk location, honoring `XDG_CONFIG_HOME` and `HOME`.
    pub fn default_path() -> PathBuf {
        if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
            return Path::new(&xdg)
                .join("fancontrol-center")
                .join("settings.json");
        }
        if let Ok(home) = env::var("HOME") {
            return Path::new(&home)
                .join(".config")
                .join("fancontrol-center")
                .join("settings.json");
        }
        PathBuf::from("/etc/fancontrol-center/settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace in-memory content with the persisted file.
    ///
    /// A missing file means "no saved preferences yet" and leaves an empty
    /// store. A present but unreadable or malformed file also resets to
    /// empty, but reports the failure so the caller can warn.
    pub fn load(&mut self) -> Result<(), SettingsError> {
        self.groups.clear();
        self.dirty = false;

        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        self.groups = serde_json::from_str(&data)?;
        Ok(())
    }

    /// Persist all groups. Writes to a sibling temp file and renames it over
    /// the target so a failed write never leaves a truncated file behind.
    pub fn save(&mut self) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.groups)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        self.dirty = false;
        Ok(())
    }

    /// Look up a single item; unknown (group, key) is an error.
    pub fn find_item(&self, group: &str, key: &str) -> Result<&SettingValue, SettingsError> {
        self.groups
            .get(group)
            .and_then(|g| g.get(key))
            .ok_or_else(|| SettingsError::NotFound {
                group: group.to_string(),
                key: key.to_string(),
            })
    }

    /// Insert or overwrite one item. Returns whether the stored value
    /// actually changed; the dirty flag is only raised on real changes.
    pub fn set(&mut self, group: &str, key: &str, value: impl Into<SettingValue>) -> bool {
        let value = value.into();
        let slot = self
            .groups
            .entry(group.to_string())
            .or_default()
            .entry(key.to_string());

        use std::collections::btree_map::Entry;
        let changed = match slot {
            Entry::Occupied(mut e) => {
                if *e.get() == value {
                    false
                } else {
                    e.insert(value);
                    true
                }
            }
            Entry::Vacant(e) => {
                e.insert(value);
                true
            }
        };
        if changed {
            self.dirty = true;
        }
        changed
    }

    pub fn remove(&mut self, group: &str, key: &str) -> bool {
        let removed = self
            .groups
            .get_mut(group)
            .and_then(|g| g.remove(key))
            .is_some();
        if removed {
            self.dirty = true;
        }
        removed
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn get_bool(&self, group: &str, key: &str) -> Result<bool, SettingsError> {
        self.find_item(group, key)?
            .as_bool()
            .ok_or_else(|| SettingsError::TypeMismatch {
                group: group.to_string(),
                key: key.to_string(),
            })
    }

    pub fn get_int(&self, group: &str, key: &str) -> Result<i64, SettingsError> {
        self.find_item(group, key)?
            .as_int()
            .ok_or_else(|| SettingsError::TypeMismatch {
                group: group.to_string(),
                key: key.to_string(),
            })
    }

    pub fn get_real(&self, group: &str, key: &str) -> Result<f64, SettingsError> {
        self.find_item(group, key)?
            .as_real()
            .ok_or_else(|| SettingsError::TypeMismatch {
                group: group.to_string(),
                key: key.to_string(),
            })
    }

    pub fn get_str(&self, group: &str, key: &str) -> Result<&str, SettingsError> {
        self.find_item(group, key)?
            .as_str()
            .ok_or_else(|| SettingsError::TypeMismatch {
                group: group.to_string(),
                key: key.to_string(),
            })
    }

    pub fn get_list(&self, group: &str, key: &str) -> Result<&[String], SettingsError> {
        self.find_item(group, key)?
            .as_list()
            .ok_or_else(|| SettingsError::TypeMismatch {
                group: group.to_string(),
                key: key.to_string(),
            })
    }

    /// Unsaved edits pending?
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Short-lived accessor bound to one group. Borrows the store mutably,
    /// so it cannot be kept across unrelated operations.
    pub fn scope<'a>(&'a mut self, group: &str) -> GroupScope<'a> {
        GroupScope {
            store: self,
            group: group.to_string(),
        }
    }
}

/// Ergonomic single-group view over a [`SettingsStore`].
pub struct GroupScope<'a> {
    store: &'a mut SettingsStore,
    group: String,
}

impl GroupScope<'_> {
    pub fn get(&self, key: &str) -> Result<&SettingValue, SettingsError> {
        self.store.find_item(&self.group, key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<SettingValue>) -> bool {
        self.store.set(&self.group, key, value)
    }
}
