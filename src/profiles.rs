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

//! Named snapshots of the whole daemon configuration.
//!
//! A profile is a (name, serialized document) pair. Names and blobs live in
//! two index-aligned lists stored in the settings store; the alignment
//! invariant `names.len() == blobs.len()` holds across every operation.

use thiserror::Error;

use crate::document::{ConfigDocument, DocumentError};
use crate::settings::{SettingsStore, PREFERENCES};

pub const PROFILE_NAMES_KEY: &str = "ProfileNames";
pub const PROFILE_BLOBS_KEY: &str = "Profiles";
pub const CURRENT_PROFILE_KEY: &str = "CurrentProfile";

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("no profile at index {0}")]
    OutOfRange(usize),
    #[error("no profile named {0:?}")]
    UnknownName(String),
    #[error("profile {name:?} was corrupt and has been removed")]
    Corrupt { name: String },
    #[error("profile {name:?} does not parse: {source}")]
    Unparseable {
        name: String,
        source: DocumentError,
    },
}

/// What an apply did, for callers that sync a display model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The profile already matched the live document.
    Unchanged,
}

/// Where a save landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Appended(usize),
    Updated(usize),
}

#[derive(Debug, Default)]
pub struct ProfileManager {
    names: Vec<String>,
    blobs: Vec<String>,
    current: Option<usize>,
}

impl ProfileManager {
    /// Read the profile slots out of the settings store.
    ///
    /// Returns the manager and whether misaligned lists had to be healed
    /// (both lists are truncated to the shorter length).
    pub fn from_store(store: &SettingsStore) -> (Self, bool) {
        let names: Vec<String> = store
            .get_list(PREFERENCES, PROFILE_NAMES_KEY)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        let blobs: Vec<String> = store
            .get_list(PREFERENCES, PROFILE_BLOBS_KEY)
            .map(<[String]>::to_vec)
            .unwrap_or_default();

        let mut manager = Self {
            names,
            blobs,
            current: None,
        };
        let healed = manager.names.len() != manager.blobs.len();
        if healed {
            let len = manager.names.len().min(manager.blobs.len());
            manager.names.truncate(len);
            manager.blobs.truncate(len);
        }

        let current = store
            .get_int(PREFERENCES, CURRENT_PROFILE_KEY)
            .unwrap_or(-1);
        if current >= 0 && (current as usize) < manager.names.len() {
            manager.current = Some(current as usize);
        }

        (manager, healed)
    }

    /// Write the profile slots back into the settings store.
    pub fn sync_to_store(&self, store: &mut SettingsStore) {
        store.set(PREFERENCES, PROFILE_NAMES_KEY, self.names.clone());
        store.set(PREFERENCES, PROFILE_BLOBS_KEY, self.blobs.clone());
        store.set(
            PREFERENCES,
            CURRENT_PROFILE_KEY,
            self.current.map(|i| i as i64).unwrap_or(-1),
        );
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of the profile last applied or saved, if still present.
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn blob(&self, index: usize) -> Option<&str> {
        self.blobs.get(index).map(String::as_str)
    }

    /// Load the profile at `index` into `doc`.
    ///
    /// An empty blob is a corrupt profile: the entry is removed (healing the
    /// alignment invariant) and the live document stays untouched.
    /// Re-applying the profile that already matches the document is a no-op,
    /// decided by content comparison rather than by index.
    pub fn apply(
        &mut self,
        index: usize,
        doc: &mut ConfigDocument,
    ) -> Result<ApplyOutcome, ProfileError> {
        if index >= self.names.len() {
            return Err(ProfileError::OutOfRange(index));
        }

        if self.blobs[index].trim().is_empty() {
            let name = self.remove_at(index);
            return Err(ProfileError::Corrupt { name });
        }

        if self.blobs[index] == doc.serialize() {
            self.current = Some(index);
            return Ok(ApplyOutcome::Unchanged);
        }

        let blob = self.blobs[index].clone();
        match doc.apply_blob(&blob) {
            Ok(_issues) => {
                self.current = Some(index);
                Ok(ApplyOutcome::Applied)
            }
            Err(source) => Err(ProfileError::Unparseable {
                name: self.names[index].clone(),
                source,
            }),
        }
    }

    pub fn apply_named(
        &mut self,
        name: &str,
        doc: &mut ConfigDocument,
    ) -> Result<ApplyOutcome, ProfileError> {
        let index = self
            .find(name)
            .ok_or_else(|| ProfileError::UnknownName(name.to_string()))?;
        self.apply(index, doc)
    }

    /// Snapshot the current document under `name`.
    ///
    /// A new name appends (new index = old length); an existing name has its
    /// blob overwritten in place, the name list untouched.
    pub fn save(&mut self, name: &str, doc: &ConfigDocument) -> SaveOutcome {
        let blob = doc.serialize();
        match self.find(name) {
            Some(index) => {
                self.blobs[index] = blob;
                self.current = Some(index);
                SaveOutcome::Updated(index)
            }
            None => {
                self.names.push(name.to_string());
                self.blobs.push(blob);
                let index = self.names.len() - 1;
                self.current = Some(index);
                SaveOutcome::Appended(index)
            }
        }
    }

    /// Remove the profile at `index`; out-of-range is a no-op, not an error
    /// (stale indices from a display model must not crash).
    pub fn delete(&mut self, index: usize) -> bool {
        if index >= self.names.len() {
            return false;
        }
        self.remove_at(index);
        true
    }

    pub fn delete_named(&mut self, name: &str) -> bool {
        match self.find(name) {
            Some(index) => self.delete(index),
            None => false,
        }
    }

    fn remove_at(&mut self, index: usize) -> String {
        let name = self.names.remove(index);
        self.blobs.remove(index);
        self.current = match self.current {
            Some(cur) if cur == index => None,
            Some(cur) if cur > index => Some(cur - 1),
            other => other,
        };
        name
    }
}
