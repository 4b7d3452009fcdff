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

//! Discovery of sensor/actuator controllers from the hwmon sysfs namespace.
//!
//! One scan per load cycle: the resulting [`Device`] list is a snapshot,
//! refreshing values is the presentation layer's problem.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use serde_json::json;
use thiserror::Error;

use crate::logger;

pub const SYSFS_HWMON_ROOT: &str = "/sys/class/hwmon";

#[derive(Error, Debug)]
pub enum HwmonError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Control mode decoded from `pwmN_enable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmMode {
    /// 0: no speed control, output runs at full speed.
    FullSpeed,
    /// 1: manual duty set by software.
    Manual,
    /// 2 and above: automatic control (daemon- or chip-driven curve).
    Auto,
}

impl PwmMode {
    pub fn from_enable(raw: u8) -> Self {
        match raw {
            0 => PwmMode::FullSpeed,
            1 => PwmMode::Manual,
            _ => PwmMode::Auto,
        }
    }

    pub fn as_enable(self) -> u8 {
        match self {
            PwmMode::FullSpeed => 0,
            PwmMode::Manual => 1,
            PwmMode::Auto => 2,
        }
    }
}

/// A temperature channel (`tempN_input`), read-only.
#[derive(Debug, Clone)]
pub struct TempInput {
    pub index: usize,
    pub label: String,
    /// Last read value in Celsius.
    pub value_c: f64,
    /// User calibration offset, applied on top of the raw reading.
    pub offset_c: f64,
}

impl TempInput {
    pub fn corrected_c(&self) -> f64 {
        self.value_c + self.offset_c
    }
}

/// A PWM-controlled fan output (`pwmN`).
#[derive(Debug, Clone)]
pub struct PwmOutput {
    pub index: usize,
    pub label: String,
    /// Raw duty, 0-255.
    pub value: u8,
    pub mode: PwmMode,
}

/// One physical controller chip with its channels.
#[derive(Debug, Clone)]
pub struct Device {
    /// Chip name from the `name` attribute.
    pub name: String,
    /// Index of the `hwmonN` tag this controller was found under.
    pub hwmon: usize,
    /// Canonical sysfs directory.
    pub path: PathBuf,
    pub temps: Vec<TempInput>,
    pub pwms: Vec<PwmOutput>,
}

impl Device {
    pub fn temp(&self, index: usize) -> Option<&TempInput> {
        self.temps.iter().find(|t| t.index == index)
    }

    pub fn pwm(&self, index: usize) -> Option<&PwmOutput> {
        self.pwms.iter().find(|p| p.index == index)
    }
}

/// Scan the host's hwmon tree.
pub fn scan() -> Result<Vec<Device>, HwmonError> {
    scan_at(Path::new(SYSFS_HWMON_ROOT))
}

/// Scan an hwmon-style tree rooted at `root`.
///
/// Unreadable channels are skipped, controllers without channels are kept,
/// and controllers reached through more than one entry are deduplicated by
/// canonical path. A missing root yields an empty list, not an error.
pub fn scan_at(root: &Path) -> Result<Vec<Device>, HwmonError> {
    let entries = match fs::read_dir(root) {
        Ok(it) => it,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut devices: Vec<Device> = Vec::new();

    for ent in entries.flatten() {
        let path = ent.path();
        if !path.is_dir() {
            continue;
        }
        let tag = ent.file_name();
        let Some(hwmon) = extract_index(&tag.to_string_lossy(), "hwmon", "") else {
            continue;
        };

        // Entries are usually symlinks into /sys/devices; dedupe on the target.
        let dir = fs::canonicalize(&path).unwrap_or(path);
        if !seen.insert(dir.clone()) {
            continue;
        }

        let name = read_trimmed(dir.join("name")).unwrap_or_else(|_| "unknown".into());
        let mut device = Device {
            name,
            hwmon,
            path: dir.clone(),
            temps: Vec::new(),
            pwms: Vec::new(),
        };

        let Ok(dir_iter) = fs::read_dir(&dir) else {
            devices.push(device);
            continue;
        };
        for file in dir_iter.flatten() {
            let fname = file.file_name();
            let fname = fname.to_string_lossy();

            if let Some(idx) = extract_index(&fname, "temp", "_input") {
                let Ok(raw) = read_trimmed(file.path()) else {
                    continue;
                };
                let Ok(millic) = raw.parse::<i64>() else {
                    continue;
                };
                let label = read_trimmed(dir.join(format!("temp{}_label", idx)))
                    .unwrap_or_else(|_| format!("temp{}", idx));
                device.temps.push(TempInput {
                    index: idx,
                    label,
                    value_c: millic as f64 / 1000.0,
                    offset_c: 0.0,
                });
            } else if !fname.contains('_') {
                if let Some(idx) = extract_index(&fname, "pwm", "") {
                    let Ok(raw) = read_trimmed(file.path()) else {
                        continue;
                    };
                    let Ok(value) = raw.parse::<u64>() else {
                        continue;
                    };
                    let mode = read_trimmed(dir.join(format!("pwm{}_enable", idx)))
                        .ok()
                        .and_then(|s| s.parse::<u8>().ok())
                        .map(PwmMode::from_enable)
                        .unwrap_or(PwmMode::Manual);
                    let label = read_trimmed(dir.join(format!("pwm{}_label", idx)))
                        .unwrap_or_else(|_| format!("pwm{}", idx));
                    device.pwms.push(PwmOutput {
                        index: idx,
                        label,
                        value: value.min(255) as u8,
                        mode,
                    });
                }
            }
        }

        device.temps.sort_by_key(|t| t.index);
        device.pwms.sort_by_key(|p| p.index);
        devices.push(device);
    }

    devices.sort_by_key(|d| d.hwmon);

    logger::log_event(
        "hwmon_scan",
        json!({
            "root": root.display().to_string(),
            "devices": devices.len(),
            "temps": devices.iter().map(|d| d.temps.len()).sum::<usize>(),
            "pwms": devices.iter().map(|d| d.pwms.len()).sum::<usize>(),
        }),
    );

    Ok(devices)
}

/// Run [`scan_at`] on a worker thread; the result arrives on the returned
/// channel so the caller's event loop never blocks on sysfs latency.
pub fn spawn_scan(root: PathBuf) -> mpsc::Receiver<Result<Vec<Device>, HwmonError>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(scan_at(&root));
    });
    rx
}

fn read_trimmed<P: AsRef<Path>>(p: P) -> io::Result<String> {
    let mut s = String::new();
    fs::File::open(p)?.read_to_string(&mut s)?;
    Ok(s.trim().to_string())
}

pub fn extract_index(fname: &str, prefix: &str, suffix: &str) -> Option<usize> {
    if fname.starts_with(prefix) && fname.ends_with(suffix) && fname.len() > prefix.len() + suffix.len() {
        let mid = &fname[prefix.len()..fname.len() - suffix.len()];
        mid.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_utils::write_hwmon_chip;
    use tempfile::TempDir;

    #[test]
    fn test_extract_index() {
        assert_eq!(extract_index("temp1_input", "temp", "_input"), Some(1));
        assert_eq!(extract_index("temp12_input", "temp", "_input"), Some(12));
        assert_eq!(extract_index("pwm3", "pwm", ""), Some(3));
        assert_eq!(extract_index("hwmon0", "hwmon", ""), Some(0));

        assert_eq!(extract_index("temp_input", "temp", "_input"), None);
        assert_eq!(extract_index("pwm", "pwm", ""), None);
        assert_eq!(extract_index("pwm1_enable", "pwm", ""), None);
        assert_eq!(extract_index("fanabc_input", "fan", "_input"), None);
    }

    #[test]
    fn test_scan_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let devices = scan_at(&dir.path().join("does-not-exist")).unwrap();
        assert!(devices.is_empty());
    }

    #[test]
    fn test_scan_finds_channels() {
        let dir = TempDir::new().unwrap();
        write_hwmon_chip(
            dir.path(),
            0,
            "coretemp",
            &[(1, 45500, Some("Package id 0")), (2, 38000, None)],
            &[],
        );
        write_hwmon_chip(
            dir.path(),
            1,
            "nct6779",
            &[(1, 30250, None)],
            &[(1, 128, Some(2)), (2, 255, Some(0))],
        );

        let devices = scan_at(dir.path()).unwrap();
        assert_eq!(devices.len(), 2);

        let coretemp = &devices[0];
        assert_eq!(coretemp.name, "coretemp");
        assert_eq!(coretemp.hwmon, 0);
        assert_eq!(coretemp.temps.len(), 2);
        assert_eq!(coretemp.temps[0].label, "Package id 0");
        assert_eq!(coretemp.temps[0].value_c, 45.5);
        assert_eq!(coretemp.temps[1].label, "temp2");
        assert!(coretemp.pwms.is_empty());

        let nct = &devices[1];
        assert_eq!(nct.hwmon, 1);
        assert_eq!(nct.pwms.len(), 2);
        assert_eq!(nct.pwms[0].value, 128);
        assert_eq!(nct.pwms[0].mode, PwmMode::Auto);
        assert_eq!(nct.pwms[1].mode, PwmMode::FullSpeed);
    }

    #[test]
    fn test_scan_skips_unreadable_channels() {
        let dir = TempDir::new().unwrap();
        write_hwmon_chip(dir.path(), 0, "it8728", &[(1, 41000, None)], &[]);
        // Garbage readings must not abort the scan.
        std::fs::write(dir.path().join("hwmon0").join("temp2_input"), "garbage").unwrap();
        std::fs::write(dir.path().join("hwmon0").join("pwm1"), "not-a-number").unwrap();

        let devices = scan_at(dir.path()).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].temps.len(), 1);
        assert!(devices[0].pwms.is_empty());
    }

    #[test]
    fn test_scan_keeps_empty_controller() {
        let dir = TempDir::new().unwrap();
        write_hwmon_chip(dir.path(), 3, "acpitz", &[], &[]);

        let devices = scan_at(dir.path()).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "acpitz");
        assert!(devices[0].temps.is_empty());
        assert!(devices[0].pwms.is_empty());
    }

    #[test]
    fn test_scan_missing_name_is_unknown() {
        let dir = TempDir::new().unwrap();
        write_hwmon_chip(dir.path(), 0, "gone", &[], &[]);
        std::fs::remove_file(dir.path().join("hwmon0").join("name")).unwrap();

        let devices = scan_at(dir.path()).unwrap();
        assert_eq!(devices[0].name, "unknown");
    }

    #[test]
    fn test_scan_ignores_foreign_entries() {
        let dir = TempDir::new().unwrap();
        write_hwmon_chip(dir.path(), 0, "coretemp", &[(1, 20000, None)], &[]);
        std::fs::create_dir(dir.path().join("not-a-chip")).unwrap();
        std::fs::write(dir.path().join("stray-file"), "x").unwrap();

        let devices = scan_at(dir.path()).unwrap();
        assert_eq!(devices.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_dedupes_symlinked_controllers() {
        let dir = TempDir::new().unwrap();
        write_hwmon_chip(dir.path(), 0, "coretemp", &[(1, 20000, None)], &[]);
        std::os::unix::fs::symlink(dir.path().join("hwmon0"), dir.path().join("hwmon7")).unwrap();

        let devices = scan_at(dir.path()).unwrap();
        assert_eq!(devices.len(), 1);
    }

    #[test]
    fn test_corrected_temperature() {
        let mut temp = TempInput {
            index: 1,
            label: "temp1".into(),
            value_c: 50.0,
            offset_c: 0.0,
        };
        assert_eq!(temp.corrected_c(), 50.0);
        temp.offset_c = -2.5;
        assert_eq!(temp.corrected_c(), 47.5);
    }

    #[test]
    fn test_pwm_mode_decoding() {
        assert_eq!(PwmMode::from_enable(0), PwmMode::FullSpeed);
        assert_eq!(PwmMode::from_enable(1), PwmMode::Manual);
        assert_eq!(PwmMode::from_enable(2), PwmMode::Auto);
        assert_eq!(PwmMode::from_enable(5), PwmMode::Auto);
        assert_eq!(PwmMode::Auto.as_enable(), 2);
    }

    #[test]
    fn test_spawn_scan_delivers_result() {
        let dir = TempDir::new().unwrap();
        write_hwmon_chip(dir.path(), 0, "coretemp", &[(1, 20000, None)], &[]);

        let rx = spawn_scan(dir.path().to_path_buf());
        let devices = rx.recv().unwrap().unwrap();
        assert_eq!(devices.len(), 1);
    }
}
