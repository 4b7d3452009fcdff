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

//! The daemon's configuration file as an editable in-memory document.
//!
//! The grammar is owned by the daemon and frozen: line-oriented `KEY=VALUE`
//! assignments whose values are space-separated `lhs=rhs` pairs keyed by PWM
//! output. Parsing is per-pair tolerant; serialization is stable so saved
//! files diff cleanly.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::json;
use thiserror::Error;

use crate::logger;

const HEADER: &str = "# Configuration file written by fancontrol-center";
const DEFAULT_INTERVAL: u64 = 10;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("nothing usable in config ({issues} malformed line(s))")]
    Unparseable { issues: usize },
    #[error("no association for output {0}")]
    UnknownOutput(PwmRef),
    #[error("output {0} is already associated")]
    DuplicateOutput(PwmRef),
    #[error("curve breakpoints must increase: {min} >= {max}")]
    BreakpointOrder { min: f64, max: f64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed channel reference {0:?}")]
pub struct RefParseError(pub String);

fn split_ref(s: &str) -> Option<(usize, &str)> {
    let (head, rest) = s.split_once('/')?;
    let hwmon = head.strip_prefix("hwmon")?.parse().ok()?;
    Some((hwmon, rest))
}

macro_rules! channel_ref {
    ($name:ident, $prefix:literal, $suffix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name {
            pub hwmon: usize,
            pub index: usize,
        }

        impl $name {
            pub fn new(hwmon: usize, index: usize) -> Self {
                Self { hwmon, index }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "hwmon{}/{}{}{}", self.hwmon, $prefix, self.index, $suffix)
            }
        }

        impl FromStr for $name {
            type Err = RefParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let err = || RefParseError(s.to_string());
                let (hwmon, rest) = split_ref(s).ok_or_else(err)?;
                let index = rest
                    .strip_prefix($prefix)
                    .and_then(|t| t.strip_suffix($suffix))
                    .and_then(|t| if t.is_empty() { None } else { t.parse().ok() })
                    .ok_or_else(err)?;
                Ok(Self { hwmon, index })
            }
        }
    };
}

channel_ref!(PwmRef, "pwm", "", "A PWM output reference, `hwmonN/pwmM`.");
channel_ref!(TempRef, "temp", "_input", "A temperature input reference, `hwmonN/tempM_input`.");
channel_ref!(FanRef, "fan", "_input", "A fan tach reference, `hwmonN/fanM_input`.");

/// Automatic-control curve for one output, in the daemon's own terms.
///
/// The grammar carries exactly two breakpoints — duty `min_stop` at
/// `min_temp` and duty `max_pwm` at `max_temp` — plus the `min_pwm` floor
/// below the first breakpoint and the `min_start` spin-up duty.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlCurve {
    /// The driving temperature input.
    pub temp: TempRef,
    pub min_temp: f64,
    pub max_temp: f64,
    pub min_start: u8,
    pub min_stop: u8,
    pub min_pwm: u8,
    pub max_pwm: u8,
}

impl ControlCurve {
    /// Defaults as pwmconfig seeds them.
    pub fn new(temp: TempRef) -> Self {
        Self {
            temp,
            min_temp: 20.0,
            max_temp: 60.0,
            min_start: 150,
            min_stop: 0,
            min_pwm: 0,
            max_pwm: 255,
        }
    }

    /// Ordered (temperature, duty) breakpoints.
    pub fn breakpoints(&self) -> [(f64, u8); 2] {
        [(self.min_temp, self.min_stop), (self.max_temp, self.max_pwm)]
    }

    /// Duty the daemon would drive at `temp_c`: `min_pwm` below the first
    /// breakpoint, `max_pwm` at or above the last, linear in between.
    pub fn duty_at(&self, temp_c: f64) -> u8 {
        if temp_c < self.min_temp {
            return self.min_pwm;
        }
        if temp_c >= self.max_temp {
            return self.max_pwm;
        }
        let t = (temp_c - self.min_temp) / (self.max_temp - self.min_temp);
        let v = self.min_stop as f64 + t * (self.max_pwm as f64 - self.min_stop as f64);
        v.round().clamp(0.0, 255.0) as u8
    }

    pub fn validate(&self) -> Result<(), DocumentError> {
        if self.min_temp.is_nan() || self.max_temp.is_nan() || self.min_temp >= self.max_temp {
            return Err(DocumentError::BreakpointOrder {
                min: self.min_temp,
                max: self.max_temp,
            });
        }
        Ok(())
    }
}

/// One output↔input association: a PWM output, its optional tach inputs and
/// its control curve.
#[derive(Debug, Clone, PartialEq)]
pub struct FanControl {
    pub pwm: PwmRef,
    pub fans: Vec<FanRef>,
    pub curve: ControlCurve,
}

/// A parse problem confined to one line or pair; never aborts the parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Content {
    interval: u64,
    dev_paths: BTreeMap<usize, String>,
    dev_names: BTreeMap<usize, String>,
    controls: Vec<FanControl>,
}

/// The daemon's config file, parsed into output↔input associations.
#[derive(Debug)]
pub struct ConfigDocument {
    content: Content,
    path: Option<PathBuf>,
    dirty: bool,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigDocument {
    pub fn new() -> Self {
        Self {
            content: Content {
                interval: DEFAULT_INTERVAL,
                ..Content::default()
            },
            path: None,
            dirty: false,
        }
    }

    /// Source location of the last successful load/save.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn interval(&self) -> u64 {
        self.content.interval
    }

    pub fn controls(&self) -> &[FanControl] {
        &self.content.controls
    }

    pub fn control(&self, pwm: PwmRef) -> Option<&FanControl> {
        self.content.controls.iter().find(|c| c.pwm == pwm)
    }

    pub fn device_name(&self, hwmon: usize) -> Option<&str> {
        self.content.dev_names.get(&hwmon).map(String::as_str)
    }

    pub fn device_path(&self, hwmon: usize) -> Option<&str> {
        self.content.dev_paths.get(&hwmon).map(String::as_str)
    }

    /// Unsaved in-memory edits?
    pub fn needs_save(&self) -> bool {
        self.dirty
    }

    // Mutators. Each marks the document dirty.

    pub fn set_interval(&mut self, secs: u64) {
        self.content.interval = secs.max(1);
        self.dirty = true;
    }

    pub fn set_device_info(&mut self, hwmon: usize, name: &str, dev_path: &str) {
        self.content.dev_names.insert(hwmon, name.to_string());
        self.content.dev_paths.insert(hwmon, dev_path.to_string());
        self.dirty = true;
    }

    /// Put `pwm` under automatic control, driven by `temp`.
    pub fn add_control(&mut self, pwm: PwmRef, temp: TempRef) -> Result<(), DocumentError> {
        if self.control(pwm).is_some() {
            return Err(DocumentError::DuplicateOutput(pwm));
        }
        self.content.controls.push(FanControl {
            pwm,
            fans: Vec::new(),
            curve: ControlCurve::new(temp),
        });
        self.dirty = true;
        Ok(())
    }

    /// Release `pwm` from automatic control. Unknown outputs are a no-op.
    pub fn remove_control(&mut self, pwm: PwmRef) -> bool {
        let before = self.content.controls.len();
        self.content.controls.retain(|c| c.pwm != pwm);
        let removed = self.content.controls.len() != before;
        if removed {
            self.dirty = true;
        }
        removed
    }

    pub fn set_temp_source(&mut self, pwm: PwmRef, temp: TempRef) -> Result<(), DocumentError> {
        let control = self.control_mut(pwm)?;
        control.curve.temp = temp;
        self.dirty = true;
        Ok(())
    }

    pub fn set_fans(&mut self, pwm: PwmRef, fans: Vec<FanRef>) -> Result<(), DocumentError> {
        let control = self.control_mut(pwm)?;
        control.fans = fans;
        self.dirty = true;
        Ok(())
    }

    /// Replace the whole curve; breakpoints must strictly increase.
    pub fn set_curve(&mut self, pwm: PwmRef, curve: ControlCurve) -> Result<(), DocumentError> {
        curve.validate()?;
        let control = self.control_mut(pwm)?;
        control.curve = curve;
        self.dirty = true;
        Ok(())
    }

    fn control_mut(&mut self, pwm: PwmRef) -> Result<&mut FanControl, DocumentError> {
        self.content
            .controls
            .iter_mut()
            .find(|c| c.pwm == pwm)
            .ok_or(DocumentError::UnknownOutput(pwm))
    }

    /// Load from `path`.
    ///
    /// Re-loading the already-loaded path with no pending edits is a no-op
    /// that still succeeds; a different path always reloads and discards
    /// unsaved edits. On any failure the previous document is untouched.
    /// A missing file loads as an empty document (nothing configured yet).
    pub fn load(&mut self, path: &Path) -> Result<Vec<ParseIssue>, DocumentError> {
        if self.path.as_deref() == Some(path) && !self.dirty {
            return Ok(Vec::new());
        }

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let (content, issues) = parse(&text)?;

        logger::log_event(
            "config_loaded",
            json!({
                "path": path.display().to_string(),
                "controls": content.controls.len(),
                "issues": issues.len(),
            }),
        );

        self.content = content;
        self.path = Some(path.to_path_buf());
        self.dirty = false;
        Ok(issues)
    }

    /// Load from an in-memory source (a stored profile blob).
    ///
    /// Same tolerance and atomicity as [`load`](Self::load), but the source
    /// path is kept and the document is marked dirty: the new content has
    /// not been written anywhere yet.
    pub fn apply_blob(&mut self, text: &str) -> Result<Vec<ParseIssue>, DocumentError> {
        let (content, issues) = parse(text)?;
        self.content = content;
        self.dirty = true;
        Ok(issues)
    }

    /// Serialize in the daemon's grammar, stable key and entry order.
    pub fn serialize(&self) -> String {
        let c = &self.content;
        let mut out = String::new();
        out.push_str(HEADER);
        out.push('\n');
        out.push_str(&format!("INTERVAL={}\n", c.interval));

        if !c.dev_paths.is_empty() {
            let pairs: Vec<String> = c
                .dev_paths
                .iter()
                .map(|(hwmon, path)| format!("hwmon{}={}", hwmon, path))
                .collect();
            out.push_str(&format!("DEVPATH={}\n", pairs.join(" ")));
        }
        if !c.dev_names.is_empty() {
            let pairs: Vec<String> = c
                .dev_names
                .iter()
                .map(|(hwmon, name)| format!("hwmon{}={}", hwmon, name))
                .collect();
            out.push_str(&format!("DEVNAME={}\n", pairs.join(" ")));
        }

        let per_control = |f: &dyn Fn(&FanControl) -> String| -> String {
            c.controls.iter().map(|ctl| f(ctl)).collect::<Vec<_>>().join(" ")
        };
        out.push_str(&format!(
            "FCTEMPS={}\n",
            per_control(&|ctl| format!("{}={}", ctl.pwm, ctl.curve.temp))
        ));
        out.push_str(&format!(
            "FCFANS={}\n",
            per_control(&|ctl| {
                let fans: Vec<String> = ctl.fans.iter().map(|f| f.to_string()).collect();
                format!("{}={}", ctl.pwm, fans.join("+"))
            })
        ));
        out.push_str(&format!(
            "MINTEMP={}\n",
            per_control(&|ctl| format!("{}={}", ctl.pwm, fmt_temp(ctl.curve.min_temp)))
        ));
        out.push_str(&format!(
            "MAXTEMP={}\n",
            per_control(&|ctl| format!("{}={}", ctl.pwm, fmt_temp(ctl.curve.max_temp)))
        ));
        out.push_str(&format!(
            "MINSTART={}\n",
            per_control(&|ctl| format!("{}={}", ctl.pwm, ctl.curve.min_start))
        ));
        out.push_str(&format!(
            "MINSTOP={}\n",
            per_control(&|ctl| format!("{}={}", ctl.pwm, ctl.curve.min_stop))
        ));
        out.push_str(&format!(
            "MINPWM={}\n",
            per_control(&|ctl| format!("{}={}", ctl.pwm, ctl.curve.min_pwm))
        ));
        out.push_str(&format!(
            "MAXPWM={}\n",
            per_control(&|ctl| format!("{}={}", ctl.pwm, ctl.curve.max_pwm))
        ));
        out
    }

    /// Serialize to `path`, atomically (temp file + rename).
    ///
    /// Returns whether the on-disk content actually changed — the caller
    /// uses that to decide whether the daemon needs a reload. Saving with
    /// nothing changed is a successful no-op.
    pub fn save(&mut self, path: &Path) -> Result<bool, DocumentError> {
        let text = self.serialize();
        let changed = match fs::read_to_string(path) {
            Ok(old) => old != text,
            Err(_) => true,
        };

        if changed {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut tmp = path.to_path_buf().into_os_string();
            tmp.push(".tmp");
            let tmp = PathBuf::from(tmp);
            fs::write(&tmp, &text)?;
            fs::rename(&tmp, path)?;
        }

        logger::log_event(
            "config_saved",
            json!({ "path": path.display().to_string(), "changed": changed }),
        );

        self.path = Some(path.to_path_buf());
        self.dirty = false;
        Ok(changed)
    }

    /// Content equivalence, ignoring source path and dirtiness.
    pub fn same_content(&self, other: &ConfigDocument) -> bool {
        self.content == other.content
    }
}

fn fmt_temp(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{:.0}", v)
    } else {
        format!("{}", v)
    }
}

/// Parse the daemon grammar. Individual malformed lines and pairs become
/// [`ParseIssue`]s; only a file where nothing useful parses at all is an
/// aggregate error.
fn parse(text: &str) -> Result<(Content, Vec<ParseIssue>), DocumentError> {
    let mut content = Content {
        interval: DEFAULT_INTERVAL,
        ..Content::default()
    };
    let mut issues = Vec::new();
    let mut attempted = 0usize;
    let mut useful = 0usize;

    // Curve parameters may precede their FCTEMPS line in hand-edited files,
    // so pair application is deferred until all lines are read.
    let mut deferred: Vec<(usize, &str, String, String)> = Vec::new();

    for (lineno, raw) in text.lines().enumerate() {
        let lineno = lineno + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        attempted += 1;

        let Some((key, value)) = line.split_once('=') else {
            issues.push(ParseIssue {
                line: lineno,
                message: format!("not an assignment: {:?}", line),
            });
            continue;
        };

        match key {
            "INTERVAL" => match value.trim().parse::<u64>() {
                Ok(secs) if secs >= 1 => {
                    content.interval = secs;
                    useful += 1;
                }
                _ => issues.push(ParseIssue {
                    line: lineno,
                    message: format!("bad interval {:?}", value),
                }),
            },
            "DEVPATH" | "DEVNAME" => {
                for pair in value.split_whitespace() {
                    let parsed = pair.split_once('=').and_then(|(lhs, rhs)| {
                        let hwmon: usize = lhs.strip_prefix("hwmon")?.parse().ok()?;
                        Some((hwmon, rhs))
                    });
                    match parsed {
                        Some((hwmon, rhs)) => {
                            let map = if key == "DEVPATH" {
                                &mut content.dev_paths
                            } else {
                                &mut content.dev_names
                            };
                            map.insert(hwmon, rhs.to_string());
                            useful += 1;
                        }
                        None => issues.push(ParseIssue {
                            line: lineno,
                            message: format!("bad {} entry {:?}", key, pair),
                        }),
                    }
                }
            }
            "FCTEMPS" => {
                for pair in value.split_whitespace() {
                    let parsed = pair
                        .split_once('=')
                        .and_then(|(lhs, rhs)| Some((lhs.parse::<PwmRef>().ok()?, rhs.parse::<TempRef>().ok()?)));
                    match parsed {
                        Some((pwm, temp)) => {
                            if content.controls.iter().any(|c| c.pwm == pwm) {
                                issues.push(ParseIssue {
                                    line: lineno,
                                    message: format!("duplicate association for {}", pwm),
                                });
                            } else {
                                content.controls.push(FanControl {
                                    pwm,
                                    fans: Vec::new(),
                                    curve: ControlCurve::new(temp),
                                });
                                useful += 1;
                            }
                        }
                        None => issues.push(ParseIssue {
                            line: lineno,
                            message: format!("bad association {:?}", pair),
                        }),
                    }
                }
            }
            "FCFANS" | "MINTEMP" | "MAXTEMP" | "MINSTART" | "MINSTOP" | "MINPWM" | "MAXPWM" => {
                for pair in value.split_whitespace() {
                    match pair.split_once('=') {
                        Some((lhs, rhs)) => deferred.push((
                            lineno,
                            key,
                            lhs.to_string(),
                            rhs.to_string(),
                        )),
                        None => issues.push(ParseIssue {
                            line: lineno,
                            message: format!("bad {} entry {:?}", key, pair),
                        }),
                    }
                }
            }
            _ => issues.push(ParseIssue {
                line: lineno,
                message: format!("unknown key {:?}", key),
            }),
        }
    }

    for (lineno, key, lhs, rhs) in deferred {
        let Ok(pwm) = lhs.parse::<PwmRef>() else {
            issues.push(ParseIssue {
                line: lineno,
                message: format!("bad output reference {:?}", lhs),
            });
            continue;
        };
        let Some(control) = content.controls.iter_mut().find(|c| c.pwm == pwm) else {
            issues.push(ParseIssue {
                line: lineno,
                message: format!("{} for unassociated output {}", key, pwm),
            });
            continue;
        };

        let applied = match key {
            "FCFANS" => {
                if rhs.is_empty() {
                    control.fans.clear();
                    true
                } else {
                    let fans: Option<Vec<FanRef>> =
                        rhs.split('+').map(|f| f.parse::<FanRef>().ok()).collect();
                    match fans {
                        Some(fans) => {
                            control.fans = fans;
                            true
                        }
                        None => false,
                    }
                }
            }
            "MINTEMP" | "MAXTEMP" => match rhs.parse::<f64>() {
                Ok(v) if !v.is_nan() => {
                    if key == "MINTEMP" {
                        control.curve.min_temp = v;
                    } else {
                        control.curve.max_temp = v;
                    }
                    true
                }
                _ => false,
            },
            _ => match rhs.parse::<u8>() {
                Ok(v) => {
                    match key {
                        "MINSTART" => control.curve.min_start = v,
                        "MINSTOP" => control.curve.min_stop = v,
                        "MINPWM" => control.curve.min_pwm = v,
                        "MAXPWM" => control.curve.max_pwm = v,
                        _ => unreachable!(),
                    }
                    true
                }
                Err(_) => false,
            },
        };

        if applied {
            useful += 1;
        } else {
            issues.push(ParseIssue {
                line: lineno,
                message: format!("bad {} value {:?} for {}", key, rhs, pwm),
            });
        }
    }

    // Associations the daemon could never honor are dropped, not kept broken.
    content.controls.retain(|c| {
        if c.curve.validate().is_err() {
            issues.push(ParseIssue {
                line: 0,
                message: format!(
                    "dropping {}: breakpoints not increasing ({} >= {})",
                    c.pwm, c.curve.min_temp, c.curve.max_temp
                ),
            });
            false
        } else {
            true
        }
    });

    if useful == 0 && attempted > 0 {
        return Err(DocumentError::Unparseable {
            issues: issues.len(),
        });
    }
    Ok((content, issues))
}
