/*
 * Test fixtures shared across Fancontrol Center's unit tests.
 */

#[cfg(test)]
pub mod test_utils {
    use std::fs;
    use std::path::Path;

    use crate::document::{ConfigDocument, FanRef, PwmRef, TempRef};

    /// Lay out a fake hwmon controller directory under `root`.
    ///
    /// `temps` entries are (channel index, millidegrees, optional label);
    /// `pwms` entries are (channel index, raw duty, optional enable mode).
    pub fn write_hwmon_chip(
        root: &Path,
        index: usize,
        name: &str,
        temps: &[(usize, i64, Option<&str>)],
        pwms: &[(usize, u8, Option<u8>)],
    ) {
        let dir = root.join(format!("hwmon{}", index));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("name"), format!("{}\n", name)).unwrap();

        for (idx, millic, label) in temps {
            fs::write(dir.join(format!("temp{}_input", idx)), format!("{}\n", millic)).unwrap();
            if let Some(label) = label {
                fs::write(dir.join(format!("temp{}_label", idx)), format!("{}\n", label)).unwrap();
            }
        }
        for (idx, value, enable) in pwms {
            fs::write(dir.join(format!("pwm{}", idx)), format!("{}\n", value)).unwrap();
            if let Some(enable) = enable {
                fs::write(dir.join(format!("pwm{}_enable", idx)), format!("{}\n", enable)).unwrap();
            }
        }
    }

    /// A small two-chip document: hwmon1/pwm1 driven by hwmon0/temp1 with
    /// the tach on hwmon1/fan1.
    pub fn sample_document() -> ConfigDocument {
        let mut doc = ConfigDocument::new();
        doc.set_device_info(0, "coretemp", "devices/platform/coretemp.0");
        doc.set_device_info(1, "nct6779", "devices/platform/nct6775.656");
        doc.add_control(PwmRef::new(1, 1), TempRef::new(0, 1)).unwrap();
        doc.set_fans(PwmRef::new(1, 1), vec![FanRef::new(1, 1)]).unwrap();
        doc
    }
}
