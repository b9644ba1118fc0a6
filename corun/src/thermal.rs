use corunners::Housekeeping;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;

pub const THERMAL_ROOT: &str = "/sys/class/thermal";

const TARGET: &str = "corun::thermal";

/// Leader housekeeping that logs every thermal zone's temperature every `every` iterations,
/// then yields like [`corunners::YieldNow`].
pub struct ThermalMonitor {
    zones: Vec<(String, PathBuf)>,
    every: u64,
}

impl ThermalMonitor {
    /// Finds the `thermal_zone*/temp` files below `root`.
    pub fn discover(root: &Path, every: u64) -> io::Result<ThermalMonitor> {
        let mut zones = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let temp = entry.path().join("temp");
            if name.starts_with("thermal_zone") && temp.is_file() {
                zones.push((name, temp));
            }
        }
        zones.sort();

        if zones.is_empty() {
            warn!("no thermal zones below {}", root.display());
        }

        Ok(ThermalMonitor { zones, every })
    }

    pub fn zones(&self) -> impl Iterator<Item = &str> {
        self.zones.iter().map(|(name, _)| &name[..])
    }

    /// Current temperatures in degrees Celsius, zones that cannot be read are skipped.
    pub fn read_all(&self) -> Vec<(&str, f64)> {
        self.zones
            .iter()
            .filter_map(|(name, path)| match read_millidegrees(path) {
                Ok(millis) => Some((&name[..], millis as f64 / 1000.0)),
                Err(e) => {
                    debug!("reading {}: {}", path.display(), e);
                    None
                }
            })
            .collect()
    }
}

impl Housekeeping for ThermalMonitor {
    fn after_iteration(&mut self, iteration: u64) {
        if self.every != 0 && iteration % self.every == 0 {
            for (zone, celsius) in self.read_all() {
                info!(target: TARGET, "iteration: {} {}: {:.1} C", iteration, zone, celsius);
            }
        }
        thread::yield_now();
    }
}

fn read_millidegrees(path: &Path) -> io::Result<i64> {
    let text = fs::read_to_string(path)?;
    text.trim()
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_sysfs(name: &str, zones: &[(&str, &str)]) -> PathBuf {
        let root = std::env::temp_dir()
            .join(format!("corun-thermal-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&root);
        for (zone, temp) in zones {
            let dir = root.join(zone);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("temp"), temp).unwrap();
        }
        fs::create_dir_all(root.join("cooling_device0")).unwrap();
        root
    }

    #[test]
    fn discovers_zones_only() {
        let root = fake_sysfs(
            "discover",
            &[("thermal_zone1", "41000\n"), ("thermal_zone0", "38500\n")],
        );
        let monitor = ThermalMonitor::discover(&root, 10).unwrap();

        assert_eq!(
            monitor.zones().collect::<Vec<_>>(),
            vec!["thermal_zone0", "thermal_zone1"]
        );
        assert_eq!(
            monitor.read_all(),
            vec![("thermal_zone0", 38.5), ("thermal_zone1", 41.0)]
        );

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn unreadable_zones_are_skipped() {
        let root = fake_sysfs("garbage", &[("thermal_zone0", "hot"), ("thermal_zone1", "-2000")]);
        let mut monitor = ThermalMonitor::discover(&root, 1).unwrap();

        assert_eq!(monitor.read_all(), vec![("thermal_zone1", -2.0)]);
        monitor.after_iteration(1);

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(ThermalMonitor::discover(Path::new("/nonexistent/thermal"), 1).is_err());
    }
}
