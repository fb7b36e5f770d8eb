//! Saved zone coordinates.
//!
//! Each named layout is a text file `<dir>/<name>.txt` holding one zone per
//! line as `[x1, y1, x2, y2]`.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use crate::occupancy::Zone;

/// Layout name used when the client does not send one.
pub const DEFAULT_LAYOUT_NAME: &str = "mobile-camera-detect";

const LAYOUT_EXTENSION: &str = "txt";
const MAX_LAYOUT_NAME_LEN: usize = 128;

#[derive(Clone, Debug)]
pub struct CoordinateStore {
    dir: PathBuf,
}

impl CoordinateStore {
    /// Open the store, creating the directory if needed.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create coordinate dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a layout, replacing any previous one with the same name.
    pub fn save(&self, name: &str, zones: &[Zone]) -> Result<PathBuf> {
        let path = self.layout_path(name)?;
        let mut contents = String::new();
        for zone in zones {
            contents.push_str(&format_zone(zone));
            contents.push('\n');
        }
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Vec<Zone>> {
        let path = self.layout_path(name)?;
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str::<Zone>(line.trim()).map_err(|e| {
                    anyhow!("{} line {}: invalid zone: {}", path.display(), idx + 1, e)
                })
            })
            .collect()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.layout_path(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Names of saved layouts, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LAYOUT_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_layout_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn layout_path(&self, name: &str) -> Result<PathBuf> {
        validate_layout_name(name)?;
        Ok(self.dir.join(format!("{name}.{LAYOUT_EXTENSION}")))
    }
}

/// Layout names become file names, so only `[A-Za-z0-9_-]` is allowed.
pub fn validate_layout_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow!("layout name must not be empty"));
    }
    if name.len() > MAX_LAYOUT_NAME_LEN {
        return Err(anyhow!("layout name too long"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(anyhow!("layout name has invalid characters"));
    }
    Ok(())
}

fn format_zone(zone: &Zone) -> String {
    let coords: [f64; 4] = (*zone).into();
    let parts: Vec<String> = coords.iter().map(|v| format_coord(*v)).collect();
    format!("[{}]", parts.join(", "))
}

fn format_coord(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_writes_one_zone_per_line() -> Result<()> {
        let dir = tempdir()?;
        let store = CoordinateStore::open(dir.path().join("parking-coordinate"))?;
        let zones = vec![
            Zone::new(10.0, 20.0, 110.0, 220.0)?,
            Zone::new(0.5, 1.0, 2.25, 3.0)?,
        ];

        let path = store.save(DEFAULT_LAYOUT_NAME, &zones)?;
        assert_eq!(path, store.dir().join("mobile-camera-detect.txt"));
        let raw = std::fs::read_to_string(&path)?;
        assert_eq!(raw, "[10, 20, 110, 220]\n[0.5, 1, 2.25, 3]\n");

        assert_eq!(store.load(DEFAULT_LAYOUT_NAME)?, zones);
        Ok(())
    }

    #[test]
    fn save_replaces_previous_layout() -> Result<()> {
        let dir = tempdir()?;
        let store = CoordinateStore::open(dir.path())?;
        store.save("lot_a", &[Zone::new(0.0, 0.0, 1.0, 1.0)?])?;
        store.save("lot_a", &[])?;
        assert!(store.load("lot_a")?.is_empty());
        assert!(store.exists("lot_a"));
        assert!(!store.exists("lot_b"));
        Ok(())
    }

    #[test]
    fn rejects_path_like_names() -> Result<()> {
        let dir = tempdir()?;
        let store = CoordinateStore::open(dir.path())?;
        for name in ["", "../escape", "a/b", "lot a", "lot.txt"] {
            assert!(store.save(name, &[]).is_err(), "accepted {name:?}");
        }
        assert!(store.save(&"x".repeat(MAX_LAYOUT_NAME_LEN + 1), &[]).is_err());
        Ok(())
    }

    #[test]
    fn load_reports_malformed_lines() -> Result<()> {
        let dir = tempdir()?;
        let store = CoordinateStore::open(dir.path())?;
        std::fs::write(dir.path().join("broken.txt"), "[1, 2, 3, 4]\n\n[1, 2, 3]\n")?;
        let err = store.load("broken").unwrap_err();
        assert!(err.to_string().contains("line 3"));
        assert!(store.load("missing").is_err());
        Ok(())
    }

    #[test]
    fn list_returns_sorted_layout_names() -> Result<()> {
        let dir = tempdir()?;
        let store = CoordinateStore::open(dir.path())?;
        store.save("west", &[])?;
        store.save("east", &[])?;
        std::fs::write(dir.path().join("notes.md"), "ignored")?;
        assert_eq!(store.list()?, vec!["east", "west"]);
        Ok(())
    }
}
