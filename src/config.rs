use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(
        option_env!("FACEGATE_CONFIG_PATH").unwrap_or("/usr/local/etc/facegate/config.toml"),
    )
});

pub static MODEL_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_MODEL_PREFIX").unwrap_or("/usr/local/share/facegate"))
});

/// Maximum Euclidean distance between two signatures of the same face.
pub const DEFAULT_THRESHOLD: f32 = 5000.0;

fn default_store_dir() -> PathBuf {
    ProjectDirs::from("", "", "facegate")
        .map(|dirs| dirs.data_dir().join("users"))
        .unwrap_or_else(|| PathBuf::from("/usr/local/var/facegate/users"))
}

/// Stock OpenCV frontal face cascades, primary first.
pub const DEFAULT_CASCADES: [&str; 2] = [
    "haarcascade_frontalface_default.xml",
    "haarcascade_frontalface_alt.xml",
];

/// Where distribution packages put OpenCV's cascade data.
const OPENCV_DATA_DIRS: [&str; 4] = [
    "/usr/share/opencv4/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
    "/usr/share/opencv/haarcascades",
    "/usr/local/share/opencv/haarcascades",
];

/// First existing `name` under `dirs`, else `name` under the first dir.
fn find_cascade<'a>(name: &str, dirs: impl IntoIterator<Item = &'a Path>) -> PathBuf {
    let candidates: Vec<PathBuf> = dirs.into_iter().map(|d| d.join(name)).collect();
    candidates
        .iter()
        .find(|p| p.is_file())
        .or(candidates.first())
        .cloned()
        .unwrap_or_else(|| PathBuf::from(name))
}

fn default_cascades() -> Vec<PathBuf> {
    let dirs: Vec<&Path> = std::iter::once(*MODEL_PREFIX)
        .chain(OPENCV_DATA_DIRS.iter().map(Path::new))
        .collect();
    DEFAULT_CASCADES
        .iter()
        .map(|name| find_cascade(name, dirs.iter().copied()))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shared by login, enrollment and the duplicate sweep.
    pub threshold: f32,
    pub camera: String,
    pub store_dir: PathBuf,
    /// Detector models in fallback order.
    pub cascades: Vec<PathBuf>,
    /// Frames examined per capture session before giving up.
    pub max_attempts: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            camera: "/dev/video0".to_string(),
            store_dir: default_store_dir(),
            cascades: default_cascades(),
            max_attempts: 60,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    if cfg.threshold.is_nan() || cfg.threshold <= 0.0 {
        anyhow::bail!("threshold must be positive, got {}", cfg.threshold);
    }
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = load_config(Some(&dir.path().join("absent.toml")))?;
        assert_eq!(cfg.threshold, 5000.0);
        assert_eq!(cfg.cascades.len(), 2);
        Ok(())
    }

    #[test]
    fn partial_file_keeps_other_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "threshold = 4200.0\ncamera = \"/dev/video2\"\n")?;
        let cfg = load_config(Some(&path))?;
        assert_eq!(cfg.threshold, 4200.0);
        assert_eq!(cfg.camera, "/dev/video2");
        assert_eq!(cfg.max_attempts, 60);
        Ok(())
    }

    #[test]
    fn save_then_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested/config.toml");
        let cfg = Config {
            max_attempts: 9,
            ..Config::default()
        };
        save_config(&cfg, Some(&path))?;
        assert_eq!(load_config(Some(&path))?.max_attempts, 9);
        Ok(())
    }

    #[test]
    fn default_cascades_are_opencv_xml() -> Result<()> {
        let cfg = Config::default();
        for (path, name) in cfg.cascades.iter().zip(DEFAULT_CASCADES) {
            assert!(path.ends_with(name), "{}", path.display());
        }

        let shipped = tempfile::tempdir()?;
        let prefix = tempfile::tempdir()?;
        std::fs::write(shipped.path().join(DEFAULT_CASCADES[1]), "")?;
        let dirs = [prefix.path(), shipped.path()];
        assert_eq!(
            find_cascade(DEFAULT_CASCADES[1], dirs),
            shipped.path().join(DEFAULT_CASCADES[1])
        );
        assert_eq!(
            find_cascade(DEFAULT_CASCADES[0], dirs),
            prefix.path().join(DEFAULT_CASCADES[0])
        );
        Ok(())
    }

    #[test]
    fn rejects_non_positive_threshold() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "threshold = 0.0\n")?;
        assert!(load_config(Some(&path)).is_err());
        Ok(())
    }
}
