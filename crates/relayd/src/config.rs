//! TOML configuration with compiled-in defaults.
//!
//! Every key is optional; a missing file just means all defaults.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub http: Http,
    pub serial: Serial,
    pub camera: Camera,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Http {
    pub listen: String,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5000".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Serial {
    pub port: String,
}

impl Default for Serial {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Camera {
    pub device: String,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
        }
    }
}

pub fn load(path: &Path) -> Result<Config> {
    if !path.is_file() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    struct TempConfig(PathBuf);

    impl TempConfig {
        fn write(name: &str, contents: &str) -> Self {
            let path = std::env::temp_dir().join(format!("relayd-{}-{name}", std::process::id()));
            fs::write(&path, contents).unwrap();
            Self(path)
        }
    }

    impl Drop for TempConfig {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.0);
        }
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load(Path::new("/definitely/not/here.toml")).unwrap();
        assert_eq!(config.http.listen, "0.0.0.0:5000");
        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.camera.device, "/dev/video0");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let file = TempConfig::write("partial.toml", "[serial]\nport = \"/dev/ttyUSB1\"\n");
        let config = load(&file.0).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB1");
        assert_eq!(config.http.listen, "0.0.0.0:5000");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let file = TempConfig::write("broken.toml", "[serial\nport = 3\n");
        assert!(load(&file.0).is_err());
    }
}
