use crate::{ChatError, Result};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub user: UserSettings,
    pub network: NetworkSettings,
    pub transfer: TransferSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    /// Chat handle announced in JOIN broadcasts. Unique per participant.
    pub handle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Well-known UDP port JOIN/LEAVE/WHO broadcasts arrive on.
    pub discovery_port: u16,
    /// Well-known UDP port for unicast WHOIS queries.
    pub whois_port: u16,
    /// TCP port the image transfer listener binds.
    pub transfer_port: u16,
    /// Target address for presence broadcasts.
    pub broadcast_addr: IpAddr,
    /// Receive buffer size for discovery datagrams.
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Maximum payload bytes per image chunk.
    pub chunk_size: u32,
    /// Where received images are written. Defaults to the user's pictures
    /// (or downloads) directory when unset.
    pub image_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user: UserSettings {
                handle: gethostname::gethostname().to_string_lossy().to_string(),
            },
            network: NetworkSettings {
                discovery_port: 4000,
                whois_port: 4001,
                transfer_port: 4100,
                broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
                buffer_size: 1024,
            },
            transfer: TransferSettings {
                chunk_size: 512,
                image_dir: None,
            },
        }
    }
}

impl Settings {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = match config_path {
            Some(path) => PathBuf::from(path),
            None => Self::default_config_path()?,
        };

        if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| ChatError::Config(format!("Failed to read config: {}", e)))?;

            let settings: Settings = toml::from_str(&content)
                .map_err(|e| ChatError::Config(format!("Failed to parse config: {}", e)))?;

            Ok(settings)
        } else {
            let settings = Self::default();
            settings.save(Some(&path))?;
            Ok(settings)
        }
    }

    pub fn save(&self, config_path: Option<&Path>) -> Result<()> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ChatError::Config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ChatError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&path, content)
            .map_err(|e| ChatError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "lanchat", "daemon")
            .ok_or_else(|| ChatError::Config("Failed to get project directories".to_string()))?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Directory received images are written to.
    pub fn image_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.transfer.image_dir {
            return dir.clone();
        }

        UserDirs::new()
            .and_then(|dirs| {
                dirs.picture_dir()
                    .or_else(|| dirs.download_dir())
                    .map(|d| d.to_path_buf())
            })
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let settings = Settings::default();
        let content = toml::to_string_pretty(&settings).unwrap();
        let parsed: Settings = toml::from_str(&content).unwrap();

        assert_eq!(parsed.network.discovery_port, 4000);
        assert_eq!(parsed.network.whois_port, 4001);
        assert_eq!(parsed.transfer.chunk_size, 512);
        assert_eq!(
            parsed.network.broadcast_addr,
            IpAddr::V4(Ipv4Addr::BROADCAST)
        );
    }

    #[test]
    fn load_creates_default_file_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let settings = Settings::load(path.to_str()).unwrap();
        assert!(path.exists());
        assert_eq!(settings.network.transfer_port, 4100);

        // Second load reads the file that was just written.
        let reloaded = Settings::load(path.to_str()).unwrap();
        assert_eq!(reloaded.user.handle, settings.user.handle);
    }
}
