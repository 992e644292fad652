use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub config_dir: PathBuf,
    pub import_dir: PathBuf,
    pub listen_addr: SocketAddr,
    pub health_check_interval: Duration,
    pub health_check_timeout: Duration,
    /// Scan interval applied to libraries created at startup.
    pub fs_check_interval: Duration,
    /// Library folders ensured to exist in the store at startup.
    pub libraries: Vec<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("config"),
            import_dir: PathBuf::from("."),
            listen_addr: "0.0.0.0:8123".parse().unwrap(),
            health_check_interval: Duration::from_secs(60),
            health_check_timeout: Duration::from_secs(3600),
            fs_check_interval: Duration::from_secs(30 * 60),
            libraries: Vec::new(),
        }
    }
}

impl ControllerConfig {
    pub fn new(config_dir: PathBuf, listen_addr: SocketAddr) -> Self {
        Self {
            config_dir,
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_library(mut self, folder: PathBuf) -> Self {
        self.libraries.push(folder);
        self
    }
}
