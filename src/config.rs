use std::{
    collections::HashMap,
    env, fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::{Map, Value};

#[cfg(feature = "tch-backend")]
use tch::Device;

use crate::error::ServiceError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub model_name: String,
    pub model_dir: PathBuf,
    pub model_config_path: PathBuf,
    #[cfg(feature = "tch-backend")]
    pub device: Device,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080));

        let model_name = env::var("MODEL_NAME").unwrap_or_else(|_| "model".to_string());
        let model_dir =
            PathBuf::from(env::var("MODEL_DIR").unwrap_or_else(|_| "model_store".to_string()));
        let model_config_path = env::var("MODEL_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| model_dir.join("model-config.yaml"));

        #[cfg(feature = "tch-backend")]
        let device = {
            let raw = env::var("DEVICE").unwrap_or_else(|_| "cpu".into());
            parse_device(&raw)
        };

        Ok(Self {
            listen_addr,
            model_name,
            model_dir,
            model_config_path,
            #[cfg(feature = "tch-backend")]
            device,
        })
    }
}

/// Deployment file for one served model. Only the `handler` section is
/// interpreted; worker and batching keys belong to the host and are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub handler: HandlerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandlerConfig {
    /// Engine constructor overrides, merged by field name.
    #[serde(default)]
    pub vllm_engine_config: Map<String, Value>,
    /// Model location relative to the model directory.
    #[serde(default)]
    pub model_path: Option<String>,
    /// Adapter name to adapter weights, relative to the model directory.
    #[serde(default)]
    pub adapters: HashMap<String, String>,
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self, ServiceError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            ServiceError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ServiceError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
            .map_err(|e| ServiceError::Config(format!("invalid model config: {e}")))
    }
}

#[cfg(feature = "tch-backend")]
fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}
