use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_MODEL: &str = "deepseek/deepseek-r1-0528:free";
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";
pub const PORT_ENV: &str = "PORT";

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_static_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_tesseract() -> String {
    "tesseract".to_string()
}

fn default_max_image_dimension() -> u32 {
    2400
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub client: ClientConfig,
    pub proxy: ProxyConfig,
    pub window: WindowConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Base URL of the relay, without the `/chat` suffix.
    pub api_base: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub upstream_base: String,
    pub referer_fallback: String,
    pub title: String,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// Filled from the environment only, never written back to disk.
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OcrConfig {
    #[serde(default = "default_tesseract")]
    pub tesseract: String,
    pub language: String,
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        OcrConfig {
            tesseract: default_tesseract(),
            language: "eng".to_string(),
            max_image_dimension: default_max_image_dimension(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            client: ClientConfig {
                api_base: "http://127.0.0.1:3000/api".to_string(),
                model: DEFAULT_MODEL.to_string(),
                temperature: default_temperature(),
                max_tokens: default_max_tokens(),
            },
            proxy: ProxyConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
                upstream_base: "https://openrouter.ai/api/v1".to_string(),
                referer_fallback: "http://localhost:3000".to_string(),
                title: "DeepSeek Chat App".to_string(),
                static_dir: default_static_dir(),
                api_key: None,
            },
            window: WindowConfig {
                width: 900,
                height: 700,
            },
            ocr: OcrConfig::default(),
        }
    }
}

impl Config {
    /// Reads `config.toml` from the config directory, then applies the
    /// environment (`OPENROUTER_API_KEY`, `PORT`). Any problem with the file
    /// falls back to defaults.
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        let mut config = if config_path.exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => Self::from_toml(&contents).unwrap_or_else(|e| {
                    tracing::warn!("Error parsing config.toml: {}. Using defaults.", e);
                    Config::default()
                }),
                Err(e) => {
                    tracing::warn!("Error reading config.toml: {}. Using defaults.", e);
                    Config::default()
                }
            }
        } else {
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Environment overrides. The port also moves the client's default relay
    /// URL so an in-process proxy and the client agree.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.proxy.api_key = Some(key);
        }
        if let Some(port) = lookup(PORT_ENV).and_then(|p| p.trim().parse::<u16>().ok()) {
            self.set_port(port);
        }
    }

    pub fn set_port(&mut self, port: u16) {
        let old_base = format!("http://{}:{}/api", self.proxy.host, self.proxy.port);
        self.proxy.port = port;
        if self.client.api_base == old_base {
            self.client.api_base = format!("http://{}:{}/api", self.proxy.host, port);
        }
    }

    pub fn get_config_path() -> PathBuf {
        Self::get_config_dir().join("config.toml")
    }

    pub fn get_config_dir() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("deepseek-chat"),
            None => PathBuf::from("."),
        }
    }

    pub fn history_db_path() -> PathBuf {
        Self::get_config_dir().join("history.sqlite")
    }
}
