use crate::error::{to_env_var, ConfigError};
use chat_agent::providers::configs::{
    OpenAiProviderConfig, ProviderConfig, WorkersAiProviderConfig, WORKERS_AI_HOST,
    WORKERS_AI_MODEL,
};
use config::{Config, Environment};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

/// Static chat UI. Without a directory no asset layer is bound.
#[derive(Debug, Default, Deserialize)]
pub struct AssetSettings {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Conversation storage. Without a directory histories live in memory.
#[derive(Debug, Default, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderSettings {
    #[serde(rename = "workers-ai")]
    WorkersAi {
        account_id: String,
        api_key: String,
        #[serde(default = "default_workers_ai_host")]
        host: String,
        #[serde(default = "default_workers_ai_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    #[serde(rename = "openai")]
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
}

impl ProviderSettings {
    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::WorkersAi {
                account_id,
                api_key,
                host,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::WorkersAi(WorkersAiProviderConfig {
                host,
                account_id,
                api_key,
                model,
                temperature,
                max_tokens,
            }),
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub assets: AssetSettings,
    #[serde(default)]
    pub store: StoreSettings,
    pub provider: ProviderSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("provider.type", "workers-ai")?
            .add_source(
                Environment::with_prefix("CHAT_AGENT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                if let Some(field) = missing_field(&err.to_string()) {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

/// Dotted path of the field named in a "missing field" error. Provider fields
/// are reported without their section, so they are placed under `provider`.
fn missing_field(message: &str) -> Option<String> {
    let start = message.find("missing field `")? + "missing field `".len();
    let (field, _) = message[start..].split_once('`')?;
    match field {
        "provider" | "server" | "assets" | "store" => Some(field.to_string()),
        _ => Some(format!("provider.{}", field)),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_workers_ai_host() -> String {
    WORKERS_AI_HOST.to_string()
}

fn default_workers_ai_model() -> String {
    WORKERS_AI_MODEL.to_string()
}

fn default_openai_host() -> String {
    "https://api.openai.com".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}
