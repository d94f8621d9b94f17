use serde::{Deserialize, Serialize};

pub const WORKERS_AI_HOST: &str = "https://api.cloudflare.com";
pub const WORKERS_AI_MODEL: &str = "@cf/meta/llama-3.3-70b-instruct-fp8-fast";

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProviderConfig {
    WorkersAi(WorkersAiProviderConfig),
    OpenAi(OpenAiProviderConfig),
}

impl ProviderConfig {
    /// Name reported by the capability check
    pub fn provider_name(&self) -> &'static str {
        match self {
            ProviderConfig::WorkersAi(_) => "workers-ai",
            ProviderConfig::OpenAi(_) => "openai",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersAiProviderConfig {
    pub host: String,
    pub account_id: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}
