use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::warn;

use qaaq_gateway::ais_relay::AisConfig;

/// Placeholder JWT secrets that MUST NOT be used outside development.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

const DEV_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub ais: AisConfig,
    pub whatsapp_url: Option<String>,
    pub whatsapp_token: Option<String>,
    pub llm_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub google_maps_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        // Empty values count as unset
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let dev_mode = matches!(var("QAAQ_DEV").as_deref(), Some("1") | Some("true"));
        let jwt_secret = match var("QAAQ_JWT_SECRET") {
            Some(secret) if !PLACEHOLDER_SECRETS.contains(&secret.as_str()) => secret,
            _ if dev_mode => {
                warn!("QAAQ_JWT_SECRET unset or a placeholder; using the development secret");
                DEV_SECRET.to_string()
            }
            _ => bail!("QAAQ_JWT_SECRET is unset or still a placeholder. Set it in your .env file, or QAAQ_DEV=1 for local use."),
        };

        let port: u16 = var("QAAQ_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("QAAQ_PORT must be a port number")?;

        let max_age_mins: u64 = match var("QAAQ_AIS_MAX_AGE_MINS") {
            Some(v) => v.parse().context("QAAQ_AIS_MAX_AGE_MINS must be a whole number of minutes")?,
            None => 30,
        };

        let max_age_secs = max_age_mins
            .checked_mul(60)
            .context("QAAQ_AIS_MAX_AGE_MINS is too large")?;

        let ais = AisConfig {
            api_key: var("AISSTREAM_API_KEY"),
            max_age: Duration::from_secs(max_age_secs),
            ..AisConfig::default()
        };

        Ok(Self {
            host: var("QAAQ_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: var("QAAQ_DB_PATH").unwrap_or_else(|| "qaaq.db".into()).into(),
            jwt_secret,
            ais,
            whatsapp_url: var("QAAQ_WHATSAPP_URL"),
            whatsapp_token: var("QAAQ_WHATSAPP_TOKEN"),
            llm_url: var("QAAQ_LLM_URL"),
            llm_api_key: var("QAAQ_LLM_API_KEY"),
            llm_model: var("QAAQ_LLM_MODEL"),
            google_maps_api_key: var("GOOGLE_MAPS_API_KEY"),
        })
    }
}
