use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub detection: DetectionConfig,
    #[serde(default)]
    pub generation: Option<GenerationConfig>,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_detection_base_url")]
    pub base_url: String,
    pub model: String,
    pub version: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_detection_base_url() -> String {
    "https://detect.roboflow.com".into()
}

impl DetectionConfig {
    pub fn endpoint_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.version
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_generation_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_generation_model() -> String {
    "gpt-4o-mini".into()
}

fn default_currency() -> String {
    "USD".into()
}

fn default_max_tokens() -> u32 {
    1024
}

#[derive(Debug, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            other => Err(format!(
                "{} is not a supported minimum log level. Use `debug`, `info` or `warn`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("Failed to determine the current directory: {}", e))
    })?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("GEM")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn from_yaml(yaml: &str) -> Result<Config, config::ConfigError> {
        config::Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<Config>()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = from_yaml(
            r#"
log_level: info
server:
  host: 0.0.0.0
  port: 8000
detection:
  model: gemstones-2e1jx
  version: "3"
"#,
        )
        .unwrap();

        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.server.get_address(), "0.0.0.0:8000");
        assert_eq!(
            config.detection.endpoint_url(),
            "https://detect.roboflow.com/gemstones-2e1jx/3"
        );
        assert!(config.detection.api_key.is_none());
        assert!(config.generation.is_none());
    }

    #[test]
    fn test_generation_section_defaults() {
        let config = from_yaml(
            r#"
log_level: debug
server:
  host: 127.0.0.1
  port: 8080
detection:
  base_url: http://localhost:9001/
  model: gems
  version: "7"
generation:
  currency: EUR
"#,
        )
        .unwrap();

        assert_eq!(
            config.detection.endpoint_url(),
            "http://localhost:9001/gems/7"
        );
        let generation = config.generation.unwrap();
        assert_eq!(generation.currency, "EUR");
        assert_eq!(generation.model, "gpt-4o-mini");
        assert_eq!(generation.max_tokens, 1024);
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        let result = from_yaml(
            r#"
log_level: verbose
server:
  host: 127.0.0.1
  port: 8080
detection:
  model: gems
  version: "1"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_environment_parsing() {
        let env: Environment = "Production".to_string().try_into().unwrap();
        assert_eq!(env.as_str(), "production");
        assert!(Environment::try_from("staging".to_string()).is_err());
    }
}
