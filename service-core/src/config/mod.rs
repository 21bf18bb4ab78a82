use crate::error::AppError;
use config::{Config as Cfg, Environment, File};
use serde::{Deserialize, de::DeserializeOwned};

pub use config::FileFormat;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

/// Load `T` from an optional `{file_stem}.{toml,yaml,json}` file overlaid with
/// `{env_prefix}__SECTION__KEY` environment variables.
pub fn load_layered<T: DeserializeOwned>(file_stem: &str, env_prefix: &str) -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let config = Cfg::builder()
        .add_source(File::with_name(file_stem).required(false))
        .add_source(
            Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

/// Parse `T` from an in-memory document. Used by tests and embedded defaults.
pub fn load_from_str<T: DeserializeOwned>(contents: &str, format: FileFormat) -> Result<T, AppError> {
    let config = Cfg::builder()
        .add_source(File::from_str(contents, format))
        .build()?;

    Ok(config.try_deserialize()?)
}
