use std::io;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    // from
    #[error("failed io {0}")]
    Io(#[from] io::Error),
    #[error("failed to decode toml {0}")]
    TomlDecode(#[from] toml::de::Error),
    #[error("failed to parse url {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("failed to watch config {0}")]
    Notify(#[from] notify::Error),
    #[error("internal server error {0}")]
    Any(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = anyhow::Result<T, E>;
