mod parsing;
mod secret;
mod settings;
mod types;

#[allow(unused_imports)]
pub(crate) use types::{
    AttemptSettings, ConfigError, Environment, RealtimeSettings, Settings, StorageBackend,
};
