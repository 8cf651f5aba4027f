use crate::config::ConfigError;
use crate::controller::DeviceError;
use crate::mapping::ProfileError;
use crate::output::OutputError;

/// Errors reported by the engine control surface
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine failed to start: {0}")]
    StartFailed(String),

    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Engine is not running")]
    NotRunning,

    #[error("Engine thread went away before replying")]
    ChannelClosed,

    #[error("Engine thread error: {0}")]
    Thread(String),
}
