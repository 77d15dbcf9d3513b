mod settings;

pub use settings::{
    ApiConfig, FeedConfig, LogFormat, LoggingConfig, OtelConfig, Settings, SocketConfig,
};
