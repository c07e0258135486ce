pub mod audio;
pub mod audio_utils;
pub mod config;
pub mod factory;
pub mod presets;
pub mod realtime;
pub mod store;

pub use config::Config;
pub use factory::OpenAISessionFactory;
pub use store::JsonFileStore;
