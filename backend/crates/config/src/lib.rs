pub mod env;
pub mod settings;
pub mod tracing_init;

pub use env::AppConfig;
pub use settings::{JobSettings, Settings};
pub use tracing_init::init_tracing;
