pub mod admin;
pub mod auth;
pub mod config;
pub mod error;
pub mod init;
pub mod logger;
pub mod net;
pub mod router;
pub mod session;
pub mod storage;

pub use admin::AdminSurface;
pub use config::MqttConfig;
pub use init::MqttEnv;
pub use router::Router;
pub use session::SessionManager;
pub use storage::Storage;
