use std::{
    fs::{self, File},
    path::Path,
};

use crate::{config::MqttConfig, logger::BrokerLogger};

/// Bootstraps process-wide state ahead of the listener: config, logging,
/// and a sanity check that TLS material actually exists. Provisioning that
/// material is someone else's job — this only refuses to start with a
/// config that points at files that aren't there.
pub struct MqttEnv {
    config: MqttConfig,
}

impl MqttEnv {
    pub fn new(config_path: &Path) -> Self {
        if !config_path.exists() {
            init_config(config_path);
        }

        let config = MqttConfig::try_from(config_path).unwrap();
        return Self { config };
    }

    pub fn init_env(self) -> Self {
        if self.config.should_log_file() || self.config.should_log_console() {
            if self.config.should_log_file() {
                init_log_fs();
            }
            BrokerLogger::new(&self.config)
                .init(self.config.log_level())
                .expect("logger already initialized");
        }

        if self.config.is_tls_enabled() {
            check_tls_material(&self.config);
        }

        return self;
    }

    pub fn config(self) -> MqttConfig {
        return self.config;
    }
}

fn check_tls_material(config: &MqttConfig) {
    for path in [config.server_cert(), config.server_key()] {
        if !path.exists() {
            log::error!("Configured TLS file does not exist: {}", path.display());
            panic!("missing TLS material: {}", path.display());
        }
    }

    if let Some(ca) = config.ca_cert() {
        if !ca.exists() {
            log::error!("Configured CA bundle does not exist: {}", ca.display());
            panic!("missing CA bundle: {}", ca.display());
        }
    } else if config.requires_mutual_tls() {
        panic!("mutual_tls is enabled but no ca_cert is configured");
    }
}

const FILE_CREATE_ERR: &str = "Could not create file: ";

fn init_log_fs() {
    let path = Path::new("logs");

    if !fs::exists(path).expect("could not initialize log directory") {
        fs::create_dir(path).expect("could not create logs directory");

        for name in ["debug.log", "error.log", "main.log"] {
            let file_path = path.join(name);
            if let Err(err) = File::create(&file_path) {
                eprintln!("{FILE_CREATE_ERR}{}\n\t{err}", file_path.display());
            }
        }
    }
}

fn init_config(config_path: &Path) {
    let contents = r#"
[connection]
tls = false
ip = "127.0.0.1"
port = 1883

[tls]
server_cert = "tls/cert.pem"
server_key = "tls/key.pem"
ca_cert = "tls/ca.pem"
mutual_tls = false

[users]
authenticate = true

[storage]
db_path = "broker.db"
fernet_key_path = "broker.key"

[logger]
console = true
file = false
level = "Info"

[broker]
max_queued_messages = 100
"#;

    fs::write(config_path, contents).expect("could not create config file");
}
