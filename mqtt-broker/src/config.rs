use core::net::Ipv4Addr;

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::LevelFilter;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct MqttConfig {
    connection: Connection,
    tls: Tls,
    users: Users,
    storage: Storage,
    logger: Logger,
    broker: Broker,
}

impl MqttConfig {
    pub fn addr(&self) -> String {
        return self.connection.ip.to_string() + ":" + &self.connection.port.to_string();
    }

    pub fn is_tls_enabled(&self) -> bool {
        return self.connection.tls;
    }

    pub fn server_cert(&self) -> PathBuf {
        return PathBuf::from(&self.tls.server_cert);
    }

    pub fn server_key(&self) -> PathBuf {
        return PathBuf::from(&self.tls.server_key);
    }

    pub fn ca_cert(&self) -> Option<PathBuf> {
        return self.tls.ca_cert.as_ref().map(PathBuf::from);
    }

    pub fn requires_mutual_tls(&self) -> bool {
        return self.tls.mutual_tls;
    }

    pub fn should_log_file(&self) -> bool {
        return self.logger.file;
    }

    pub fn should_log_console(&self) -> bool {
        return self.logger.console;
    }

    pub fn db_path(&self) -> PathBuf {
        return PathBuf::from_str(&self.storage.db_path)
            .unwrap_or_else(|_| panic!("Invalid storage database path: {}", self.storage.db_path));
    }

    pub fn fernet_key_path(&self) -> PathBuf {
        return PathBuf::from_str(&self.storage.fernet_key_path).unwrap_or_else(|_| {
            panic!(
                "Invalid fernet key path: {}",
                self.storage.fernet_key_path
            )
        });
    }

    pub fn require_auth(&self) -> bool {
        return self.users.authenticate;
    }

    pub fn max_queued_messages(&self) -> usize {
        return self.broker.max_queued_messages;
    }

    pub fn log_level(&self) -> LevelFilter {
        return LevelFilter::from_str(&self.logger.level).unwrap_or_else(|_| {
            panic!(
                "Invalid log level provided: {}. Accepted levels are: Off, Error, Warn, Info, Debug",
                self.logger.level
            )
        });
    }
}

impl TryFrom<&Path> for MqttConfig {
    type Error = toml::de::Error;
    fn try_from(value: &Path) -> Result<Self, toml::de::Error> {
        let mut file = match File::open(value) {
            Ok(file) => file,
            Err(err) => {
                log::warn!(
                    "Could not load file: {} to initialize the configuration.",
                    value.to_str().unwrap_or("")
                );
                log::error!("{err}");
                panic!();
            }
        };

        let mut buf = String::new();
        if let Err(err) = file.read_to_string(&mut buf) {
            log::warn!("Could not read file {}", value.to_str().unwrap_or(""));
            log::error!("{err}");
        }

        let config: MqttConfig = toml::from_str(&buf)?;

        // warn for invalid port configurations.
        if config.connection.tls {
            if config.connection.port == 1883 {
                log::warn!("Creating TLS connection on port 1883. This port is reserved for Plaintext MQTT connections.");
            }
        } else if config.connection.port == 8883 {
            log::warn!("Creating Plaintext connection on port 8883. This port is reserved for TLS MQTT connections.");
        }

        // warn for sending plaintext credentials.
        if config.users.authenticate && !config.connection.tls {
            log::warn!("Requiring client to send credentials in the clear. Please change the configuration if this is not intended.")
        }

        if config.tls.mutual_tls && config.tls.ca_cert.is_none() {
            log::warn!("Mutual TLS is enabled but no CA_CERT is configured; client certificates cannot be verified.");
        }

        return Ok(config);
    }
}

#[derive(Deserialize)]
struct Connection {
    tls: bool,
    ip: Ipv4Addr,
    port: u16,
}

#[derive(Deserialize)]
struct Tls {
    server_cert: String,
    server_key: String,
    ca_cert: Option<String>,
    #[serde(default)]
    mutual_tls: bool,
}

#[derive(Deserialize)]
pub struct Users {
    authenticate: bool,
}

#[derive(Deserialize)]
pub struct Storage {
    db_path: String,
    fernet_key_path: String,
}

#[derive(Deserialize)]
pub struct Logger {
    console: bool,
    file: bool,
    level: String,
}

#[derive(Deserialize)]
pub struct Broker {
    max_queued_messages: usize,
}
