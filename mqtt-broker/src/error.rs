//! Two error taxonomies, split by blast radius: one for failures tied to a
//! single connection (non-fatal to the process, always end in connection
//! cleanup), one for failures that abort startup.

pub mod client {
    use std::fmt::Display;

    use mqtt_core::err::{DecodeError, DecodeErrorKind};

    #[derive(Debug)]
    pub enum ErrorKind {
        Io(std::io::Error),
        Decode(DecodeErrorKind),
        Tls(String),
        AuthFailure,
        AclDenied,
        ProtocolViolation,
        Storage(String),
    }

    #[derive(Debug)]
    pub struct ClientError {
        kind: ErrorKind,
        message: String,
    }

    impl ClientError {
        pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
            return Self {
                kind,
                message: message.into(),
            };
        }

        pub fn kind(&self) -> &ErrorKind {
            return &self.kind;
        }

        /// Whether this error should close the connection, as opposed to
        /// being recoverable within the protocol (ACL denials and protocol
        /// violations are logged and answered, not fatal).
        pub fn is_connection_fatal(&self) -> bool {
            match self.kind {
                ErrorKind::AclDenied | ErrorKind::ProtocolViolation => false,
                _ => true,
            }
        }
    }

    impl Display for ClientError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}: {}", self.kind, self.message)
        }
    }

    impl std::error::Error for ClientError {}

    impl From<std::io::Error> for ClientError {
        fn from(value: std::io::Error) -> Self {
            let message = value.to_string();
            return Self::new(ErrorKind::Io(value), message);
        }
    }

    impl From<DecodeError> for ClientError {
        fn from(value: DecodeError) -> Self {
            return Self::new(ErrorKind::Decode(value.kind()), value.message().to_owned());
        }
    }
}

pub mod server {
    use std::fmt::Display;

    #[derive(Debug)]
    pub enum ErrorKind {
        BindFailed,
        TlsContext,
        StorageInit,
        ConfigLoad,
    }

    #[derive(Debug)]
    pub struct ServerError {
        kind: ErrorKind,
        message: String,
    }

    impl ServerError {
        pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
            return Self {
                kind,
                message: message.into(),
            };
        }

        pub fn kind(&self) -> &ErrorKind {
            return &self.kind;
        }
    }

    impl Display for ServerError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}: {}", self.kind, self.message)
        }
    }

    impl std::error::Error for ServerError {}
}
