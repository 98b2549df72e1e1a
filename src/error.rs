pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad zone-name format, missing forward addresses, invalid subdomain
    /// prefixes. Fatal at startup.
    ConfigValidation,
    /// Same checks as ConfigValidation but triggered by a runtime reload;
    /// the new generation is rejected and the previous one keeps serving.
    ConfigReload,
    /// Config enables recursion but the binary was built without a
    /// recursor backend.
    RecursionUnsupported,
    /// All upstreams failed during forwarding.
    UpstreamFailure,
    /// No responder in the chain handled the query.
    ResponderMiss,
    /// Failed to write the reply back to the client.
    WriteFailure,
    /// Tailnet event-bus error; never surfaced to a DNS client.
    TailnetStreamError,
    Notify,
    SerdeYaml,
    DomainName,
    Io,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.kind, message),
            None => self.kind.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ErrorKind::*;

        match self {
            ConfigValidation => write!(f, "config validation error"),
            ConfigReload => write!(f, "config reload error"),
            RecursionUnsupported => write!(f, "recursion unsupported"),
            UpstreamFailure => write!(f, "upstream failure"),
            ResponderMiss => write!(f, "no responder handled the query"),
            WriteFailure => write!(f, "failed to write reply"),
            TailnetStreamError => write!(f, "tailnet stream error"),
            Notify => write!(f, "notify error"),
            SerdeYaml => write!(f, "serde yaml error"),
            DomainName => write!(f, "invalid domain name"),
            Io => write!(f, "io error"),
        }
    }
}

impl From<notify::Error> for Error {
    fn from(value: notify::Error) -> Self {
        Self {
            kind: ErrorKind::Notify,
            message: Some(value.to_string()),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(value: serde_yaml::Error) -> Self {
        Self {
            kind: ErrorKind::SerdeYaml,
            message: Some(value.to_string()),
        }
    }
}

impl From<domain::base::name::NameError> for Error {
    fn from(value: domain::base::name::NameError) -> Self {
        Self {
            kind: ErrorKind::DomainName,
            message: Some(value.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self {
            kind: ErrorKind::Io,
            message: Some(value.to_string()),
        }
    }
}

/// Shorthand for constructing an `Error`: `tungsten_error!(Kind => "msg {}", arg)`.
#[macro_export]
macro_rules! tungsten_error {
    ($kind:ident => $($arg:tt)*) => {
        $crate::error::Error::new($crate::error::ErrorKind::$kind, format!($($arg)*))
    };
}
