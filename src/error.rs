use std::fmt;

use serde_json::Error as JSONError;

/// A WAMP domain-level failure carrying `(error_uri, error_desc, error_details)`.
///
/// Raised by [`crate::Session::expand_uri`] and [`crate::Session::proc_for_uri`], and
/// usable by procedure bodies that want to signal a WAMP-shaped error back to the
/// caller instead of an opaque "unknown error".
#[derive(Debug, Clone, PartialEq)]
pub struct WampError {
    pub error_uri: String,
    pub error_desc: String,
    pub error_details: Option<serde_json::Value>,
}

impl WampError {
    pub fn new(error_uri: impl Into<String>, error_desc: impl Into<String>) -> WampError {
        WampError {
            error_uri: error_uri.into(),
            error_desc: error_desc.into(),
            error_details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> WampError {
        self.error_details = Some(details);
        self
    }
}

impl fmt::Display for WampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_uri, self.error_desc)
    }
}

impl std::error::Error for WampError {}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
}

#[derive(Debug)]
pub enum ErrorKind {
    /// The codec rejected a JSON payload: unknown type code, wrong arity, or a
    /// mutually exclusive PUBLISH flag combination.
    MalformedMessage(String),
    /// `MessageType::of` was asked for an out-of-range code or unrecognized name.
    InvalidType(String),
    /// A domain-level WAMP error, e.g. from CURIE expansion or procedure lookup.
    Wamp(WampError),
    /// A procedure body raised something other than a [`WampError`].
    UnknownProcedureFailure(serde_json::Value),
    /// An inbound CALLRESULT/CALLERROR/EVENT arrived but the corresponding hook
    /// was never installed.
    HookMissing(&'static str),
    /// The JSON encoder/decoder failed outside message-shape validation.
    Json(JSONError),
}

impl Error {
    pub fn new(kind: ErrorKind) -> Error {
        Error { kind }
    }

    pub fn malformed(msg: impl Into<String>) -> Error {
        Error::new(ErrorKind::MalformedMessage(msg.into()))
    }

    pub fn invalid_type(msg: impl Into<String>) -> Error {
        Error::new(ErrorKind::InvalidType(msg.into()))
    }

    pub fn hook_missing(hook: &'static str) -> Error {
        Error::new(ErrorKind::HookMissing(hook))
    }

    #[inline]
    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    /// Recover the `WampError` from a `Wamp`-kind error, or wrap any other
    /// kind into one tagged `errors/unknown`. Used where a `Session` method
    /// that can only fail with `ErrorKind::Wamp` (e.g. `expand_uri`) feeds
    /// straight into CALLERROR construction.
    pub fn into_wamp(self) -> WampError {
        match self.kind {
            ErrorKind::Wamp(e) => e,
            other => WampError::new("errors/unknown", other.description()),
        }
    }

    fn get_description(&self) -> String {
        format!("WAMP Error: {}", self.kind.description())
    }

    #[inline]
    pub fn get_kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl ErrorKind {
    pub fn description(&self) -> String {
        match self {
            ErrorKind::MalformedMessage(s) => format!("malformed WAMP message: {}", s),
            ErrorKind::InvalidType(s) => format!("invalid message type: {}", s),
            ErrorKind::Wamp(e) => e.to_string(),
            ErrorKind::UnknownProcedureFailure(v) => format!("unknown error: {}", v),
            ErrorKind::HookMissing(hook) => format!("no {} hook installed", hook),
            ErrorKind::Json(e) => e.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_description())
    }
}

impl std::error::Error for Error {}

impl From<WampError> for Error {
    fn from(e: WampError) -> Error {
        Error::new(ErrorKind::Wamp(e))
    }
}

impl From<JSONError> for Error {
    fn from(e: JSONError) -> Error {
        Error::new(ErrorKind::Json(e))
    }
}

pub type WampResult<T> = Result<T, Error>;
