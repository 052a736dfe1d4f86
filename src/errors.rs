use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

/// Alpaca representation of an ASCOM error code.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ASCOMErrorCode(u16);

/// The starting value for driver-specific error numbers.
const DRIVER_BASE: u16 = 0x500;

impl ASCOMErrorCode {
    /// Get the driver-specific error code.
    ///
    /// Returns `Ok` with `0`-based driver error code if this is a driver error.
    /// Returns `Err` with raw error code if not a driver error.
    pub const fn as_driver_error(self) -> Result<u16, u16> {
        if let Some(driver_code) = self.0.checked_sub(DRIVER_BASE) {
            Ok(driver_code)
        } else {
            Err(self.0)
        }
    }

    /// Get the raw error code.
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl From<u16> for ASCOMErrorCode {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

/// ASCOM error as reported by the remote Alpaca server.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("ASCOM error {code}: {message}")]
pub struct ASCOMError {
    /// Error number.
    #[serde(rename = "ErrorNumber")]
    pub code: ASCOMErrorCode,
    /// Error message.
    #[serde(rename = "ErrorMessage", default)]
    pub message: Cow<'static, str>,
}

impl ASCOMError {
    /// Create a new `ASCOMError` from given error code and a message.
    pub fn new(code: ASCOMErrorCode, message: impl std::fmt::Display) -> Self {
        Self {
            code,
            message: message.to_string().into(),
        }
    }
}

/// Result type for raw ASCOM responses.
pub type ASCOMResult<T = ()> = Result<T, ASCOMError>;

macro_rules! ascom_error_codes {
    ($(#[doc = $doc:literal] $name:ident = $value:literal,)*) => {
        impl ASCOMErrorCode {
            $(
                #[doc = $doc]
                pub const $name: Self = Self($value);
            )*
        }

        impl std::fmt::Debug for ASCOMErrorCode {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match *self {
                    $(
                        Self::$name => f.write_str(stringify!($name)),
                    )*
                    _ => match self.as_driver_error() {
                        Ok(driver_code) => write!(f, "DRIVER_ERROR[{driver_code}]"),
                        Err(raw_code) => write!(f, "{raw_code:#X}"),
                    },
                }
            }
        }

        impl std::fmt::Display for ASCOMErrorCode {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Debug::fmt(self, f)
            }
        }
    };
}

ascom_error_codes! {
    #[doc = "Success"]
    OK = 0,
    #[doc = "The requested action is not implemented in this driver"]
    ACTION_NOT_IMPLEMENTED = 0x40C,
    #[doc = "The requested operation can not be undertaken at this time"]
    INVALID_OPERATION = 0x40B,
    #[doc = "Invalid value"]
    INVALID_VALUE = 0x401,
    #[doc = "The attempted operation is invalid because the mount is currently in a Parked state"]
    INVALID_WHILE_PARKED = 0x408,
    #[doc = "The attempted operation is invalid because the mount is currently in a Slaved state"]
    INVALID_WHILE_SLAVED = 0x409,
    #[doc = "The communications channel is not connected"]
    NOT_CONNECTED = 0x407,
    #[doc = "Property or method not implemented"]
    NOT_IMPLEMENTED = 0x400,
    #[doc = "A value has not been set"]
    VALUE_NOT_SET = 0x402,
}

/// Errors returned by device adapters.
#[derive(Debug, Error)]
pub enum Error {
    /// The Alpaca server could not be reached (connection refused, timeout, reset).
    #[error("Alpaca server at {url} is unreachable: {source}")]
    Unreachable {
        /// Request URL.
        url: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-2xx HTTP status.
    #[error("Alpaca request to {url} failed with HTTP {status}: {message}")]
    Http {
        /// Request URL.
        url: String,
        /// HTTP status returned by the server.
        status: reqwest::StatusCode,
        /// Response body, usually a plain-text explanation.
        message: String,
    },

    /// The response could not be interpreted as an Alpaca response.
    #[error("Invalid Alpaca response from {url}: {reason}")]
    Protocol {
        /// Request URL.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// The device reported a non-zero error number.
    #[error("Device operation failed: {0}")]
    Ascom(#[from] ASCOMError),

    /// The adapter is not connected to its Alpaca server.
    #[error("Not connected to Alpaca server")]
    NotConnected,

    /// An argument was rejected before contacting the device.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// The motion was aborted by another motion or by `stop_motion`.
    #[error("Motion aborted")]
    Aborted,

    /// The dome shutter reported its error state.
    #[error("Dome shutter reported an error")]
    ShutterFault,
}

impl Error {
    pub(crate) fn invalid_value(message: impl std::fmt::Display) -> Self {
        Self::InvalidValue(message.to_string())
    }

    pub(crate) fn protocol(url: &reqwest::Url, reason: impl std::fmt::Display) -> Self {
        Self::Protocol {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error means the server could not be reached at all.
    pub const fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }

    /// ASCOM error reported by the device, if any.
    pub const fn as_ascom(&self) -> Option<&ASCOMError> {
        match self {
            Self::Ascom(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type for adapter operations.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;
