//! Classification of canceled results into a stable (reason, code, message) triple.
//!
//! Integer tags on [`CancellationReason`] and [`CancellationErrorCode`] are part
//! of the public contract. New codes are appended; existing values never move.

use crate::engine::{BackendCancellation, NativeEngine};
use crate::error::RecognitionError;
use crate::result::ResultEnvelope;

/// Why a recognition session was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[repr(i32)]
pub enum CancellationReason {
    /// The backend or the runtime reported an error.
    Error = 1,
    /// The audio stream ended without an error signal.
    EndOfStream = 2,
}

impl CancellationReason {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::EndOfStream),
            _ => None,
        }
    }
}

/// Closed set of cancellation error codes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(ascii_case_insensitive)]
#[repr(i32)]
#[non_exhaustive]
pub enum CancellationErrorCode {
    NoError = 0,
    #[strum(to_string = "AuthFailure", serialize = "AuthenticationFailure")]
    AuthFailure = 1,
    BadRequest = 2,
    TooManyRequests = 3,
    Forbidden = 4,
    ConnectionFailure = 5,
    ServiceTimeout = 6,
    ServiceError = 7,
    ServiceUnavailable = 8,
    RuntimeError = 9,
    ServiceRedirectTemporary = 10,
    ServiceRedirectPermanent = 11,
    EmbeddedModelError = 12,
}

impl CancellationErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        use CancellationErrorCode::*;
        let code = match value {
            0 => NoError,
            1 => AuthFailure,
            2 => BadRequest,
            3 => TooManyRequests,
            4 => Forbidden,
            5 => ConnectionFailure,
            6 => ServiceTimeout,
            7 => ServiceError,
            8 => ServiceUnavailable,
            9 => RuntimeError,
            10 => ServiceRedirectTemporary,
            11 => ServiceRedirectPermanent,
            12 => EmbeddedModelError,
            _ => return None,
        };
        Some(code)
    }
}

/// Map a backend error identifier into the closed code set.
///
/// Numeric identifiers are read as HTTP statuses or WebSocket close codes;
/// anything else is matched against the code names. Returns `None` for
/// identifiers with no counterpart.
pub fn map_backend_code(raw: &str) -> Option<CancellationErrorCode> {
    use CancellationErrorCode::*;

    let raw = raw.trim();
    if let Ok(status) = raw.parse::<u16>() {
        return match status {
            307 => Some(ServiceRedirectTemporary),
            308 => Some(ServiceRedirectPermanent),
            400 => Some(BadRequest),
            401 => Some(AuthFailure),
            403 => Some(Forbidden),
            408 | 504 => Some(ServiceTimeout),
            429 => Some(TooManyRequests),
            500 | 1011 => Some(ServiceError),
            502 | 503 => Some(ServiceUnavailable),
            1006 => Some(ConnectionFailure),
            _ => None,
        };
    }

    raw.parse().ok()
}

/// Structured cancellation data derived from a canceled result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationDetails {
    reason: CancellationReason,
    error_code: CancellationErrorCode,
    error_details: String,
}

impl CancellationDetails {
    /// Derive details for `result`, which must have the `Canceled` outcome.
    pub fn from_result(
        result: &ResultEnvelope,
        engine: &dyn NativeEngine,
    ) -> Result<Self, RecognitionError> {
        if !result.is_canceled() {
            return Err(RecognitionError::invalid_state(
                "cancellation details",
                format!(
                    "result {} has outcome {}, expected Canceled",
                    result.result_id(),
                    result.outcome()
                ),
            ));
        }

        Ok(Self::from_backend(engine.classify_cancellation(result)))
    }

    /// Total mapping from a backend signal. Any error signal yields a code
    /// other than `NoError`; unmapped identifiers become `RuntimeError` with
    /// the raw identifier kept in the details.
    pub fn from_backend(signal: BackendCancellation) -> Self {
        let (code, message) = match signal {
            BackendCancellation::EndOfStream => {
                return Self {
                    reason: CancellationReason::EndOfStream,
                    error_code: CancellationErrorCode::NoError,
                    error_details: String::new(),
                };
            }
            BackendCancellation::Error { code, message } => (code, message),
        };

        let mapped = code.as_deref().and_then(map_backend_code);
        let (error_code, error_details) = match (mapped, code) {
            (Some(CancellationErrorCode::NoError) | None, Some(raw)) => {
                log::warn!("Unmapped backend cancellation code '{}'", raw);
                (
                    CancellationErrorCode::RuntimeError,
                    annotate_unmapped(&message, &raw),
                )
            }
            (Some(code), _) => (code, message),
            (None, None) => (CancellationErrorCode::RuntimeError, message),
        };

        Self {
            reason: CancellationReason::Error,
            error_code,
            error_details,
        }
    }

    pub fn reason(&self) -> CancellationReason {
        self.reason
    }

    pub fn error_code(&self) -> CancellationErrorCode {
        self.error_code
    }

    pub fn error_details(&self) -> &str {
        &self.error_details
    }
}

fn annotate_unmapped(message: &str, raw: &str) -> String {
    if message.is_empty() {
        format!("unmapped backend code '{}'", raw)
    } else {
        format!("{} (unmapped backend code '{}')", message, raw)
    }
}
