//! Error taxonomy for the bridge pipeline.
//!
//! Every failure that can cross a component boundary is a [`BridgeError`].
//! The `code()` form is what travels over the wire in `jobError` frames and
//! in HTTP error bodies, so it stays stable.

use thiserror::Error;

/// Failures surfaced by the relay, queue, or automation engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// No live transport to the automation agent at submission time.
    #[error("no automation agent connected")]
    TransportNotConnected,

    /// No eligible host context (chat tab) exists on the agent side.
    #[error("no chat tab found")]
    TargetNotFound,

    /// The automation surface stayed unreachable after one re-establishment
    /// attempt.
    #[error("automation surface unreachable: {0}")]
    InjectionFailed(String),

    /// No eligible input surface (composer) was found during submission.
    #[error("input surface not found")]
    InputSurfaceNotFound,

    /// Failure reported by the automation surface while driving it.
    #[error("surface error: {0}")]
    Surface(String),

    /// Error relayed from the agent that does not fit a known variant.
    #[error("{0}")]
    Remote(String),
}

impl BridgeError {
    /// Stable wire code carried in `jobError.error`.
    pub fn code(&self) -> &str {
        match self {
            Self::TransportNotConnected => "TRANSPORT_NOT_CONNECTED",
            Self::TargetNotFound => "TARGET_NOT_FOUND",
            Self::InjectionFailed(_) => "INJECTION_FAILED",
            Self::InputSurfaceNotFound => "INPUT_SURFACE_NOT_FOUND",
            Self::Surface(_) => "SURFACE_ERROR",
            Self::Remote(_) => "REMOTE_ERROR",
        }
    }

    /// Reconstruct a variant from a wire code, keeping any detail text.
    pub fn from_wire(code: &str, detail: Option<&str>) -> Self {
        match code {
            "TRANSPORT_NOT_CONNECTED" => Self::TransportNotConnected,
            "TARGET_NOT_FOUND" => Self::TargetNotFound,
            "INJECTION_FAILED" => {
                Self::InjectionFailed(detail.unwrap_or("unknown").to_string())
            }
            "INPUT_SURFACE_NOT_FOUND" => Self::InputSurfaceNotFound,
            "SURFACE_ERROR" => Self::Surface(detail.unwrap_or("unknown").to_string()),
            other => Self::Remote(match detail {
                Some(d) => format!("{other}: {d}"),
                None => other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_round_trip() {
        let errs = [
            BridgeError::TransportNotConnected,
            BridgeError::TargetNotFound,
            BridgeError::InjectionFailed("ping failed".into()),
            BridgeError::InputSurfaceNotFound,
        ];
        for err in errs {
            let detail = match &err {
                BridgeError::InjectionFailed(d) => Some(d.clone()),
                _ => None,
            };
            let back = BridgeError::from_wire(err.code(), detail.as_deref());
            assert_eq!(back, err);
        }
    }

    #[test]
    fn unknown_code_becomes_remote() {
        let err = BridgeError::from_wire("SOMETHING_ELSE", None);
        assert_eq!(err, BridgeError::Remote("SOMETHING_ELSE".into()));
    }
}
