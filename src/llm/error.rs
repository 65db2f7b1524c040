//! Upstream error surface and retry classification.
//!
//! Every failed model call collapses into an [`ApiError`] carrying the HTTP
//! status plus the (key, model) pair it happened on. A pure classifier maps
//! the status onto the three retry decisions the executors act on.

use thiserror::Error;

/// Error from a single upstream model call.
#[derive(Debug, Clone, Error)]
#[error("{model}: HTTP {status}: {message}")]
pub struct ApiError {
    /// HTTP status code; 500 when the failure happened below HTTP.
    pub status: u16,

    /// The API key the failed call used.
    pub key: String,

    /// The backend model name.
    pub model: String,

    /// Short provider-supplied description, if any.
    pub message: String,
}

/// How a failed call affects retries, the key pool and the model task.
///
/// `permanent` forbids retrying the same (key, model) pair for the rest of
/// the request. `evict_key` removes the key from the pool globally.
/// `drop_model` marks the model task failed without further attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposition {
    pub permanent: bool,
    pub evict_key: bool,
    pub drop_model: bool,
}

const TRANSIENT: Disposition = Disposition {
    permanent: false,
    evict_key: false,
    drop_model: false,
};

/// Classify an HTTP status into a retry disposition.
///
/// 401/403 condemn the key, 404 and the remaining 4xx (bar 429) condemn the
/// model, and everything else (429, 5xx, transport) is transient.
pub fn classify_status(status: u16) -> Disposition {
    match status {
        401 | 403 => Disposition {
            permanent: true,
            evict_key: true,
            drop_model: false,
        },
        404 => Disposition {
            permanent: true,
            evict_key: false,
            drop_model: true,
        },
        429 => TRANSIENT,
        400..=499 => Disposition {
            permanent: true,
            evict_key: false,
            drop_model: true,
        },
        _ => TRANSIENT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failures_evict_key() {
        for status in [401, 403] {
            let d = classify_status(status);
            assert!(d.permanent);
            assert!(d.evict_key);
            assert!(!d.drop_model);
        }
    }

    #[test]
    fn test_missing_model_drops_model() {
        let d = classify_status(404);
        assert!(d.permanent);
        assert!(!d.evict_key);
        assert!(d.drop_model);
    }

    #[test]
    fn test_other_client_errors_drop_model() {
        for status in [400, 405, 422] {
            let d = classify_status(status);
            assert!(d.permanent, "status {status}");
            assert!(!d.evict_key, "status {status}");
            assert!(d.drop_model, "status {status}");
        }
    }

    #[test]
    fn test_transient_statuses_retry() {
        for status in [429, 500, 502, 503, 504] {
            let d = classify_status(status);
            assert_eq!(d, TRANSIENT, "status {status}");
        }
    }
}
