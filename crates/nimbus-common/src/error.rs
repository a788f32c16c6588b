use thiserror::Error;

/// Errors surfaced while reconciling a manifest against the control plane.
///
/// Only `AuthExpired` is recoverable (one re-authentication followed by a
/// retry of the same call); everything else aborts the run.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP 401 from the control plane. Handled by re-authenticating and
    /// retrying the call; never shown to the operator unless it repeats.
    #[error("authorization expired (HTTP 401)")]
    AuthExpired,

    /// Any other non-2xx response.
    #[error("HTTP {status} from {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    /// Connection refused, DNS failure, request timeout.
    #[error("control plane unreachable, please try again later: {detail}")]
    Transport { detail: String },

    /// A 2xx response that is not JSON.
    #[error("unexpected content type from {url}: {content_type}")]
    UnexpectedContentType { url: String, content_type: String },

    /// A 2xx JSON response that does not match the expected shape.
    #[error("invalid response body from {url}: {detail}")]
    InvalidBody { url: String, detail: String },

    /// The polling deadline elapsed without the deployment reaching ACTIVE.
    #[error("deployment did not reach ACTIVE within {elapsed_secs}s")]
    DeployTimeout { elapsed_secs: u64 },

    #[error("failed to read manifest {path}: {source}")]
    ManifestIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {source}")]
    ManifestParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Structurally valid YAML that is not a usable manifest
    /// (e.g. a missing or malformed `fn_image` field during retagging).
    #[error("manifest {path} is invalid: {detail}")]
    ManifestInvalid { path: String, detail: String },

    #[error("credential {var} is not set")]
    MissingCredentials { var: String },
}
