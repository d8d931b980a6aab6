use std::fmt;

/// Failure taxonomy for the control plane. Listing and lookup paths fail fast
/// with the first error; the telemetry sampler isolates these per VM instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection or RPC failure talking to the hypervisor. Not retried here;
    /// retry policy belongs to the caller.
    #[error("hypervisor transport: {0}")]
    Transport(String),

    /// Domain configuration document was malformed or missing required fields.
    #[error("decode domain config: {0}")]
    Decode(String),

    /// Memory-statistics array length was not the one length the positional
    /// tag mapping was verified against. Never partially trusted.
    #[error("malformed memory stats: expected {expected} entries, got {got}")]
    MalformedStats { expected: usize, got: usize },

    /// The balloon reported zero available memory; a usage percentage would
    /// be undefined, so it is surfaced as a reporting error instead of NaN.
    #[error("memory stats reported zero available memory")]
    DivisionByZeroStat,

    /// Network identity lookup failed for one domain.
    #[error("resolve network identity: {0}")]
    Resolution(String),

    /// No such domain or VM. A normal outcome, distinct from transport failure.
    #[error("not found: {0}")]
    NotFound(String),

    /// Disk staging failed; VM creation aborts before any hypervisor mutation.
    #[error("disk staging: {0}")]
    Provision(String),

    #[error("datastore: {0}")]
    Storage(#[from] sqlx::Error),
}

impl Error {
    /// Prefix the message of context-carrying variants with which sub-step
    /// failed. Variants with fixed meaning (`NotFound`, stat errors) pass
    /// through untouched.
    pub fn context(self, ctx: impl fmt::Display) -> Error {
        match self {
            Error::Transport(msg) => Error::Transport(format!("{ctx}: {msg}")),
            Error::Decode(msg) => Error::Decode(format!("{ctx}: {msg}")),
            Error::Resolution(msg) => Error::Resolution(format!("{ctx}: {msg}")),
            Error::Provision(msg) => Error::Provision(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
