use thiserror::Error;

/// Failure taxonomy for the profiling pipeline.
///
/// `InvalidBracket` is recoverable: the virial-radius solver maps it to a
/// sentinel radius instead of aborting. The other variants are fatal to the
/// profiling request that raised them.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The initial endpoints handed to the root finder evaluate to the same
    /// sign, so no root is bracketed.
    #[error("root-finding endpoints do not bracket a sign change")]
    InvalidBracket,

    /// A precondition on the profiling request failed.
    #[error("invalid profile configuration: {0}")]
    Configuration(String),

    /// Two partial bin tables disagree on layout and cannot be merged.
    #[error("bin table schema mismatch: {0}")]
    SchemaMismatch(String),
}
