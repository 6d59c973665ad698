//! Gateway error taxonomy.
//!
//! Every failure leaving the facade is one of these four kinds; internal
//! signals are translated exactly once, at the facade boundary. A raised
//! error always means no partial result was produced.

/// Errors surfaced by [`crate::gateway::Gateway`] calls.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Invalid gateway composition detected at construction time. Never
    /// retried; no connection is attempted.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The server rejected the credentials during connect. The caller must
    /// fix credentials before retrying.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// An operation required an established link but the link was absent,
    /// or the unit of work ended with unresolved pending acknowledgements.
    #[error("connection error: {0}")]
    Connection(String),

    /// Any other failure propagated from the transport or protocol stack,
    /// wrapped with its original description.
    #[error("unexpected gateway failure: {0}")]
    Unexpected(String),
}
