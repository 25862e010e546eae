use crate::error::Result;

/// Pluggable bearer-token provider.
///
/// When a queue is configured with an authenticator, every network attempt
/// carries `Authorization: Bearer <token>`. On a `401 Unauthorized` the
/// rejected token is passed to [`invalidate`](Self::invalidate) and one fresh
/// token is requested; if that succeeds, the request is retried exactly once
/// with the new token.
///
/// Implementations should cache the token internally and only hit their
/// token endpoint when no valid token is held. Refreshes are not coordinated
/// across requests: several in-flight requests answering 401 at the same
/// time may each trigger a refresh.
pub trait Authenticator: Send + Sync + 'static {
    /// Returns a token, fetching one if none is cached. A failure here is
    /// reported to the request as an authentication failure; return an error
    /// built with
    /// [`Error::auth_failure_with_hint`](crate::Error::auth_failure_with_hint)
    /// to pass the caller a resolution hint.
    fn token(&self) -> Result<String>;

    /// Drops a token the server rejected, so the next
    /// [`token`](Self::token) call fetches a fresh one.
    fn invalidate(&self, token: &str);
}
