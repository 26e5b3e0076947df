//! Lifetime extension of an in-flight request.
//!
//! The accept path owns the original request only for the duration of its
//! call. `ExtendRequest::begin_extension` turns it into an owned handle that can
//! travel to a worker; `ExtendedRequest::complete` consumes the handle and
//! releases whatever the transport still holds for it. Consuming `self` makes a
//! second completion unrepresentable.

use std::borrow::Cow;

#[derive(Debug, thiserror::Error)]
pub enum ExtendError {
    #[error("client disconnected before the request could be deferred")]
    ClientGone,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("client disconnected before the response was delivered")]
    ClientGone,
    #[error("{0}")]
    Other(String),
}

/// An original request that can be detached from the accept path.
pub trait ExtendRequest {
    type Extended: ExtendedRequest;

    fn begin_extension(self) -> Result<Self::Extended, ExtendError>;
}

/// A request handle whose lifetime is no longer tied to the accept path.
pub trait ExtendedRequest: Send + 'static {
    /// Short description for logs (method and path for HTTP).
    fn label(&self) -> Cow<'_, str>;

    /// Release the handle. Called exactly once, whether or not a handler ran.
    fn complete(self) -> Result<(), CompletionError>;
}
