//! Backend connection factory seam
//!
//! A [`Connector`] is injected once per registry and is asked for a fresh
//! resource whenever a pool grows. The pool name is passed through so one
//! connector can serve several named backends (primary/replica DSNs, say).

/// The backend factory failed to produce a resource.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("connect failed: {0}")]
pub struct ConnectError(String);

impl ConnectError {
    /// Create a connect error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Factory for the expensive-to-create resources a pool manages.
pub trait Connector: Send + Sync + 'static {
    /// The resource type produced.
    type Conn: Send + Sync + 'static;

    /// Produce a fresh resource for the named backend.
    fn connect(&self, name: &str) -> Result<Self::Conn, ConnectError>;
}

/// Adapts a closure into a [`Connector`].
pub struct FnConnector<F> {
    connect: F,
}

impl<F> FnConnector<F> {
    /// Wrap `connect` as a connector.
    pub fn new(connect: F) -> Self {
        Self { connect }
    }
}

impl<T, F> Connector for FnConnector<F>
where
    T: Send + Sync + 'static,
    F: Fn(&str) -> Result<T, ConnectError> + Send + Sync + 'static,
{
    type Conn = T;

    fn connect(&self, name: &str) -> Result<T, ConnectError> {
        (self.connect)(name)
    }
}
