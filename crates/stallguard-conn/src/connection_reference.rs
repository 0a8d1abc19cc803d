use std::sync::{Arc, Weak};

/// Non-owning handle to a registered connection.
///
/// The id is captured when the reference is created so it can still be
/// reported after the connection itself is gone.
#[derive(Debug)]
pub struct ConnectionReference<C: ?Sized> {
    connection: Weak<C>,
    connection_id: String,
}

impl<C: ?Sized> ConnectionReference<C> {
    pub fn new(connection: &Arc<C>, connection_id: impl Into<String>) -> Self {
        Self {
            connection: Arc::downgrade(connection),
            connection_id: connection_id.into(),
        }
    }

    /// `None` once every owner of the connection has dropped it.
    pub fn try_get_connection(&self) -> Option<Arc<C>> {
        self.connection.upgrade()
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

impl<C: ?Sized> Clone for ConnectionReference<C> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            connection_id: self.connection_id.clone(),
        }
    }
}
