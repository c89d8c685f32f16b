//! Connection registry.
//!
//! Tracks live transport connections and which (session, user) each one is
//! bound to after a successful join. The session side of the mapping lives
//! in [`crate::session::SessionState`] (member → connection); this is the
//! reverse direction, needed to clean up on disconnect.

use std::collections::HashMap;

use emberlink_proto::{SessionId, UserId};

/// Binding of a connection to a session member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Session the connection joined.
    pub session_id: SessionId,
    /// Member identity it joined as.
    pub user_id: UserId,
}

/// Registry of live connections and their session bindings.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<u64, Option<Binding>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted connection. Returns `false` if the id is
    /// already registered (runtime bug: ids must be unique).
    pub fn register(&mut self, connection: u64) -> bool {
        if self.connections.contains_key(&connection) {
            return false;
        }
        self.connections.insert(connection, None);
        true
    }

    /// Whether a connection is registered.
    pub fn contains(&self, connection: u64) -> bool {
        self.connections.contains_key(&connection)
    }

    /// Bind a connection to the session member it joined as. Rebinding on
    /// a rejoin replaces the previous binding.
    ///
    /// Returns `false` if the connection is not registered.
    pub fn bind(&mut self, connection: u64, session_id: SessionId, user_id: UserId) -> bool {
        match self.connections.get_mut(&connection) {
            Some(slot) => {
                *slot = Some(Binding { session_id, user_id });
                true
            },
            None => false,
        }
    }

    /// The binding of a connection, if it has joined a session.
    pub fn binding(&self, connection: u64) -> Option<&Binding> {
        self.connections.get(&connection).and_then(Option::as_ref)
    }

    /// Drop a connection's binding without unregistering it (explicit
    /// leave; the transport connection stays up).
    pub fn unbind(&mut self, connection: u64) -> Option<Binding> {
        self.connections.get_mut(&connection).and_then(Option::take)
    }

    /// Unregister a connection entirely, returning its binding if any.
    pub fn unregister(&mut self, connection: u64) -> Option<Binding> {
        self.connections.remove(&connection).flatten()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_bind() {
        let mut registry = ConnectionRegistry::new();

        assert!(registry.register(1));
        assert!(!registry.register(1));

        assert!(registry.bind(1, SessionId::new("s1"), UserId::new("alice")));
        let binding = registry.binding(1).unwrap();
        assert_eq!(binding.session_id, SessionId::new("s1"));
        assert_eq!(binding.user_id, UserId::new("alice"));
    }

    #[test]
    fn bind_unregistered_connection_fails() {
        let mut registry = ConnectionRegistry::new();
        assert!(!registry.bind(99, SessionId::new("s1"), UserId::new("alice")));
    }

    #[test]
    fn unbind_keeps_the_connection() {
        let mut registry = ConnectionRegistry::new();
        registry.register(1);
        registry.bind(1, SessionId::new("s1"), UserId::new("alice"));

        let binding = registry.unbind(1).unwrap();
        assert_eq!(binding.user_id, UserId::new("alice"));
        assert!(registry.binding(1).is_none());
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn unregister_returns_binding() {
        let mut registry = ConnectionRegistry::new();
        registry.register(1);
        registry.bind(1, SessionId::new("s1"), UserId::new("alice"));

        let binding = registry.unregister(1).unwrap();
        assert_eq!(binding.session_id, SessionId::new("s1"));
        assert_eq!(registry.connection_count(), 0);

        assert_eq!(registry.unregister(1), None);
    }
}
