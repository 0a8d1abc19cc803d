//! Concurrent registry of live connections.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::trace;

use crate::connection_reference::ConnectionReference;
use crate::error::ConnectionError;
use crate::resource_counter::ResourceCounter;
use crate::trace::ConnectionTrace;

/// A connection that can be tracked by a [`ConnectionManager`].
pub trait ManagedConnection: Send + Sync {
    fn connection_id(&self) -> &str;
}

/// Maps connection ids to weak connection handles.
///
/// The manager never keeps a connection alive. A connection whose owners
/// all dropped it while it was still registered is a leak; the next
/// [`walk`](Self::walk) reports it and purges the entry.
pub struct ConnectionManager<C: ?Sized> {
    connections: DashMap<u64, ConnectionReference<C>>,
    upgraded: Arc<ResourceCounter>,
    trace: Arc<dyn ConnectionTrace>,
}

impl<C: ManagedConnection + ?Sized> ConnectionManager<C> {
    /// `max_upgraded_connections` of `None` leaves upgrades unlimited.
    pub fn new(trace: Arc<dyn ConnectionTrace>, max_upgraded_connections: Option<u64>) -> Self {
        Self::with_counter(
            trace,
            Arc::new(ResourceCounter::from_limit(max_upgraded_connections)),
        )
    }

    pub fn with_counter(trace: Arc<dyn ConnectionTrace>, upgraded: Arc<ResourceCounter>) -> Self {
        Self {
            connections: DashMap::new(),
            upgraded,
            trace,
        }
    }

    pub fn add_connection(&self, id: u64, connection: &Arc<C>) -> Result<(), ConnectionError> {
        match self.connections.entry(id) {
            Entry::Occupied(_) => Err(ConnectionError::DuplicateId(id)),
            Entry::Vacant(slot) => {
                slot.insert(ConnectionReference::new(
                    connection,
                    connection.connection_id(),
                ));
                Ok(())
            }
        }
    }

    pub fn remove_connection(&self, id: u64) -> Result<(), ConnectionError> {
        self.connections
            .remove(&id)
            .map(|_| ())
            .ok_or(ConnectionError::UnknownId(id))
    }

    /// Adds the connection and returns a guard that removes it again when
    /// dropped, including on unwind.
    pub fn register(
        self: &Arc<Self>,
        id: u64,
        connection: &Arc<C>,
    ) -> Result<ConnectionRegistration<C>, ConnectionError> {
        self.add_connection(id, connection)?;
        Ok(ConnectionRegistration {
            manager: self.clone(),
            id,
        })
    }

    /// Calls `callback` for every live connection.
    ///
    /// Iterates over a snapshot, so `callback` may add or remove entries,
    /// including its own.
    pub fn walk(&self, mut callback: impl FnMut(&Arc<C>)) {
        let snapshot: Vec<(u64, ConnectionReference<C>)> = self
            .connections
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (id, reference) in snapshot {
            match reference.try_get_connection() {
                Some(connection) => callback(&connection),
                None => {
                    let purged = self
                        .connections
                        .remove_if(&id, |_, current| {
                            current.try_get_connection().is_none()
                        })
                        .is_some();
                    if purged {
                        self.trace
                            .application_never_completed(reference.connection_id());
                    }
                }
            }
        }
    }

    pub fn upgraded_connection_count(&self) -> &Arc<ResourceCounter> {
        &self.upgraded
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn trace(&self) -> &Arc<dyn ConnectionTrace> {
        &self.trace
    }
}

/// RAII registration returned by [`ConnectionManager::register`].
pub struct ConnectionRegistration<C: ManagedConnection + ?Sized> {
    manager: Arc<ConnectionManager<C>>,
    id: u64,
}

impl<C: ManagedConnection + ?Sized> ConnectionRegistration<C> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<C: ManagedConnection + ?Sized> Drop for ConnectionRegistration<C> {
    fn drop(&mut self) {
        if self.manager.remove_connection(self.id).is_err() {
            trace!(id = self.id, "registration already purged");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use crate::timeout_control::TimeoutReason;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingTrace {
        never_completed: Mutex<Vec<String>>,
    }

    impl ConnectionTrace for RecordingTrace {
        fn application_never_completed(&self, connection_id: &str) {
            self.never_completed.lock().push(connection_id.to_string());
        }
        fn heartbeat_slow(&self, _: Duration, _: Duration, _: Timestamp) {}
        fn connection_timed_out(&self, _: &str, _: TimeoutReason) {}
        fn request_body_minimum_data_rate_not_satisfied(&self, _: &str, _: f64) {}
        fn response_minimum_data_rate_not_satisfied(&self, _: &str) {}
        fn not_all_connections_closed_gracefully(&self) {}
        fn not_all_connections_aborted(&self) {}
    }

    struct Conn(String);

    impl ManagedConnection for Conn {
        fn connection_id(&self) -> &str {
            &self.0
        }
    }

    fn conn(id: u64) -> Arc<Conn> {
        Arc::new(Conn(format!("conn-{id}")))
    }

    fn manager() -> (Arc<ConnectionManager<Conn>>, Arc<RecordingTrace>) {
        let trace = Arc::new(RecordingTrace::default());
        (Arc::new(ConnectionManager::new(trace.clone(), None)), trace)
    }

    fn walked_ids(manager: &ConnectionManager<Conn>) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        manager.walk(|c| {
            ids.insert(c.connection_id().to_string());
        });
        ids
    }

    #[test]
    fn registry_tracks_added_minus_removed() {
        let (manager, _) = manager();
        let conns: Vec<_> = (0..5).map(conn).collect();
        for (id, c) in conns.iter().enumerate() {
            manager.add_connection(id as u64, c).unwrap();
        }
        manager.remove_connection(1).unwrap();
        manager.remove_connection(3).unwrap();

        assert_eq!(manager.len(), 3);
        assert!(manager.contains(0) && !manager.contains(1));
        let expected: BTreeSet<_> = ["conn-0", "conn-2", "conn-4"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(walked_ids(&manager), expected);
    }

    #[test]
    fn duplicate_add_leaves_registry_unchanged() {
        let (manager, _) = manager();
        let first = conn(1);
        let second = Arc::new(Conn("other".into()));
        manager.add_connection(1, &first).unwrap();

        assert_eq!(
            manager.add_connection(1, &second),
            Err(ConnectionError::DuplicateId(1))
        );
        assert_eq!(manager.len(), 1);
        assert_eq!(
            walked_ids(&manager),
            BTreeSet::from(["conn-1".to_string()])
        );
    }

    #[test]
    fn removing_unknown_id_fails() {
        let (manager, _) = manager();
        let c = conn(1);
        manager.add_connection(1, &c).unwrap();
        assert_eq!(
            manager.remove_connection(2),
            Err(ConnectionError::UnknownId(2))
        );
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn walk_purges_leaked_connection_once() {
        let (manager, trace) = manager();
        let live_a = conn(1);
        let leaked = conn(2);
        let live_b = conn(3);
        manager.add_connection(1, &live_a).unwrap();
        manager.add_connection(2, &leaked).unwrap();
        manager.add_connection(3, &live_b).unwrap();
        drop(leaked);

        let walked = walked_ids(&manager);
        assert_eq!(walked.len(), 2);
        assert!(walked.contains("conn-1") && walked.contains("conn-3"));
        assert!(!manager.contains(2));

        walked_ids(&manager);
        assert_eq!(*trace.never_completed.lock(), vec!["conn-2".to_string()]);
    }

    #[test]
    fn walk_tolerates_removal_from_callback() {
        let (manager, _) = manager();
        let conns: Vec<_> = (0..4).map(conn).collect();
        for (id, c) in conns.iter().enumerate() {
            manager.add_connection(id as u64, c).unwrap();
        }

        let mut visited = 0;
        manager.walk(|c| {
            visited += 1;
            let id: u64 = c.connection_id()["conn-".len()..].parse().unwrap();
            manager.remove_connection(id).unwrap();
        });
        assert_eq!(visited, 4);
        assert!(manager.is_empty());
    }

    #[test]
    fn registration_removes_on_drop() {
        let (manager, trace) = manager();
        let c = conn(9);
        let registration = manager.register(9, &c).unwrap();
        assert_eq!(registration.id(), 9);
        assert!(manager.register(9, &c).is_err());

        drop(registration);
        assert!(manager.is_empty());
        drop(c);
        walked_ids(&manager);
        assert!(trace.never_completed.lock().is_empty());
    }

    #[test]
    fn upgraded_counter_follows_limit() {
        let trace = Arc::new(RecordingTrace::default());
        let manager: ConnectionManager<Conn> = ConnectionManager::new(trace, Some(1));
        let counter = manager.upgraded_connection_count();
        assert!(counter.try_lock_one());
        assert!(!counter.try_lock_one());
    }
}
