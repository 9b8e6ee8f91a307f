//! Device identity resolution across persistent connections.
//!
//! A connection starts anonymous; a registration sentence (or an
//! out-of-band default supplied by the transport layer) binds it to a
//! device session that lives until the connection closes.

use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::FixedOffset;
use dashmap::DashMap;
use tracing::debug;

use crate::position::AttributeValue;

/// Opaque identifier for one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Long-lived binding between a connection and the device transmitting on
/// it: the device's self-reported identifier, our internal numeric id, and
/// a small attribute bag (last-writer-wins).
#[derive(Debug)]
pub struct DeviceSession {
    device_id: u64,
    unique_id: String,
    time_zone: RwLock<Option<FixedOffset>>,
    attributes: DashMap<String, AttributeValue>,
}

impl DeviceSession {
    fn new(device_id: u64, unique_id: &str) -> Self {
        Self {
            device_id,
            unique_id: unique_id.to_string(),
            time_zone: RwLock::new(None),
            attributes: DashMap::new(),
        }
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn time_zone(&self) -> Option<FixedOffset> {
        *self.time_zone.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_time_zone(&self, time_zone: FixedOffset) {
        *self.time_zone.write().unwrap_or_else(|e| e.into_inner()) = Some(time_zone);
    }

    pub fn set(&self, key: &str, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<AttributeValue> {
        self.attributes.get(key).map(|value| value.clone())
    }
}

/// Lookup/bind contract consumed by the decoder.
///
/// Both operations may come back empty; the decoder degrades by dropping
/// the sentence rather than faulting.
pub trait IdentityResolver: Send + Sync {
    /// Implicit lookup for an already-bound connection.
    fn resolve(&self, connection: ConnectionId) -> Option<Arc<DeviceSession>>;

    /// Explicit binding from a registration sentence, or an out-of-band
    /// default supplied by the transport layer.
    fn bind(&self, connection: ConnectionId, reported_id: &str) -> Option<Arc<DeviceSession>>;
}

/// In-memory session registry.
///
/// The identifier-to-device mapping is create-if-absent and atomic per
/// identifier; concurrent binds from different connection tasks never
/// allocate two internal ids for the same reporter.
#[derive(Debug)]
pub struct SessionRegistry {
    auto_register: bool,
    next_device_id: AtomicU64,
    device_ids: DashMap<String, u64>,
    sessions: DashMap<ConnectionId, Arc<DeviceSession>>,
}

impl SessionRegistry {
    /// Registry that accepts any reporter, allocating internal ids on
    /// first contact.
    pub fn new() -> Self {
        Self {
            auto_register: true,
            next_device_id: AtomicU64::new(1),
            device_ids: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    /// Registry that only binds identifiers registered ahead of time;
    /// unknown reporters fail to bind.
    pub fn with_known_devices<I, S>(reported_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let registry = Self {
            auto_register: false,
            next_device_id: AtomicU64::new(1),
            device_ids: DashMap::new(),
            sessions: DashMap::new(),
        };
        for reported_id in reported_ids {
            registry.register(reported_id.as_ref());
        }
        registry
    }

    /// Allocate (or look up) the internal id for a reported identifier.
    pub fn register(&self, reported_id: &str) -> u64 {
        *self
            .device_ids
            .entry(reported_id.to_string())
            .or_insert_with(|| self.next_device_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Drop the session bound to a closed connection. The identifier
    /// mapping survives; the same device reconnecting keeps its id.
    pub fn close(&self, connection: ConnectionId) {
        self.sessions.remove(&connection);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityResolver for SessionRegistry {
    fn resolve(&self, connection: ConnectionId) -> Option<Arc<DeviceSession>> {
        self.sessions
            .get(&connection)
            .map(|session| Arc::clone(&session))
    }

    fn bind(&self, connection: ConnectionId, reported_id: &str) -> Option<Arc<DeviceSession>> {
        let device_id = if self.auto_register {
            self.register(reported_id)
        } else {
            *self.device_ids.get(reported_id)?
        };

        let session = self
            .sessions
            .entry(connection)
            .and_modify(|existing| {
                if existing.unique_id() != reported_id {
                    debug!(
                        connection = connection.0,
                        reported_id, "rebinding connection to a different device"
                    );
                    *existing = Arc::new(DeviceSession::new(device_id, reported_id));
                }
            })
            .or_insert_with(|| Arc::new(DeviceSession::new(device_id, reported_id)))
            .clone();
        Some(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_before_bind_is_empty() {
        let registry = SessionRegistry::new();
        assert!(registry.resolve(ConnectionId(1)).is_none());
    }

    #[test]
    fn test_bind_then_resolve() {
        let registry = SessionRegistry::new();
        let bound = registry.bind(ConnectionId(1), "860000000000001").unwrap();
        let resolved = registry.resolve(ConnectionId(1)).unwrap();

        assert_eq!(bound.device_id(), resolved.device_id());
        assert_eq!(resolved.unique_id(), "860000000000001");
    }

    #[test]
    fn test_same_reporter_keeps_one_id_across_connections() {
        let registry = SessionRegistry::new();
        let first = registry.bind(ConnectionId(1), "860000000000001").unwrap();
        let second = registry.bind(ConnectionId(2), "860000000000001").unwrap();
        let other = registry.bind(ConnectionId(3), "860000000000002").unwrap();

        assert_eq!(first.device_id(), second.device_id());
        assert_ne!(first.device_id(), other.device_id());
    }

    #[test]
    fn test_rebinding_replaces_the_session() {
        let registry = SessionRegistry::new();
        let first = registry.bind(ConnectionId(1), "860000000000001").unwrap();
        first.set("note", "stale");

        let second = registry.bind(ConnectionId(1), "860000000000002").unwrap();
        assert_eq!(second.unique_id(), "860000000000002");
        assert!(second.get("note").is_none());
    }

    #[test]
    fn test_rebinding_same_reporter_keeps_the_session() {
        let registry = SessionRegistry::new();
        let first = registry.bind(ConnectionId(1), "860000000000001").unwrap();
        first.set("note", "kept");

        let second = registry.bind(ConnectionId(1), "860000000000001").unwrap();
        assert_eq!(
            second.get("note"),
            Some(AttributeValue::Text("kept".to_string()))
        );
    }

    #[test]
    fn test_close_drops_the_session_but_not_the_id() {
        let registry = SessionRegistry::new();
        let first = registry.bind(ConnectionId(1), "860000000000001").unwrap();
        registry.close(ConnectionId(1));

        assert!(registry.resolve(ConnectionId(1)).is_none());
        assert_eq!(registry.session_count(), 0);

        let again = registry.bind(ConnectionId(5), "860000000000001").unwrap();
        assert_eq!(again.device_id(), first.device_id());
    }

    #[test]
    fn test_restricted_registry_rejects_unknown_reporters() {
        let registry = SessionRegistry::with_known_devices(["860000000000001"]);
        assert!(registry.bind(ConnectionId(1), "999999999999999").is_none());
        assert!(registry.bind(ConnectionId(1), "860000000000001").is_some());
    }

    #[test]
    fn test_concurrent_registration_allocates_one_id() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.register("860000000000001"))
            })
            .collect();

        let ids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|id| *id == ids[0]));
    }

    #[test]
    fn test_session_time_zone_and_attributes() {
        let registry = SessionRegistry::new();
        let session = registry.bind(ConnectionId(1), "860000000000001").unwrap();
        assert!(session.time_zone().is_none());

        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        session.set_time_zone(offset);
        assert_eq!(session.time_zone(), Some(offset));

        session.set("batteryAlertSent", true);
        assert_eq!(
            session.get("batteryAlertSent"),
            Some(AttributeValue::Bool(true))
        );
    }
}
