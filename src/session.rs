//! Resumable sessions.
//!
//! A [`Session`] is what survives a completed handshake: the secret a later
//! handshake can resume from, the parameters it was negotiated under and the
//! peer chain. The [`SessionCache`] indexes sessions by id (the TLS 1.2
//! session id or a TLS 1.3 ticket) and by the `host:port` of the peer, and
//! forgets them after a timeout.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use zeroize::Zeroize;

use crate::buffer::Buf;
use crate::types::{CipherSuite, ProtocolVersion};

/// Negotiated state that a later handshake can resume.
pub struct Session {
    id: Buf,
    version: ProtocolVersion,
    cipher_suite: CipherSuite,
    /// TLS 1.2 master secret, or TLS 1.3 resumption PSK.
    secret: Buf,
    extended_master_secret: bool,
    peer_chain: Vec<Vec<u8>>,
    created: Instant,
    lifetime: Duration,
    /// TLS 1.3 ticket_age_add.
    age_add: u32,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: Buf,
        version: ProtocolVersion,
        cipher_suite: CipherSuite,
        secret: Buf,
        extended_master_secret: bool,
        peer_chain: Vec<Vec<u8>>,
        created: Instant,
        lifetime: Duration,
        age_add: u32,
    ) -> Self {
        Session {
            id,
            version,
            cipher_suite,
            secret,
            extended_master_secret,
            peer_chain,
            created,
            lifetime,
            age_add,
        }
    }

    /// Session id (TLS 1.2) or ticket (TLS 1.3).
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.cipher_suite
    }

    pub fn extended_master_secret(&self) -> bool {
        self.extended_master_secret
    }

    pub fn peer_chain(&self) -> &[Vec<u8>] {
        &self.peer_chain
    }

    pub(crate) fn secret(&self) -> &[u8] {
        &self.secret
    }

    pub(crate) fn age_add(&self) -> u32 {
        self.age_add
    }

    pub(crate) fn created(&self) -> Instant {
        self.created
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created) >= self.lifetime
    }

    /// obfuscated_ticket_age for a PSK offer made at `now`.
    pub(crate) fn obfuscated_age(&self, now: Instant) -> u32 {
        let age_ms = now.saturating_duration_since(self.created).as_millis() as u32;
        age_ms.wrapping_add(self.age_add)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("cipher_suite", &self.cipher_suite)
            .field("extended_master_secret", &self.extended_master_secret)
            .field("peer_chain", &self.peer_chain.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

#[derive(Default)]
struct Entries {
    by_id: HashMap<Buf, Arc<Session>>,
    by_host: HashMap<String, Buf>,
    /// Insertion order, oldest first.
    order: VecDeque<Buf>,
}

impl Entries {
    fn remove(&mut self, id: &[u8]) -> Option<Arc<Session>> {
        let removed = self.by_id.remove(id)?;
        self.order.retain(|i| &i[..] != id);
        self.by_host.retain(|_, i| &i[..] != id);
        Some(removed)
    }
}

/// Sessions by id and by peer, with a lifetime and a capacity bound.
///
/// Expired sessions are dropped when a lookup runs into them. When the
/// cache is full the oldest entry makes room.
pub struct SessionCache {
    entries: Mutex<Entries>,
    timeout: Duration,
    capacity: usize,
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("len", &self.len())
            .field("timeout", &self.timeout)
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Default session lifetime.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

/// Default cache capacity.
pub const DEFAULT_SESSION_CAPACITY: usize = 20_000;

impl Default for SessionCache {
    fn default() -> Self {
        SessionCache::new(DEFAULT_SESSION_TIMEOUT, DEFAULT_SESSION_CAPACITY)
    }
}

impl SessionCache {
    pub fn new(timeout: Duration, capacity: usize) -> Self {
        SessionCache {
            entries: Mutex::new(Entries::default()),
            timeout,
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lifetime given to sessions that do not carry a shorter one.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cache `session`, optionally indexed by the `host:port` it was made with.
    ///
    /// A session for the same peer replaces the previous one in the peer index.
    pub fn insert(&self, session: Session, peer: Option<&str>) -> Arc<Session> {
        let session = Arc::new(session);
        if self.capacity == 0 || session.id.is_empty() {
            return session;
        }
        let id = session.id.clone();

        let mut entries = self.lock();
        entries.remove(&id);
        while entries.by_id.len() >= self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            trace!("Session cache full, evicting {:?}", oldest);
            entries.remove(&oldest);
        }

        entries.by_id.insert(id.clone(), session.clone());
        entries.order.push_back(id.clone());
        if let Some(peer) = peer {
            entries.by_host.insert(peer.to_string(), id);
        }
        session
    }

    /// Session by id, `None` if unknown or expired.
    pub fn get(&self, id: &[u8], now: Instant) -> Option<Arc<Session>> {
        let mut entries = self.lock();
        let session = entries.by_id.get(id)?.clone();
        if session.is_expired(now) {
            debug!("Session expired {:?}", session.id);
            entries.remove(id);
            return None;
        }
        Some(session)
    }

    /// Most recent session made with `peer` (`host:port`).
    pub fn get_by_peer(&self, peer: &str, now: Instant) -> Option<Arc<Session>> {
        let id = self.lock().by_host.get(peer)?.clone();
        self.get(&id, now)
    }

    pub fn remove(&self, id: &[u8]) -> Option<Arc<Session>> {
        self.lock().remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &[u8], now: Instant, lifetime: Duration) -> Session {
        Session::new(
            Buf::from_slice(id),
            ProtocolVersion::TLS1_2,
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            Buf::from_slice(&[1; 48]),
            true,
            vec![],
            now,
            lifetime,
            0,
        )
    }

    #[test]
    fn lookup_by_id_and_peer() {
        let cache = SessionCache::default();
        let now = Instant::now();
        cache.insert(session(b"one", now, cache.timeout()), Some("example.com:443"));

        assert!(cache.get(b"one", now).is_some());
        assert!(cache.get(b"two", now).is_none());
        let s = cache.get_by_peer("example.com:443", now).unwrap();
        assert_eq!(s.id(), b"one");
        assert!(cache.get_by_peer("example.com:444", now).is_none());
    }

    #[test]
    fn expired_sessions_are_dropped() {
        let cache = SessionCache::new(Duration::from_secs(10), 10);
        let now = Instant::now();
        cache.insert(session(b"one", now, Duration::from_secs(10)), Some("peer:1"));

        assert!(cache.get(b"one", now + Duration::from_secs(9)).is_some());
        assert!(cache.get_by_peer("peer:1", now + Duration::from_secs(10)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let cache = SessionCache::new(Duration::from_secs(10), 2);
        let now = Instant::now();
        cache.insert(session(b"a", now, cache.timeout()), Some("peer:1"));
        cache.insert(session(b"b", now, cache.timeout()), None);
        cache.insert(session(b"c", now, cache.timeout()), None);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(b"a", now).is_none());
        assert!(cache.get_by_peer("peer:1", now).is_none());
        assert!(cache.get(b"c", now).is_some());
    }

    #[test]
    fn newer_session_replaces_peer_entry() {
        let cache = SessionCache::default();
        let now = Instant::now();
        cache.insert(session(b"a", now, cache.timeout()), Some("peer:1"));
        cache.insert(session(b"b", now, cache.timeout()), Some("peer:1"));
        assert_eq!(cache.get_by_peer("peer:1", now).unwrap().id(), b"b");

        cache.remove(b"b");
        assert!(cache.get_by_peer("peer:1", now).is_none());
        assert!(cache.get(b"a", now).is_some());
    }

    #[test]
    fn obfuscated_age_adds_offset() {
        let now = Instant::now();
        let mut s = session(b"t", now, Duration::from_secs(60));
        s.age_add = 1000;
        assert_eq!(s.obfuscated_age(now + Duration::from_millis(250)), 1250);
    }
}
