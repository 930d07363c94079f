//! In-memory broadcast mesh.
//!
//! A shared [`LocalMesh`] broker connects any number of [`LocalTransport`]
//! endpoints. Every started endpoint can hear every other started
//! endpoint unless the link between them has been severed.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::{MessageClass, PeerId, Transport, TransportError, TransportEvent};

#[derive(Default)]
struct Endpoint {
    active: bool,
    subscribers: Vec<mpsc::UnboundedSender<TransportEvent>>,
    /// Number of upcoming broadcasts that fail outright.
    fail_next: u32,
    /// Number of upcoming broadcasts delivered twice.
    duplicate_next: u32,
    broadcasts: u64,
}

impl Endpoint {
    fn emit(&mut self, event: TransportEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[derive(Default)]
struct MeshInner {
    endpoints: HashMap<PeerId, Endpoint>,
    /// Severed links, stored with the smaller id first.
    severed: HashSet<(PeerId, PeerId)>,
}

impl MeshInner {
    fn linked(&self, a: &PeerId, b: &PeerId) -> bool {
        a != b && !self.severed.contains(&link(a, b))
    }

    fn active(&self, id: &PeerId) -> bool {
        self.endpoints.get(id).is_some_and(|e| e.active)
    }

    fn neighbours(&self, id: &PeerId) -> Vec<PeerId> {
        self.endpoints
            .iter()
            .filter(|(other, e)| e.active && self.linked(id, other))
            .map(|(other, _)| other.clone())
            .collect()
    }

    fn emit_to(&mut self, id: &PeerId, event: TransportEvent) {
        if let Some(endpoint) = self.endpoints.get_mut(id) {
            endpoint.emit(event);
        }
    }
}

fn link(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
    if a.as_str() <= b.as_str() {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Shared broker for in-memory endpoints.
///
/// Cheap to clone; all clones see the same mesh.
#[derive(Clone, Default)]
pub struct LocalMesh {
    inner: Arc<Mutex<MeshInner>>,
}

impl LocalMesh {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MeshInner> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates (or reattaches to) the endpoint for `id`. The endpoint
    /// starts with its network down.
    pub fn endpoint(&self, id: impl Into<PeerId>) -> LocalTransport {
        let id = id.into();
        self.lock().endpoints.entry(id.clone()).or_default();
        LocalTransport {
            id,
            mesh: self.clone(),
        }
    }

    /// Cuts the link between `a` and `b`. Both sides see a disconnect if
    /// they were connected.
    pub fn sever(&self, a: &PeerId, b: &PeerId) {
        let mut inner = self.lock();
        let was_linked = inner.active(a) && inner.active(b) && inner.linked(a, b);
        inner.severed.insert(link(a, b));
        if was_linked {
            tracing::debug!(%a, %b, "mesh link severed");
            inner.emit_to(a, TransportEvent::PeerDisconnected(b.clone()));
            inner.emit_to(b, TransportEvent::PeerDisconnected(a.clone()));
        }
    }

    /// Restores the link between `a` and `b`.
    pub fn heal(&self, a: &PeerId, b: &PeerId) {
        let mut inner = self.lock();
        if !inner.severed.remove(&link(a, b)) {
            return;
        }
        if inner.active(a) && inner.active(b) {
            tracing::debug!(%a, %b, "mesh link healed");
            inner.emit_to(a, TransportEvent::PeerConnected(b.clone()));
            inner.emit_to(b, TransportEvent::PeerConnected(a.clone()));
        }
    }

    /// Makes the next `n` broadcasts from `id` fail.
    pub fn fail_next_sends(&self, id: &PeerId, n: u32) {
        if let Some(e) = self.lock().endpoints.get_mut(id) {
            e.fail_next = n;
        }
    }

    /// Delivers the next `n` broadcasts from `id` twice to every receiver.
    pub fn duplicate_next_sends(&self, id: &PeerId, n: u32) {
        if let Some(e) = self.lock().endpoints.get_mut(id) {
            e.duplicate_next = n;
        }
    }

    /// Number of broadcast attempts `id` has made, failed ones included.
    pub fn broadcast_count(&self, id: &PeerId) -> u64 {
        self.lock().endpoints.get(id).map_or(0, |e| e.broadcasts)
    }

    fn set_active(&self, id: &PeerId, up: bool) {
        let mut inner = self.lock();
        let Some(endpoint) = inner.endpoints.get_mut(id) else {
            return;
        };
        if endpoint.active == up {
            return;
        }
        endpoint.active = up;

        let neighbours = inner.neighbours(id);
        for other in &neighbours {
            if up {
                inner.emit_to(other, TransportEvent::PeerConnected(id.clone()));
                inner.emit_to(id, TransportEvent::PeerConnected(other.clone()));
            } else {
                inner.emit_to(other, TransportEvent::PeerDisconnected(id.clone()));
            }
        }
        tracing::debug!(%id, up, neighbours = neighbours.len(), "mesh endpoint state changed");
    }

    fn deliver(&self, from: &PeerId, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.lock();
        let neighbours = inner.neighbours(from);
        let Some(sender) = inner.endpoints.get_mut(from) else {
            return Err(TransportError::Shutdown);
        };
        sender.broadcasts += 1;
        if !sender.active {
            return Err(TransportError::NetworkInactive);
        }
        if sender.fail_next > 0 {
            sender.fail_next -= 1;
            return Err(TransportError::SendFailed("injected failure".into()));
        }
        let copies = if sender.duplicate_next > 0 {
            sender.duplicate_next -= 1;
            2
        } else {
            1
        };

        for to in &neighbours {
            for _ in 0..copies {
                inner.emit_to(
                    to,
                    TransportEvent::MessageReceived {
                        from: from.clone(),
                        bytes: data.to_vec(),
                    },
                );
            }
        }
        Ok(())
    }
}

/// One node's handle onto a [`LocalMesh`].
#[derive(Clone)]
pub struct LocalTransport {
    id: PeerId,
    mesh: LocalMesh,
}

impl LocalTransport {
    /// The mesh this endpoint belongs to.
    pub fn mesh(&self) -> &LocalMesh {
        &self.mesh
    }
}

impl Transport for LocalTransport {
    type Error = TransportError;

    fn start_network(&self) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.mesh.set_active(&self.id, true);
        async { Ok(()) }
    }

    fn stop_network(&self) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.mesh.set_active(&self.id, false);
        async { Ok(()) }
    }

    fn is_network_active(&self) -> bool {
        self.mesh.lock().active(&self.id)
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        let inner = self.mesh.lock();
        if !inner.active(&self.id) {
            return Vec::new();
        }
        inner.neighbours(&self.id)
    }

    fn broadcast(
        &self,
        data: &[u8],
        _class: MessageClass,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let result = self.mesh.deliver(&self.id, data);
        async move { result }
    }

    fn local_peer_id(&self) -> PeerId {
        self.id.clone()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(e) = self.mesh.lock().endpoints.get_mut(&self.id) {
            e.subscribers.push(tx);
        }
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PeerId {
        PeerId::new(s)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn test_start_announces_both_sides() {
        let mesh = LocalMesh::new();
        let a = mesh.endpoint("a");
        let b = mesh.endpoint("b");
        let mut a_rx = a.subscribe();
        let mut b_rx = b.subscribe();

        a.start_network().await.unwrap();
        assert!(a.connected_peers().is_empty());
        b.start_network().await.unwrap();

        assert_eq!(drain(&mut a_rx), vec![TransportEvent::PeerConnected(id("b"))]);
        assert_eq!(drain(&mut b_rx), vec![TransportEvent::PeerConnected(id("a"))]);
        assert_eq!(a.connected_peers(), vec![id("b")]);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_neighbours_but_not_self() {
        let mesh = LocalMesh::new();
        let a = mesh.endpoint("a");
        let b = mesh.endpoint("b");
        let c = mesh.endpoint("c");
        for t in [&a, &b, &c] {
            t.start_network().await.unwrap();
        }
        let mut a_rx = a.subscribe();
        let mut b_rx = b.subscribe();
        let mut c_rx = c.subscribe();

        a.broadcast(b"hi", MessageClass::Reliable).await.unwrap();

        let expected = TransportEvent::MessageReceived { from: id("a"), bytes: b"hi".to_vec() };
        assert_eq!(drain(&mut b_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut c_rx), vec![expected]);
        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_while_down_fails() {
        let mesh = LocalMesh::new();
        let a = mesh.endpoint("a");
        let err = a.broadcast(b"x", MessageClass::Reliable).await.unwrap_err();
        assert!(matches!(err, TransportError::NetworkInactive));
        assert!(!a.is_network_active());
    }

    #[tokio::test]
    async fn test_solo_broadcast_succeeds() {
        let mesh = LocalMesh::new();
        let a = mesh.endpoint("a");
        a.start_network().await.unwrap();
        a.broadcast(b"x", MessageClass::Unreliable).await.unwrap();
        assert_eq!(mesh.broadcast_count(&id("a")), 1);
    }

    #[tokio::test]
    async fn test_sever_and_heal() {
        let mesh = LocalMesh::new();
        let a = mesh.endpoint("a");
        let b = mesh.endpoint("b");
        a.start_network().await.unwrap();
        b.start_network().await.unwrap();
        let mut a_rx = a.subscribe();

        mesh.sever(&id("a"), &id("b"));
        assert!(a.connected_peers().is_empty());
        b.broadcast(b"lost", MessageClass::Reliable).await.unwrap();
        assert_eq!(drain(&mut a_rx), vec![TransportEvent::PeerDisconnected(id("b"))]);

        mesh.heal(&id("b"), &id("a"));
        assert_eq!(drain(&mut a_rx), vec![TransportEvent::PeerConnected(id("b"))]);
        assert_eq!(a.connected_peers(), vec![id("b")]);
    }

    #[tokio::test]
    async fn test_stop_announces_disconnect() {
        let mesh = LocalMesh::new();
        let a = mesh.endpoint("a");
        let b = mesh.endpoint("b");
        a.start_network().await.unwrap();
        b.start_network().await.unwrap();
        let mut a_rx = a.subscribe();

        b.stop_network().await.unwrap();
        assert_eq!(drain(&mut a_rx), vec![TransportEvent::PeerDisconnected(id("b"))]);
        assert!(b.connected_peers().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures_and_duplicates() {
        let mesh = LocalMesh::new();
        let a = mesh.endpoint("a");
        let b = mesh.endpoint("b");
        a.start_network().await.unwrap();
        b.start_network().await.unwrap();
        let mut b_rx = b.subscribe();

        mesh.fail_next_sends(&id("a"), 1);
        assert!(matches!(
            a.broadcast(b"1", MessageClass::Reliable).await,
            Err(TransportError::SendFailed(_))
        ));
        a.broadcast(b"2", MessageClass::Reliable).await.unwrap();
        assert_eq!(drain(&mut b_rx).len(), 1);

        mesh.duplicate_next_sends(&id("a"), 1);
        a.broadcast(b"3", MessageClass::Reliable).await.unwrap();
        assert_eq!(drain(&mut b_rx).len(), 2);
        assert_eq!(mesh.broadcast_count(&id("a")), 3);
    }
}
