//! Datagram delivery for responses and notifications
//!
//! Notifications outlive the request that created their subscription, so the
//! engine holds a [`Transport`] and addresses every message with an owned
//! [`SubscriberTarget`].

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Lwm2mError, Result};
use crate::ipc_types::SubscriberTarget;

/// Sends one serialized message to one endpoint
pub trait Transport: fmt::Debug + Send {
    fn send_to(&mut self, target: &SubscriberTarget, payload: &[u8]) -> Result<()>;
}

/// UDP delivery over a bound socket
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, target: &SubscriberTarget, payload: &[u8]) -> Result<()> {
        let sent = self.socket.send_to(payload, target.address)?;
        if sent != payload.len() {
            return Err(Lwm2mError::Transport(format!(
                "short send to {}: {} of {} bytes",
                target,
                sent,
                payload.len()
            )));
        }
        Ok(())
    }
}

type Outbox = VecDeque<(SubscriberTarget, Vec<u8>)>;

/// In-process transport that records every message
///
/// Clones share the same outbox, so a test can keep one handle while the
/// engine owns another.
#[derive(Debug, Clone, Default)]
pub struct QueuedTransport {
    sent: Arc<Mutex<Outbox>>,
    unreachable: Arc<Mutex<HashSet<SocketAddr>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl QueuedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later send to `address` fail
    pub fn reject(&self, address: SocketAddr) {
        lock(&self.unreachable).insert(address);
    }

    /// Take every recorded message in send order
    pub fn drain(&self) -> Vec<(SubscriberTarget, Vec<u8>)> {
        lock(&self.sent).drain(..).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.sent).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Transport for QueuedTransport {
    fn send_to(&mut self, target: &SubscriberTarget, payload: &[u8]) -> Result<()> {
        if lock(&self.unreachable).contains(&target.address) {
            return Err(Lwm2mError::Transport(format!("{} is unreachable", target)));
        }
        lock(&self.sent).push_back((*target, payload.to_vec()));
        Ok(())
    }
}
