//! Connection transport with per-connection outbound filter pipelines.
//!
//! Every outbound packet for a connection runs through its filters in order
//! before reaching the terminal [`PACKET_HANDLER`] stage, which hands the
//! bytes to the connection's writer task.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Name of the terminal stage of every pipeline.
pub const PACKET_HANDLER: &str = "packet_handler";

/// Identity of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// A packet could not be handed to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("{0} is not open")]
    NotOpen(ConnectionId),

    #[error("{0} writer has shut down")]
    WriterClosed(ConnectionId),

    #[error("{0} has no mount state attached")]
    Detached(ConnectionId),

    #[error("Carrier {1} was never spawned on {0}")]
    NotSpawned(ConnectionId, i32),
}

/// An outbound pipeline stage. Returning `None` drops the packet.
pub trait OutboundFilter: Send + Sync {
    fn filter(&mut self, packet: Bytes) -> Option<Bytes>;
}

struct Stage {
    name: String,
    filter: Box<dyn OutboundFilter>,
}

/// Ordered filters in front of the terminal stage.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `filter` right before the stage named `anchor`.
    ///
    /// Returns false if `name` is taken or `anchor` does not exist.
    pub fn add_before(&mut self, anchor: &str, name: &str, filter: Box<dyn OutboundFilter>) -> bool {
        if name == PACKET_HANDLER || self.contains(name) {
            return false;
        }
        let index = if anchor == PACKET_HANDLER {
            self.stages.len()
        } else {
            match self.stages.iter().position(|s| s.name == anchor) {
                Some(i) => i,
                None => return false,
            }
        };
        self.stages.insert(
            index,
            Stage {
                name: name.to_string(),
                filter,
            },
        );
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.stages.len();
        self.stages.retain(|s| s.name != name);
        self.stages.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.iter().any(|s| s.name == name)
    }

    /// Stage names in processing order, terminal stage last.
    pub fn names(&self) -> Vec<&str> {
        self.stages
            .iter()
            .map(|s| s.name.as_str())
            .chain(std::iter::once(PACKET_HANDLER))
            .collect()
    }

    /// Run `packet` through every filter.
    pub fn process(&mut self, packet: Bytes) -> Option<Bytes> {
        self.stages
            .iter_mut()
            .try_fold(packet, |packet, stage| stage.filter.filter(packet))
    }
}

struct Connection {
    pipeline: Pipeline,
    sink: mpsc::UnboundedSender<Bytes>,
}

/// All open connections, keyed by id.
#[derive(Default)]
pub struct Transport {
    connections: HashMap<ConnectionId, Connection>,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection whose writer drains `sink`.
    pub fn open(&mut self, id: ConnectionId, sink: mpsc::UnboundedSender<Bytes>) {
        if self
            .connections
            .insert(
                id,
                Connection {
                    pipeline: Pipeline::new(),
                    sink,
                },
            )
            .is_some()
        {
            warn!("{} reopened; previous pipeline discarded", id);
        }
    }

    /// Drop a connection and its pipeline.
    pub fn close(&mut self, id: ConnectionId) -> bool {
        self.connections.remove(&id).is_some()
    }

    pub fn is_open(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Send a packet through the connection's pipeline.
    ///
    /// A packet dropped by a filter still counts as delivered.
    pub fn send(&mut self, id: ConnectionId, packet: Bytes) -> Result<(), DeliveryError> {
        let conn = self.connections.get_mut(&id).ok_or(DeliveryError::NotOpen(id))?;
        let Some(packet) = conn.pipeline.process(packet) else {
            return Ok(());
        };
        conn.sink.send(packet).map_err(|_| DeliveryError::WriterClosed(id))
    }

    /// Insert a named filter before `anchor` on one connection.
    pub fn install_filter(
        &mut self,
        id: ConnectionId,
        anchor: &str,
        name: &str,
        filter: Box<dyn OutboundFilter>,
    ) -> Result<bool, DeliveryError> {
        let conn = self.connections.get_mut(&id).ok_or(DeliveryError::NotOpen(id))?;
        let added = conn.pipeline.add_before(anchor, name, filter);
        if added {
            debug!("Installed filter '{}' on {}", name, id);
        }
        Ok(added)
    }

    /// Remove a named filter. Returns false if it was not installed.
    pub fn remove_filter(&mut self, id: ConnectionId, name: &str) -> bool {
        self.connections
            .get_mut(&id)
            .is_some_and(|conn| conn.pipeline.remove(name))
    }

    pub fn pipeline(&self, id: ConnectionId) -> Option<&Pipeline> {
        self.connections.get(&id).map(|conn| &conn.pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Append(u8);

    impl OutboundFilter for Append {
        fn filter(&mut self, packet: Bytes) -> Option<Bytes> {
            let mut v = packet.to_vec();
            v.push(self.0);
            Some(v.into())
        }
    }

    struct DropAll;

    impl OutboundFilter for DropAll {
        fn filter(&mut self, _packet: Bytes) -> Option<Bytes> {
            None
        }
    }

    #[test]
    fn test_filters_run_in_order_before_handler() {
        let mut pipeline = Pipeline::new();
        assert!(pipeline.add_before(PACKET_HANDLER, "a", Box::new(Append(1))));
        assert!(pipeline.add_before(PACKET_HANDLER, "b", Box::new(Append(2))));
        assert!(pipeline.add_before("b", "c", Box::new(Append(3))));
        assert!(!pipeline.add_before("missing", "d", Box::new(Append(4))));
        assert!(!pipeline.add_before(PACKET_HANDLER, "a", Box::new(Append(5))));

        assert_eq!(pipeline.names(), vec!["a", "c", "b", PACKET_HANDLER]);
        assert_eq!(pipeline.process(Bytes::from_static(&[0])).unwrap().as_ref(), &[0, 1, 3, 2]);
    }

    #[test]
    fn test_send_delivers_filtered_bytes() {
        let mut transport = Transport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = ConnectionId(1);
        transport.open(id, tx);
        transport.install_filter(id, PACKET_HANDLER, "tag", Box::new(Append(9))).unwrap();

        transport.send(id, Bytes::from_static(&[7])).unwrap();
        assert_eq!(rx.try_recv().unwrap().as_ref(), &[7, 9]);

        assert!(transport.remove_filter(id, "tag"));
        assert!(!transport.remove_filter(id, "tag"));
        transport.send(id, Bytes::from_static(&[7])).unwrap();
        assert_eq!(rx.try_recv().unwrap().as_ref(), &[7]);
    }

    #[test]
    fn test_dropped_packets_never_reach_writer() {
        let mut transport = Transport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = ConnectionId(2);
        transport.open(id, tx);
        transport.install_filter(id, PACKET_HANDLER, "drop", Box::new(DropAll)).unwrap();
        assert!(transport.send(id, Bytes::from_static(&[1])).is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_delivery_errors() {
        let mut transport = Transport::new();
        let id = ConnectionId(3);
        assert_eq!(transport.send(id, Bytes::new()), Err(DeliveryError::NotOpen(id)));

        let (tx, rx) = mpsc::unbounded_channel();
        transport.open(id, tx);
        drop(rx);
        assert_eq!(transport.send(id, Bytes::new()), Err(DeliveryError::WriterClosed(id)));

        assert!(transport.close(id));
        assert!(!transport.is_open(id));
    }
}
