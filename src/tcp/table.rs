use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use parking_lot::Mutex;

use super::connection::Connection;
use crate::error::{Error, Result};

/// Connection key: both endpoints, seen from our side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Quad {
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
}

impl Quad {
    const ANY: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);

    /// Key of the listener on `local`.
    pub fn listening(local: SocketAddrV4) -> Self {
        Self {
            local,
            remote: Self::ANY,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.remote == Self::ANY
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.local, self.remote)
    }
}

pub(crate) type ConnectionRef = Arc<Mutex<Connection>>;

struct Slot {
    epoch: u64,
    connection: ConnectionRef,
}

#[derive(Default)]
struct Slots {
    map: HashMap<Quad, Slot>,
    next_epoch: u64,
}

/// Bounded map of every connection, listeners included.
///
/// The table lock is never held while a connection is locked by the table
/// itself; callers may hold a connection lock while touching the table.
pub(crate) struct ConnectionTable {
    capacity: usize,
    slots: Mutex<Slots>,
}

impl ConnectionTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Mutex::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().map.len()
    }

    pub fn lookup(&self, quad: &Quad) -> Option<ConnectionRef> {
        self.slots
            .lock()
            .map
            .get(quad)
            .map(|slot| Arc::clone(&slot.connection))
    }

    /// Inserts the connection produced by `build`, which receives the epoch
    /// of the new incarnation. `build` runs with the table locked and must
    /// not touch the table.
    pub fn create(
        &self,
        quad: Quad,
        build: impl FnOnce(u64) -> Connection,
    ) -> Result<ConnectionRef> {
        let mut slots = self.slots.lock();
        if slots.map.contains_key(&quad) {
            return Err(Error::AddressInUse);
        }
        if slots.map.len() >= self.capacity {
            return Err(Error::ResourceExhausted {
                capacity: self.capacity,
            });
        }

        slots.next_epoch += 1;
        let epoch = slots.next_epoch;
        let connection = Arc::new(Mutex::new(build(epoch)));
        slots.map.insert(
            quad,
            Slot {
                epoch,
                connection: Arc::clone(&connection),
            },
        );
        Ok(connection)
    }

    /// Removes `quad` if it is still the incarnation `epoch`.
    pub fn remove(&self, quad: &Quad, epoch: u64) -> bool {
        let mut slots = self.slots.lock();
        match slots.map.get(quad) {
            Some(slot) if slot.epoch == epoch => {
                slots.map.remove(quad);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::config::TcpConfig;

    fn quad(port: u16) -> Quad {
        Quad {
            local: SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 6), 80),
            remote: SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), port),
        }
    }

    fn listener(quad: Quad) -> impl FnOnce(u64) -> Connection {
        move |epoch| Connection::listen(quad, epoch, &TcpConfig::default(), Instant::now())
    }

    #[test]
    fn capacity_is_enforced() {
        let table = ConnectionTable::new(2);
        table.create(quad(1), listener(quad(1))).unwrap();
        table.create(quad(2), listener(quad(2))).unwrap();
        assert!(matches!(
            table.create(quad(3), listener(quad(3))),
            Err(Error::ResourceExhausted { capacity: 2 })
        ));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let table = ConnectionTable::new(4);
        table.create(quad(1), listener(quad(1))).unwrap();
        assert!(matches!(
            table.create(quad(1), listener(quad(1))),
            Err(Error::AddressInUse)
        ));
    }

    #[test]
    fn remove_checks_epoch() {
        let table = ConnectionTable::new(4);
        let first = table.create(quad(1), listener(quad(1))).unwrap();
        let old_epoch = first.lock().epoch;
        assert!(table.remove(&quad(1), old_epoch));

        let second = table.create(quad(1), listener(quad(1))).unwrap();
        let new_epoch = second.lock().epoch;
        assert_ne!(old_epoch, new_epoch);
        assert!(!table.remove(&quad(1), old_epoch));
        assert!(table.lookup(&quad(1)).is_some());
    }

    #[test]
    fn listening_key() {
        let local = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 6), 80);
        let key = Quad::listening(local);
        assert!(key.is_listening());
        assert!(!quad(1).is_listening());
        assert_eq!(key.to_string(), "10.0.0.6:80 <-> 0.0.0.0:0");
    }
}
