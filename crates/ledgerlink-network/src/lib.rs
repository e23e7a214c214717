//! ledgerlink network -- peers, the managed node pool, address book refresh.
//!
//! A `NodePool` owns every `Peer` a client talks to and the healthy subset it
//! selects from. Peers dial lazily through a shared `Connector`. A
//! `NetworkRefresher` swaps pool membership from fresh address books on a
//! cancellable schedule.

pub mod peer;
pub mod pool;
pub mod refresh;
pub mod transport;

pub use peer::Peer;
pub use pool::{MembershipDiff, NetworkError, NodePool};
pub use refresh::{AddressBookSource, NetworkRefresher, StaticAddressBook};
pub use transport::{
    read_frame, write_frame, BoxFuture, Channel, ConnectTarget, Connector, TransportConnector,
};
