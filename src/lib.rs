//! redis-cluster-pool is the cluster-aware dispatch layer of a Redis
//! client: it decides which shard owns the key a command refers to, sends
//! the command over a pooled connection to that shard, and absorbs the
//! cluster redirection protocol (`MOVED`, `ASK`, `CLUSTERDOWN`,
//! connection loss) by refreshing its topology snapshot and signalling
//! the caller to retry.
//!
//! The crate deliberately owns only the cluster mechanics:
//!
//! * **key extraction**: which argument of a command decides routing
//!   ([`routing`]);
//! * **slot resolution**: CRC16 hash-tag-aware mapping onto the 16384
//!   slots and from there onto a named connection pool;
//! * **topology cache**: a versioned, atomically published snapshot of
//!   the slot map ([`cache`], [`topology`]), refreshed on demand by a
//!   single writer ([`monitor`]);
//! * **dispatch**: the retry-classification loop around pooled command
//!   execution ([`cluster`]).
//!
//! Speaking RESP and owning sockets is the wire-level client's job; any
//! type implementing [`Connect`] and [`ConnectionLike`] plugs in.  Pools
//! are `r2d2` pools, one per node, registered under the deterministic
//! name `Pool<host>:<port>` and kept for the life of the process.
//!
//! The dispatcher itself never sleeps and never retries: transient
//! cluster conditions surface as [`ErrorKind::Retry`] after a refresh has
//! been requested, and the caller composes its own retry/backoff policy
//! on top.

#![deny(non_camel_case_types)]
#![warn(missing_docs)]

pub mod cache;
pub mod cluster;
pub mod cmd;
pub mod connection;
pub mod monitor;
pub mod pool;
pub mod routing;
pub mod topology;
pub mod types;

pub use crate::cache::SlotCache;
pub use crate::cluster::{CallOptions, ClusterClient, ClusterClientBuilder};
pub use crate::cmd::{cmd, Cmd};
pub use crate::connection::{Connect, ConnectionLike, IntoNodeAddr, NodeAddr, SocketOpts};
pub use crate::monitor::Monitor;
pub use crate::pool::{pool_name, NodeManager, PoolRegistry};
pub use crate::routing::{slot, SLOT_COUNT};
pub use crate::topology::{Node, SlotMap, SlotRange};
pub use crate::types::{server_error, ClusterError, ClusterResult, ErrorKind, Value};
