//! Named per-node connection pools.

use std::collections::HashMap;
use std::io;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::thread;
use std::time::Duration;

use log::debug;

use crate::cluster::ClusterParams;
use crate::connection::{Connect, ConnectionLike, NodeAddr, SocketOpts};
use crate::types::ClusterError;

/// Derives the deterministic pool name of a node.
///
/// The convention is `"Pool" + host + ":" + port`; every component that
/// learns about a node (seed configuration, topology refresh, ASK
/// redirection) arrives at the same name independently.
pub fn pool_name(host: &str, port: u16) -> String {
    format!("Pool{host}:{port}")
}

/// `r2d2` manager producing connections to a single cluster node.
pub struct NodeManager<C> {
    addr: NodeAddr,
    socket_opts: SocketOpts,
    backoff_initial: Duration,
    backoff_max: Duration,
    consecutive_failures: AtomicU32,
    _connection: PhantomData<fn() -> C>,
}

impl<C> NodeManager<C> {
    fn new(addr: NodeAddr, params: &ClusterParams) -> NodeManager<C> {
        NodeManager {
            addr,
            socket_opts: params.socket_opts.clone(),
            backoff_initial: params.backoff_initial,
            backoff_max: params.backoff_max,
            consecutive_failures: AtomicU32::new(0),
            _connection: PhantomData,
        }
    }

    fn backoff_delay(&self, failures: u32) -> Duration {
        let doublings = (failures - 1).min(16);
        self.backoff_initial
            .saturating_mul(1u32 << doublings)
            .min(self.backoff_max)
    }
}

impl<C> r2d2::ManageConnection for NodeManager<C>
where
    C: Connect + ConnectionLike + Send + 'static,
{
    type Connection = C;
    type Error = ClusterError;

    fn connect(&self) -> Result<C, ClusterError> {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        if failures > 0 {
            thread::sleep(self.backoff_delay(failures));
        }
        match C::connect(&self.addr, &self.socket_opts) {
            Ok(conn) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                Ok(conn)
            }
            Err(err) => {
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    fn is_valid(&self, conn: &mut C) -> Result<(), ClusterError> {
        if conn.check_connection() {
            Ok(())
        } else {
            Err(ClusterError::from(io::Error::from(
                io::ErrorKind::BrokenPipe,
            )))
        }
    }

    fn has_broken(&self, conn: &mut C) -> bool {
        !conn.is_open()
    }
}

/// Registry of all pools in the process, keyed by their deterministic
/// name.  Pools are registered at startup for the seed nodes, after each
/// topology refresh for every discovered endpoint, and on demand when an
/// ASK redirection names an endpoint the registry has not seen.  Pools
/// are never removed while the process runs.
pub struct PoolRegistry<C>
where
    C: Connect + ConnectionLike + Send + 'static,
{
    pools: RwLock<HashMap<String, r2d2::Pool<NodeManager<C>>>>,
    params: ClusterParams,
}

impl<C> PoolRegistry<C>
where
    C: Connect + ConnectionLike + Send + 'static,
{
    pub(crate) fn new(params: ClusterParams) -> PoolRegistry<C> {
        PoolRegistry {
            pools: RwLock::new(HashMap::new()),
            params,
        }
    }

    /// Registers a pool for the node unless one already exists, and
    /// returns the pool name either way.
    ///
    /// Registration itself performs no I/O; the pool establishes its
    /// connections in the background and on checkout.
    pub fn ensure_pool(&self, addr: &NodeAddr) -> String {
        let name = pool_name(&addr.host, addr.port);
        if self.pools.read().unwrap().contains_key(&name) {
            return name;
        }

        let mut pools = self.pools.write().unwrap();
        if !pools.contains_key(&name) {
            debug!("registering connection pool {name}");
            let manager = NodeManager::new(addr.clone(), &self.params);
            let pool = r2d2::Pool::builder()
                .max_size(self.params.pool_size + self.params.pool_max_overflow)
                .min_idle(Some(self.params.pool_size))
                .connection_timeout(self.params.checkout_timeout)
                .build_unchecked(manager);
            pools.insert(name.clone(), pool);
        }
        name
    }

    /// Looks a pool up by name.
    pub fn get(&self, name: &str) -> Option<r2d2::Pool<NodeManager<C>>> {
        self.pools.read().unwrap().get(name).cloned()
    }

    /// Names of all registered pools, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}
