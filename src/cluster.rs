//! The cluster client: entry points, dispatch loop and redirection
//! handling.
//!
//! # Example
//! ```ignore
//! use redis_cluster_pool::{cmd, CallOptions, ClusterClientBuilder};
//!
//! let client = ClusterClientBuilder::new(vec![("10.0.0.1", 6379)])
//!     .pool_size(8)
//!     .build::<MyConnection>()?;
//!
//! let mut get = cmd("GET");
//! get.arg("hello");
//! let value = client.command(&get, &CallOptions::new())?;
//! ```
//!
//! Transient cluster conditions (`MOVED`, `CLUSTERDOWN`, connection loss,
//! unmapped slots) come back as [`ErrorKind::Retry`] after a topology
//! refresh has been requested; re-invoking, and any backoff between
//! attempts, is the caller's business.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::cache::SlotCache;
use crate::cmd::{cmd, Cmd};
use crate::connection::{Connect, ConnectionLike, IntoNodeAddr, NodeAddr, SocketOpts};
use crate::monitor::Monitor;
use crate::pool::PoolRegistry;
use crate::routing;
use crate::topology::SlotMap;
use crate::types::{ClusterResult, ErrorKind, Value};

/// An ASK chain longer than this means the cluster is reshaping faster
/// than we can chase it; give up and let the caller retry.
const ASK_REDIRECT_LIMIT: usize = 5;

/// Tunables shared by every pool and the monitor.
#[derive(Clone, Debug)]
pub struct ClusterParams {
    pub(crate) pool_size: u32,
    pub(crate) pool_max_overflow: u32,
    pub(crate) socket_opts: SocketOpts,
    pub(crate) backoff_initial: Duration,
    pub(crate) backoff_max: Duration,
    pub(crate) checkout_timeout: Duration,
    pub(crate) connect_timeout: Duration,
}

impl Default for ClusterParams {
    fn default() -> ClusterParams {
        ClusterParams {
            pool_size: 8,
            pool_max_overflow: 0,
            socket_opts: SocketOpts::default(),
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_secs(10),
            checkout_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(1),
        }
    }
}

/// Per-call options.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    pub(crate) timeout: Option<Duration>,
    pub(crate) node: Option<NodeAddr>,
}

impl CallOptions {
    /// Creates the default options.
    pub fn new() -> CallOptions {
        CallOptions::default()
    }

    /// Bounds both the pool checkout and the command execution.
    pub fn timeout(mut self, timeout: Duration) -> CallOptions {
        self.timeout = Some(timeout);
        self
    }

    /// Sends the command to this node instead of routing by key.
    ///
    /// Required for commands that carry no routable key (`INFO`,
    /// `CONFIG`, `SHUTDOWN`, `SLAVEOF`, ...): routing those by the hash
    /// of nothing would silently address an arbitrary shard, so without
    /// an explicit target they are rejected.
    pub fn node(mut self, host: impl Into<String>, port: u16) -> CallOptions {
        self.node = Some(NodeAddr::new(host, port));
        self
    }
}

/// Used to configure and build a [`ClusterClient`].
pub struct ClusterClientBuilder {
    seeds: ClusterResult<Vec<NodeAddr>>,
    params: ClusterParams,
}

impl ClusterClientBuilder {
    /// Creates a new builder with the provided seed nodes.
    pub fn new<T: IntoNodeAddr>(seeds: impl IntoIterator<Item = T>) -> ClusterClientBuilder {
        ClusterClientBuilder {
            seeds: seeds
                .into_iter()
                .map(IntoNodeAddr::into_node_addr)
                .collect(),
            params: ClusterParams::default(),
        }
    }

    /// Sets the number of connections kept per node.
    pub fn pool_size(mut self, pool_size: u32) -> ClusterClientBuilder {
        self.params.pool_size = pool_size;
        self
    }

    /// Allows this many connections on top of `pool_size` under load.
    pub fn pool_max_overflow(mut self, overflow: u32) -> ClusterClientBuilder {
        self.params.pool_max_overflow = overflow;
        self
    }

    /// Socket options passed through to the wire-level client.
    pub fn socket_opts(mut self, opts: SocketOpts) -> ClusterClientBuilder {
        self.params.socket_opts = opts;
        self
    }

    /// Reconnect backoff bounds applied inside each pool.
    pub fn backoff(mut self, initial: Duration, max: Duration) -> ClusterClientBuilder {
        self.params.backoff_initial = initial;
        self.params.backoff_max = max;
        self
    }

    /// Default bound on waiting for a pooled connection.
    pub fn checkout_timeout(mut self, timeout: Duration) -> ClusterClientBuilder {
        self.params.checkout_timeout = timeout;
        self
    }

    /// Bound on each connection attempt to a seed node during a refresh.
    pub fn connect_timeout(mut self, timeout: Duration) -> ClusterClientBuilder {
        self.params.connect_timeout = timeout;
        self
    }

    /// Creates a [`ClusterClient`] from the parameters.
    ///
    /// Registers a pool for every seed node and performs the mandatory
    /// initial topology refresh; if no seed serves `CLUSTER SLOTS`, the
    /// build fails.
    pub fn build<C>(self) -> ClusterResult<ClusterClient<C>>
    where
        C: Connect + ConnectionLike + Send + 'static,
    {
        let seeds = self.seeds?;
        if seeds.is_empty() {
            return Err((
                ErrorKind::InvalidClientConfig,
                "Initial nodes can't be empty."
            ).into());
        }
        if self.params.pool_size == 0 {
            return Err((
                ErrorKind::InvalidClientConfig,
                "pool_size must be at least 1"
            ).into());
        }
        if self.params.backoff_initial > self.params.backoff_max {
            return Err((
                ErrorKind::InvalidClientConfig,
                "backoff_initial must not exceed backoff_max"
            ).into());
        }

        let cache = Arc::new(SlotCache::new());
        let pools = Arc::new(PoolRegistry::new(self.params.clone()));
        for seed in &seeds {
            pools.ensure_pool(seed);
        }
        let monitor = Monitor::new(cache.clone(), pools.clone(), seeds, &self.params);
        monitor.refresh_mapping(0)?;

        Ok(ClusterClient {
            inner: Arc::new(Inner {
                cache,
                pools,
                monitor,
            }),
        })
    }
}

struct Inner<C>
where
    C: Connect + ConnectionLike + Send + 'static,
{
    cache: Arc<SlotCache>,
    pools: Arc<PoolRegistry<C>>,
    monitor: Monitor<C>,
}

/// A cluster-aware command dispatcher over pooled connections.
///
/// Cheap to clone and safe to share between threads; every call checks a
/// connection out of the owning node's pool for just the duration of the
/// request.
pub struct ClusterClient<C>
where
    C: Connect + ConnectionLike + Send + 'static,
{
    inner: Arc<Inner<C>>,
}

impl<C> std::fmt::Debug for ClusterClient<C>
where
    C: Connect + ConnectionLike + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient").finish_non_exhaustive()
    }
}

impl<C> Clone for ClusterClient<C>
where
    C: Connect + ConnectionLike + Send + 'static,
{
    fn clone(&self) -> ClusterClient<C> {
        ClusterClient {
            inner: self.inner.clone(),
        }
    }
}

impl<C> ClusterClient<C>
where
    C: Connect + ConnectionLike + Send + 'static,
{
    /// Creates a [`ClusterClientBuilder`] with the provided seed nodes.
    pub fn builder<T: IntoNodeAddr>(seeds: impl IntoIterator<Item = T>) -> ClusterClientBuilder {
        ClusterClientBuilder::new(seeds)
    }

    /// Executes a single command on the node owning its key's slot.
    pub fn command(&self, command: &Cmd, opts: &CallOptions) -> ClusterResult<Value> {
        if let Some(addr) = &opts.node {
            let pool = self.inner.pools.ensure_pool(addr);
            let version = self.inner.cache.version();
            return self.execute(&pool, version, opts, |conn| conn.req_command(command));
        }

        let key = match routing::key_for_command(command) {
            Some(key) => key,
            None => return Err((
                ErrorKind::InvalidClusterCommand,
                "command has no routable key; target a node with CallOptions::node"
            ).into()),
        };
        let slot = routing::slot(key);
        self.dispatch(slot, opts, |conn| conn.req_command(command))
    }

    /// Executes a batch of commands, all of which must hash to one slot,
    /// as a single round trip to the owning node.
    pub fn pipeline(&self, commands: &[Cmd], opts: &CallOptions) -> ClusterResult<Vec<Value>> {
        let slot = routing::slot_for_pipeline(commands)?;
        self.dispatch(slot, opts, |conn| conn.req_pipeline(commands))
    }

    /// Executes the commands wrapped in `MULTI`/`EXEC`.
    ///
    /// The wrapping is done here, which is also why a caller-submitted
    /// `MULTI` is rejected by [`pipeline`](ClusterClient::pipeline).  The
    /// reply vector is returned verbatim, queued acknowledgements and the
    /// final `EXEC` reply included.
    pub fn transaction(&self, commands: &[Cmd], opts: &CallOptions) -> ClusterResult<Vec<Value>> {
        let slot = routing::slot_for_pipeline(commands)?;
        let mut wrapped = Vec::with_capacity(commands.len() + 2);
        wrapped.push(cmd("MULTI"));
        wrapped.extend(commands.iter().cloned());
        wrapped.push(cmd("EXEC"));
        self.dispatch(slot, opts, move |conn| conn.req_pipeline(&wrapped))
    }

    /// Issues `FLUSHDB` to every unique master in the current snapshot.
    ///
    /// Best effort: per-node failures are logged and absorbed.
    pub fn flushdb(&self) -> ClusterResult<Value> {
        let map = self.inner.cache.slot_maps();
        let mut flushed = HashSet::new();
        for range in map.ranges() {
            if !flushed.insert(range.node.pool.as_str()) {
                continue;
            }
            let pool = match self.inner.pools.get(&range.node.pool) {
                Some(pool) => pool,
                None => {
                    warn!("no pool registered for {}", range.node.pool);
                    continue;
                }
            };
            match pool.get() {
                Ok(mut conn) => {
                    if let Err(err) = conn.req_command(&cmd("FLUSHDB")) {
                        warn!("FLUSHDB on {} failed: {err}", range.node.pool);
                    }
                }
                Err(err) => {
                    warn!("FLUSHDB checkout from {} failed: {err}", range.node.pool);
                }
            }
        }
        Ok(Value::Okay)
    }

    /// Returns the current topology snapshot.
    pub fn slot_maps(&self) -> Arc<SlotMap> {
        self.inner.cache.slot_maps()
    }

    /// Names of all registered pools, sorted.
    pub fn pool_names(&self) -> Vec<String> {
        self.inner.pools.names()
    }

    fn dispatch<T>(
        &self,
        slot: u16,
        opts: &CallOptions,
        run: impl FnMut(&mut C) -> ClusterResult<T>,
    ) -> ClusterResult<T> {
        let (version, pool) = self.inner.cache.get_pool(slot);
        let pool = match pool {
            Some(pool) => pool,
            None => {
                self.request_refresh(version);
                return Err((
                    ErrorKind::Retry,
                    "slot is unmapped; topology refresh requested"
                ).into());
            }
        };
        self.execute(&pool, version, opts, run)
    }

    fn execute<T>(
        &self,
        pool: &str,
        version: u64,
        opts: &CallOptions,
        mut run: impl FnMut(&mut C) -> ClusterResult<T>,
    ) -> ClusterResult<T> {
        let mut target = pool.to_string();
        let mut asking = false;

        for _ in 0..ASK_REDIRECT_LIMIT {
            let pool = match self.inner.pools.get(&target) {
                Some(pool) => pool,
                None => {
                    self.request_refresh(version);
                    return Err((
                        ErrorKind::Retry,
                        "pool is not registered; topology refresh requested"
                    ).into());
                }
            };
            let checkout = match opts.timeout {
                Some(timeout) => pool.get_timeout(timeout),
                None => pool.get(),
            };
            let mut conn = match checkout {
                Ok(conn) => conn,
                Err(err) => {
                    debug!("connection checkout from {target} failed: {err}");
                    self.request_refresh(version);
                    return Err((
                        ErrorKind::Retry,
                        "no connection available; topology refresh requested"
                    ).into());
                }
            };

            // The checkout guard returns the connection to its pool on
            // every path out of this block, panics included.
            let result = (|| {
                if let Some(timeout) = opts.timeout {
                    conn.set_read_timeout(Some(timeout))?;
                }
                if asking {
                    conn.req_command(&cmd("ASKING"))?;
                }
                run(&mut conn)
            })();
            drop(conn);

            match result {
                Ok(value) => return Ok(value),
                Err(err) => match err.kind() {
                    ErrorKind::Ask => {
                        let redirect = err
                            .redirect_node()
                            .and_then(|(addr, _slot)| addr.parse::<NodeAddr>().ok());
                        match redirect {
                            Some(addr) => {
                                debug!("following ASK redirection to {addr}");
                                target = self.inner.pools.ensure_pool(&addr);
                                asking = true;
                            }
                            None => return Err(err),
                        }
                    }
                    ErrorKind::Moved | ErrorKind::ClusterDown => {
                        self.request_refresh(version);
                        return Err((
                            ErrorKind::Retry,
                            "cluster redirected; topology refresh requested"
                        ).into());
                    }
                    ErrorKind::IoError => {
                        self.request_refresh(version);
                        return Err((
                            ErrorKind::Retry,
                            "connection failed; topology refresh requested"
                        ).into());
                    }
                    _ => return Err(err),
                },
            }
        }

        self.request_refresh(version);
        Err((ErrorKind::Retry, "too many ASK redirections").into())
    }

    fn request_refresh(&self, version: u64) {
        if let Err(err) = self.inner.monitor.refresh_mapping(version) {
            warn!("topology refresh for version {version} failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CallOptions;
    use crate::connection::NodeAddr;
    use std::time::Duration;

    #[test]
    fn call_options_compose() {
        let opts = CallOptions::new()
            .timeout(Duration::from_millis(250))
            .node("10.0.0.1", 6379);
        assert_eq!(opts.timeout, Some(Duration::from_millis(250)));
        assert_eq!(opts.node, Some(NodeAddr::new("10.0.0.1", 6379)));

        let defaults = CallOptions::new();
        assert_eq!(defaults.timeout, None);
        assert_eq!(defaults.node, None);
    }
}
