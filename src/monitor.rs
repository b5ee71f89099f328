//! Topology refresh, serialized against concurrent requests.

use std::sync::{Arc, Condvar, Mutex};

use log::{debug, warn};

use crate::cache::SlotCache;
use crate::cluster::ClusterParams;
use crate::cmd::cmd;
use crate::connection::{Connect, ConnectionLike, NodeAddr, SocketOpts};
use crate::pool::PoolRegistry;
use crate::topology::{parse_cluster_slots, SlotMap, SlotRange};
use crate::types::{ClusterResult, ErrorKind};

/// Single writer of the [`SlotCache`].
///
/// Refresh requests carry the topology version their caller observed.  A
/// request whose version is already stale returns immediately (the
/// refresh it wanted has happened); requests for the current version are
/// coalesced so at most one `CLUSTER SLOTS` round runs at a time.
pub struct Monitor<C>
where
    C: Connect + ConnectionLike + Send + 'static,
{
    cache: Arc<SlotCache>,
    pools: Arc<PoolRegistry<C>>,
    seeds: Vec<NodeAddr>,
    seed_opts: SocketOpts,
    state: Mutex<RefreshState>,
    finished: Condvar,
}

struct RefreshState {
    refreshing: bool,
}

impl<C> Monitor<C>
where
    C: Connect + ConnectionLike + Send + 'static,
{
    pub(crate) fn new(
        cache: Arc<SlotCache>,
        pools: Arc<PoolRegistry<C>>,
        seeds: Vec<NodeAddr>,
        params: &ClusterParams,
    ) -> Monitor<C> {
        // Seed queries must terminate even when a node blackholes the
        // connection, whatever the caller's socket options say.
        let mut seed_opts = params.socket_opts.clone();
        seed_opts.connect_timeout = seed_opts.connect_timeout.or(Some(params.connect_timeout));
        seed_opts.read_timeout = seed_opts.read_timeout.or(Some(params.connect_timeout));

        Monitor {
            cache,
            pools,
            seeds,
            seed_opts,
            state: Mutex::new(RefreshState { refreshing: false }),
            finished: Condvar::new(),
        }
    }

    /// Requests a refresh of the slot mapping as observed at
    /// `seen_version`.
    ///
    /// Returns `Ok(())` once the topology has moved past `seen_version`,
    /// whether this call performed the refresh, waited for a concurrent
    /// one, or found it already done.  Returns an error if the refresh
    /// ran and every seed node was unreachable; the version is left
    /// untouched and a later request will re-attempt.
    pub fn refresh_mapping(&self, seen_version: u64) -> ClusterResult<()> {
        let mut state = self.state.lock().unwrap();
        if self.cache.version() != seen_version {
            return Ok(());
        }

        if state.refreshing {
            while state.refreshing {
                state = self.finished.wait(state).unwrap();
            }
            if self.cache.version() != seen_version {
                return Ok(());
            }
            return Err((
                ErrorKind::ClusterDown,
                "topology refresh failed; no seed node reachable"
            ).into());
        }

        state.refreshing = true;
        drop(state);

        let result = self.refresh(seen_version);

        let mut state = self.state.lock().unwrap();
        state.refreshing = false;
        self.finished.notify_all();
        drop(state);

        result
    }

    fn refresh(&self, seen_version: u64) -> ClusterResult<()> {
        let ranges = self.fetch_slot_ranges()?;
        for range in &ranges {
            self.pools.ensure_pool(&range.node.addr);
        }
        let map = SlotMap::from_ranges(seen_version + 1, ranges)?;
        debug!(
            "publishing topology version {} ({} slot ranges)",
            map.version(),
            map.ranges().len()
        );
        self.cache.publish(map);
        Ok(())
    }

    fn fetch_slot_ranges(&self) -> ClusterResult<Vec<SlotRange>> {
        let mut last_err = None;
        for seed in &self.seeds {
            match self.query_seed(seed) {
                Ok(ranges) => return Ok(ranges),
                Err(err) => {
                    warn!("seed node {seed} failed to serve CLUSTER SLOTS: {err}");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| (ErrorKind::ClusterDown, "no seed node configured").into()))
    }

    fn query_seed(&self, seed: &NodeAddr) -> ClusterResult<Vec<SlotRange>> {
        let mut conn = C::connect(seed, &self.seed_opts)?;
        let mut slots_cmd = cmd("CLUSTER");
        slots_cmd.arg("SLOTS");
        let reply = conn.req_command(&slots_cmd)?;
        let ranges = parse_cluster_slots(reply)?;
        if ranges.is_empty() {
            return Err((
                ErrorKind::ResponseError,
                "seed node returned no slot ranges"
            ).into());
        }
        Ok(ranges)
    }
}
