//! The versioned slot-to-node map.

use crate::connection::NodeAddr;
use crate::pool::pool_name;
use crate::routing::SLOT_COUNT;
use crate::types::{ClusterResult, ErrorKind, Value};

/// A master node owning a range of slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    /// Where the node listens.
    pub addr: NodeAddr,
    /// Name of the connection pool serving the node.
    pub pool: String,
}

impl Node {
    pub(crate) fn new(addr: NodeAddr) -> Node {
        let pool = pool_name(&addr.host, addr.port);
        Node { addr, pool }
    }
}

/// A contiguous, inclusive range of slots served by one node, as reported
/// by `CLUSTER SLOTS`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotRange {
    /// First slot of the range.
    pub start: u16,
    /// Last slot of the range, inclusive.
    pub end: u16,
    /// The master serving the range.
    pub node: Node,
}

/// An immutable snapshot of the cluster topology.
///
/// Published wholesale by the monitor and never mutated in place; the
/// version is bumped on every successful refresh and tags every dispatch
/// so stale observations can be coalesced.
#[derive(Debug)]
pub struct SlotMap {
    version: u64,
    ranges: Vec<SlotRange>,
    // 1-based index into `ranges` per slot; 0 marks an unassigned slot.
    slot_index: Vec<u16>,
}

impl SlotMap {
    /// The empty pre-refresh map, version 0, every slot unassigned.
    pub(crate) fn empty() -> SlotMap {
        SlotMap {
            version: 0,
            ranges: vec![],
            slot_index: vec![0; SLOT_COUNT as usize],
        }
    }

    /// Builds a map from parsed ranges.
    ///
    /// Ranges are sorted by their start slot; overlaps fail the refresh.
    /// Gaps are legal and stay unassigned, which the dispatcher treats as
    /// a retriable miss.
    pub(crate) fn from_ranges(version: u64, mut ranges: Vec<SlotRange>) -> ClusterResult<SlotMap> {
        ranges.sort_by_key(|range| range.start);

        let mut prev: Option<&SlotRange> = None;
        for range in &ranges {
            if range.end < range.start {
                return Err((
                    ErrorKind::ResponseError,
                    "slot refresh error",
                    format!("inverted slot range {}..{}", range.start, range.end)
                ).into());
            }
            if let Some(prev) = prev {
                if range.start <= prev.end {
                    return Err((
                        ErrorKind::ResponseError,
                        "slot refresh error",
                        format!(
                            "received overlapping slots {}..{} and {}..{}",
                            prev.start, prev.end, range.start, range.end
                        )
                    ).into());
                }
            }
            prev = Some(range);
        }

        let mut slot_index = vec![0u16; SLOT_COUNT as usize];
        for (idx, range) in ranges.iter().enumerate() {
            for slot in range.start..=range.end {
                slot_index[slot as usize] = idx as u16 + 1;
            }
        }

        Ok(SlotMap {
            version,
            ranges,
            slot_index,
        })
    }

    /// The topology version of this snapshot.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// All ranges of the snapshot, ordered by start slot.
    pub fn ranges(&self) -> &[SlotRange] {
        &self.ranges
    }

    /// The range containing `slot`, if the slot is assigned.
    pub fn range_for_slot(&self, slot: u16) -> Option<&SlotRange> {
        let idx = *self.slot_index.get(slot as usize)?;
        if idx == 0 {
            None
        } else {
            self.ranges.get(idx as usize - 1)
        }
    }

    /// The pool name serving `slot`, if the slot is assigned.
    pub fn pool_for_slot(&self, slot: u16) -> Option<&str> {
        self.range_for_slot(slot).map(|range| range.node.pool.as_str())
    }
}

/// Parses a `CLUSTER SLOTS` reply into slot ranges.
///
/// Malformed entries (fewer than three items, missing address data) are
/// skipped rather than failing the refresh.  Only the master entry of
/// each range is kept; replicas are not routed to.
pub(crate) fn parse_cluster_slots(value: Value) -> ClusterResult<Vec<SlotRange>> {
    let mut result = Vec::new();

    if let Value::Bulk(items) = value {
        let mut iter = items.into_iter();
        while let Some(Value::Bulk(item)) = iter.next() {
            if item.len() < 3 {
                continue;
            }

            let start = if let Value::Int(start) = item[0] {
                start as u16
            } else {
                continue;
            };

            let end = if let Value::Int(end) = item[1] {
                end as u16
            } else {
                continue;
            };

            let master = if let Value::Bulk(node) = &item[2] {
                if node.len() < 2 {
                    continue;
                }
                let host = if let Value::Data(host) = &node[0] {
                    String::from_utf8_lossy(host).into_owned()
                } else {
                    continue;
                };
                if host.is_empty() {
                    continue;
                }
                let port = if let Value::Int(port) = node[1] {
                    port as u16
                } else {
                    continue;
                };
                Node::new(NodeAddr::new(host, port))
            } else {
                continue;
            };

            result.push(SlotRange {
                start,
                end,
                node: master,
            });
        }
    }

    Ok(result)
}
