//! Seams toward the wire-level redis client.
//!
//! The dispatch layer does not speak RESP or own sockets; it drives any
//! client that can open a connection to a `host:port` ([`Connect`]) and
//! execute commands on it ([`ConnectionLike`]).  The real client library
//! implements these traits; the test suite plugs in a mock.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::cmd::Cmd;
use crate::types::{ClusterError, ClusterResult, ErrorKind, Value};

/// Address of a single cluster node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeAddr {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl NodeAddr {
    /// Creates a new node address.
    pub fn new(host: impl Into<String>, port: u16) -> NodeAddr {
        NodeAddr {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddr {
    type Err = ClusterError;

    fn from_str(s: &str) -> ClusterResult<NodeAddr> {
        let (host, port) = match s.rsplit_once(':') {
            Some(parts) => parts,
            None => return Err((
                ErrorKind::InvalidClientConfig,
                "node address must be of the form host:port",
                s.to_string()
            ).into()),
        };
        let port = match port.parse() {
            Ok(port) => port,
            Err(_) => return Err((
                ErrorKind::InvalidClientConfig,
                "invalid port in node address",
                s.to_string()
            ).into()),
        };
        Ok(NodeAddr::new(host, port))
    }
}

impl From<(&str, u16)> for NodeAddr {
    fn from((host, port): (&str, u16)) -> NodeAddr {
        NodeAddr::new(host, port)
    }
}

impl From<(String, u16)> for NodeAddr {
    fn from((host, port): (String, u16)) -> NodeAddr {
        NodeAddr::new(host, port)
    }
}

/// Converts an object into a [`NodeAddr`].
///
/// This allows seed nodes to be given as `NodeAddr` values, `(host, port)`
/// tuples, or `"host:port"` strings.
pub trait IntoNodeAddr {
    /// Converts the object into a node address.
    fn into_node_addr(self) -> ClusterResult<NodeAddr>;
}

impl IntoNodeAddr for NodeAddr {
    fn into_node_addr(self) -> ClusterResult<NodeAddr> {
        Ok(self)
    }
}

impl IntoNodeAddr for (&str, u16) {
    fn into_node_addr(self) -> ClusterResult<NodeAddr> {
        Ok(NodeAddr::new(self.0, self.1))
    }
}

impl IntoNodeAddr for (String, u16) {
    fn into_node_addr(self) -> ClusterResult<NodeAddr> {
        Ok(NodeAddr::new(self.0, self.1))
    }
}

impl IntoNodeAddr for &str {
    fn into_node_addr(self) -> ClusterResult<NodeAddr> {
        self.parse()
    }
}

impl IntoNodeAddr for String {
    fn into_node_addr(self) -> ClusterResult<NodeAddr> {
        self.parse()
    }
}

/// Socket options handed through to the wire-level client when a
/// connection is opened.
#[derive(Clone, Debug, Default)]
pub struct SocketOpts {
    /// Bound on establishing the TCP connection.
    pub connect_timeout: Option<Duration>,
    /// Bound on waiting for a reply.
    pub read_timeout: Option<Duration>,
    /// Bound on writing a request.
    pub write_timeout: Option<Duration>,
    /// Disable Nagle's algorithm.
    pub nodelay: bool,
}

/// Opens connections to cluster nodes.
pub trait Connect: Sized {
    /// Connects to the node, honoring the socket options.
    fn connect(addr: &NodeAddr, opts: &SocketOpts) -> ClusterResult<Self>;
}

/// A connection on which commands can be executed.
///
/// Error contract: server error replies must be built through
/// [`server_error`](crate::types::server_error) (or carry the equivalent
/// [`ErrorKind`]) so the dispatcher can tell redirections apart from
/// logical errors, and transport failures must surface as
/// [`ErrorKind::IoError`].
pub trait ConnectionLike {
    /// Sends a single command and reads its reply.
    fn req_command(&mut self, cmd: &Cmd) -> ClusterResult<Value>;

    /// Sends a batch of commands and reads one reply per command, in
    /// order.  The first error reply fails the whole batch.
    fn req_pipeline(&mut self, cmds: &[Cmd]) -> ClusterResult<Vec<Value>>;

    /// Adjusts the read timeout of the open connection.
    fn set_read_timeout(&mut self, dur: Option<Duration>) -> ClusterResult<()>;

    /// Actively checks that the connection still responds.
    fn check_connection(&mut self) -> bool;

    /// Returns whether the connection is believed open, without I/O.
    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::NodeAddr;
    use crate::types::ErrorKind;

    #[test]
    fn parses_host_and_port() {
        let addr: NodeAddr = "10.0.0.2:6380".parse().unwrap();
        assert_eq!(addr, NodeAddr::new("10.0.0.2", 6380));
        assert_eq!(addr.to_string(), "10.0.0.2:6380");
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in ["nohost", "host:notaport", "host:99999"] {
            let err = bad.parse::<NodeAddr>().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidClientConfig, "{bad}");
        }
    }
}
