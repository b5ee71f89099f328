use std::error;
use std::fmt;
use std::io;

/// An enum of all error kinds surfaced by the dispatch layer.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The server generated an invalid or unexpected response.
    ResponseError,
    /// An error that was caused because the parameters to the
    /// client were wrong.
    InvalidClientConfig,
    /// Raised if a key moved to a different node.
    Moved,
    /// Raised if a key moved to a different node but we need to ask.
    Ask,
    /// Raised if the redis cluster is down.
    ClusterDown,
    /// A pipeline or transaction spans multiple slots.
    CrossSlot,
    /// A caller submitted its own MULTI; transactions are built here.
    NoTransactionSupport,
    /// The command cannot be routed in cluster mode.
    InvalidClusterCommand,
    /// A transient cluster condition was handled by requesting a topology
    /// refresh; the caller decides whether to re-invoke.
    Retry,
    /// This kind is returned if the error is not native to the
    /// system.  This is usually the case if the cause is another error.
    IoError,
    /// An error raised that was identified on the client before execution.
    ClientError,
    /// An extension error.  This is an error created by the server
    /// that is not directly understood by the library.
    ExtensionError,
}

enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    ExtensionError(String, String),
    IoError(io::Error),
}

/// Represents a failure raised by the cluster, a node, or the dispatch
/// layer itself.
pub struct ClusterError {
    repr: ErrorRepr,
}

/// Library generic result type.
pub type ClusterResult<T> = Result<T, ClusterError>;

impl From<io::Error> for ClusterError {
    fn from(err: io::Error) -> ClusterError {
        ClusterError {
            repr: ErrorRepr::IoError(err),
        }
    }
}

impl From<(ErrorKind, &'static str)> for ClusterError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> ClusterError {
        ClusterError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for ClusterError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> ClusterError {
        ClusterError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl error::Error for ClusterError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self.repr {
            ErrorRepr::IoError(ref err) => Some(err as &dyn error::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                desc.fmt(f)?;
                f.write_str(" - ")?;
                fmt::Debug::fmt(&kind, f)
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                desc.fmt(f)?;
                f.write_str(" - ")?;
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                detail.fmt(f)
            }
            ErrorRepr::ExtensionError(ref code, ref detail) => {
                code.fmt(f)?;
                f.write_str(": ")?;
                detail.fmt(f)
            }
            ErrorRepr::IoError(ref err) => err.fmt(f),
        }
    }
}

impl fmt::Debug for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        fmt::Display::fmt(self, f)
    }
}

impl ClusterError {
    /// Returns the kind of the error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::ExtensionError(_, _) => ErrorKind::ExtensionError,
            ErrorRepr::IoError(_) => ErrorKind::IoError,
        }
    }

    /// Returns the error detail.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail)
            | ErrorRepr::ExtensionError(_, ref detail) => Some(detail.as_str()),
            _ => None,
        }
    }

    /// Returns the raw error code if available.
    pub fn code(&self) -> Option<&str> {
        match self.kind() {
            ErrorKind::Moved => Some("MOVED"),
            ErrorKind::Ask => Some("ASK"),
            ErrorKind::ClusterDown => Some("CLUSTERDOWN"),
            ErrorKind::CrossSlot => Some("CROSSSLOT"),
            _ => match self.repr {
                ErrorRepr::ExtensionError(ref code, _) => Some(code),
                _ => None,
            },
        }
    }

    /// Indicates that this failure is an IO failure.
    pub fn is_io_error(&self) -> bool {
        self.kind() == ErrorKind::IoError
    }

    /// Indicates that this is one of the cluster redirection or
    /// availability errors.
    pub fn is_cluster_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Moved | ErrorKind::Ask | ErrorKind::ClusterDown
        )
    }

    /// Returns the node a redirection error refers to.
    ///
    /// This returns `(addr, slot_id)`.
    pub fn redirect_node(&self) -> Option<(&str, u16)> {
        match self.kind() {
            ErrorKind::Ask | ErrorKind::Moved => (),
            _ => return None,
        }
        let mut iter = self.detail()?.split_ascii_whitespace();
        let slot_id: u16 = iter.next()?.parse().ok()?;
        let addr = iter.next()?;
        Some((addr, slot_id))
    }
}

/// Builds a [`ClusterError`] from the textual message of a server error
/// reply.
///
/// The cluster dialect is recognized by the first whitespace-separated
/// token: `MOVED` and `ASK` keep `<slot> <host>:<port>` as their detail so
/// [`ClusterError::redirect_node`] can recover the target, `CLUSTERDOWN`
/// maps to its own kind, and anything else is preserved verbatim as a
/// server-side error the caller receives untouched.
pub fn server_error(message: &str) -> ClusterError {
    let desc = "An error was signalled by the server";
    let mut pieces = message.splitn(2, ' ');
    let code = pieces.next().unwrap_or_default();
    let detail = pieces.next().unwrap_or_default().trim();

    let kind = match code {
        "MOVED" => ErrorKind::Moved,
        "ASK" => ErrorKind::Ask,
        "CLUSTERDOWN" => ErrorKind::ClusterDown,
        "ERR" => ErrorKind::ResponseError,
        _ => {
            return ClusterError {
                repr: ErrorRepr::ExtensionError(code.to_string(), detail.to_string()),
            }
        }
    };
    if detail.is_empty() {
        ClusterError::from((kind, desc))
    } else {
        ClusterError::from((kind, desc, detail.to_string()))
    }
}

/// Internal low-level redis value enum.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Value {
    /// A nil response from the server.
    Nil,
    /// An integer response.
    Int(i64),
    /// An arbitrary binary data.
    Data(Vec<u8>),
    /// A bulk response of more data.  This is generally used by redis
    /// to express nested structures.
    Bulk(Vec<Value>),
    /// A status response.
    Status(String),
    /// A status response which represents the string "OK".
    Okay,
}

impl Value {
    /// Returns an `&[Value]` if `self` is compatible with a sequence type.
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Bulk(items) => Some(&items[..]),
            Value::Nil => Some(&[]),
            _ => None,
        }
    }
}
