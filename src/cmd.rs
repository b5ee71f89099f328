use std::fmt;

/// Represents a redis command as an ordered sequence of byte-string
/// arguments, verb first.
///
/// This layer never frames RESP itself; a [`Cmd`] is handed as-is to the
/// wire-level client behind [`ConnectionLike`](crate::ConnectionLike).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Cmd {
    args: Vec<Vec<u8>>,
}

/// Shortcut function to creating a command with a single argument.
///
/// The first argument of a redis command is always the name of the command
/// which needs to be a string.  This is the recommended way to start a
/// command pipe.
pub fn cmd(name: &str) -> Cmd {
    let mut rv = Cmd::new();
    rv.arg(name);
    rv
}

impl Cmd {
    /// Creates a new empty command.
    pub fn new() -> Cmd {
        Cmd { args: vec![] }
    }

    /// Appends an argument to the command.
    pub fn arg<T: AsRef<[u8]>>(&mut self, arg: T) -> &mut Cmd {
        self.args.push(arg.as_ref().to_vec());
        self
    }

    /// Returns the number of arguments, the verb included.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Returns true if the command has no arguments at all.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Returns a reference to the data for the argument at `idx`.
    pub fn arg_idx(&self, idx: usize) -> Option<&[u8]> {
        self.args.get(idx).map(|arg| &arg[..])
    }

    /// Returns the index of the first argument that matches `candidate`,
    /// ignoring ASCII case.
    pub fn position(&self, candidate: &[u8]) -> Option<usize> {
        self.args
            .iter()
            .position(|arg| arg.eq_ignore_ascii_case(candidate))
    }

    /// Returns the lowercased verb of the command.
    pub(crate) fn verb(&self) -> Option<Vec<u8>> {
        self.arg_idx(0).map(|verb| verb.to_ascii_lowercase())
    }

    /// Returns the raw arguments.
    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }
}

impl From<Vec<Vec<u8>>> for Cmd {
    fn from(args: Vec<Vec<u8>>) -> Cmd {
        Cmd { args }
    }
}

impl fmt::Debug for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for arg in &self.args {
            list.entry(&String::from_utf8_lossy(arg));
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::cmd;

    #[test]
    fn builds_ordered_arguments() {
        let mut set = cmd("SET");
        set.arg("key").arg(b"value");
        assert_eq!(set.len(), 3);
        assert_eq!(set.arg_idx(0), Some(&b"SET"[..]));
        assert_eq!(set.arg_idx(2), Some(&b"value"[..]));
        assert_eq!(set.arg_idx(3), None);
    }

    #[test]
    fn position_ignores_case() {
        let mut xread = cmd("XREAD");
        xread.arg("COUNT").arg("2").arg("StReAmS").arg("stream").arg("0");
        assert_eq!(xread.position(b"streams"), Some(3));
        assert_eq!(xread.position(b"missing"), None);
    }

    #[test]
    fn from_raw_argument_tuples() {
        let raw = vec![b"GET".to_vec(), b"hello".to_vec()];
        let as_cmd = super::Cmd::from(raw);
        assert_eq!(as_cmd.arg_idx(1), Some(&b"hello"[..]));
    }
}
