//! Key extraction and slot hashing.
//!
//! Every command that reaches the dispatcher is routed by a single key;
//! this module knows where that key sits for each verb and how it hashes
//! onto the 16384 cluster slots.

use crate::cmd::Cmd;
use crate::types::{ClusterResult, ErrorKind};

/// Number of slots a redis cluster partitions its keyspace into.
pub const SLOT_COUNT: u16 = 16384;

/// Returns the cluster slot of a key.
///
/// CRC16/XMODEM modulo 16384, matching `CLUSTER KEYSLOT` bit for bit.
/// If the key carries a non-empty hash tag (`{...}`), only the tag is
/// hashed.
pub fn slot(key: &[u8]) -> u16 {
    let key = match get_hashtag(key) {
        Some(tag) => tag,
        None => key,
    };
    crc16::State::<crc16::XMODEM>::calculate(key) % SLOT_COUNT
}

fn get_hashtag(key: &[u8]) -> Option<&[u8]> {
    let open = key.iter().position(|v| *v == b'{')?;

    let close = key[open..].iter().position(|v| *v == b'}')?;

    let rv = &key[open + 1..open + close];
    if rv.is_empty() {
        None
    } else {
        Some(rv)
    }
}

/// Where the routing key of a command lives, per verb.
enum KeyLocation {
    /// The command addresses a node, not a key.  It cannot be routed by
    /// slot and is forbidden inside pipelines.
    NodeLocal,
    /// The key is the argument at this index (verb is index 0).
    Index(usize),
    /// The key follows the given literal token (`XREAD ... STREAMS key`).
    AfterToken(&'static [u8]),
    /// The key follows the given subcommand, if that subcommand is used
    /// (`MEMORY USAGE key`).
    AfterSubcommand(&'static [u8]),
}

fn location_for_verb(verb: &[u8]) -> KeyLocation {
    match verb {
        b"info" | b"config" | b"shutdown" | b"slaveof" => KeyLocation::NodeLocal,
        b"bitop" | b"object" | b"xgroup" | b"xinfo" | b"zdiff" | b"zinter" | b"zunion" => {
            KeyLocation::Index(2)
        }
        b"eval" | b"evalsha" => KeyLocation::Index(3),
        b"xread" | b"xreadgroup" => KeyLocation::AfterToken(b"streams"),
        b"memory" => KeyLocation::AfterSubcommand(b"usage"),
        _ => KeyLocation::Index(1),
    }
}

/// Returns the key that routes a single command, or `None` when the verb
/// addresses a node rather than a key (or the key argument is absent).
pub fn key_for_command(command: &Cmd) -> Option<&[u8]> {
    let verb = command.verb()?;
    match location_for_verb(&verb) {
        KeyLocation::NodeLocal => None,
        KeyLocation::Index(idx) => command.arg_idx(idx),
        KeyLocation::AfterToken(token) => {
            let pos = command.position(token)?;
            command.arg_idx(pos + 1)
        }
        KeyLocation::AfterSubcommand(sub) => {
            let actual = command.arg_idx(1)?;
            if actual.eq_ignore_ascii_case(sub) {
                command.arg_idx(2)
            } else {
                None
            }
        }
    }
}

/// Returns the routing keys of a pipeline.
///
/// The first command must not be `MULTI` (transactions are assembled by
/// the dispatcher), and node-local verbs cannot ride along in a pipeline
/// at all.  Commands shorter than two arguments contribute no key.
pub fn keys_for_pipeline(commands: &[Cmd]) -> ClusterResult<Vec<&[u8]>> {
    if let Some(first) = commands.first() {
        if first
            .arg_idx(0)
            .map_or(false, |verb| verb.eq_ignore_ascii_case(b"multi"))
        {
            return Err((
                ErrorKind::NoTransactionSupport,
                "transactions are assembled by the dispatcher; submit the commands without MULTI/EXEC"
            ).into());
        }
    }

    let mut keys = Vec::with_capacity(commands.len());
    for command in commands {
        if command.len() < 2 {
            continue;
        }
        let verb = match command.verb() {
            Some(verb) => verb,
            None => continue,
        };
        if matches!(location_for_verb(&verb), KeyLocation::NodeLocal) {
            return Err((
                ErrorKind::InvalidClusterCommand,
                "command cannot be part of a cluster pipeline",
                String::from_utf8_lossy(&verb).into_owned()
            ).into());
        }
        if let Some(key) = key_for_command(command) {
            keys.push(key);
        }
    }
    Ok(keys)
}

/// Resolves a pipeline to the single slot all of its keys hash to.
pub fn slot_for_pipeline(commands: &[Cmd]) -> ClusterResult<u16> {
    let keys = keys_for_pipeline(commands)?;
    let mut slots = keys.iter().map(|key| slot(key));
    let first = match slots.next() {
        Some(slot) => slot,
        None => return Err((
            ErrorKind::InvalidClusterCommand,
            "pipeline carries no routable key"
        ).into()),
    };
    if slots.any(|other| other != first) {
        return Err((
            ErrorKind::CrossSlot,
            "all keys in a pipeline must hash to the same slot"
        ).into());
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::{get_hashtag, key_for_command, keys_for_pipeline, slot, slot_for_pipeline};
    use crate::cmd::{cmd, Cmd};
    use crate::types::ErrorKind;

    #[test]
    fn test_get_hashtag() {
        assert_eq!(get_hashtag(&b"foo{bar}baz"[..]), Some(&b"bar"[..]));
        assert_eq!(get_hashtag(&b"foo{}{baz}"[..]), None);
        assert_eq!(get_hashtag(&b"foo{{bar}}zap"[..]), Some(&b"{bar"[..]));
        assert_eq!(get_hashtag(&b"no-tag"[..]), None);
        assert_eq!(get_hashtag(&b"open{only"[..]), None);
    }

    #[test]
    fn slots_match_cluster_keyslot() {
        // Reference values from `CLUSTER KEYSLOT`.
        assert_eq!(slot(b"123456789"), 12739);
        assert_eq!(slot(b"foo"), 12182);
        assert_eq!(slot(b"bar"), 5061);
        assert_eq!(slot(b"hello"), 866);
    }

    #[test]
    fn slots_stay_in_range() {
        for key in [&b""[..], b"x", b"some:longer:key", b"{tag}rest"] {
            assert!(slot(key) < super::SLOT_COUNT);
        }
    }

    #[test]
    fn hash_tag_routes_by_tag_alone() {
        assert_eq!(slot(b"{user42}.name"), slot(b"user42"));
        assert_eq!(slot(b"{user42}.age"), slot(b"user42"));
        assert_ne!(slot(b"{user42}.name"), slot(b"{user43}.name"));
    }

    #[test]
    fn default_verbs_route_by_first_argument() {
        let mut get = cmd("GET");
        get.arg("hello");
        assert_eq!(key_for_command(&get), Some(&b"hello"[..]));

        let mut set = cmd("set");
        set.arg("k").arg("v");
        assert_eq!(key_for_command(&set), Some(&b"k"[..]));
    }

    #[test]
    fn second_argument_verbs() {
        for verb in ["BITOP", "OBJECT", "XGROUP", "XINFO", "ZDIFF", "ZINTER", "ZUNION"] {
            let mut command = cmd(verb);
            command.arg("sub").arg("the-key").arg("rest");
            assert_eq!(key_for_command(&command), Some(&b"the-key"[..]), "{verb}");
        }
    }

    #[test]
    fn eval_routes_by_first_script_key() {
        let mut eval = cmd("EVAL");
        eval.arg("return 1").arg("1").arg("script-key");
        assert_eq!(key_for_command(&eval), Some(&b"script-key"[..]));

        let mut evalsha = cmd("evalsha");
        evalsha.arg("abc123").arg("1").arg("other-key");
        assert_eq!(key_for_command(&evalsha), Some(&b"other-key"[..]));
    }

    #[test]
    fn xread_routes_by_argument_after_streams() {
        let mut upper = cmd("XREAD");
        upper.arg("COUNT").arg("5").arg("STREAMS").arg("stream-a").arg("0");
        assert_eq!(key_for_command(&upper), Some(&b"stream-a"[..]));

        let mut lower = cmd("xreadgroup");
        lower
            .arg("GROUP")
            .arg("g")
            .arg("c")
            .arg("streams")
            .arg("stream-b")
            .arg(">");
        assert_eq!(key_for_command(&lower), Some(&b"stream-b"[..]));

        // No STREAMS token at all.
        let mut broken = cmd("XREAD");
        broken.arg("COUNT").arg("5");
        assert_eq!(key_for_command(&broken), None);
    }

    #[test]
    fn memory_routes_only_for_usage() {
        let mut usage = cmd("MEMORY");
        usage.arg("USAGE").arg("tracked-key");
        assert_eq!(key_for_command(&usage), Some(&b"tracked-key"[..]));

        let mut stats = cmd("MEMORY");
        stats.arg("STATS");
        assert_eq!(key_for_command(&stats), None);
    }

    #[test]
    fn node_local_verbs_have_no_key() {
        for verb in ["INFO", "CONFIG", "SHUTDOWN", "SLAVEOF"] {
            let mut command = cmd(verb);
            command.arg("whatever");
            assert_eq!(key_for_command(&command), None, "{verb}");
        }
    }

    #[test]
    fn pipeline_rejects_user_submitted_multi() {
        let mut get = cmd("GET");
        get.arg("x");
        let pipeline = vec![cmd("MULTI"), get];
        let err = keys_for_pipeline(&pipeline).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoTransactionSupport);
    }

    #[test]
    fn pipeline_rejects_node_local_verbs() {
        let mut get = cmd("GET");
        get.arg("x");
        let mut config = cmd("CONFIG");
        config.arg("GET").arg("maxmemory");
        let err = keys_for_pipeline(&[get, config]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidClusterCommand);
    }

    #[test]
    fn short_commands_contribute_no_key() {
        let mut get = cmd("GET");
        get.arg("x");
        let cmds = [cmd("PING"), get];
        let keys = keys_for_pipeline(&cmds).unwrap();
        assert_eq!(keys, vec![&b"x"[..]]);
    }

    #[test]
    fn pipeline_on_one_slot_resolves() {
        let mut a = cmd("SET");
        a.arg("{user42}.name").arg("x");
        let mut b = cmd("SET");
        b.arg("{user42}.age").arg("7");
        assert_eq!(slot_for_pipeline(&[a, b]).unwrap(), slot(b"user42"));
    }

    #[test]
    fn pipeline_across_slots_is_rejected() {
        let mut a = cmd("SET");
        a.arg("a").arg("1");
        let mut b = cmd("SET");
        b.arg("b").arg("2");
        assert_ne!(slot(b"a"), slot(b"b"));
        let err = slot_for_pipeline(&[a, b]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CrossSlot);
    }

    #[test]
    fn pipeline_without_keys_is_rejected() {
        let err = slot_for_pipeline(&[Cmd::from(vec![b"PING".to_vec()])]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidClusterCommand);
    }
}
