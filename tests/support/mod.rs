#![allow(dead_code)]

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use once_cell::sync::Lazy;

use redis_cluster_pool::{
    ClusterClient, ClusterClientBuilder, ClusterResult, Cmd, Connect, ConnectionLike, ErrorKind,
    NodeAddr, SocketOpts, Value,
};

/// A mock node handler: `Err(reply)` answers the command, `Ok(())` means
/// the handler did not specify a response (which fails the test).
pub type Handler = Arc<dyn Fn(&Cmd, u16) -> Result<(), ClusterResult<Value>> + Send + Sync>;

pub struct MockBehavior {
    pub id: String,
    pub handler: Handler,
}

impl MockBehavior {
    fn new(id: &str, handler: Handler) -> Self {
        Self {
            id: id.to_string(),
            handler,
        }
    }

    #[must_use]
    pub fn register_new(id: &str, handler: Handler) -> RemoveHandler {
        get_behaviors().insert(id.to_string(), Self::new(id, handler));
        RemoveHandler(vec![id.to_string()])
    }
}

static MOCK_BEHAVIORS: Lazy<RwLock<HashMap<String, MockBehavior>>> = Lazy::new(Default::default);

fn get_behaviors() -> std::sync::RwLockWriteGuard<'static, HashMap<String, MockBehavior>> {
    MOCK_BEHAVIORS.write().unwrap()
}

pub struct RemoveHandler(Vec<String>);

impl Drop for RemoveHandler {
    fn drop(&mut self) {
        for id in &self.0 {
            get_behaviors().remove(id);
        }
    }
}

#[derive(Clone)]
pub struct MockConnection {
    pub handler: Handler,
    pub port: u16,
}

impl Connect for MockConnection {
    fn connect(addr: &NodeAddr, _opts: &SocketOpts) -> ClusterResult<Self> {
        let behaviors = MOCK_BEHAVIORS.read().unwrap();
        match behaviors.get(&addr.host) {
            Some(behavior) => Ok(MockConnection {
                handler: behavior.handler.clone(),
                port: addr.port,
            }),
            None => Err((ErrorKind::IoError, "mock behavior is not installed").into()),
        }
    }
}

impl ConnectionLike for MockConnection {
    fn req_command(&mut self, cmd: &Cmd) -> ClusterResult<Value> {
        (self.handler)(cmd, self.port).expect_err("handler did not specify a response")
    }

    fn req_pipeline(&mut self, cmds: &[Cmd]) -> ClusterResult<Vec<Value>> {
        let mut replies = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            replies.push(self.req_command(cmd)?);
        }
        Ok(replies)
    }

    fn set_read_timeout(&mut self, _dur: Option<Duration>) -> ClusterResult<()> {
        Ok(())
    }

    fn check_connection(&mut self) -> bool {
        true
    }

    fn is_open(&self) -> bool {
        true
    }
}

pub fn is_verb(cmd: &Cmd, verb: &str) -> bool {
    cmd.arg_idx(0)
        .map_or(false, |v| v.eq_ignore_ascii_case(verb.as_bytes()))
}

pub fn is_cluster_slots(cmd: &Cmd) -> bool {
    is_verb(cmd, "CLUSTER") && cmd.position(b"SLOTS").is_some()
}

#[derive(Clone, Debug)]
pub struct MockSlotRange {
    pub primary_port: u16,
    pub slot_range: Range<u16>,
}

pub fn create_topology_from_config(name: &str, slots_config: Vec<MockSlotRange>) -> Value {
    let slots_vec = slots_config
        .into_iter()
        .map(|slot_config| {
            Value::Bulk(vec![
                Value::Int(slot_config.slot_range.start as i64),
                Value::Int(slot_config.slot_range.end as i64),
                Value::Bulk(vec![
                    Value::Data(name.as_bytes().to_vec()),
                    Value::Int(slot_config.primary_port as i64),
                ]),
            ])
        })
        .collect();
    Value::Bulk(slots_vec)
}

/// Serves a one-node topology owning every slot; all other commands fall
/// through to the test's own handler.
pub fn respond_startup(name: &str, cmd: &Cmd) -> Result<(), ClusterResult<Value>> {
    respond_startup_with_config(
        name,
        cmd,
        vec![MockSlotRange {
            primary_port: 6379,
            slot_range: 0..16383,
        }],
    )
}

/// Serves a two-master topology split at slot 8191.
pub fn respond_startup_two_nodes(name: &str, cmd: &Cmd) -> Result<(), ClusterResult<Value>> {
    respond_startup_with_config(
        name,
        cmd,
        vec![
            MockSlotRange {
                primary_port: 6379,
                slot_range: 0..8191,
            },
            MockSlotRange {
                primary_port: 6380,
                slot_range: 8192..16383,
            },
        ],
    )
}

pub fn respond_startup_with_config(
    name: &str,
    cmd: &Cmd,
    slots_config: Vec<MockSlotRange>,
) -> Result<(), ClusterResult<Value>> {
    if is_cluster_slots(cmd) {
        Err(Ok(create_topology_from_config(name, slots_config)))
    } else {
        Ok(())
    }
}

pub struct MockEnv {
    pub client: ClusterClient<MockConnection>,
    #[allow(unused)]
    pub handler: RemoveHandler,
}

impl MockEnv {
    pub fn new(
        id: &str,
        handler: impl Fn(&Cmd, u16) -> Result<(), ClusterResult<Value>> + Send + Sync + 'static,
    ) -> Self {
        Self::with_builder(ClusterClientBuilder::new(vec![(id, 6379)]), id, handler)
    }

    pub fn with_builder(
        builder: ClusterClientBuilder,
        id: &str,
        handler: impl Fn(&Cmd, u16) -> Result<(), ClusterResult<Value>> + Send + Sync + 'static,
    ) -> Self {
        let handler = MockBehavior::register_new(id, Arc::new(handler));
        let client = builder.build::<MockConnection>().unwrap();
        MockEnv { client, handler }
    }
}
