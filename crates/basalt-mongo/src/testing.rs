//! A scripted stand-in for mongod and mongos. Direct sessions behave like a
//! replica-set member; discovering sessions behave like the router.

use crate::client::{AdminSession, ConnectOptions, DatabaseConnector, command_name};
use crate::codes::{ALREADY_INITIALIZED, ILLEGAL_OPERATION, NOT_YET_INITIALIZED};
use basalt_types::{BasaltError, CommandFailure, Result};
use mongodb::bson::{Bson, Document, doc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct FakeReplicaSet {
    members: Vec<String>,
    config_server: bool,
    status_polls: u32,
}

#[derive(Debug, Default)]
struct State {
    unreachable: BTreeSet<String>,
    replica_sets: BTreeMap<String, FakeReplicaSet>,
    election_polls: u32,
    never_elect: bool,
    shards: BTreeMap<String, String>,
    sharded_databases: BTreeSet<String>,
    sharded_collections: BTreeMap<String, Document>,
    failures: BTreeMap<String, CommandFailure>,
    commands: Vec<(String, String)>,
}

#[derive(Clone, Default)]
pub struct FakeMongo {
    state: Arc<Mutex<State>>,
}

fn host_of(uri: &str) -> String {
    let rest = uri.strip_prefix("mongodb://").unwrap_or(uri);
    rest.split(['/', '?']).next().unwrap_or_default().to_string()
}

fn failure(command: &str, code: i32, code_name: &str, message: impl Into<String>) -> BasaltError {
    CommandFailure::new(command, message)
        .with_code(code, code_name)
        .into()
}

impl FakeMongo {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connections to `host` fail until [`FakeMongo::set_reachable`].
    pub fn set_unreachable(&self, host: &str) {
        self.lock().unreachable.insert(host.to_string());
    }

    pub fn set_reachable(&self, host: &str) {
        self.lock().unreachable.remove(host);
    }

    /// A new set reports a primary only after `polls` status reads.
    pub fn elect_after(&self, polls: u32) {
        self.lock().election_polls = polls;
    }

    pub fn never_elect(&self) {
        self.lock().never_elect = true;
    }

    /// The next `command` fails with `failure`, wherever it is sent.
    pub fn fail_next(&self, command: &str, failure: CommandFailure) {
        self.lock().failures.insert(command.to_string(), failure);
    }

    /// `(host, command)` pairs in the order they were received.
    pub fn commands(&self) -> Vec<(String, String)> {
        self.lock().commands.clone()
    }

    pub fn command_count(&self, command: &str) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|(_, name)| name == command)
            .count()
    }

    pub fn initiated_sets(&self) -> Vec<String> {
        self.lock().replica_sets.keys().cloned().collect()
    }

    pub fn replica_set_members(&self, name: &str) -> Option<Vec<String>> {
        self.lock().replica_sets.get(name).map(|set| set.members.clone())
    }

    pub fn is_config_server(&self, name: &str) -> bool {
        self.lock()
            .replica_sets
            .get(name)
            .is_some_and(|set| set.config_server)
    }

    pub fn shards(&self) -> Vec<String> {
        self.lock().shards.keys().cloned().collect()
    }

    pub fn sharded_databases(&self) -> Vec<String> {
        self.lock().sharded_databases.iter().cloned().collect()
    }

    pub fn sharded_collection(&self, namespace: &str) -> Option<Document> {
        self.lock().sharded_collections.get(namespace).cloned()
    }
}

impl DatabaseConnector for FakeMongo {
    type Session = FakeSession;

    async fn connect(&self, uri: &str, options: ConnectOptions) -> Result<FakeSession> {
        let host = host_of(uri);
        if self.lock().unreachable.contains(&host) {
            return Err(BasaltError::Other(format!("connection refused: {host}")));
        }
        Ok(FakeSession {
            mongo: self.clone(),
            host,
            router: !options.direct,
        })
    }
}

pub struct FakeSession {
    mongo: FakeMongo,
    host: String,
    router: bool,
}

impl AdminSession for FakeSession {
    async fn ping(&self) -> Result<()> {
        if self.mongo.lock().unreachable.contains(&self.host) {
            return Err(BasaltError::Other(format!("connection reset: {}", self.host)));
        }
        Ok(())
    }

    async fn run_admin_command(&self, command: Document) -> Result<Document> {
        let name = command_name(&command);
        let mut state = self.mongo.lock();
        state.commands.push((self.host.clone(), name.clone()));
        if let Some(failure) = state.failures.remove(&name) {
            return Err(failure.into());
        }

        match (self.router, name.as_str()) {
            (_, "ping") => Ok(doc! { "ok": 1 }),
            (false, "replSetGetStatus") => replica_set_status(&mut state, &self.host),
            (false, "replSetInitiate") => initiate(&mut state, &self.host, &command),
            (true, "addShard") => add_shard(&mut state, &command),
            (true, "enableSharding") => enable_sharding(&mut state, &command),
            (true, "shardCollection") => shard_collection(&mut state, &command),
            _ => Err(failure(&name, 59, "CommandNotFound", format!("no such command: '{name}'"))),
        }
    }

    async fn disconnect(self) {}
}

fn set_of_host<'a>(
    state: &'a mut State,
    host: &str,
) -> Option<(&'a String, &'a mut FakeReplicaSet)> {
    state
        .replica_sets
        .iter_mut()
        .find(|(_, set)| set.members.iter().any(|member| member == host))
}

fn replica_set_status(state: &mut State, host: &str) -> Result<Document> {
    let (election_polls, never_elect) = (state.election_polls, state.never_elect);
    let Some((name, set)) = set_of_host(state, host) else {
        return Err(failure(
            "replSetGetStatus",
            NOT_YET_INITIALIZED,
            "NotYetInitialized",
            "no replset config has been received",
        ));
    };

    set.status_polls += 1;
    let elected = !never_elect && set.status_polls > election_polls;
    let members: Vec<Document> = set
        .members
        .iter()
        .enumerate()
        .map(|(ordinal, member)| {
            let state = match (elected, ordinal) {
                (true, 0) => "PRIMARY",
                (true, _) => "SECONDARY",
                (false, _) => "STARTUP2",
            };
            doc! { "name": member.clone(), "stateStr": state }
        })
        .collect();
    Ok(doc! { "set": name.clone(), "members": members, "ok": 1 })
}

fn initiate(state: &mut State, host: &str, command: &Document) -> Result<Document> {
    if set_of_host(state, host).is_some() {
        return Err(failure(
            "replSetInitiate",
            ALREADY_INITIALIZED,
            "AlreadyInitialized",
            "already initialized",
        ));
    }

    let invalid =
        |message: &str| failure("replSetInitiate", 93, "InvalidReplicaSetConfig", message);
    let config = command
        .get_document("replSetInitiate")
        .map_err(|_| invalid("missing config"))?;
    let name = config.get_str("_id").map_err(|_| invalid("missing _id"))?;
    let members = config
        .get_array("members")
        .map_err(|_| invalid("missing members"))?
        .iter()
        .filter_map(|member| match member {
            Bson::Document(member) => member.get_str("host").ok().map(str::to_string),
            _ => None,
        })
        .collect::<Vec<_>>();
    if !members.iter().any(|member| member == host) {
        return Err(invalid("this node is not a member of the config"));
    }

    state.replica_sets.insert(
        name.to_string(),
        FakeReplicaSet {
            members,
            config_server: config.get_bool("configsvr").unwrap_or(false),
            status_polls: 0,
        },
    );
    Ok(doc! { "ok": 1 })
}

fn add_shard(state: &mut State, command: &Document) -> Result<Document> {
    let connection = command.get_str("addShard").unwrap_or_default();
    let (name, _) = connection.split_once('/').unwrap_or((connection, ""));
    if state.shards.contains_key(name) {
        return Err(failure(
            "addShard",
            ILLEGAL_OPERATION,
            "IllegalOperation",
            format!("A shard named {name} already exists"),
        ));
    }
    if !state.replica_sets.contains_key(name) {
        return Err(failure(
            "addShard",
            96,
            "OperationFailed",
            format!("failed to connect to replica set {name}"),
        ));
    }
    state.shards.insert(name.to_string(), connection.to_string());
    Ok(doc! { "shardAdded": name, "ok": 1 })
}

fn enable_sharding(state: &mut State, command: &Document) -> Result<Document> {
    let database = command.get_str("enableSharding").unwrap_or_default().to_string();
    if !state.sharded_databases.insert(database.clone()) {
        return Err(failure(
            "enableSharding",
            ALREADY_INITIALIZED,
            "AlreadyInitialized",
            format!("sharding already enabled for database {database}"),
        ));
    }
    Ok(doc! { "ok": 1 })
}

fn shard_collection(state: &mut State, command: &Document) -> Result<Document> {
    let namespace = command.get_str("shardCollection").unwrap_or_default().to_string();
    let key = command.get_document("key").cloned().unwrap_or_default();
    match state.sharded_collections.get(&namespace) {
        Some(existing) if *existing != key => Err(failure(
            "shardCollection",
            20,
            "IllegalOperation",
            format!("collection {namespace} is already sharded with a different key"),
        )),
        Some(_) => Ok(doc! { "collectionsharded": namespace, "ok": 1 }),
        None => {
            state.sharded_collections.insert(namespace.clone(), key);
            Ok(doc! { "collectionsharded": namespace, "ok": 1 })
        }
    }
}
