//! Redis Driver
//!
//! `StoreHandle` over redis-rs. Standalone deployments use a reconnecting
//! `ConnectionManager`; clusters use the async cluster client, and shard
//! masters are discovered from `CLUSTER NODES` at call time.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use redis::aio::{ConnectionLike, ConnectionManager, MultiplexedConnection};
use redis::cluster::ClusterClient;
use redis::{Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, Script};
use tracing::{debug, warn};

use super::{ShardNode, StoreHandle, StoreMode, WindowCount};
use crate::config::RedisConfig;
use crate::error::{CacheError, Result};

/// Increment, then assign the window only when the key carries no expiry.
/// PTTL returns -1 for "no expiry", so a concurrent caller can never
/// observe a counter without a TTL once this script returns.
const INCR_WINDOW_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return { current, ttl }
"#;

const PEEK_COUNTER_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return nil
end
return { tonumber(current), redis.call('PTTL', KEYS[1]) }
"#;

/// Opens a connection according to `config`.
///
/// A non-empty cluster node list selects the cluster client, seeded with
/// those addresses; otherwise a single-node client is built from host/port.
pub async fn connect(config: &RedisConfig) -> Result<Arc<dyn StoreHandle>> {
    let credentials = RedisConnectionInfo {
        db: config.db,
        username: config.username.clone(),
        password: config.password.clone(),
        ..Default::default()
    };

    if config.is_cluster() {
        let seeds: Vec<ConnectionInfo> = config
            .cluster_nodes
            .iter()
            .map(|node| ConnectionInfo {
                addr: ConnectionAddr::Tcp(node.host.clone(), node.port),
                redis: RedisConnectionInfo {
                    db: 0,
                    ..credentials.clone()
                },
            })
            .collect();

        let mut builder = ClusterClient::builder(seeds);
        if let Some(username) = &config.username {
            builder = builder.username(username.clone());
        }
        if let Some(password) = &config.password {
            builder = builder.password(password.clone());
        }
        let conn = builder.build()?.get_async_connection().await?;

        let address = config
            .cluster_nodes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        debug!(seeds = %address, "Cluster client connected");
        Ok(Arc::new(RedisHandle::new(
            conn,
            StoreMode::Cluster,
            address,
            credentials,
        )))
    } else {
        let client = Client::open(ConnectionInfo {
            addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
            redis: credentials.clone(),
        })?;
        let conn = ConnectionManager::new(client).await?;

        let address = format!("{}:{}", config.host, config.port);
        debug!(address = %address, "Standalone client connected");
        Ok(Arc::new(RedisHandle::new(
            conn,
            StoreMode::Standalone,
            address,
            credentials,
        )))
    }
}

// == Redis Handle ==
/// A connected redis client in either mode.
pub struct RedisHandle<C> {
    conn: C,
    mode: StoreMode,
    address: String,
    credentials: RedisConnectionInfo,
    incr_script: Script,
    peek_script: Script,
}

impl<C> RedisHandle<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    pub fn new(conn: C, mode: StoreMode, address: String, credentials: RedisConnectionInfo) -> Self {
        Self {
            conn,
            mode,
            address,
            credentials,
            incr_script: Script::new(INCR_WINDOW_SCRIPT),
            peek_script: Script::new(PEEK_COUNTER_SCRIPT),
        }
    }

    async fn cluster_masters(&self) -> Result<Vec<Arc<dyn ShardNode>>> {
        let mut conn = self.conn.clone();
        let listing: String = redis::cmd("CLUSTER")
            .arg("NODES")
            .query_async(&mut conn)
            .await?;

        let addresses = parse_cluster_masters(&listing);
        let connects = addresses.into_iter().map(|(host, port)| {
            let info = ConnectionInfo {
                addr: ConnectionAddr::Tcp(host.clone(), port),
                redis: RedisConnectionInfo {
                    db: 0,
                    ..self.credentials.clone()
                },
            };
            async move {
                let address = format!("{}:{}", host, port);
                let conn = match Client::open(info) {
                    Ok(client) => client.get_multiplexed_async_connection().await,
                    Err(e) => Err(e),
                };
                (address, conn)
            }
        });

        // Unreachable masters stay in the list so callers count them as failed.
        let mut masters: Vec<Arc<dyn ShardNode>> = Vec::new();
        for (address, outcome) in join_all(connects).await {
            match outcome {
                Ok(conn) => masters.push(Arc::new(RedisNode::<MultiplexedConnection>::new(
                    conn, address, true,
                ))),
                Err(e) => {
                    warn!(node = %address, error = %e, "Shard master unreachable");
                    masters.push(Arc::new(UnreachableNode::new(address, e.to_string())));
                }
            }
        }
        Ok(masters)
    }
}

#[async_trait]
impl<C> StoreHandle for RedisHandle<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    fn mode(&self) -> StoreMode {
        self.mode
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs.max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs.max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(count > 0)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let applied: u64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn incr_window(&self, key: &str, window_ms: u64) -> Result<WindowCount> {
        let mut conn = self.conn.clone();
        let (current, ttl): (i64, i64) = self
            .incr_script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(WindowCount {
            current: current.max(0) as u64,
            ttl_remaining_ms: ttl.max(0) as u64,
        })
    }

    async fn peek_counter(&self, key: &str) -> Result<Option<WindowCount>> {
        let mut conn = self.conn.clone();
        let reply: Option<(i64, i64)> = self
            .peek_script
            .key(key)
            .invoke_async(&mut conn)
            .await?;
        Ok(reply.map(|(current, ttl)| WindowCount {
            current: current.max(0) as u64,
            ttl_remaining_ms: ttl.max(0) as u64,
        }))
    }

    async fn masters(&self) -> Result<Vec<Arc<dyn ShardNode>>> {
        match self.mode {
            StoreMode::Standalone => {
                let node: Arc<dyn ShardNode> =
                    Arc::new(RedisNode::new(self.conn.clone(), self.address.clone(), false));
                Ok(vec![node])
            }
            StoreMode::Cluster => self.cluster_masters().await,
        }
    }

    async fn quit(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("QUIT").query_async(&mut conn).await?;
        Ok(())
    }
}

// == Redis Node ==
/// A directly addressed master.
struct RedisNode<C> {
    conn: C,
    address: String,
    /// Keys on one cluster node may span hash slots, so a multi-key DEL
    /// would be rejected with CROSSSLOT.
    per_key_delete: bool,
}

impl<C> RedisNode<C> {
    fn new(conn: C, address: String, per_key_delete: bool) -> Self {
        Self {
            conn,
            address,
            per_key_delete,
        }
    }
}

#[async_trait]
impl<C> ShardNode for RedisNode<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let mut conn = self.conn.clone();
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok((next, keys))
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        if self.per_key_delete {
            let mut pipe = redis::pipe();
            for key in keys {
                pipe.cmd("DEL").arg(key);
            }
            let counts: Vec<u64> = pipe.query_async(&mut conn).await?;
            Ok(counts.into_iter().sum())
        } else {
            let removed: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
            Ok(removed)
        }
    }

    async fn dbsize(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let size: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        Ok(size)
    }

    async fn used_memory(&self) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let info: String = redis::cmd("INFO").arg("memory").query_async(&mut conn).await?;
        Ok(parse_info_field(&info, "used_memory_human"))
    }

    async fn flush_all(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("FLUSHALL").query_async(&mut conn).await?;
        Ok(())
    }
}

// == Unreachable Node ==
/// A master listed by `CLUSTER NODES` that could not be dialled. Every
/// operation fails with the original connect error.
struct UnreachableNode {
    address: String,
    reason: String,
}

impl UnreachableNode {
    fn new(address: String, reason: String) -> Self {
        Self { address, reason }
    }

    fn error(&self) -> CacheError {
        CacheError::Connection(format!("{} unreachable: {}", self.address, self.reason))
    }
}

#[async_trait]
impl ShardNode for UnreachableNode {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn scan(&self, _cursor: u64, _pattern: &str, _count: usize) -> Result<(u64, Vec<String>)> {
        Err(self.error())
    }

    async fn delete_keys(&self, _keys: &[String]) -> Result<u64> {
        Err(self.error())
    }

    async fn dbsize(&self) -> Result<u64> {
        Err(self.error())
    }

    async fn used_memory(&self) -> Result<Option<String>> {
        Err(self.error())
    }

    async fn flush_all(&self) -> Result<()> {
        Err(self.error())
    }
}

/// Extracts `(host, port)` of every healthy master from `CLUSTER NODES` output.
///
/// Line format: `<id> <ip:port@cport[,hostname]> <flags> <master> ...`
fn parse_cluster_masters(listing: &str) -> Vec<(String, u16)> {
    listing
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _id = fields.next()?;
            let endpoint = fields.next()?;
            let flags = fields.next()?;

            let is_master = flags.split(',').any(|f| f == "master");
            let is_down = flags
                .split(',')
                .any(|f| matches!(f, "fail" | "fail?" | "noaddr" | "handshake"));
            if !is_master || is_down {
                return None;
            }

            let address = endpoint.split(['@', ',']).next()?;
            let (host, port) = address.rsplit_once(':')?;
            let port: u16 = port.parse().ok()?;
            if host.is_empty() || port == 0 {
                return None;
            }
            Some((host.to_string(), port))
        })
        .collect()
}

/// Reads `field:value` from an INFO section.
fn parse_info_field(info: &str, field: &str) -> Option<String> {
    info.lines().find_map(|line| {
        let (name, value) = line.trim().split_once(':')?;
        (name == field).then(|| value.trim().to_string())
    })
}
