use config::{Config, ConfigError, Environment, File};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use hive_core::{AddressError, NodeAddress};
use hive_node::NodeConfig;
use hive_transport::{ServerConfig, SocketCacheConfig, TcpTransmitterConfig};

pub const ENV_PREFIX: &str = "HIVE";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DaemonConfig {
    /// Listen address for inbound frames.
    pub bind: String,
    /// Host other nodes use to reach this one.
    pub advertise_host: String,
    pub port: u16,
    /// Hex node id; generated and kept in the spool directory when absent.
    pub node_id: Option<String>,
    pub spool_dir: PathBuf,
    pub max_hops: i16,
    #[serde(with = "humantime_serde")]
    pub client_idle_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub socket_timeout: Duration,
    pub socket_cache_capacity: usize,
    pub transmit_attempts: u32,
    pub max_connections: usize,
    pub object_store_capacity: Option<u64>,
    #[serde(with = "humantime_serde")]
    pub publisher_sweep_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub publish_ttl: Duration,
    /// Initial neighbours as `GUID@host:port`.
    #[serde(deserialize_with = "deserialize_list")]
    pub seeds: Vec<String>,
}

fn deserialize_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ListVisitor;

    impl<'de> Visitor<'de> for ListVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a sequence of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(split_list(value))
        }

        fn visit_seq<S>(self, mut seq: S) -> Result<Self::Value, S::Error>
        where
            S: de::SeqAccess<'de>,
        {
            let mut vec = Vec::new();
            while let Some(element) = seq.next_element()? {
                vec.push(element);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(ListVisitor)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl DaemonConfig {
    /// Defaults, then the optional file, then `HIVE_*` environment variables.
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("bind", "0.0.0.0")?
            .set_default("advertise_host", "127.0.0.1")?
            .set_default("port", 12001)?
            .set_default("node_id", None::<String>)?
            .set_default("spool_dir", "data/spool")?
            .set_default("max_hops", i64::from(NodeConfig::default().max_hops))?
            .set_default("client_idle_timeout", "60s")?
            .set_default("socket_timeout", "8s")?
            .set_default("socket_cache_capacity", 64)?
            .set_default("transmit_attempts", 3)?
            .set_default("max_connections", 256)?
            .set_default("object_store_capacity", None::<u64>)?
            .set_default("publisher_sweep_interval", "60s")?
            .set_default("publish_ttl", "1h")?
            .set_default("seeds", Vec::<String>::new())?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        builder.build()?.try_deserialize()
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn seed_addresses(&self) -> Result<Vec<NodeAddress>, AddressError> {
        self.seeds.iter().map(|seed| seed.parse()).collect()
    }

    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            max_hops: self.max_hops,
            publish_ttl_seconds: i64::try_from(self.publish_ttl.as_secs()).unwrap_or(i64::MAX),
            sweep_interval: self.publisher_sweep_interval,
            object_store_capacity: self.object_store_capacity,
        }
    }

    pub fn server_config(&self) -> Result<ServerConfig, std::net::AddrParseError> {
        let ip = self.bind.parse()?;
        Ok(ServerConfig {
            bind: std::net::SocketAddr::new(ip, self.port),
            max_connections: self.max_connections,
            idle_timeout: self.client_idle_timeout,
        })
    }

    pub fn socket_cache_config(&self) -> SocketCacheConfig {
        SocketCacheConfig {
            capacity: self.socket_cache_capacity,
            connect_timeout: self.socket_timeout,
            io_timeout: self.socket_timeout,
        }
    }

    pub fn transmitter_config(&self) -> TcpTransmitterConfig {
        TcpTransmitterConfig {
            max_attempts: self.transmit_attempts,
        }
    }
}
