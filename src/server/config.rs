//! Gateway configuration

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::broker::BrokerConfig;
use crate::error::{Error, Result};
use crate::matching::EngineConfig;

/// Smallest mailbox accepted from the environment
pub const MIN_OUTBOUND_BUFFER: usize = 32;

/// Gateway configuration options
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Tag recorded on sessions and metrics for this transport
    pub transport_tag: String,

    /// How often the reaper looks for silent sessions
    pub heartbeat_interval: Duration,

    /// Silence after which a session is closed
    pub heartbeat_timeout: Duration,

    pub broker: BrokerConfig,

    pub engine: EngineConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7443)),
            transport_tag: "tcp".into(),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),
            broker: BrokerConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the transport tag
    pub fn transport_tag(mut self, tag: impl Into<String>) -> Self {
        self.transport_tag = tag.into();
        self
    }

    /// Set the reaper interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the idle timeout
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Replace the broker settings
    pub fn broker(mut self, broker: BrokerConfig) -> Self {
        self.broker = broker;
        self
    }

    /// Replace the engine settings
    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Load from the process environment
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the environment
    pub fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            bind_addr: parse_or(&lookup, "LISTEN_ADDR", defaults.bind_addr),
            transport_tag: defaults.transport_tag,
            heartbeat_interval: Duration::from_millis(parse_or(
                &lookup,
                "HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval.as_millis() as u64,
            )),
            heartbeat_timeout: Duration::from_millis(parse_or(
                &lookup,
                "HEARTBEAT_TIMEOUT_MS",
                defaults.heartbeat_timeout.as_millis() as u64,
            )),
            broker: BrokerConfig {
                shard_count: parse_or(&lookup, "SHARD_COUNT", defaults.broker.shard_count),
                max_sessions: parse_or(&lookup, "MAX_SESSIONS", defaults.broker.max_sessions),
                mailbox_capacity: parse_or(
                    &lookup,
                    "OUTBOUND_BUFFER",
                    defaults.broker.mailbox_capacity,
                ),
            },
            engine: EngineConfig {
                workers: parse_or(&lookup, "MATCH_WORKERS", defaults.engine.workers),
                queue_capacity: parse_or(&lookup, "MATCH_QUEUE", defaults.engine.queue_capacity),
            },
        };

        if config.broker.mailbox_capacity < MIN_OUTBOUND_BUFFER {
            return Err(Error::Config(format!(
                "OUTBOUND_BUFFER must be >= {}",
                MIN_OUTBOUND_BUFFER
            )));
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject zero-sized or inconsistent settings
    pub fn validate(&self) -> Result<()> {
        self.broker.validate()?;
        self.engine.validate()?;
        if self.heartbeat_interval.is_zero() {
            return Err(Error::Config("heartbeat_interval must be positive".into()));
        }
        if self.heartbeat_timeout.is_zero() {
            return Err(Error::Config("heartbeat_timeout must be positive".into()));
        }
        Ok(())
    }
}

fn parse_or<L, T>(lookup: &L, key: &str, fallback: T) -> T
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.is_empty() => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key = key, value = %raw, "Ignoring unparsable setting");
                fallback
            }
        },
        _ => fallback,
    }
}
