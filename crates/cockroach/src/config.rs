//! Configuration for the CockroachDB store adapter.

use std::time::Duration;

use patchain_storage::DEFAULT_FIELD_BLACKLIST;

/// Default upper bound on open connections in the pool.
pub const DEFAULT_MAX_OPEN_CONNS: u32 = 25;

/// Default number of warm connections the pool keeps around.
pub const DEFAULT_MAX_IDLE_CONNS: u32 = 5;

/// Default timeout for acquiring a connection from the pool.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for [`CockroachDb`](crate::CockroachDb).
///
/// # Example
///
/// ```
/// use patchain_cockroach::CockroachConfig;
///
/// let config = CockroachConfig::builder()
///     .connection_string("postgres://root@localhost:26257/patchain?sslmode=disable")
///     .max_open_conns(50)
///     .build();
/// assert_eq!(config.max_open_conns(), 50);
/// ```
#[derive(Debug, Clone)]
pub struct CockroachConfig {
    pub(crate) connection_string: String,
    pub(crate) max_open_conns: u32,
    pub(crate) max_idle_conns: u32,
    pub(crate) connect_timeout: Duration,
    pub(crate) field_blacklist: Vec<String>,
}

#[bon::bon]
impl CockroachConfig {
    /// Creates a new adapter configuration.
    #[builder]
    pub fn new(
        #[builder(into)] connection_string: String,
        #[builder(default = DEFAULT_MAX_OPEN_CONNS)] max_open_conns: u32,
        #[builder(default = DEFAULT_MAX_IDLE_CONNS)] max_idle_conns: u32,
        #[builder(default = DEFAULT_CONNECT_TIMEOUT)] connect_timeout: Duration,
        #[builder(default = default_blacklist())] field_blacklist: Vec<String>,
    ) -> Self {
        Self { connection_string, max_open_conns, max_idle_conns, connect_timeout, field_blacklist }
    }

    /// Returns the PostgreSQL-wire connection string.
    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Returns the open-connection cap.
    #[must_use]
    pub fn max_open_conns(&self) -> u32 {
        self.max_open_conns
    }

    /// Returns the warm-connection floor.
    #[must_use]
    pub fn max_idle_conns(&self) -> u32 {
        self.max_idle_conns
    }

    /// Returns the pool acquire timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the fields withheld from the structured-query surface.
    #[must_use]
    pub fn field_blacklist(&self) -> &[String] {
        &self.field_blacklist
    }
}

fn default_blacklist() -> Vec<String> {
    DEFAULT_FIELD_BLACKLIST.iter().map(|s| (*s).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let config = CockroachConfig::builder()
            .connection_string("postgres://localhost/patchain")
            .build();

        assert_eq!(config.max_open_conns(), DEFAULT_MAX_OPEN_CONNS);
        assert_eq!(config.max_idle_conns(), DEFAULT_MAX_IDLE_CONNS);
        assert_eq!(config.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.field_blacklist(), ["partition_id"]);
    }

    #[test]
    fn blacklist_is_deployment_configurable() {
        let config = CockroachConfig::builder()
            .connection_string("postgres://localhost/patchain")
            .field_blacklist(vec!["partition_id".into(), "creator_id".into()])
            .build();

        assert_eq!(config.field_blacklist().len(), 2);
    }
}
