use crate::cli::ServeArgs;
use pggate::ProxyConfig;
use pggate::pool::DEFAULT_POOL_MAX_SIZE;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub proxy: ProxySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub json_logs: bool,
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            json_logs: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: usize,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_pool_max_size() -> usize {
    DEFAULT_POOL_MAX_SIZE
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            schema: default_schema(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxySection {
    /// Replaces the built-in table list when present.
    pub allowed_tables: Option<Vec<String>>,
    pub schema_ttl_secs: Option<u64>,
    pub query_timeout_ms: Option<u64>,
    pub log_sql_max_length: Option<usize>,
}

impl ConfigFile {
    /// Read `path`, or fall back to defaults when it is missing and `required` is false.
    pub fn load(path: &Path, required: bool) -> anyhow::Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                return Ok(Self::default());
            }
            Err(e) => {
                anyhow::bail!("failed to read config file {}: {e}", path.display());
            }
        };
        Self::parse(&raw)
            .map_err(|e| anyhow::anyhow!("failed to load config file {}: {e:#}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut file: ConfigFile = toml::from_str(raw)?;
        file.expand_env()?;
        Ok(file)
    }

    /// Layer CLI flags and `DATABASE_URL` over the file, then validate.
    pub fn apply_args(&mut self, args: &ServeArgs) -> anyhow::Result<()> {
        if let Some(listen) = &args.listen {
            self.server.listen = listen.clone();
        }
        if let Some(url) = &args.database_url {
            self.database.url = url.clone();
        }
        if self.database.url.trim().is_empty() {
            if let Ok(url) = std::env::var("DATABASE_URL") {
                self.database.url = url;
            }
        }
        self.server.json_logs |= args.json_logs;
        self.validate()
    }

    fn expand_env(&mut self) -> anyhow::Result<()> {
        self.server.listen = expand_env_vars(&self.server.listen)?;
        self.database.url = expand_env_vars(&self.database.url)?;
        self.database.schema = expand_env_vars(&self.database.schema)?;
        if let Some(tables) = self.proxy.allowed_tables.as_mut() {
            for t in tables {
                *t = expand_env_vars(t)?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.trim().is_empty() {
            anyhow::bail!("database.url must be set (config, --database-url or DATABASE_URL)");
        }
        if self.database.pool_max_size == 0 {
            anyhow::bail!("database.pool_max_size must be at least 1");
        }
        pggate::Ident::parse(&self.database.schema)
            .map_err(|e| anyhow::anyhow!("database.schema: {e}"))?;

        if let Some(tables) = &self.proxy.allowed_tables {
            if tables.is_empty() {
                anyhow::bail!("proxy.allowed_tables must not be empty");
            }
            for t in tables {
                pggate::Ident::parse(t)
                    .map_err(|e| anyhow::anyhow!("proxy.allowed_tables: {e}"))?;
            }
        }
        if self.proxy.query_timeout_ms == Some(0) {
            anyhow::bail!("proxy.query_timeout_ms must be positive");
        }
        Ok(())
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        let mut config = ProxyConfig::new().with_schema(self.database.schema.clone());
        if let Some(tables) = &self.proxy.allowed_tables {
            config = config.with_allowed_tables(tables.iter().cloned());
        }
        if let Some(secs) = self.proxy.schema_ttl_secs {
            config = config.with_schema_ttl(Duration::from_secs(secs));
        }
        if let Some(ms) = self.proxy.query_timeout_ms {
            config = config.with_query_timeout(Duration::from_millis(ms));
        }
        match self.proxy.log_sql_max_length {
            Some(0) => config = config.no_sql_truncation(),
            Some(len) => config = config.with_log_sql_max_length(len),
            None => {}
        }
        config
    }

    /// Pool checkout wait, bounded by the same per-request timeout.
    pub fn pool_wait_timeout(&self) -> Option<Duration> {
        self.proxy.query_timeout_ms.map(Duration::from_millis)
    }
}

fn expand_env_vars(input: &str) -> anyhow::Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'

            let mut key = String::new();
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == '}' {
                    closed = true;
                    break;
                }
                key.push(ch);
            }

            if !closed {
                anyhow::bail!("unterminated env var reference: ${{{key}}}");
            }
            if key.is_empty() {
                anyhow::bail!("invalid env var reference: ${{}}");
            }

            let v = std::env::var(&key)
                .map_err(|_| anyhow::anyhow!("missing env var for config expansion: {key}"))?;
            out.push_str(&v);
            continue;
        }

        out.push(c);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_file() {
        let file = ConfigFile::parse(
            r#"
            [server]
            listen = "0.0.0.0:9000"
            json_logs = true

            [database]
            url = "postgres://gate@localhost/qual"
            schema = "app"
            pool_max_size = 4

            [proxy]
            allowed_tables = ["projects", "equipment"]
            schema_ttl_secs = 300
            query_timeout_ms = 1500
            log_sql_max_length = 80
            "#,
        )
        .unwrap();

        assert_eq!(file.server.listen, "0.0.0.0:9000");
        assert!(file.server.json_logs);
        assert_eq!(file.database.pool_max_size, 4);

        let config = file.proxy_config();
        assert_eq!(config.schema, "app");
        assert_eq!(
            config.allowed_tables,
            Some(vec!["projects".to_string(), "equipment".to_string()])
        );
        assert_eq!(config.schema_ttl, Some(Duration::from_secs(300)));
        assert_eq!(config.query_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.log_sql_max_length, Some(80));
    }

    #[test]
    fn empty_file_uses_defaults() {
        let file = ConfigFile::parse("").unwrap();
        assert_eq!(file.server.listen, DEFAULT_LISTEN);
        assert_eq!(file.database.schema, "public");
        assert!(file.proxy.allowed_tables.is_none());
        assert!(file.proxy_config().query_timeout.is_none());
        assert!(file.pool_wait_timeout().is_none());
    }

    #[test]
    fn zero_log_length_disables_truncation() {
        let file = ConfigFile::parse("[proxy]\nlog_sql_max_length = 0").unwrap();
        assert_eq!(file.proxy_config().log_sql_max_length, None);

        let file = ConfigFile::parse("[proxy]\nquery_timeout_ms = 250").unwrap();
        assert_eq!(file.pool_wait_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn env_expansion() {
        // SAFETY: test-only env var with a unique name.
        unsafe { std::env::set_var("PGGATE_TEST_DB_HOST", "db.internal") };
        let file = ConfigFile::parse(
            r#"
            [database]
            url = "postgres://gate@${PGGATE_TEST_DB_HOST}/qual"
            "#,
        )
        .unwrap();
        assert_eq!(file.database.url, "postgres://gate@db.internal/qual");

        assert!(expand_env_vars("${PGGATE_TEST_SURELY_UNSET}").is_err());
        assert!(expand_env_vars("${unterminated").is_err());
        assert!(expand_env_vars("${}").is_err());
        assert_eq!(expand_env_vars("no refs, $HOME stays").unwrap(), "no refs, $HOME stays");
    }

    #[test]
    fn cli_overrides_and_validation() {
        let mut file = ConfigFile::parse(
            r#"
            [database]
            url = "postgres://from-file/db"
            "#,
        )
        .unwrap();
        let args = ServeArgs {
            listen: Some("127.0.0.1:1".into()),
            database_url: Some("postgres://from-cli/db".into()),
            ..ServeArgs::default()
        };
        file.apply_args(&args).unwrap();
        assert_eq!(file.server.listen, "127.0.0.1:1");
        assert_eq!(file.database.url, "postgres://from-cli/db");

        let mut bad = ConfigFile::parse(
            r#"
            [database]
            url = "postgres://x/db"
            [proxy]
            allowed_tables = ["users; drop"]
            "#,
        )
        .unwrap();
        assert!(bad.apply_args(&ServeArgs::default()).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ConfigFile::parse("[proxy]\nallowed = []").is_err());
    }

    #[test]
    fn missing_default_file_is_not_an_error() {
        let path = Path::new("definitely/not/here/pggate.toml");
        assert!(ConfigFile::load(path, false).is_ok());
        assert!(ConfigFile::load(path, true).is_err());
    }
}
