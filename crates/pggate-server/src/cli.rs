use std::path::PathBuf;

pub const DEFAULT_CONFIG: &str = "pggate.toml";

#[derive(Debug, Clone)]
pub enum Command {
    Help,
    Version,
    Serve(ServeArgs),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeArgs {
    pub config: PathBuf,
    /// Whether `--config` was given; a missing default file is not an error.
    pub config_explicit: bool,
    pub listen: Option<String>,
    pub database_url: Option<String>,
    pub json_logs: bool,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            config: PathBuf::from(DEFAULT_CONFIG),
            config_explicit: false,
            listen: None,
            database_url: None,
            json_logs: false,
        }
    }
}

pub fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let mut it = args.iter().skip(1).map(|s| s.as_str());
    let mut serve = ServeArgs::default();

    while let Some(token) = it.next() {
        match token {
            "-h" | "--help" => return Ok(Command::Help),
            "-V" | "--version" => return Ok(Command::Version),
            "--config" => {
                let Some(v) = it.next() else {
                    anyhow::bail!("--config requires a value");
                };
                serve.config = PathBuf::from(v);
                serve.config_explicit = true;
            }
            _ if token.starts_with("--config=") => {
                serve.config = PathBuf::from(token.trim_start_matches("--config="));
                serve.config_explicit = true;
            }
            "--listen" => {
                let Some(v) = it.next() else {
                    anyhow::bail!("--listen requires a value");
                };
                serve.listen = Some(v.to_string());
            }
            _ if token.starts_with("--listen=") => {
                serve.listen = Some(token.trim_start_matches("--listen=").to_string());
            }
            "--database-url" => {
                let Some(v) = it.next() else {
                    anyhow::bail!("--database-url requires a value");
                };
                serve.database_url = Some(v.to_string());
            }
            _ if token.starts_with("--database-url=") => {
                serve.database_url = Some(token.trim_start_matches("--database-url=").to_string());
            }
            "--json-logs" => serve.json_logs = true,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    Ok(Command::Serve(serve))
}

pub fn print_help() {
    println!(
        "\
pggate - schema-checked generic query proxy for PostgreSQL

USAGE:
  pggate [OPTIONS]

OPTIONS:
  --config <FILE>         Config file path (default: pggate.toml)
  --listen <ADDR>         Override server.listen from config
  --database-url <URL>    Override database.url from config
  --json-logs             Emit logs as JSON lines
  -V, --version           Print version
  -h, --help              Print help

ENVIRONMENT:
  DATABASE_URL            Used when no database URL is configured
  RUST_LOG                Log filter (default: info)

ENDPOINTS:
  POST /query             Run one query payload
  POST /schema/invalidate Drop cached table columns ({{\"table\": ...}} or {{}} for all)
  GET  /health            Liveness check"
    );
}
