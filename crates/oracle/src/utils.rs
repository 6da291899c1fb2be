use clap::Parser;
use fern::{
    colors::{Color, ColoredLevelConfig},
    Dispatch,
};
use log::LevelFilter;
use rate_oracle_core::{
    find_config_file, load_config, ConfigSource, DEFAULT_FETCH_TIMEOUT, DEFAULT_PORT,
    DEFAULT_REFRESH_AT, DEFAULT_SOURCE_ELEMENT, DEFAULT_SOURCE_URL, DEFAULT_UTC_OFFSET,
};
use std::{env, time::Duration};
use time::{
    format_description::well_known::Iso8601, macros::format_description, OffsetDateTime, Time,
    UtcOffset,
};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid port `{0}`")]
    InvalidPort(String),
    #[error("invalid utc offset `{0}`, expected ±HH:MM")]
    InvalidOffset(String),
    #[error("invalid refresh time `{0}`, expected HH:MM")]
    InvalidRefreshTime(String),
    #[error("fetch timeout must be at least one second")]
    ZeroTimeout,
    #[error("alert_api_url and alert_recipient must be set together")]
    IncompleteAlerts,
}

#[derive(Parser, Clone, Debug, serde::Deserialize, Default)]
#[command(
    author,
    version,
    about = "Rate Oracle - publishes the official exchange rate over HTTP"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $RATE_ORACLE_CONFIG, ./oracle.toml,
    /// $XDG_CONFIG_HOME/rate-oracle/oracle.toml, /etc/rate-oracle/oracle.toml
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "RATE_ORACLE_LEVEL")]
    pub level: Option<String>,

    /// Host to listen on (use 0.0.0.0 for all interfaces)
    #[arg(short, long, env = "RATE_ORACLE_HOST")]
    #[serde(alias = "host")]
    pub domain: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "RATE_ORACLE_PORT")]
    pub port: Option<String>,

    /// Directory holding the rate history database
    #[arg(long, env = "RATE_ORACLE_DB_DIR")]
    pub db_dir: Option<String>,

    /// Page the live rate is read from
    #[arg(long, env = "RATE_ORACLE_SOURCE_URL")]
    pub source_url: Option<String>,

    /// `id` of the element carrying the rate on the source page
    #[arg(long, env = "RATE_ORACLE_SOURCE_ELEMENT")]
    pub source_element: Option<String>,

    /// Upper bound for one fetch of the source page, in seconds
    #[arg(long, env = "RATE_ORACLE_FETCH_TIMEOUT")]
    pub fetch_timeout: Option<u64>,

    /// Accept invalid TLS certificates from the source page
    #[arg(long, env = "RATE_ORACLE_ACCEPT_INVALID_CERTS")]
    pub accept_invalid_certs: Option<bool>,

    /// Daily refresh time (HH:MM, in the reference offset)
    #[arg(long, env = "RATE_ORACLE_REFRESH_AT")]
    pub refresh_at: Option<String>,

    /// Reference UTC offset deciding what "today" means (±HH:MM)
    #[arg(long, env = "RATE_ORACLE_UTC_OFFSET")]
    pub utc_offset: Option<String>,

    /// Base URL of the messaging gateway used for failure alerts
    #[arg(long, env = "RATE_ORACLE_ALERT_API_URL")]
    pub alert_api_url: Option<String>,

    /// Recipient of failure alerts
    #[arg(long, env = "RATE_ORACLE_ALERT_RECIPIENT")]
    pub alert_recipient: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AlertTarget {
    pub api_url: String,
    pub recipient: String,
}

/// Validated runtime settings.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub db_dir: String,
    pub source_url: String,
    pub source_element: String,
    pub fetch_timeout: Duration,
    pub accept_invalid_certs: bool,
    pub refresh_at: Time,
    pub utc_offset: UtcOffset,
    pub alerts: Option<AlertTarget>,
}

impl Cli {
    pub fn host(&self) -> String {
        self.domain
            .clone()
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    pub fn port(&self) -> String {
        self.port
            .clone()
            .unwrap_or_else(|| DEFAULT_PORT.to_string())
    }

    pub fn db_dir(&self) -> String {
        self.db_dir
            .clone()
            .unwrap_or_else(|| "./rate_data".to_string())
    }

    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let port = self.port();
        let port: u16 = port.parse().map_err(|_| ConfigError::InvalidPort(port))?;

        let offset = self
            .utc_offset
            .clone()
            .unwrap_or_else(|| DEFAULT_UTC_OFFSET.to_string());
        let utc_offset = parse_offset(&offset).ok_or(ConfigError::InvalidOffset(offset))?;

        let refresh = self
            .refresh_at
            .clone()
            .unwrap_or_else(|| DEFAULT_REFRESH_AT.to_string());
        let refresh_at = Time::parse(&refresh, format_description!("[hour]:[minute]"))
            .map_err(|_| ConfigError::InvalidRefreshTime(refresh))?;

        let fetch_timeout = self.fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT);
        if fetch_timeout == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        let alerts = match (&self.alert_api_url, &self.alert_recipient) {
            (Some(api_url), Some(recipient)) => Some(AlertTarget {
                api_url: api_url.clone(),
                recipient: recipient.clone(),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteAlerts),
        };

        Ok(Settings {
            host: self.host(),
            port,
            db_dir: self.db_dir(),
            source_url: self
                .source_url
                .clone()
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            source_element: self
                .source_element
                .clone()
                .unwrap_or_else(|| DEFAULT_SOURCE_ELEMENT.to_string()),
            fetch_timeout: Duration::from_secs(fetch_timeout),
            accept_invalid_certs: self.accept_invalid_certs.unwrap_or(false),
            refresh_at,
            utc_offset,
            alerts,
        })
    }
}

fn parse_offset(value: &str) -> Option<UtcOffset> {
    UtcOffset::parse(
        value,
        format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
    )
    .ok()
}

/// Load configuration from CLI args, config file, and environment
pub fn get_config_info() -> Cli {
    let cli_args = Cli::parse();

    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file("RATE_ORACLE_CONFIG", "oracle.toml")
    };

    let file_config: Cli = load_config(&source).unwrap_or_else(|e| {
        eprintln!("ignoring config file {}: {:#}", source, e);
        Cli::default()
    });

    merge(cli_args, file_config)
}

/// CLI args (env vars are handled by clap) override the config file
fn merge(cli_args: Cli, file_config: Cli) -> Cli {
    Cli {
        config: cli_args.config,
        level: cli_args.level.or(file_config.level),
        domain: cli_args.domain.or(file_config.domain),
        port: cli_args.port.or(file_config.port),
        db_dir: cli_args.db_dir.or(file_config.db_dir),
        source_url: cli_args.source_url.or(file_config.source_url),
        source_element: cli_args.source_element.or(file_config.source_element),
        fetch_timeout: cli_args.fetch_timeout.or(file_config.fetch_timeout),
        accept_invalid_certs: cli_args
            .accept_invalid_certs
            .or(file_config.accept_invalid_certs),
        refresh_at: cli_args.refresh_at.or(file_config.refresh_at),
        utc_offset: cli_args.utc_offset.or(file_config.utc_offset),
        alert_api_url: cli_args.alert_api_url.or(file_config.alert_api_url),
        alert_recipient: cli_args.alert_recipient.or(file_config.alert_recipient),
    }
}

pub fn get_log_level(cli: &Cli) -> LevelFilter {
    let level_str = cli
        .level
        .clone()
        .or_else(|| env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    match level_str.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

pub fn setup_logger() -> Dispatch {
    let colors = ColoredLevelConfig::new()
        .trace(Color::White)
        .debug(Color::Cyan)
        .info(Color::Blue)
        .warn(Color::Yellow)
        .error(Color::Magenta);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            let now = OffsetDateTime::now_utc()
                .format(&Iso8601::DEFAULT)
                .unwrap_or_default();
            out.finish(format_args!(
                "[{} {}] {}: {}",
                now,
                colors.color(record.level()),
                record.target(),
                message
            ));
        })
        .chain(std::io::stdout())
}
