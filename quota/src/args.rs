use std::{borrow::Cow, fmt, io::IsTerminal, net::IpAddr, path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand, ValueEnum};
use config::Config;
use logforth::filter::EnvFilter;
use rate_limit::RateLimitRequest;

#[derive(Debug, Parser)]
#[command(name = "quota", version, long_about = concat!("quota v", env!("CARGO_PKG_VERSION"), ", rate limit decisions from the command line"))]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(long, short, env = "QUOTA_CONFIG_PATH", default_value = "./quota.toml")]
    pub config: PathBuf,
    /// Set the logging level
    #[arg(long = "log", env = "QUOTA_LOG", default_value_t = LogLevel::default())]
    pub log_level: LogLevel,
    /// Set the style of log output
    #[arg(long, env = "QUOTA_LOG_STYLE", default_value_t = LogStyle::default())]
    pub log_style: LogStyle,
    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    pub fn config(&self) -> anyhow::Result<Config> {
        let config = if self.config.exists() {
            Config::load(&self.config)?
        } else {
            Config::default()
        };

        Ok(config)
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Charge requests against the limits of a tier and route, printing one decision per request
    Attempt(RequestArgs),
    /// Evaluate requests against the limits without charging them
    Check(RequestArgs),
    /// Remove all rate limit state of the request's identities
    Reset(RequestArgs),
    /// Print the configured tiers and their limits
    Tiers,
    /// Validate the configuration and print its warnings
    Validate,
}

#[derive(Debug, clap::Args)]
pub struct RequestArgs {
    /// Client IP address of the request
    #[arg(long)]
    pub ip: Option<IpAddr>,
    /// Authenticated user of the request
    #[arg(long)]
    pub user: Option<String>,
    /// Custom partition key of the request, such as an API key
    #[arg(long)]
    pub key: Option<String>,
    /// Tier of the client, the default tier when omitted
    #[arg(long)]
    pub tier: Option<String>,
    /// Route of the request, e.g. "POST /upload"
    #[arg(long)]
    pub route: Option<String>,
    /// Cost of each request, overriding the route's cost
    #[arg(long)]
    pub cost: Option<u32>,
    /// Number of requests to send
    #[arg(long, short = 'n', default_value_t = 1)]
    pub count: u32,
}

impl RequestArgs {
    pub fn request(&self) -> RateLimitRequest {
        let mut builder = RateLimitRequest::builder();

        if let Some(ip) = self.ip {
            builder = builder.ip(ip);
        }

        if let Some(user) = &self.user {
            builder = builder.user(user);
        }

        if let Some(key) = &self.key {
            builder = builder.custom(key);
        }

        builder.build()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum LogStyle {
    /// Colorized text, used as the default with TTY output
    Color,
    /// Standard text, used as the default with non-TTY output
    Text,
    /// JSON objects
    Json,
}

impl Default for LogStyle {
    fn default() -> Self {
        if std::io::stderr().is_terminal() {
            LogStyle::Color
        } else {
            LogStyle::Text
        }
    }
}

impl AsRef<str> for LogStyle {
    fn as_ref(&self) -> &str {
        match self {
            LogStyle::Color => "color",
            LogStyle::Text => "text",
            LogStyle::Json => "json",
        }
    }
}

impl fmt::Display for LogStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum LogLevel {
    /// Disable logging
    Off,
    /// Only log errors
    Error,
    /// Log errors, and warnings
    #[default]
    Warn,
    /// Log errors, warnings, and info messages
    Info,
    /// Log errors, warnings, info, and debug messages
    Debug,
    /// Log errors, warnings, info, debug, and trace messages
    Trace,
}

impl LogLevel {
    pub fn env_filter(self) -> anyhow::Result<EnvFilter> {
        let filter_str = match self {
            LogLevel::Off => Cow::Borrowed("off"),
            // Dependencies stay at warn, the selected level applies to workspace crates
            level => Cow::Owned(format!(
                "warn,quota={level},rate_limit={level},config={level},telemetry={level}"
            )),
        };

        EnvFilter::from_str(&filter_str).map_err(|e| anyhow::anyhow!("Invalid log filter '{filter_str}': {e:?}"))
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_ref().fmt(f)
    }
}

impl AsRef<str> for LogLevel {
    fn as_ref(&self) -> &str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}
