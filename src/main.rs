//! quicbench - QUIC multi-stream throughput benchmark

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quicbench::client::{
    Client, ClientConfig, DEFAULT_DATA_SIZE, DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT, DEFAULT_PORT,
    DEFAULT_STREAMS,
};
use quicbench::config::Config;
use quicbench::download::DEFAULT_READ_TIMEOUT;
use quicbench::net::AddressFamily;
use quicbench::output::{json::save_json, output_json, output_plain};

/// Initialize logging with optional file output
fn init_logging(log_file: Option<&str>, log_level: Option<&str>) -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let level = log_level.unwrap_or("info");
    let env_filter =
        EnvFilter::from_default_env().add_directive(format!("quicbench={}", level).parse()?);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .without_time();

    if let Some(file_path) = log_file {
        let expanded_path = if let Some(rest) = file_path.strip_prefix("~/") {
            dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(file_path))
        } else {
            PathBuf::from(file_path)
        };

        if let Some(parent) = expanded_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file_appender = tracing_appender::rolling::daily(
            expanded_path
                .parent()
                .unwrap_or_else(|| std::path::Path::new(".")),
            expanded_path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("quicbench.log")),
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Keep guard alive for the duration of the program
        std::mem::forget(guard);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "quicbench")]
#[command(author, version, about = "QUIC multi-stream upload/download throughput benchmark")]
struct Cli {
    /// The server hostname or IP to test against
    #[arg(short = 'u', long = "host", visible_alias = "url", env = "QUICBENCH_HOST")]
    host: Option<String>,

    /// The UDP port of the QUIC server
    #[arg(short, long, env = "QUICBENCH_PORT")]
    port: Option<u16>,

    /// Number of streams per phase
    #[arg(short = 'n', long)]
    streams: Option<usize>,

    /// Data size sent per stream (e.g., 262144, 256K, 1M)
    #[arg(short = 'd', long, value_parser = parse_size)]
    data_size: Option<usize>,

    /// Expect server-initiated unidirectional streams for the download phase
    #[arg(long)]
    uni: bool,

    /// Per-read timeout during the download phase
    #[arg(long, value_parser = parse_duration)]
    read_timeout: Option<Duration>,

    /// QUIC connection idle timeout
    #[arg(long, value_parser = parse_duration)]
    idle_timeout: Option<Duration>,

    /// Abort a download stream after N consecutive read timeouts
    #[arg(long)]
    max_read_timeouts: Option<u32>,

    /// Resolve the host to IPv4 addresses only
    #[arg(long = "ipv4", conflicts_with = "ipv6")]
    ipv4: bool,

    /// Resolve the host to IPv6 addresses only
    #[arg(long = "ipv6")]
    ipv6: bool,

    /// JSON output
    #[arg(long)]
    json: bool,

    /// Save the JSON result to a file
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Log file path (e.g., "~/.config/quicbench/quicbench.log")
    #[arg(long, env = "QUICBENCH_LOG_FILE")]
    log_file: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "QUICBENCH_LOG_LEVEL")]
    log_level: Option<String>,

    /// Generate shell completions
    #[arg(long, value_name = "SHELL", value_parser = ["bash", "zsh", "fish", "powershell", "elvish"])]
    completions: Option<String>,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.to_uppercase();
    let (num, suffix) = if s.ends_with('G') {
        (s.trim_end_matches('G'), 1024 * 1024 * 1024usize)
    } else if s.ends_with('M') {
        (s.trim_end_matches('M'), 1024 * 1024usize)
    } else if s.ends_with('K') {
        (s.trim_end_matches('K'), 1024usize)
    } else {
        (s.as_str(), 1usize)
    };

    num.parse::<usize>()
        .map_err(|e| e.to_string())?
        .checked_mul(suffix)
        .ok_or_else(|| format!("size too large: {}", s))
}

fn generate_completions(shell: &str) {
    use clap::CommandFactory;
    use clap_complete::{Shell, generate};

    let mut cmd = Cli::command();
    let shell = match shell {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        "powershell" => Shell::PowerShell,
        "elvish" => Shell::Elvish,
        _ => {
            eprintln!("Unknown shell: {}", shell);
            std::process::exit(1);
        }
    };
    generate(shell, &mut cmd, "quicbench", &mut std::io::stdout());
}

/// Merge CLI flags over config file values over built-in defaults
fn build_config(cli: &Cli, file: &Config) -> Result<ClientConfig> {
    let defaults = &file.client;

    let data_size = match (cli.data_size, defaults.data_size.as_deref()) {
        (Some(size), _) => size,
        (None, Some(size)) => parse_size(size).map_err(anyhow::Error::msg)?,
        (None, None) => DEFAULT_DATA_SIZE,
    };

    let address_family = if cli.ipv4 {
        AddressFamily::V4Only
    } else if cli.ipv6 {
        AddressFamily::V6Only
    } else {
        defaults.address_family.unwrap_or_default()
    };

    Ok(ClientConfig {
        host: cli
            .host
            .clone()
            .or_else(|| defaults.host.clone())
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: cli.port.or(defaults.port).unwrap_or(DEFAULT_PORT),
        streams: cli.streams.or(defaults.streams).unwrap_or(DEFAULT_STREAMS),
        data_size,
        uni: cli.uni || defaults.uni.unwrap_or(false),
        read_timeout: cli
            .read_timeout
            .or(defaults.read_timeout_secs.map(Duration::from_secs))
            .unwrap_or(DEFAULT_READ_TIMEOUT),
        idle_timeout: cli
            .idle_timeout
            .or(defaults.idle_timeout_secs.map(Duration::from_secs))
            .unwrap_or(DEFAULT_IDLE_TIMEOUT),
        max_read_timeouts: cli.max_read_timeouts.or(defaults.max_read_timeouts),
        address_family,
        ..Default::default()
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle shell completions early (before logging init)
    if let Some(ref shell) = cli.completions {
        generate_completions(shell);
        return Ok(());
    }

    // Load config file (falls back to defaults if not found)
    let file_config = Config::load().unwrap_or_default();

    let log_file = cli
        .log_file
        .as_ref()
        .or(file_config.client.log_file.as_ref());
    let log_level = cli
        .log_level
        .as_ref()
        .or(file_config.client.log_level.as_ref());
    init_logging(log_file.map(|s| s.as_str()), log_level.map(|s| s.as_str()))?;

    let config = build_config(&cli, &file_config)?;
    let json_output = cli.json || file_config.client.json_output.unwrap_or(false);

    let client = Client::new(config);
    let result = match client.run().await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error connecting to QUIC server: {}", e);
            return Err(e);
        }
    };

    if json_output {
        println!("{}", output_json(&result));
    } else {
        println!("{}", output_plain(&result));
    }

    if let Some(path) = cli.output {
        save_json(&result, &path)?;
        info!("Results saved to {}", path.display());
    }

    info!("Test finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("262144"), Ok(262_144));
        assert_eq!(parse_size("256K"), Ok(262_144));
        assert_eq!(parse_size("1m"), Ok(1_048_576));
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("1m 30s"), Ok(Duration::from_secs(90)));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["quicbench"]);
        let config = build_config(&cli, &Config::default()).unwrap();
        assert_eq!(config.host, "emes.bj");
        assert_eq!(config.port, 4447);
        assert_eq!(config.streams, 30);
        assert_eq!(config.data_size, 262_144);
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.idle_timeout, Duration::from_secs(45));
        assert!(!config.uni);
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let file: Config = toml::from_str(
            r#"
[client]
host = "from-file"
streams = 10
data_size = "64K"
read_timeout_secs = 5
"#,
        )
        .unwrap();

        let cli = Cli::parse_from(["quicbench", "-n", "4", "--uni", "--idle-timeout", "1m"]);
        let config = build_config(&cli, &file).unwrap();
        assert_eq!(config.host, "from-file");
        assert_eq!(config.streams, 4);
        assert_eq!(config.data_size, 65_536);
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert!(config.uni);
    }

    #[test]
    fn test_cli_address_family() {
        let cli = Cli::parse_from(["quicbench", "--ipv6", "-u", "::1"]);
        let config = build_config(&cli, &Config::default()).unwrap();
        assert_eq!(config.address_family, AddressFamily::V6Only);
        assert_eq!(config.host, "::1");
    }
}
