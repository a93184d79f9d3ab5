// Snow-Owl XMODEM Server Binary

use clap::Parser;
use snow_owl_xmodem::config::{LoggingConfig, load_config, validate_config, write_config};
use snow_owl_xmodem::{AuditLogger, LogFormat, Result, XmodemConfig, XmodemError, XmodemServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "snow-owl-xmodem-server", about = "Multi-client XMODEM-CRC receiving server")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "/etc/snow-owl/xmodem.toml")]
    config: PathBuf,

    /// Write a default TOML configuration file and exit
    #[arg(long)]
    init_config: bool,

    /// Validate the configuration and exit (no socket bind)
    #[arg(long)]
    check_config: bool,

    /// Create the root directory if it does not exist
    #[arg(long)]
    create_root_dir: bool,

    /// Directory uploaded files are written into
    #[arg(long)]
    root_dir: Option<PathBuf>,

    /// Bind address for the XMODEM server
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Maximum concurrently connected clients
    #[arg(long)]
    max_clients: Option<usize>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_loaded = cli.config.exists();
    let mut config = if config_loaded {
        load_config(&cli.config)?
    } else {
        XmodemConfig::default()
    };

    if let Some(root_dir) = cli.root_dir {
        config.root_dir = root_dir;
    }
    if let Some(bind_addr) = cli.bind {
        config.bind_addr = bind_addr;
    }
    if let Some(max_clients) = cli.max_clients {
        config.max_clients = max_clients;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    if cli.init_config {
        write_config(&cli.config, &config)?;
        if cli.create_root_dir {
            std::fs::create_dir_all(&config.root_dir)?;
        }
        println!("Wrote config to {}", cli.config.display());
        return Ok(());
    }

    if cli.create_root_dir {
        std::fs::create_dir_all(&config.root_dir)?;
    }

    if cli.check_config {
        validate_config(&config, false)?;
        println!("Config OK: {}", cli.config.display());
        return Ok(());
    }

    validate_config(&config, true)?;

    let _log_guard = init_logging(&config.logging)?;

    if config_loaded {
        AuditLogger::new(config.logging.audit_enabled).configuration_loaded(&cli.config);
    }

    XmodemServer::new(config).run()
}

fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::new(logging.level.clone());

    let Some(ref log_file) = logging.file else {
        match logging.format {
            LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init(),
        }
        return Ok(None);
    };

    let dir = match log_file.parent() {
        Some(path) => path,
        None => std::path::Path::new("."),
    };
    let file_name = log_file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| XmodemError::Config("logging.file must include a file name".to_string()))?;
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    match logging.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(non_blocking)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .init(),
    }

    Ok(Some(guard))
}
