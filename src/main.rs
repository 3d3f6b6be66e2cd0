//! romserve - serve a directory of ROM images over HTTP

mod filesystem;
mod protocol;
mod server;

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use filesystem::config::{LibraryConfig, DEFAULT_CHUNK_SIZE};
use filesystem::RomLibrary;
use server::{AppState, ServerConfig};

#[derive(Parser)]
#[command(name = "romserve")]
#[command(version, about = "List and download ROM files over HTTP")]
struct Cli {
    /// Directory to serve (created if missing)
    #[arg(long, short, env = "ROMS_DIR", default_value = "roms")]
    dir: PathBuf,

    /// Port to listen on
    #[arg(long, short, env = "PORT", default_value_t = server::DEFAULT_PORT)]
    port: u16,

    /// Address to bind
    #[arg(long, env = "ROMS_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// List and serve hidden files
    #[arg(long)]
    include_hidden: bool,

    /// List and serve symlinks that stay inside the directory
    #[arg(long)]
    follow_symlinks: bool,

    /// Glob of file names to hide (repeatable; replaces the defaults)
    #[arg(long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,

    /// Read size per chunk when streaming, in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> std::io::Result<()> {
    ensure_root(&cli.dir)?;

    let mut config = LibraryConfig::new(&cli.dir)?;
    config.include_hidden = cli.include_hidden;
    config.follow_symlinks = cli.follow_symlinks;
    config.chunk_size = cli.chunk_size;
    if !cli.exclude.is_empty() {
        config.exclude_patterns = cli.exclude;
    }

    let library = RomLibrary::new(config);
    let server_config = ServerConfig {
        bind: cli.bind,
        port: cli.port,
    };

    let listener = server::bind(&server_config).await.map_err(|e| {
        std::io::Error::new(
            e.kind(),
            format!("cannot listen on {}:{}: {}", server_config.bind, server_config.port, e),
        )
    })?;

    print_banner(library.config(), listener.local_addr()?);

    server::serve(listener, AppState::new(Arc::new(library))).await
}

/// Create the ROM directory on first run
fn ensure_root(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        tracing::info!("Created ROM directory {}", dir.display());
    }
    Ok(())
}

fn print_banner(config: &LibraryConfig, addr: SocketAddr) {
    println!();
    println!("  {}", "romserve".cyan().bold());
    println!("  {} {}", "Serving:".dimmed(), config.root.display());
    println!(
        "  {} {}",
        "Local:  ".dimmed(),
        format!("http://localhost:{}/api/roms", addr.port()).green()
    );
    if addr.ip().is_unspecified() {
        if let Ok(ip) = local_ip_address::local_ip() {
            println!(
                "  {} {}",
                "Network:".dimmed(),
                format!("http://{}:{}/api/roms", ip, addr.port()).green()
            );
        }
    }
    println!();
}
