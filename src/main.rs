use std::path::PathBuf;

use clap::Parser;
use url::Url;

/// Mount a relational table of file records as a POSIX filesystem.
#[derive(Parser, Debug)]
#[command(name = "sqlfs", version, about)]
struct Cli {
    /// Directory to mount the filesystem at
    mount_point: PathBuf,

    /// Path to a TOML config file
    #[arg(long, env = "SQLFS_CONFIG")]
    config: Option<PathBuf>,

    /// Store URL, overriding the config file (e.g. sqlite:///var/lib/sqlfs/files.db)
    #[arg(long, env = "SQLFS_DB_URL")]
    db_url: Option<Url>,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[cfg(feature = "fuse")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use anyhow::Context;
    use sqlfs::{Config, Database, SqlFs};
    use tracing_subscriber::EnvFilter;

    let cli = Cli::parse();

    let default_filter = if cli.debug { "sqlfs=debug" } else { "sqlfs=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => {
            let url = cli
                .db_url
                .clone()
                .context("either --config or --db-url is required")?;
            Config::from_store_url(url)
        }
    };
    if let Some(url) = cli.db_url {
        config.store.url = url;
    }

    let db = Database::connect(&config.store.url)
        .await
        .with_context(|| format!("failed to connect to store at {}", config.store.url))?;

    let fs = SqlFs::new(db, tokio::runtime::Handle::current(), config.fuse.ttl());
    let allow_other = cli.allow_other || config.fuse.allow_other;
    let mount_point = cli.mount_point.clone();

    // fuser::mount2 blocks until unmount; keep the runtime free for the
    // store calls the filesystem hops back onto.
    tokio::task::spawn_blocking(move || sqlfs::fuse::mount(fs, &mount_point, allow_other))
        .await?
        .with_context(|| format!("failed to mount at {}", cli.mount_point.display()))?;

    Ok(())
}

#[cfg(not(feature = "fuse"))]
fn main() {
    let _ = Cli::parse();
    eprintln!("sqlfs was built without the `fuse` feature; nothing to mount");
    std::process::exit(1);
}
