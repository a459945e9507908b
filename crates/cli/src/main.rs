use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use rpdb_store::migrate::{cached_to_direct, legacy_to_cached};
use rpdb_store::{DirectStore, KvStore, Store, StoreConfig};
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rpdb")]
#[command(about = "Sharded file-backed key-value store", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Store directory
    #[arg(long, global = true, default_value = "rpdb-data")]
    db: PathBuf,

    /// Use the direct (uncached, plain JSON) layout
    #[arg(long, global = true)]
    direct: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,

    /// Hex characters of the key digest used to pick a slice
    #[arg(long, global = true)]
    prefix_len: Option<usize>,

    /// Recycler ticks a loaded slice survives without access
    #[arg(long, global = true)]
    vitality: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read one key
    Get(KeyArgs),

    /// Write one key
    Set(SetArgs),

    /// Remove one key
    Rem(KeyArgs),

    /// List keys in sorted order
    Keys(KeysArgs),

    /// Print every key with its value
    Dump,

    /// Cache and recycler statistics (cached layout only)
    Stats,

    /// Remove empty slice files and leftover temp files (cached layout only)
    Compact,

    /// Move data between layouts
    #[command(subcommand)]
    Migrate(MigrateCommand),
}

#[derive(Args)]
struct KeyArgs {
    key: String,
}

#[derive(Args)]
struct SetArgs {
    key: String,

    /// JSON document, or a plain string with --raw-string
    value: String,

    /// Store the value as a string without parsing it
    #[arg(long)]
    raw_string: bool,
}

#[derive(Args)]
struct KeysArgs {
    /// Only keys starting with this prefix
    #[arg(long)]
    prefix: Option<String>,
}

#[derive(Subcommand)]
enum MigrateCommand {
    /// Single-file legacy database into a cached store
    #[command(name = "legacy-to-cached")]
    LegacyToCached(MigrateArgs),

    /// Cached store into a direct store
    #[command(name = "cached-to-direct")]
    CachedToDirect(MigrateArgs),
}

#[derive(Args)]
struct MigrateArgs {
    #[arg(long)]
    from: PathBuf,

    #[arg(long)]
    to: PathBuf,
}

#[derive(Serialize)]
struct GetOutput<'a> {
    key: &'a str,
    found: bool,
    value: Value,
}

#[derive(Serialize)]
struct SetOutput<'a> {
    key: &'a str,
    stored: bool,
}

#[derive(Serialize)]
struct RemOutput<'a> {
    key: &'a str,
    removed: bool,
}

#[derive(Serialize)]
struct KeysOutput {
    keys: Vec<String>,
    count: usize,
}

#[derive(Serialize)]
struct DumpOutput {
    entries: Map<String, Value>,
}

#[derive(Serialize)]
struct CompactOutput {
    removed_files: usize,
}

enum OpenStore {
    Cached(Store),
    Direct(DirectStore),
}

impl OpenStore {
    fn kv(&self) -> &dyn KvStore {
        match self {
            Self::Cached(store) => store,
            Self::Direct(store) => store,
        }
    }

    fn cached(&self, command: &str) -> Result<&Store> {
        match self {
            Self::Cached(store) => Ok(store),
            Self::Direct(_) => anyhow::bail!("`{command}` is only available for the cached layout"),
        }
    }

    async fn close(self) -> Result<()> {
        match self {
            Self::Cached(store) => store.close().await?,
            Self::Direct(store) => store.close().await?,
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        logger.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.target(env_logger::Target::Stderr).init();

    match &cli.command {
        Commands::Migrate(command) => run_migrate(&cli, command).await,
        command => {
            let store = open_store(&cli).await?;
            let result = run_store_command(&store, command).await;
            let closed = store.close().await.context("Failed to close store");
            let output = result?;
            closed?;
            print_stdout(&serde_json::to_string(&output)?)
        }
    }
}

fn resolve_config(cli: &Cli, root: PathBuf) -> Result<StoreConfig> {
    let mut config = StoreConfig::from_root(&root)
        .with_context(|| format!("Failed to load config for {}", root.display()))?;
    if let Some(prefix_len) = cli.prefix_len {
        config = config.with_prefix_len(prefix_len);
    }
    if let Some(vitality) = cli.vitality {
        config = config.with_vitality(vitality);
    }
    config.validate()?;
    Ok(config)
}

async fn open_store(cli: &Cli) -> Result<OpenStore> {
    let config = resolve_config(cli, cli.db.clone())?;
    log::debug!("Opening {} (direct: {})", config.root.display(), cli.direct);
    let store = if cli.direct {
        OpenStore::Direct(
            DirectStore::open(config)
                .await
                .with_context(|| format!("Failed to open direct store {}", cli.db.display()))?,
        )
    } else {
        OpenStore::Cached(
            Store::open(config)
                .await
                .with_context(|| format!("Failed to open store {}", cli.db.display()))?,
        )
    };
    Ok(store)
}

async fn run_store_command(store: &OpenStore, command: &Commands) -> Result<Value> {
    let kv = store.kv();
    let output = match command {
        Commands::Get(args) => {
            let value = kv.get_value(&args.key).await?;
            serde_json::to_value(GetOutput {
                key: &args.key,
                found: value.is_some(),
                value: value.unwrap_or(Value::Null),
            })?
        }
        Commands::Set(args) => {
            let value = if args.raw_string {
                Value::String(args.value.clone())
            } else {
                serde_json::from_str(&args.value).with_context(|| {
                    format!("Value for {:?} is not valid JSON (use --raw-string)", args.key)
                })?
            };
            kv.set_value(&args.key, value).await?;
            kv.flush().await?;
            serde_json::to_value(SetOutput {
                key: &args.key,
                stored: true,
            })?
        }
        Commands::Rem(args) => {
            let removed = kv.remove(&args.key).await?;
            kv.flush().await?;
            serde_json::to_value(RemOutput {
                key: &args.key,
                removed,
            })?
        }
        Commands::Keys(args) => {
            let mut keys = kv.keys().await?;
            if let Some(prefix) = &args.prefix {
                keys.retain(|k| k.starts_with(prefix.as_str()));
            }
            serde_json::to_value(KeysOutput {
                count: keys.len(),
                keys,
            })?
        }
        Commands::Dump => {
            let mut entries = Map::new();
            for key in kv.keys().await? {
                if let Some(value) = kv.get_value(&key).await? {
                    entries.insert(key, value);
                }
            }
            serde_json::to_value(DumpOutput { entries })?
        }
        Commands::Stats => {
            let stats = store.cached("stats")?.stats().await;
            let mut value = serde_json::to_value(&stats)?;
            if let Some(map) = value.as_object_mut() {
                map.insert("hit_ratio".to_string(), serde_json::to_value(stats.hit_ratio())?);
            }
            value
        }
        Commands::Compact => {
            let removed_files = store.cached("compact")?.compact().await?;
            serde_json::to_value(CompactOutput { removed_files })?
        }
        Commands::Migrate(_) => anyhow::bail!("migrations take --from/--to instead of --db"),
    };
    Ok(output)
}

async fn run_migrate(cli: &Cli, command: &MigrateCommand) -> Result<()> {
    let report = match command {
        MigrateCommand::LegacyToCached(args) => {
            let target = resolve_config(cli, args.to.clone())?;
            legacy_to_cached(&args.from, target)
                .await
                .with_context(|| {
                    format!(
                        "Failed to migrate {} -> {}",
                        args.from.display(),
                        args.to.display()
                    )
                })?
        }
        MigrateCommand::CachedToDirect(args) => {
            let source = resolve_config(cli, args.from.clone())?;
            let target = resolve_config(cli, args.to.clone())?;
            cached_to_direct(source, target).await.with_context(|| {
                format!(
                    "Failed to migrate {} -> {}",
                    args.from.display(),
                    args.to.display()
                )
            })?
        }
    };
    print_stdout(&serde_json::to_string(&report)?)
}

fn print_stdout(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}
