use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use kinvey::{Client, ClientConfig, Query, StorageConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "kinvey-sync")]
#[command(about = "Inspect and replay the local sync queue of a Kinvey app", long_about = None)]
struct Args {
    /// Local storage engine
    #[arg(long, value_enum, default_value_t = Engine::Sqlite)]
    engine: Engine,

    /// Local storage path (defaults to the platform data directory)
    #[arg(long)]
    path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Engine {
    Sqlite,
    Rocksdb,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List pending operations
    Pending {
        #[arg(short, long)]
        collection: Option<String>,
    },
    /// Replay pending operations of a collection against the backend
    Push {
        #[arg(short, long)]
        collection: String,
    },
    /// Fetch entities of a collection into local storage
    Pull {
        #[arg(short, long)]
        collection: String,

        /// JSON filter, e.g. '{"genre":"sf"}'
        #[arg(short, long)]
        query: Option<String>,
    },
    /// Drop pending operations without sending them
    Clear {
        #[arg(short, long)]
        collection: Option<String>,
    },
}

fn storage(args: &Args) -> anyhow::Result<StorageConfig> {
    let path = match &args.path {
        Some(path) => path.clone(),
        None => match StorageConfig::open_default("kinvey-sync")? {
            StorageConfig::Sqlite { path } => path,
            other => anyhow::bail!("unexpected default storage: {:?}", other),
        },
    };
    Ok(match args.engine {
        Engine::Sqlite => StorageConfig::Sqlite { path },
        Engine::Rocksdb => StorageConfig::RocksDb {
            path: path.with_extension("rocksdb"),
        },
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kinvey=info,kinvey_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env()?;
    let storage = storage(&args)?;
    tracing::info!("Using local storage {:?}", storage);
    let client = Client::new(config, storage).await?;

    match args.command {
        Command::Pending { collection } => {
            let operations = client
                .sync_queue()
                .operations(collection.as_deref(), None)
                .await?;
            for op in &operations {
                println!("{}", serde_json::to_string(op)?);
            }
            eprintln!("{} pending operation(s)", operations.len());
        }
        Command::Push { collection } => {
            let result = client.sync_manager().push(&collection, None).await?;
            for success in &result.success {
                println!("ok     {:?} {}", success.method, success.entity_id);
            }
            for failure in &result.error {
                println!("failed {:?} {}: {}", failure.method, failure.entity_id, failure.error);
            }
            if !result.is_complete() {
                anyhow::bail!("{} operation(s) could not be pushed", result.error.len());
            }
        }
        Command::Pull { collection, query } => {
            let query = query
                .map(|q| -> anyhow::Result<Query> {
                    Ok(Query::from_filter(serde_json::from_str(&q)?)?)
                })
                .transpose()?;
            let pulled = client.sync_manager().pull(&collection, query.as_ref()).await?;
            println!("pulled {} entities into {}", pulled, collection);
        }
        Command::Clear { collection } => {
            let removed = client
                .sync_queue()
                .clear(collection.as_deref(), None)
                .await?;
            println!("removed {} pending operation(s)", removed);
        }
    }

    Ok(())
}
