use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tablelog::storage::{HttpTableStore, TableStore};
use tablelog::{QueryOptions, QueryOrder, TableTransport, TransportConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "tablelog")]
#[command(about = "Write log records to a storage table and read them back")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file; the environment is used when absent
    #[arg(short, long, global = true, env = "TABLELOG_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured table name
    #[arg(short, long, global = true)]
    table: Option<String>,

    /// Override the configured partition key
    #[arg(short, long, global = true)]
    partition: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the table if it does not exist
    EnsureTable,
    /// Delete the table and every record in it
    DropTable,
    /// Append one record
    Log {
        level: String,
        message: String,
        /// Metadata as a JSON object
        #[arg(long)]
        meta: Option<String>,
        /// Store metadata as a single JSON column
        #[arg(long)]
        nested: bool,
    },
    /// Print stored records as JSON lines
    Query {
        /// Comma-separated list of columns to return
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Newest first
        #[arg(long)]
        desc: bool,
        /// Only records created at or after this RFC 3339 time
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Only records created before this RFC 3339 time
        #[arg(long)]
        until: Option<DateTime<Utc>>,
    },
}

fn load_config(cli: &Cli) -> Result<TransportConfig> {
    let mut config = match &cli.config {
        Some(path) => TransportConfig::from_file(path)?,
        None => TransportConfig::from_env()?,
    };
    if let Some(table) = &cli.table {
        config.table_name.clone_from(table);
    }
    if let Some(partition) = &cli.partition {
        config.partition_key.clone_from(partition);
    }
    Ok(config)
}

fn parse_meta(raw: &str) -> Result<tablelog::Metadata> {
    match serde_json::from_str::<Value>(raw).context("--meta must be valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--meta must be a JSON object, got {other}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::EnsureTable => {
            let transport = TableTransport::connect(config).await?;
            info!("Table {} is ready", transport.table_name());
        }
        Commands::DropTable => {
            config.validate()?;
            let store = HttpTableStore::from_config(&config)?;
            if store.delete_table_if_exists(&config.table_name).await? {
                info!("Deleted table {}", config.table_name);
            } else {
                info!("Table {} does not exist", config.table_name);
            }
        }
        Commands::Log {
            level,
            message,
            meta,
            nested,
        } => {
            let metadata = meta.as_deref().map(parse_meta).transpose()?;
            config.nested_meta |= nested;
            let transport = TableTransport::connect(config).await?;
            match transport.log(&level, &message, metadata).await? {
                Some(row_key) => println!("{row_key}"),
                None => info!("Transport is silent; nothing written"),
            }
        }
        Commands::Query {
            fields,
            limit,
            desc,
            from,
            until,
        } => {
            let transport = TableTransport::connect(config).await?;
            let options = QueryOptions {
                fields: (!fields.is_empty()).then_some(fields),
                limit,
                from,
                until,
                order: if desc { QueryOrder::Desc } else { QueryOrder::Asc },
            };
            for row in transport.query(&options).await? {
                println!("{}", Value::Object(row));
            }
        }
    }

    Ok(())
}
