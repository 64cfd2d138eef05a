mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use config::EmberConfig;
use ember_core::llm::{HttpLlmProvider, LlmProvider};

#[derive(Parser)]
#[command(name = "ember", about = "Control plane for a fleet of LLM coding agents")]
struct Cli {
    /// Database URL (overrides EMBER_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an ember config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/ember")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the ember database (requires config file or env vars)
    DbInit,
    /// Run the HTTP server (Runner Protocol Service + Task Service + Verifier)
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

/// Execute the `ember init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        llm: None,
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `ember db-init` to create and migrate the database.");
    println!("Set EMBER_LLM_API_KEY (or add an [llm] section) before `ember serve`.");

    Ok(())
}

/// Execute the `ember db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = EmberConfig::resolve(cli_db_url)?;

    println!("Initializing ember database...");

    ember_db::pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = ember_db::pool::create_pool(&resolved.db_config).await?;

    let migrations_path = ember_db::pool::default_migrations_path();
    ember_db::pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = ember_db::pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("ember db-init complete.");
    Ok(())
}

/// Execute the `ember serve` command: run the HTTP server until Ctrl+C.
async fn cmd_serve(cli_db_url: Option<&str>, bind: &str, port: u16) -> anyhow::Result<()> {
    let resolved = EmberConfig::resolve(cli_db_url)?;
    let db_pool = ember_db::pool::create_pool(&resolved.db_config).await?;

    let llm_config = config::LlmConfig::resolve()?;
    let provider: Arc<dyn LlmProvider> = Arc::new(HttpLlmProvider::new(
        llm_config.base_url,
        llm_config.api_key,
        llm_config.model,
    ));

    let result = ember_server::run_serve(db_pool.clone(), provider, bind, port, shutdown_signal()).await;
    db_pool.close().await;
    result
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve { bind, port } => {
            cmd_serve(cli.database_url.as_deref(), &bind, port)
                .await
                .with_context(|| "ember serve failed")?;
        }
    }

    Ok(())
}
