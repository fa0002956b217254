//! services/desk/src/bin/desk.rs

use clap::Parser;
use desk_lib::{
    adapters::{
        FsObjectStore, HttpChatBackend, MemoryDocumentStore, MemoryIdentityProvider, PgDocumentStore,
        PgIdentityProvider,
    },
    app::{App, Reply},
    commands,
    config::{Config, StoreBackend},
    error::DeskError,
    render,
};
use loan_desk_core::domain::AuthUser;
use loan_desk_core::ports::{DocumentStore, IdentityProvider, PortError};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Terminal client for the ByteFinance loan assistant.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Keep chats and accounts in memory even when DATABASE_URL is set.
    #[arg(long)]
    offline: bool,

    /// With --offline, start signed in as this address.
    #[arg(long, requires = "offline")]
    email: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), DeskError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let cli = Cli::parse();
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    info!("Configuration loaded. Starting desk...");

    // --- 2. Storage & Identity ---
    let (identity, store, persistent): (Arc<dyn IdentityProvider>, Arc<dyn DocumentStore>, bool) =
        match (&config.store, cli.offline) {
            (StoreBackend::Postgres { database_url }, false) => {
                info!("Connecting to database...");
                let db_pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect(database_url)
                    .await?;
                let documents = PgDocumentStore::new(db_pool.clone());
                info!("Running database migrations...");
                documents.run_migrations().await?;
                info!("Database migrations complete.");
                let identity: Arc<dyn IdentityProvider> = Arc::new(PgIdentityProvider::new(db_pool));
                let store: Arc<dyn DocumentStore> = Arc::new(documents);
                (identity, store, true)
            }
            _ => {
                warn!("Using in-memory storage; nothing is kept after exit.");
                let identity = MemoryIdentityProvider::new();
                if let Some(email) = &cli.email {
                    identity
                        .sign_in_as(AuthUser {
                            user_id: Uuid::new_v4(),
                            email: Some(email.clone()),
                            email_verified: false,
                        })
                        .await;
                }
                let identity: Arc<dyn IdentityProvider> = Arc::new(identity);
                let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
                (identity, store, false)
            }
        };

    // --- 3. Remaining Adapters & the App ---
    let objects = Arc::new(FsObjectStore::new(
        config.upload_root.clone(),
        config.upload_public_url.clone(),
    ));
    let backend = Arc::new(HttpChatBackend::new(reqwest::Client::new(), config.api_url.clone()));
    let app = App::new(
        identity,
        store,
        objects,
        backend,
        config.session_file.clone(),
        PathBuf::from("."),
    );
    if persistent {
        app.restore_session().await;
    }
    app.chats().watch_chat_list().await;

    // --- 4. Transcript Printer ---
    let mut transcript = app.chats().transcript();
    let printer = tokio::spawn(async move {
        let mut printer = render::TranscriptPrinter::new();
        while transcript.changed().await.is_ok() {
            let messages = transcript.borrow_and_update().clone();
            for message in printer.fresh(&messages) {
                println!("{}", render::message(message));
            }
        }
    });

    // --- 5. Input Loop ---
    println!("{}", render::banner());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match commands::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match app.handle(command).await {
            Ok(Reply::Text(text)) => println!("{text}"),
            Ok(Reply::Silent) => {}
            Ok(Reply::Quit) => break,
            Err(DeskError::Port(PortError::Unauthorized)) => {
                println!("Please sign in first: /signin <email> <password> (or /signup).")
            }
            Err(e) => println!("{e}"),
        }
    }

    printer.abort();
    info!("Goodbye.");
    Ok(())
}
