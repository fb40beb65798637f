mod cli;

use bookforged::{
    config,
    resolver::{Engine, ResolveContext},
};
use bookforged_common::Isbn;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use serde::Serialize;
use std::path::Path;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn engine(config_path: Option<&Path>) -> Result<Engine> {
    let config = config::load_config_or_default(config_path)?;
    config::validate_config(&config)?;
    Engine::from_config(&config).await
}

fn context(free_only: bool) -> ResolveContext {
    if free_only {
        ResolveContext::free_only()
    } else {
        ResolveContext::new()
    }
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = context(cli.free_only);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::ResolveIsbn { title, author } => {
            let engine = engine(config_path).await?;
            match engine
                .resolver
                .resolve_isbn(&title, author.as_deref(), &ctx)
                .await
            {
                Some(found) => print_json(&found),
                None => {
                    println!("No ISBN found for {:?}", title);
                    Ok(())
                }
            }
        }
        Commands::Metadata { isbn, trace } => {
            let engine = engine(config_path).await?;
            if trace {
                let parsed = Isbn::parse(&isbn).with_context(|| format!("Invalid ISBN: {isbn}"))?;
                let resolution = engine
                    .resolver
                    .orchestrator()
                    .fetch_metadata(&parsed, &ctx)
                    .await;
                print_json(&resolution.trace)?;
                return match resolution.candidate {
                    Some(found) => print_json(&found),
                    None => {
                        println!("No metadata found for {isbn}");
                        Ok(())
                    }
                };
            }
            match engine.resolver.fetch_metadata(&isbn, &ctx).await {
                Some(found) => print_json(&found),
                None => {
                    println!("No metadata found for {isbn}");
                    Ok(())
                }
            }
        }
        Commands::Cover { isbn } => {
            let engine = engine(config_path).await?;
            match engine.resolver.fetch_cover(&isbn, &ctx).await {
                Some(found) => print_json(&found),
                None => {
                    println!("No cover found for {isbn}");
                    Ok(())
                }
            }
        }
        Commands::Batch { isbns } => {
            let engine = engine(config_path).await?;
            let results = engine.resolver.batch_fetch_metadata(&isbns, &ctx).await;
            let found = results.values().filter(|r| r.is_some()).count();
            print_json(&results)?;
            tracing::info!(requested = isbns.len(), found, "Batch complete");
            Ok(())
        }
        Commands::PublicDomain { isbn } => {
            let engine = engine(config_path).await?;
            match engine.resolver.check_public_domain(&isbn, &ctx).await {
                Some(found) => print_json(&found),
                None => {
                    println!("Public-domain status unknown for {isbn}");
                    Ok(())
                }
            }
        }
        Commands::Quota => {
            let engine = engine(config_path).await?;
            let statuses = engine.quota_statuses().await?;
            if statuses.is_empty() {
                println!("No metered providers are enabled");
                return Ok(());
            }
            for status in statuses {
                println!(
                    "{}: {}/{} used, {} remaining ({:?}), resets at {}",
                    status.provider,
                    status.used_today,
                    status.daily_limit,
                    status.remaining,
                    status.state,
                    status.resets_at.to_rfc3339()
                );
            }
            Ok(())
        }
        Commands::Validate {
            config: validate_path,
        } => validate_config(validate_path.as_deref().or(config_path)),
        Commands::Version => {
            println!("bookforged {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "bookforged=trace,bookforged_db=debug,bookforged_common=debug".to_string()
        } else {
            "bookforged=debug,bookforged_db=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };
    config::validate_config(&config)?;

    println!("✓ Configuration is valid");
    println!("  Store: {:?} ({})", config.store.backend, config.store.path.display());
    println!(
        "  Provider timeout: {}s",
        config.resolver.provider_timeout_secs
    );
    println!("  Providers: {}", config.providers.len());
    for provider in &config.providers {
        println!(
            "    {} ({})",
            provider.name,
            if provider.enabled { "enabled" } else { "disabled" }
        );
    }

    Ok(())
}
