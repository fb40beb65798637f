use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bookforged")]
#[command(author, version, about = "Multi-provider ISBN and book metadata resolution")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only consult free providers
    #[arg(long, global = true)]
    pub free_only: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Find the ISBN for a title and optional author
    ResolveIsbn {
        #[arg(long)]
        title: String,

        #[arg(long)]
        author: Option<String>,
    },

    /// Fetch book metadata for an ISBN
    Metadata {
        isbn: String,

        /// Print the provider trace alongside the result
        #[arg(long)]
        trace: bool,
    },

    /// Fetch a cover image URL for an ISBN
    Cover { isbn: String },

    /// Fetch metadata for many ISBNs at once
    Batch {
        #[arg(required = true)]
        isbns: Vec<String>,
    },

    /// Check whether an edition is in the public domain
    PublicDomain { isbn: String },

    /// Show daily quota usage of metered providers
    Quota,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
