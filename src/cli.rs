//! Command-line interface definition for marquee-auth
//!
//! The binary is an operator tool: it inspects and sweeps the state store
//! and exercises each login method from a terminal.

use clap::{Parser, Subcommand};

/// marquee-auth - authentication core for the Marquee analytics platform
#[derive(Parser, Debug, Clone)]
#[command(name = "marquee-auth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "MARQUEE_CONFIG", default_value = "config/marquee.yaml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Inspect or maintain the ephemeral state store
    State {
        /// State store subcommand
        #[command(subcommand)]
        command: StateCommand,
    },

    /// OpenID Connect login helpers
    Oidc {
        /// OIDC subcommand
        #[command(subcommand)]
        command: OidcCommand,
    },

    /// Plex PIN login helpers
    Plex {
        /// Plex subcommand
        #[command(subcommand)]
        command: PlexCommand,
    },

    /// Basic Auth helpers
    Basic {
        /// Basic Auth subcommand
        #[command(subcommand)]
        command: BasicCommand,
    },
}

/// State store subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum StateCommand {
    /// Print the number of live entries
    Count,
    /// Remove expired entries and print how many were removed
    Sweep,
    /// Run the periodic sweeper until interrupted
    Reap,
}

/// OIDC subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum OidcCommand {
    /// Begin a login and print the authorization URL
    LoginUrl {
        /// Where to send the user after login
        #[arg(short, long, default_value = "/")]
        redirect: String,
    },
}

/// Plex subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum PlexCommand {
    /// Request a PIN and wait for it to be approved
    Login {
        /// Print the PIN and exit without waiting
        #[arg(long)]
        no_wait: bool,
    },
}

/// Basic Auth subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum BasicCommand {
    /// Check a username and password against the configured principal
    Verify {
        /// Username to check
        #[arg(short, long)]
        username: String,

        /// Password to check
        #[arg(short, long, env = "MARQUEE_VERIFY_PASSWORD")]
        password: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
