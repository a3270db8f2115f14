//! marquee-auth - operator CLI for the Marquee authentication core
//!
#![doc = "Main entry point for the marquee-auth binary."]

use anyhow::Result;

use marquee_auth::cli::{BasicCommand, Cli, Commands, OidcCommand, PlexCommand};
use marquee_auth::commands;
use marquee_auth::config::Config;
use marquee_auth::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration and initialize logging from it
    let config = Config::load(&cli.config, &cli)?;
    init_logging(&config.logging)?;

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::State { command } => {
            tracing::debug!(?command, "running state command");
            commands::state::run_state(&config, command).await
        }
        Commands::Oidc {
            command: OidcCommand::LoginUrl { redirect },
        } => commands::oidc::run_login_url(&config, &redirect).await,
        Commands::Plex {
            command: PlexCommand::Login { no_wait },
        } => commands::plex::run_login(&config, no_wait).await,
        Commands::Basic {
            command: BasicCommand::Verify { username, password },
        } => commands::basic::run_verify(&config, &username, &password),
    }
}
