/*!
Command handlers for the CLI

Each submodule backs one top-level subcommand:

- `state`: inspect and sweep the ephemeral state store
- `oidc`: begin an OpenID Connect login
- `plex`: run a Plex PIN login from the terminal
- `basic`: check credentials against the Basic Auth principal

Results go to stdout; diagnostics go through `tracing` to stderr.
*/

use anyhow::{bail, Context, Result};

use crate::config::Config;

// State store command handler
pub mod state {
    //! State store maintenance.

    use super::*;
    use crate::cli::StateCommand;
    use crate::state::{open_store, spawn_cleanup};
    use tokio_util::sync::CancellationToken;

    /// Run a state store subcommand
    pub async fn run_state(config: &Config, command: StateCommand) -> Result<()> {
        let backend = config.state_store.backend();
        let store = open_store(&backend).context("failed to open state store")?;
        tracing::debug!(?backend, "opened state store");

        match command {
            StateCommand::Count => {
                let live = store.count().await?;
                println!("{live}");
            }
            StateCommand::Sweep => {
                let removed = store.cleanup_expired().await?;
                println!("{removed}");
            }
            StateCommand::Reap => {
                let interval = config.state_store.cleanup_interval();
                tracing::info!(?interval, "starting state reaper; press Ctrl-C to stop");
                let task = spawn_cleanup(store, interval, CancellationToken::new());
                tokio::signal::ctrl_c()
                    .await
                    .context("failed to listen for Ctrl-C")?;
                task.shutdown().await;
            }
        }
        Ok(())
    }
}

// OIDC command handler
pub mod oidc {
    //! OpenID Connect login helpers.

    use super::*;
    use crate::oidc::OidcFlow;
    use crate::state::{open_store, StateBackend};

    /// Discover the provider, begin a login and print the authorization URL
    pub async fn run_login_url(config: &Config, redirect: &str) -> Result<()> {
        if !config.oidc.enabled {
            bail!("OIDC login is not enabled in the configuration");
        }

        let backend = config.state_store.backend();
        if backend == StateBackend::Memory {
            tracing::warn!("memory state store: the login state is lost when this command exits");
        }
        let store = open_store(&backend).context("failed to open state store")?;

        let flow = OidcFlow::discover(config.oidc.to_flow_config(), store)
            .await
            .context("failed to initialize OIDC flow")?;
        let login = flow.begin_login(redirect).await?;

        println!("{}", login.authorization_url);
        Ok(())
    }
}

// Plex command handler
pub mod plex {
    //! Plex PIN login from the terminal.

    use super::*;
    use crate::plex::PlexFlow;
    use tokio_util::sync::CancellationToken;

    /// Request a PIN, print it, and optionally wait for approval
    pub async fn run_login(config: &Config, no_wait: bool) -> Result<()> {
        if !config.plex.enabled {
            bail!("Plex login is not enabled in the configuration");
        }

        let flow = PlexFlow::new(config.plex.to_flow_config())?;
        let challenge = flow.request_pin().await.context("failed to request Plex PIN")?;

        println!("PIN: {}", challenge.code);
        println!("Approve at: {}", challenge.auth_url);
        if no_wait {
            println!("PIN id: {}", challenge.id);
            return Ok(());
        }

        let cancellation = CancellationToken::new();
        let interrupt = cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });

        let subject = flow
            .poll_for_approval(challenge.id, &cancellation)
            .await
            .context("Plex login did not complete")?;
        println!("{}", serde_json::to_string_pretty(&subject)?);
        Ok(())
    }
}

// Basic Auth command handler
pub mod basic {
    //! Basic Auth credential check.

    use super::*;
    use crate::basic::BasicAuthValidator;
    use crate::error::AuthError;
    use base64::Engine as _;

    /// Check `username` and `password` against the configured principal
    pub fn run_verify(config: &Config, username: &str, password: &str) -> Result<()> {
        if !config.basic.enabled {
            bail!("Basic Auth is not enabled in the configuration");
        }
        let configured_password = config
            .basic
            .password
            .as_deref()
            .context("basic.password is not configured")?;

        let validator = BasicAuthValidator::with_cost(
            &config.basic.username,
            configured_password,
            config.basic.bcrypt_cost,
        )?
        .with_realm(config.basic.realm.clone())
        .with_roles(config.basic.roles.iter().cloned());

        let header = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"))
        );

        match validator.validate_credentials(&header) {
            Ok(subject) => {
                println!("{}", serde_json::to_string_pretty(&subject)?);
                Ok(())
            }
            Err(AuthError::Unauthorized) => bail!("credentials rejected"),
            Err(e) => Err(e.into()),
        }
    }
}
