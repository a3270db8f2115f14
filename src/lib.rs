//! marquee-auth - authentication core for the Marquee media-server
//! analytics platform
//!
//! Three independent ways to establish who a user is, all producing the same
//! [`subject::AuthSubject`]:
//!
//! - [`basic::BasicAuthValidator`] checks HTTP Basic credentials against one
//!   configured principal.
//! - [`oidc::OidcFlow`] runs the OpenID Connect authorization-code flow with
//!   PKCE and nonce binding.
//! - [`plex::PlexFlow`] runs the Plex out-of-band PIN flow.
//!
//! In-flight OIDC logins are tracked in a [`state::StateStore`], either in
//! memory or in an embedded database that survives restarts.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use marquee_auth::oidc::{CallbackParams, OidcFlow, OidcFlowConfig};
//! use marquee_auth::state::MemoryStateStore;
//!
//! # async fn example() -> marquee_auth::error::Result<()> {
//! let config = OidcFlowConfig::new(
//!     "https://id.example.com",
//!     "marquee",
//!     "https://marquee.example.com/auth/oidc/callback",
//! );
//! let flow = OidcFlow::discover(config, Arc::new(MemoryStateStore::new())).await?;
//!
//! let login = flow.begin_login("/dashboard").await?;
//! // redirect the browser to login.authorization_url, then on callback:
//! let params = CallbackParams {
//!     state: login.state,
//!     code: "code-from-provider".to_string(),
//!     ..Default::default()
//! };
//! let outcome = flow.handle_callback(&params).await?;
//! println!("welcome {}", outcome.subject.username);
//! # Ok(())
//! # }
//! ```

pub mod basic;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod oidc;
pub mod plex;
pub mod secret;
pub mod state;
pub mod subject;

pub use error::{AuthError, Result};
pub use subject::{AuthProvider, AuthSubject};
