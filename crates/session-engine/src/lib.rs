//! Client-side session management for the Hearth platform.
//!
//! The engine owns the full credential lifecycle: registration and login,
//! durable persistence of the bearer credential, silent restore at process
//! start, pre-expiry renewal with single-flight deduplication, and
//! race-safe logout. Consumers observe the session through snapshots
//! rather than polling.
//!
//! Entry point is [`SessionManager`]:
//!
//! ```no_run
//! # async fn demo() -> session_engine::AuthResult<()> {
//! use session_engine::SessionManager;
//!
//! let session = SessionManager::from_env()?;
//! let _sub = session.subscribe(|state| {
//!     println!("authenticated: {}", state.is_authenticated());
//! });
//! session.init().await;
//!
//! let outcome = session.login("ada@example.com", "hunter2").await;
//! if !outcome.success {
//!     eprintln!("login failed: {:?}", outcome.error);
//! }
//! # Ok(())
//! # }
//! ```

mod api;
mod config;
mod error;
mod identity;
mod manager;
mod observer;
mod renewal;
mod retry;
mod session_fsm;
mod state;

pub use api::{HttpIdentityApi, IdentityApi, RegistrationRequest, TokenResponse};
pub use config::SessionConfig;
pub use error::{AuthError, AuthResult, ErrorKind};
pub use identity::Identity;
pub use manager::SessionManager;
pub use observer::{ObserverRegistry, Subscription};
pub use retry::{with_retry, RetryPolicy};
pub use session_fsm::SessionPhase;
pub use state::{AuthOutcome, SessionState};
