//! `rp` — host-side control plane for remote GPU compute pods.
//!
//! A small, alias-first CLI and library around a remote GPU provider: create
//! and name pods, reconcile SSH client config against their lifecycle,
//! schedule a deferred stop, and drive all of it from a single persisted
//! JSON document.
//!
//! ## Quick Start
//!
//! All provider configuration is loaded from environment variables. Create a
//! `.env` file:
//!
//! ```text
//! RUNPOD_API_KEY=your_api_key_here
//! ```
//!
//! Then use the command layer directly, the same way the `rp` binary does:
//!
//! ```ignore
//! use clap::Parser;
//! use rp::cli::{self, Opts};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let opts = Opts::parse();
//!     cli::run(opts).await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy for strict discipline
#![deny(clippy::all)]                 // All standard Clippy lints
#![deny(clippy::pedantic)]            // Very strict Clippy lints
#![deny(clippy::nursery)]             // Experimental lints
#![deny(clippy::unwrap_used)]         // unwrap() is forbidden
#![deny(clippy::expect_used)]         // expect() is forbidden
#![deny(clippy::panic)]               // panic!() is forbidden
#![deny(clippy::print_stdout)]        // println!() is forbidden in production
#![deny(clippy::todo)]                // TODO is forbidden
#![deny(clippy::unimplemented)]       // unimplemented!() is forbidden
#![deny(clippy::missing_const_for_fn)] // Force const when possible
#![deny(clippy::unwrap_in_result)]    // unwrap() in Result is forbidden
#![deny(clippy::module_inception)]    // Module with same name as crate is forbidden
#![deny(clippy::redundant_clone)]     // Useless clones are forbidden
#![deny(clippy::shadow_unrelated)]    // Shadowing unrelated variables is forbidden
#![deny(clippy::too_many_arguments)]  // Limit function arguments
#![deny(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Modules
// ============================================================================

/// On-disk location resolution and provider credential handling.
pub mod config;

/// Persistent alias/template/scheduled-task document.
pub mod store;

/// SSH client config reconciliation, scoped to marker-tagged managed blocks.
pub mod ssh_config;

/// Remote pod provider client: the `RemotePodClient` trait and its concrete
/// GraphQL/REST implementation.
pub mod remote_client;

/// Alias-aware pod lifecycle operations built on top of the Store and a
/// Remote Pod Client.
pub mod pod_manager;

/// Deferred stop scheduling: time/duration parsing, task lifecycle, tick,
/// and the periodic OS agent installer.
pub mod scheduler;

/// Command-line argument parsing, presentation, and post-action housekeeping.
pub mod cli;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use cli::{CliError, Command, Opts};
pub use pod_manager::{CreatePodOptions, PodManager, PodManagerError, PodView};
pub use remote_client::{PodRecord, PodStatus, RemoteClientConfig, RemotePodClient, RunpodRemoteClient};
pub use scheduler::{SchedulerError, TickReport};
pub use ssh_config::{SshConfigEditor, SshConfigError};
pub use store::{PodTemplate, ScheduledTask, Store, StoreError, TaskStatus};
