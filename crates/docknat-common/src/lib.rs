//! Common infrastructure for the docknat daemon.
//!
//! This crate holds the pieces of `docknatd` that do not depend on the
//! reconciliation logic itself:
//!
//! - [`shell`]: shell command execution with proper quoting, plus the
//!   paths of the system tools the daemon drives
//! - [`error`]: the [`NatError`] type shared by every collaborator
//!
//! # Example
//!
//! ```ignore
//! use docknat_common::{
//!     shell::{self, IPTABLES_CMD, shellquote},
//!     NatResult,
//! };
//!
//! async fn list_prerouting() -> NatResult<String> {
//!     let cmd = format!("{} -w -t nat -S {}", IPTABLES_CMD, shellquote("PREROUTING"));
//!     shell::exec_or_throw(&cmd).await
//! }
//! ```

pub mod error;
pub mod shell;

pub use error::{NatError, NatResult};
