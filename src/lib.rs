//! nbrshell - reusable SSH sessions for notebook-style remote execution
//!
//! Each notebook cell runs one command on a remote host. Sessions are
//! created lazily on first use, reused across cells, and replaced
//! transparently after a connection failure.
//!
//! ```no_run
//! use nbrshell::{Credentials, ExecutorConfig, Executor};
//!
//! # async fn demo() -> Result<(), nbrshell::ExecError> {
//! let executor = Executor::with_ssh(ExecutorConfig::default());
//! let creds = Credentials::with_agent("gpu.example.com", 22, "ml");
//!
//! let result = executor.execute("gpu", Some(creds), "nvidia-smi -L", None).await?;
//! print!("{}", nbrshell::render::render_result(&result, &Default::default()));
//!
//! // Later cells reuse the session without credentials
//! executor.execute("gpu", None, "uptime", None).await?;
//! executor.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod exec;
pub mod logging;
pub mod render;
pub mod session;
pub mod ssh;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ExecutorConfig, HostKeyPolicy, HostsFile};
pub use exec::{ExecError, ExecRequest, Executor, InvocationResult, OutputSink, StreamKind};
pub use session::{AuthMethod, Credentials, SessionKey, SessionRegistry, SessionState};
pub use transport::{ChannelError, ConnectionError};
