//! hvremote-exec: Remote execution and transport layer
//!
//! Runs scripts and moves files on a remote Hyper-V (or POSIX) host over two
//! interchangeable transports: a pool of long-lived connections, or one
//! fresh connection per operation. Scripts are rendered from templates and
//! either checked for exit code 0 or decoded as JSON results.

pub mod config;
pub mod context;
pub mod dialect;
pub mod ephemeral;
pub mod error;
pub mod keys;
pub mod local;
pub mod pool;
pub mod pooled;
pub mod protocol;
pub mod result;
pub mod session;
pub mod shell;
pub mod ssh;
pub mod template;
pub mod traits;
pub mod transfer;

pub use config::{ConnectionConfig, PoolSettings};
pub use context::ExecContext;
pub use dialect::Dialect;
pub use ephemeral::EphemeralTransport;
pub use error::ExecError;
pub use keys::{KeyError, KeySource};
pub use local::{LocalConnection, LocalConnector};
pub use pool::{Pool, PoolStats, PooledConnection};
pub use pooled::PooledTransport;
pub use protocol::ScriptRunner;
pub use result::{CommandResult, ExitReport};
pub use session::{CommandStyle, RemoteSession};
pub use ssh::{SshConnection, SshConnector};
pub use template::{RenderedScript, Template, TemplateError, render};
pub use traits::{Connection, Connector, Transport};
pub use transfer::{Base64Embed, FallbackChain, StructuredCopy, UploadStrategy};
