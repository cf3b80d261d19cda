//! Billing engine: backend gateway, table binder driver and task poller.
mod binder;
mod gateway;
mod persist;
mod poller;
mod session;
mod source;
mod task;
mod types;

pub use binder::{paint, ExtraParams, TableBinder, TableSurface, NO_DATA_TEXT};
pub use gateway::{error_from_body, ApiGateway, GatewaySettings};
pub use persist::{ensure_output_dir, AtomicFileWriter, PendingFile, PersistError};
pub use poller::{PollSettings, TaskPoller};
pub use session::{CredentialStore, LogoutHook, MemoryCredentialStore, NoopLogoutHook};
pub use source::{ListSource, TaskStatusSource};
pub use task::{TaskOutcome, TaskState, TaskStatus};
pub use types::{ApiError, ErrorKind, PollError};
