//! Dev-server supervision and a static preview server.

pub mod preview;
pub mod supervisor;

pub use preview::{PreviewConfig, build_router, start_preview};
pub use supervisor::{ProcessSupervisor, ServerHandle, ServerState, SupervisorConfig};
