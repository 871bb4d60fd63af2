//! WebSocket presence and message-routing relay.

pub mod config;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod shutdown;

pub use config::ServerConfig;
pub use handlers::{HandlerContext, MessageHandler};
pub use registry::ConnectionRegistry;
pub use server::{build_router, AppState, RelayServer, ServerHandle};
pub use session::{Phase, Session};
pub use shutdown::ShutdownCoordinator;
