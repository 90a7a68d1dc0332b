/// Server settings loading.
pub mod config;
/// Demo application channels (chat rooms, echo).
pub mod demo;
/// Logging setup (filters, console and file sinks).
pub mod logging;
/// Connections, transports and the accept loop.
pub mod network;
/// Channel patterns, factories, live channels and the hub.
pub mod pubsub;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Settings.
pub use config::Settings;
/// Logging entry point.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Connections and the server.
pub use network::{
    Connection, ConnectionConfig, ConnectionId, Frame, RealtimeServer, ServerConfig,
};
/// Channels and handlers.
pub use pubsub::{
    Channel, ChannelFactory, ChannelHandler, ClientMessage, DotPath, Event, EventHandler,
    HandlerResult, Hub, MessageType, Params, ServerError,
};
/// Error types.
pub use zvon_error::{ChannelError, ConfigError, ErrorExt, StatusCode, TransportError};
