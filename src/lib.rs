pub mod assembler;
pub mod config;
pub mod constants;
pub mod events;
pub mod frame;
pub mod logging;
pub mod offline;
pub mod pipeline;
pub mod request;
pub mod retry;
pub mod sync;
pub mod transport;
pub mod types;

pub use types::*;

pub use assembler::ChunkSink;
pub use config::{Args, ClientConfig};
pub use pipeline::ChatPipeline;
pub use request::{ModeFlags, StreamRequest};
pub use sync::{ConversationSync, SendOutcome};
pub use transport::{HttpTransport, Transport};
