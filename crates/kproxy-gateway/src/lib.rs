pub mod client;
pub mod dispatch;
pub mod encode;
pub mod translate;
pub mod transport;

pub use dispatch::{ChatOutcome, Dispatcher};
pub use transport::{ChunkStream, HttpTransport, UpstreamAttempt, UpstreamTransport};
