pub mod frame;
pub mod openai;

pub use frame::UpstreamFrame;
