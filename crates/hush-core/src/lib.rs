pub mod automation;
pub mod backend;
pub mod constants;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod generators;
pub mod heartbeat;
pub mod master;
pub mod melody;
pub mod render;
pub mod scheduler;
pub mod soundscape;
pub mod voice;

pub use backend::*;
pub use engine::*;
pub use error::*;
pub use master::{MasterPath, MasterState};
pub use render::{RenderGraph, SharedGraph};
pub use soundscape::Soundscape;
