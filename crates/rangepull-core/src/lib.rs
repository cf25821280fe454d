//! rangepull core - ranged download engine
//!
//! Downloads a single HTTP resource as many concurrent byte-range requests,
//! each landing in its own chunk file, then stitches the chunks back
//! together in order. The same bounded [`WorkerPool`] also drives
//! [`FanOutFetcher`] work such as batch metadata probes.

pub mod engine;
mod error;
mod metadata;
pub mod probe;
mod storage;

pub use engine::*;
pub use error::*;
pub use metadata::*;
pub use storage::*;

pub use rangepull_types as types;
