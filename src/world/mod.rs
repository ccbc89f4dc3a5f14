//! Streaming of the city around the camera.

mod loader;
pub use loader::*;

mod storage;
pub use storage::*;

mod streamer;
pub use streamer::*;
