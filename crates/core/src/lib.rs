//! The core content of the streaming city: chunk coordinates, the road network, city blocks,
//! chunks and the [`City`] that indexes them.

mod block;
pub use block::*;

mod chunk;
pub use chunk::*;

mod city;
pub use city::*;

mod graph;
pub use graph::*;

mod lifecycle;
pub use lifecycle::*;

mod pos;
pub use pos::*;

mod slab;
pub use slab::Handle;
