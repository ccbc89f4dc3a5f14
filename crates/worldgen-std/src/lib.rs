//! The standard city generator.

use ec_worldgen_core::{GenConfig, GridLayout, LayoutKind};

mod blocks;
pub use blocks::*;

mod buildings;
pub use buildings::*;

mod density;
pub use density::*;

mod generator;
pub use generator::*;

mod manhattan;
pub use manhattan::*;

/// Creates the [`GridLayout`] selected by `config`.
pub fn make_layout(config: &GenConfig) -> Box<dyn GridLayout> {
    match config.layout {
        LayoutKind::Manhattan => Box::new(ManhattanGridLayout::new(config)),
    }
}
