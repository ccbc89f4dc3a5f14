use ec_core::{Building, CityBlock};
use ec_worldgen_core::GenConfig;
use glam::Vec2;

/// Places a single building on `block`, inset from the roads around it.
///
/// The footprint is the outline of the block pulled toward its centroid by
/// [`GenConfig::building_setback`], and the height follows the density of the block.
pub fn place_building(block: &mut CityBlock, config: &GenConfig) {
    let c = block.centroid();
    let center = Vec2::new(c.x, c.z);
    let keep = 1.0 - config.building_setback.clamp(0.0, 1.0);

    let footprint = block
        .outline()
        .iter()
        .map(|&p| center + (p - center) * keep)
        .collect();
    let height = config.min_building_height
        + (config.max_building_height - config.min_building_height) * block.density();

    block.push_building(Building { footprint, height });
}
