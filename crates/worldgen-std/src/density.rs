use ec_worldgen_core::GenConfig;
use fastnoise_lite::{FastNoiseLite, NoiseType};
use glam::Vec3;

/// Decides how built-up the city is at any point of the ground plane.
pub struct DensityField {
    noise: FastNoiseLite,
}

impl DensityField {
    /// Creates a new [`DensityField`] from the seed and frequency of `config`.
    pub fn new(config: &GenConfig) -> Self {
        let mut noise = FastNoiseLite::with_seed(config.seed);
        noise.set_noise_type(Some(NoiseType::OpenSimplex2));
        noise.set_frequency(Some(config.density_frequency));
        Self { noise }
    }

    /// Samples the density at `pos`, in `[0, 1]`.
    pub fn sample(&self, pos: Vec3) -> f32 {
        let raw = self.noise.get_noise_2d(pos.x, pos.z);
        ((raw + 1.0) * 0.5).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_in_range() {
        let field = DensityField::new(&GenConfig::default());
        for i in -50..50 {
            let d = field.sample(Vec3::new(i as f32 * 137.0, 0.0, i as f32 * -91.0));
            assert!((0.0..=1.0).contains(&d));
        }
    }

    #[test]
    fn same_seed_same_density() {
        let a = DensityField::new(&GenConfig::default());
        let b = DensityField::new(&GenConfig::default());
        let p = Vec3::new(1234.0, 0.0, -567.0);
        assert_eq!(a.sample(p), b.sample(p));
    }
}
