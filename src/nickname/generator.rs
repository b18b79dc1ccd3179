//! Procedural nicknames for an empty name pool.
//!
//! Shape: `<Adjective><Core>-<4 base36 chars><3 digits>`, e.g. `NeonPulse-k3x9417`.
//! The longest possible result is 20 characters.

use super::selector::RandomSource;

pub const ADJECTIVES: &[&str] = &[
    "Flux", "Neon", "Nova", "Quantum", "Hyper", "Turbo", "Pixel", "Zesty", "Meta", "Ultra",
    "Astro", "Cyber", "Glitch", "Lunar", "Vortex", "Binary", "Cosmic", "Proto", "Omega", "Solar",
];

pub const CORES: &[&str] = &[
    "Spark", "Drift", "Pulse", "Shard", "Shift", "Core", "Node", "Loop", "Hex", "Ray", "Wave",
    "Arc", "Frame", "Phase", "Trace", "Grid", "Beam",
];

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const TAIL_LEN: usize = 4;

/// Build one procedural nickname from `rng`.
pub fn generate(rng: &mut dyn RandomSource) -> String {
    let adjective = ADJECTIVES[rng.index(ADJECTIVES.len())];
    let core = CORES[rng.index(CORES.len())];

    let mut name = String::with_capacity(20);
    name.push_str(adjective);
    name.push_str(core);
    name.push('-');
    for _ in 0..TAIL_LEN {
        name.push(char::from(BASE36[rng.index(BASE36.len())]));
    }
    // 100..=999
    let variant = 100 + rng.index(900);
    name.push_str(&variant.to_string());
    name
}
