use rand::SeedableRng;
use rand::rngs::StdRng;

/// splitmix64 finalizer. Decorrelates nearby stream identifiers so that
/// consecutive replicate indices do not produce correlated generators.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Derives the random stream for one (multiplier, replicate) pair.
///
/// Each pair owns an independent generator, so the Monte-Carlo loop can run
/// its replicates in any order (or in parallel) and still reproduce the same
/// draws for the same base seed.
pub(crate) fn replicate_rng(seed: u64, multiplier_index: usize, replicate: usize) -> StdRng {
    let pair = ((multiplier_index as u64) << 32) ^ (replicate as u64);
    StdRng::seed_from_u64(mix(seed ^ mix(pair)))
}
