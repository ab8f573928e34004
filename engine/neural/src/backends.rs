//! In-process reference backends.
//!
//! `UniformNetwork` is the test stub: equal priors, neutral value.
//! `RandomNetwork` is a deterministic pseudo-network whose output is a pure
//! function of (seed, input planes), which makes multi-threaded searches
//! comparable against single-threaded ones.

use crate::network::{Network, NetworkError, NetworkInput, NetworkOutput};

/// Uniform policy over legal moves, value 0.
#[derive(Debug, Clone, Default)]
pub struct UniformNetwork;

impl UniformNetwork {
    pub fn new() -> Self {
        UniformNetwork
    }
}

impl Network for UniformNetwork {
    fn name(&self) -> &str {
        "uniform"
    }

    fn compute(&self, batch: &[NetworkInput]) -> Result<Vec<NetworkOutput>, NetworkError> {
        Ok(batch
            .iter()
            .map(|input| {
                let n = input.moves.len();
                let prob = if n == 0 { 0.0 } else { 1.0 / n as f32 };
                NetworkOutput {
                    policy: vec![prob; n],
                    value: 0.0,
                }
            })
            .collect())
    }
}

#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn fnv1a_planes(planes: &[f32]) -> u64 {
    let mut hash: u64 = 0xCBF2_9CE4_8422_2325;
    for plane in planes {
        for byte in plane.to_bits().to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100_0000_01B3);
        }
    }
    hash
}

/// Deterministic pseudo-random evaluations derived by hashing the input.
#[derive(Debug, Clone)]
pub struct RandomNetwork {
    seed: u64,
}

impl RandomNetwork {
    pub fn new(seed: u64) -> Self {
        RandomNetwork { seed }
    }
}

impl Network for RandomNetwork {
    fn name(&self) -> &str {
        "random"
    }

    fn compute(&self, batch: &[NetworkInput]) -> Result<Vec<NetworkOutput>, NetworkError> {
        Ok(batch
            .iter()
            .map(|input| {
                let mut state = self.seed ^ fnv1a_planes(&input.planes);
                let n = input.moves.len();
                let mut policy: Vec<f32> = (0..n)
                    .map(|_| (splitmix64(&mut state) >> 40) as f32 + 1.0)
                    .collect();
                let total: f32 = policy.iter().sum();
                if total > 0.0 {
                    for p in &mut policy {
                        *p /= total;
                    }
                }
                // Value in (-1, 1).
                let value = ((splitmix64(&mut state) >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0;
                NetworkOutput { policy, value }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::{Move, Square};

    fn input(planes: Vec<f32>, n_moves: u8) -> NetworkInput {
        NetworkInput {
            planes,
            moves: (0..n_moves)
                .map(|i| Move::new(Square::from_index(i), Square::from_index(i + 9)))
                .collect(),
        }
    }

    #[test]
    fn test_uniform_policy() {
        let net = UniformNetwork::new();
        let out = net.compute(&[input(vec![1.0], 4)]).unwrap();
        assert_eq!(out.len(), 1);
        for p in &out[0].policy {
            assert!((p - 0.25).abs() < 1e-6);
        }
        assert!((out[0].value).abs() < 1e-6);
    }

    #[test]
    fn test_uniform_empty_moves() {
        let net = UniformNetwork::new();
        let out = net.compute(&[input(vec![1.0], 0)]).unwrap();
        assert!(out[0].policy.is_empty());
    }

    #[test]
    fn test_random_is_deterministic_per_input() {
        let net = RandomNetwork::new(42);
        let a = net.compute(&[input(vec![1.0, 2.0], 3)]).unwrap();
        let b = net.compute(&[input(vec![1.0, 2.0], 3)]).unwrap();
        assert_eq!(a[0].policy, b[0].policy);
        assert_eq!(a[0].value, b[0].value);

        // Different planes give different evaluations.
        let c = net.compute(&[input(vec![2.0, 1.0], 3)]).unwrap();
        assert_ne!(a[0].policy, c[0].policy);
    }

    #[test]
    fn test_random_policy_normalized() {
        let net = RandomNetwork::new(7);
        let out = net.compute(&[input(vec![0.5; 8], 5)]).unwrap();
        let sum: f32 = out[0].policy.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert!(out[0].value > -1.0 && out[0].value < 1.0);
    }
}
