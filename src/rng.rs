use rand::RngCore;

use crate::real;

/// The linear-congruential generator used throughout training. Each worker
/// owns one, so runs with a fixed thread count are reproducible up to the
/// races on shared weights.
#[derive(Clone, Debug)]
pub struct Rng(pub u64);

impl Rng {
    pub fn rand_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(25214903917).wrapping_add(11);
        self.0
    }

    /// Get a uniformly distributed random number in `0.0 .. 1.0`.
    pub fn rand_real(&mut self) -> real {
        (self.rand_u64() & 0xFFFF) as real / 65536.0
    }

    /// Get a random integer in `min ..= max`.
    pub fn rand_range(&mut self, min: usize, max: usize) -> usize {
        if min >= max {
            return min;
        }
        ((self.rand_u64() >> 16) % (max - min + 1) as u64) as usize + min
    }
}

impl RngCore for Rng {
    fn next_u32(&mut self) -> u32 {
        (self.rand_u64() >> 16) as u32
    }

    fn next_u64(&mut self) -> u64 {
        (u64::from(self.next_u32()) << 32) | u64::from(self.next_u32())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_inclusive() {
        let mut rng = Rng(7);
        let mut seen = [false; 3];
        for _ in 0..1000 {
            let r = rng.rand_range(1, 3);
            assert!((1..=3).contains(&r));
            seen[r - 1] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn rand_real_in_unit_interval() {
        let mut rng = Rng(1);
        for _ in 0..1000 {
            let x = rng.rand_real();
            assert!((0.0..1.0).contains(&x));
        }
    }
}
