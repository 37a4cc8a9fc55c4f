/// PCG32 generator shared by every stage of one request.
///
/// Same seed, same sequence of draws, same output.
#[derive(Debug, Clone)]
pub struct SeededGenerator {
    state: u64,
    inc: u64,
}

impl SeededGenerator {
    const MULTIPLIER: u64 = 6364136223846793005;
    const STREAM: u64 = 0xda3e39cb94b95bdb;

    pub fn new(seed: u64) -> Self {
        let mut rng = Self {
            state: 0,
            inc: (Self::STREAM << 1) | 1,
        };
        rng.next_u32();
        rng.state = rng.state.wrapping_add(seed);
        rng.next_u32();
        rng
    }

    pub fn next_u32(&mut self) -> u32 {
        let old = self.state;
        self.state = old.wrapping_mul(Self::MULTIPLIER).wrapping_add(self.inc);
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        let rot = (old >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Uniform in `[0, 1)`
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 * (1.0 / (1u32 << 24) as f32)
    }

    /// Standard normal draw (Box-Muller)
    pub fn next_gaussian(&mut self) -> f32 {
        let u1 = loop {
            let x = self.next_f32();
            if x > 1e-7 {
                break x;
            }
        };
        let u2 = self.next_f32();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
    }

    pub fn gaussian_vec(&mut self, len: usize) -> Vec<f32> {
        (0..len).map(|_| self.next_gaussian()).collect()
    }
}
