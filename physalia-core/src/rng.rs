//! Seedable pseudo-random number generation.
//!
//! A single xorshift64 generator backs every sampler in the workspace. There
//! is deliberately no ambient or process-global state: anything that samples
//! takes a `&mut Xorshift64`, so tests fix a seed and runs reproduce.

use std::f64::consts::PI;

/// Simple xorshift64 PRNG.
#[derive(Debug, Clone)]
pub struct Xorshift64 {
    state: u64,
    /// Spare deviate from the last Box-Muller pair.
    cached_normal: Option<f64>,
}

impl Xorshift64 {
    /// Seed the generator. A zero seed is remapped to 1 (xorshift has a
    /// fixed point at zero).
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
            cached_normal: None,
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform in `[lo, hi]`.
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    /// Standard normal deviate via Box-Muller.
    pub fn normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }
        // Avoid ln(0).
        let mut u1 = self.next_f64();
        while u1 == 0.0 {
            u1 = self.next_f64();
        }
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let (s, c) = (2.0 * PI * u2).sin_cos();
        self.cached_normal = Some(r * s);
        r * c
    }

    /// Exponential deviate with mean `mu`.
    pub fn exponential(&mut self, mu: f64) -> f64 {
        let mut u = self.next_f64();
        while u == 0.0 {
            u = self.next_f64();
        }
        -mu * u.ln()
    }

    /// Laplace (double exponential) deviate with location `mu` and scale `b`.
    pub fn laplace(&mut self, mu: f64, b: f64) -> f64 {
        let u = self.next_f64() - 0.5;
        mu - b * u.signum() * (1.0 - 2.0 * u.abs()).ln()
    }

    /// Cauchy deviate with location `l` and scale `s`.
    pub fn cauchy(&mut self, l: f64, s: f64) -> f64 {
        l + s * (PI * (self.next_f64() - 0.5)).tan()
    }

    /// Gamma deviate with shape `a` and scale `b` (Marsaglia-Tsang).
    pub fn gamma(&mut self, a: f64, b: f64) -> f64 {
        if a < 1.0 {
            // Boost to shape a+1 and correct with a power of a uniform.
            let mut u = self.next_f64();
            while u == 0.0 {
                u = self.next_f64();
            }
            return self.gamma(a + 1.0, b) * u.powf(1.0 / a);
        }

        let d = a - 1.0 / 3.0;
        let c = 1.0 / (9.0 * d).sqrt();
        loop {
            let x = self.normal();
            let v = 1.0 + c * x;
            if v <= 0.0 {
                continue;
            }
            let v = v * v * v;
            let mut u = self.next_f64();
            while u == 0.0 {
                u = self.next_f64();
            }
            if u.ln() < 0.5 * x * x + d - d * v + d * v.ln() {
                return d * v * b;
            }
        }
    }

    /// A point on the simplex drawn from a Dirichlet with the given
    /// concentration parameters.
    pub fn dirichlet(&mut self, alpha: &[f64]) -> Vec<f64> {
        let mut draws: Vec<f64> = alpha.iter().map(|&a| self.gamma(a, 1.0)).collect();
        let total: f64 = draws.iter().sum();
        if total > 0.0 {
            for d in &mut draws {
                *d /= total;
            }
        }
        draws
    }
}
