use rand::{Rng, rng};

use crate::dao::models::{MAX_NUMBER, MIN_NUMBER};

/// Source of the winning number drawn when a session closes.
pub trait NumberDraw: Send + Sync {
    /// Return a number in `[MIN_NUMBER, MAX_NUMBER]`.
    fn draw(&self) -> u8;
}

/// Uniform draw using the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomDraw;

impl NumberDraw for RandomDraw {
    fn draw(&self) -> u8 {
        rng().random_range(MIN_NUMBER..=MAX_NUMBER)
    }
}

/// Always draws the same number.
#[derive(Debug, Clone, Copy)]
pub struct FixedDraw(pub u8);

impl NumberDraw for FixedDraw {
    fn draw(&self) -> u8 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_draw_stays_in_range() {
        let draw = RandomDraw;
        for _ in 0..1_000 {
            let number = draw.draw();
            assert!((MIN_NUMBER..=MAX_NUMBER).contains(&number));
        }
    }
}
