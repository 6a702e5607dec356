//! Damped spring used to smooth the drawn pointer
//!
//! F = -k * x - c * v, integrated with semi-implicit Euler.

use crate::processing::theme::SpringConfig;

/// Position and velocity of a 2D spring
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spring2D {
    position: [f64; 2],
    velocity: [f64; 2],
}

impl Spring2D {
    /// At rest at `(x, y)`
    pub fn at_rest(x: f64, y: f64) -> Self {
        Self {
            position: [x, y],
            velocity: [0.0; 2],
        }
    }

    /// Advance `dt` seconds toward `target`
    pub fn step(&mut self, target: (f64, f64), config: &SpringConfig, dt: f64) {
        let target = [target.0, target.1];
        for axis in 0..2 {
            let displacement = self.position[axis] - target[axis];
            let force = -config.stiffness * displacement - config.damping * self.velocity[axis];
            self.velocity[axis] += force / config.mass * dt;
            self.position[axis] += self.velocity[axis] * dt;
        }
    }

    pub fn position(&self) -> (f64, f64) {
        (self.position[0], self.position[1])
    }

    pub fn speed(&self) -> f64 {
        self.velocity[0].hypot(self.velocity[1])
    }

    /// Jump to `(x, y)` and drop all momentum
    pub fn reset(&mut self, x: f64, y: f64) {
        *self = Self::at_rest(x, y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(spring: &mut Spring2D, target: (f64, f64), config: &SpringConfig, seconds: f64) -> f64 {
        let dt = 1.0 / 120.0;
        let mut max_x = f64::MIN;
        for _ in 0..(seconds / dt) as usize {
            spring.step(target, config, dt);
            max_x = max_x.max(spring.position().0);
        }
        max_x
    }

    #[test]
    fn test_spring_converges() {
        let config = SpringConfig::default();
        let mut spring = Spring2D::at_rest(0.0, 0.0);
        run(&mut spring, (100.0, -50.0), &config, 1.0);

        let (x, y) = spring.position();
        assert!((x - 100.0).abs() < 1.0, "x = {}", x);
        assert!((y + 50.0).abs() < 1.0, "y = {}", y);
        assert!(spring.speed() < 5.0);
    }

    #[test]
    fn test_heavy_damping_does_not_overshoot() {
        let config = SpringConfig {
            damping: 150.0,
            ..SpringConfig::default()
        };
        let mut spring = Spring2D::at_rest(0.0, 0.0);
        let max_x = run(&mut spring, (100.0, 0.0), &config, 2.0);
        assert!(max_x <= 100.5, "overshot to {}", max_x);
    }

    #[test]
    fn test_reset_drops_momentum() {
        let config = SpringConfig::default();
        let mut spring = Spring2D::at_rest(0.0, 0.0);
        run(&mut spring, (300.0, 300.0), &config, 0.1);
        assert!(spring.speed() > 0.0);

        spring.reset(10.0, 20.0);
        assert_eq!(spring, Spring2D::at_rest(10.0, 20.0));
    }
}
