// src/motion/kinematics.rs
/// Dual-belt (CoreXY) drive with a skew-corrected gantry.
///
/// Actuator A follows `x + y` and actuator B follows `x - y`, both in steps.
/// Skew shears x by `y * tan(skew)` before the belt transform so that a
/// gantry that is not quite square still draws true Cartesian geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoreXYKinematics {
    step_cal: f64,
    shear: f64,
}

impl CoreXYKinematics {
    /// `step_cal` in steps/mm, `skew` in degrees.
    pub fn new(step_cal: f64, skew: f64) -> Self {
        Self {
            step_cal,
            shear: skew.to_radians().tan(),
        }
    }

    /// Skew-corrected Cartesian delta.
    pub fn apply_skew(&self, dx: f64, dy: f64) -> (f64, f64) {
        (dx + dy * self.shear, dy)
    }

    /// Cartesian delta (mm) to fractional actuator steps.
    pub fn cartesian_to_motors(&self, dx: f64, dy: f64) -> (f64, f64) {
        let (sx, sy) = self.apply_skew(dx, dy);
        ((sx + sy) * self.step_cal, (sx - sy) * self.step_cal)
    }

    /// Actuator steps back to the Cartesian displacement they produce.
    pub fn motors_to_cartesian(&self, a: f64, b: f64) -> (f64, f64) {
        if self.step_cal == 0.0 {
            return (0.0, 0.0);
        }
        let sx = (a + b) / (2.0 * self.step_cal);
        let y = (a - b) / (2.0 * self.step_cal);
        (sx - y * self.shear, y)
    }

    pub fn step_cal(&self) -> f64 {
        self.step_cal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f64, f64), b: (f64, f64)) -> bool {
        (a.0 - b.0).abs() < 1e-9 && (a.1 - b.1).abs() < 1e-9
    }

    #[test]
    fn test_belt_transform() {
        let kin = CoreXYKinematics::new(10.0, 0.0);
        assert!(close(kin.cartesian_to_motors(10.0, 0.0), (100.0, 100.0)));
        assert!(close(kin.cartesian_to_motors(0.0, 10.0), (100.0, -100.0)));
        assert!(close(kin.cartesian_to_motors(3.0, 1.0), (40.0, 20.0)));
    }

    #[test]
    fn test_inverse_round_trips() {
        let kin = CoreXYKinematics::new(80.0, 1.5);
        let (a, b) = kin.cartesian_to_motors(12.5, -7.25);
        assert!(close(kin.motors_to_cartesian(a, b), (12.5, -7.25)));
    }

    #[test]
    fn test_skew_shears_x_by_y() {
        let kin = CoreXYKinematics::new(1.0, 45.0);
        assert!(close(kin.apply_skew(0.0, 2.0), (2.0, 2.0)));
        assert!(close(kin.apply_skew(3.0, 0.0), (3.0, 0.0)));
    }
}
