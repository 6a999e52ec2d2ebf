//! Per-joint capability bounds and the per-cycle feasible velocity window.

extern crate nalgebra as na;

use crate::config_error::ConfigError;
use na::DVector;

/// Per-joint position range plus velocity and acceleration magnitudes.
/// Set once at configuration time and read on every solve; may be replaced
/// between solves but not concurrently with one.
#[derive(Clone, Debug)]
pub struct JointLimits {
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
    pub max_velocity: DVector<f64>,
    pub max_acceleration: DVector<f64>,
}

impl JointLimits {
    /// Creates validated limits: all four vectors must have the same
    /// nonzero length, lower bounds must not exceed upper bounds, and the
    /// velocity/acceleration magnitudes must be non-negative (infinity is
    /// allowed and means "unbounded").
    pub fn new(
        lower: DVector<f64>,
        upper: DVector<f64>,
        max_velocity: DVector<f64>,
        max_acceleration: DVector<f64>,
    ) -> Result<Self, ConfigError> {
        let n = lower.len();
        if n == 0 {
            return Err(ConfigError::InvalidJointCount(0));
        }
        for (name, v) in [
            ("upper", &upper),
            ("max_velocity", &max_velocity),
            ("max_acceleration", &max_acceleration),
        ] {
            if v.len() != n {
                return Err(ConfigError::InvalidLength {
                    expected: n,
                    found: v.len(),
                });
            }
            if v.iter().any(|x| x.is_nan()) {
                return Err(ConfigError::InvalidLimits(format!("{} contains NaN", name)));
            }
        }
        if lower.iter().any(|x| x.is_nan()) {
            return Err(ConfigError::InvalidLimits("lower contains NaN".to_string()));
        }
        for i in 0..n {
            if lower[i] > upper[i] {
                return Err(ConfigError::InvalidLimits(format!(
                    "joint {}: lower {} exceeds upper {}",
                    i, lower[i], upper[i]
                )));
            }
            if max_velocity[i] < 0.0 || max_acceleration[i] < 0.0 {
                return Err(ConfigError::InvalidLimits(format!(
                    "joint {}: negative velocity or acceleration magnitude",
                    i
                )));
            }
        }
        Ok(JointLimits {
            lower,
            upper,
            max_velocity,
            max_acceleration,
        })
    }

    /// Limits that never constrain anything; the starting configuration of
    /// a freshly constructed velocity solver.
    pub fn unbounded(joint_count: usize) -> Self {
        JointLimits {
            lower: DVector::from_element(joint_count, f64::NEG_INFINITY),
            upper: DVector::from_element(joint_count, f64::INFINITY),
            max_velocity: DVector::from_element(joint_count, f64::INFINITY),
            max_acceleration: DVector::from_element(joint_count, f64::INFINITY),
        }
    }

    pub fn joint_count(&self) -> usize {
        self.lower.len()
    }

    /// Clips a joint position vector into the position range.
    pub(crate) fn clamp_positions(&self, q: &mut DVector<f64>) {
        for i in 0..q.len() {
            q[i] = q[i].clamp(self.lower[i], self.upper[i]);
        }
    }

    /// The feasible joint-velocity window for one control cycle of length
    /// `period`, starting from position `q`. Per joint and per direction
    /// the tightest of these bounds wins:
    ///
    /// - the configured velocity magnitude,
    /// - the velocity that reaches the position limit in exactly one cycle,
    /// - the braking bound `sqrt(2 * a_max * room)`, the largest speed from
    ///   which the joint can still stop before the position limit,
    /// - with a known current velocity `v`, the velocities reachable within
    ///   one cycle under the acceleration limit, `[v - a*period, v + a*period]`.
    ///
    /// The window is never empty: if the position is already outside its
    /// range, only motion back toward the range remains allowed.
    pub(crate) fn velocity_window(
        &self,
        q: &DVector<f64>,
        current_velocity: Option<&DVector<f64>>,
        period: f64,
    ) -> (DVector<f64>, DVector<f64>) {
        let n = self.joint_count();
        let mut low = DVector::zeros(n);
        let mut high = DVector::zeros(n);
        for i in 0..n {
            let room_down = (q[i] - self.lower[i]).max(0.0);
            let room_up = (self.upper[i] - q[i]).max(0.0);
            // Zero room with infinite acceleration would make 2*a*room a NaN.
            let brake = |room: f64| {
                if room > 0.0 {
                    (2.0 * self.max_acceleration[i] * room).sqrt()
                } else {
                    0.0
                }
            };
            let brake_down = brake(room_down);
            let brake_up = brake(room_up);

            let mut lo = (-self.max_velocity[i])
                .max((self.lower[i] - q[i]) / period)
                .max(-brake_down);
            let mut hi = self.max_velocity[i]
                .min((self.upper[i] - q[i]) / period)
                .min(brake_up);

            if let Some(v) = current_velocity {
                // Infinite acceleration times a zero period stays infinite,
                // so the product is always well defined here.
                let reach = self.max_acceleration[i] * period;
                if reach.is_finite() {
                    lo = lo.max(v[i] - reach);
                    hi = hi.min(v[i] + reach);
                }
            }

            // A joint outside its position range (or carried past the
            // window by momentum) only gets motion back toward it.
            if lo > hi {
                if hi < 0.0 {
                    lo = hi;
                } else {
                    hi = lo;
                }
            }
            low[i] = lo;
            high[i] = hi;
        }
        (low, high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(n: usize) -> JointLimits {
        JointLimits::new(
            DVector::from_element(n, -3.0),
            DVector::from_element(n, 3.0),
            DVector::from_element(n, 1.0),
            DVector::from_element(n, 0.5),
        )
        .unwrap()
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let result = JointLimits::new(
            DVector::zeros(3),
            DVector::zeros(3),
            DVector::zeros(2),
            DVector::zeros(3),
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidLength { expected: 3, found: 2 })
        ));
    }

    #[test]
    fn rejects_inverted_position_range() {
        let result = JointLimits::new(
            DVector::from_element(1, 1.0),
            DVector::from_element(1, -1.0),
            DVector::from_element(1, 1.0),
            DVector::from_element(1, 1.0),
        );
        assert!(result.is_err());
    }

    #[test]
    fn velocity_limit_binds_far_from_position_limits() {
        let lim = limits(2);
        let q = DVector::zeros(2);
        let (lo, hi) = lim.velocity_window(&q, None, 0.01);
        // Room to either position limit is 3.0; braking bound is
        // sqrt(2*0.5*3) ~ 1.73, position window 300, so vmax = 1 wins.
        for i in 0..2 {
            assert!((lo[i] + 1.0).abs() < 1e-12);
            assert!((hi[i] - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn position_window_binds_near_limit() {
        let lim = limits(1);
        let q = DVector::from_element(1, 2.999);
        let (lo, hi) = lim.velocity_window(&q, None, 0.01);
        // Only 0.001 of room: (3.0 - 2.999)/0.01 = 0.1 caps the upside.
        assert!((hi[0] - 0.1).abs() < 1e-9);
        assert!((lo[0] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn braking_bound_binds_between() {
        let lim = limits(1);
        let q = DVector::from_element(1, 2.5);
        let (_, hi) = lim.velocity_window(&q, None, 1.0);
        // Position window (3.0-2.5)/1.0 = 0.5; braking sqrt(2*0.5*0.5) ~ 0.707;
        // vmax 1.0. The position window wins here.
        assert!((hi[0] - 0.5).abs() < 1e-12);

        let (_, hi) = lim.velocity_window(&q, None, 0.1);
        // Now the position window is 5.0 and braking 0.707 wins.
        assert!((hi[0] - (0.5f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn acceleration_window_binds_around_current_velocity() {
        let lim = limits(1);
        let q = DVector::zeros(1);
        let v = DVector::from_element(1, 0.5);
        // Reachable change in one 0.1 s cycle: 0.5 * 0.1 = 0.05.
        let (lo, hi) = lim.velocity_window(&q, Some(&v), 0.1);
        assert!((lo[0] - 0.45).abs() < 1e-12);
        assert!((hi[0] - 0.55).abs() < 1e-12);
    }

    #[test]
    fn momentum_past_the_velocity_limit_collapses_to_hardest_braking() {
        let lim = limits(1);
        let q = DVector::zeros(1);
        // Moving at 2.0 with vmax 1.0: the best the joint can do this
        // cycle is brake as hard as allowed.
        let v = DVector::from_element(1, 2.0);
        let (lo, hi) = lim.velocity_window(&q, Some(&v), 0.1);
        assert!((lo[0] - 1.95).abs() < 1e-12);
        assert_eq!(lo[0], hi[0]);
    }

    #[test]
    fn window_never_empty_outside_position_range() {
        let lim = limits(1);
        let q = DVector::from_element(1, 3.5);
        let (lo, hi) = lim.velocity_window(&q, None, 0.01);
        assert!(lo <= hi);
        // Everything allowed must move the joint back down.
        assert!(hi[0] <= 0.0);
    }

    #[test]
    fn unbounded_limits_do_not_constrain() {
        let lim = JointLimits::unbounded(3);
        let q = DVector::from_element(3, 100.0);
        let (lo, hi) = lim.velocity_window(&q, None, 0.001);
        for i in 0..3 {
            assert_eq!(lo[i], f64::NEG_INFINITY);
            assert_eq!(hi[i], f64::INFINITY);
        }
    }
}
