//! Position-level IK: closed-loop iteration on top of the velocity solver.
//!
//! Each iteration evaluates forward kinematics, converts the remaining
//! Cartesian error into a desired twist, resolves it through
//! [`SNSVelocityIK`](crate::velocity_ik::SNSVelocityIK) and integrates the
//! resulting joint velocity. Joint limits are honored on every step, so
//! the returned configuration is always feasible even when the goal is
//! not reached.

extern crate nalgebra as na;

use crate::config_error::ConfigError;
use crate::kinematic_traits::{Kinematics, Pose};
use crate::task::{StackOfTasks, Task};
use crate::velocity_ik::{SNSVelocityIK, VelocityStatus};
use na::{DMatrix, DVector, Vector3};
use std::sync::Arc;

/// Per-axis convergence tolerances for the Cartesian error, linear in
/// meters and angular in radians (rotation-vector components).
#[derive(Clone, Debug)]
pub struct PoseTolerance {
    pub linear: Vector3<f64>,
    pub angular: Vector3<f64>,
}

impl PoseTolerance {
    pub fn uniform(linear: f64, angular: f64) -> Self {
        PoseTolerance {
            linear: Vector3::from_element(linear),
            angular: Vector3::from_element(angular),
        }
    }
}

impl Default for PoseTolerance {
    fn default() -> Self {
        PoseTolerance::uniform(1e-4, 1e-3)
    }
}

/// Auxiliary objective resolved strictly in the null space of the pose
/// task: drives the listed joints toward the given positions with a
/// proportional gain. It can never perturb the pose tracking, only spend
/// redundancy.
#[derive(Clone, Debug)]
pub struct JointBias {
    joints: Vec<usize>,
    positions: DVector<f64>,
    gain: f64,
}

impl JointBias {
    pub fn new(joints: Vec<usize>, positions: DVector<f64>, gain: f64) -> Result<Self, ConfigError> {
        if joints.len() != positions.len() {
            return Err(ConfigError::InvalidLength {
                expected: joints.len(),
                found: positions.len(),
            });
        }
        if joints.is_empty() {
            return Err(ConfigError::InvalidParameter(
                "bias task names no joints".to_string(),
            ));
        }
        for (i, joint) in joints.iter().enumerate() {
            if joints[..i].contains(joint) {
                return Err(ConfigError::InvalidParameter(format!(
                    "bias task lists joint {} twice",
                    joint
                )));
            }
        }
        if !(gain.is_finite() && gain > 0.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "bias gain must be positive, got {}",
                gain
            )));
        }
        Ok(JointBias {
            joints,
            positions,
            gain,
        })
    }

    pub fn joints(&self) -> &[usize] {
        &self.joints
    }

    /// The bias expressed as a velocity task at the current configuration.
    pub(crate) fn as_task(&self, q: &DVector<f64>) -> Result<Task, ConfigError> {
        let rows = self.joints.len();
        let mut jacobian = DMatrix::zeros(rows, q.len());
        let mut desired = DVector::zeros(rows);
        for (row, &joint) in self.joints.iter().enumerate() {
            jacobian[(row, joint)] = 1.0;
            desired[row] = self.gain * (self.positions[row] - q[joint]);
        }
        Task::new(jacobian, desired)
    }
}

/// Terminal state of one `cart_to_jnt` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PositionStatus {
    /// Cartesian error within tolerance on every axis.
    Converged,
    /// Still progressing when the iteration budget ran out.
    MaxIterationsExceeded,
    /// No progress over the stall window: the goal is unreachable or the
    /// chain is pinned by its limits.
    Infeasible,
}

/// Result of a position solve. The joint vector is the best configuration
/// seen, whatever the status.
#[derive(Clone, Debug)]
pub struct PositionSolution {
    pub joints: DVector<f64>,
    pub status: PositionStatus,
    /// Integration steps taken; 0 when the seed already meets the goal.
    pub iterations: usize,
    /// Norm of the remaining translation error, meters.
    pub position_error: f64,
    /// Norm of the remaining rotation-vector error, radians.
    pub orientation_error: f64,
}

/// Position-level SNS solver. Stateless across calls except for
/// configuration; one instance serves any number of `cart_to_jnt` calls.
pub struct SNSPositionIK {
    kinematics: Arc<dyn Kinematics>,
    velocity_solver: SNSVelocityIK,
    max_iterations: usize,
    /// Integration timestep, seconds.
    dt: f64,
    /// Per-iteration cap on the commanded translation error, meters.
    linear_max_step: f64,
    /// Per-iteration cap on the commanded rotation error, radians.
    angular_max_step: f64,
    /// Iterations without error improvement before giving up as infeasible.
    stall_window: usize,
}

impl SNSPositionIK {
    /// Pairs a kinematics provider with a configured velocity solver. The
    /// two must agree on the joint count.
    pub fn new(
        kinematics: Arc<dyn Kinematics>,
        velocity_solver: SNSVelocityIK,
    ) -> Result<Self, ConfigError> {
        if kinematics.joint_count() != velocity_solver.joint_count() {
            return Err(ConfigError::InvalidLength {
                expected: kinematics.joint_count(),
                found: velocity_solver.joint_count(),
            });
        }
        let dt = velocity_solver.loop_period();
        Ok(SNSPositionIK {
            kinematics,
            velocity_solver,
            max_iterations: 300,
            dt,
            linear_max_step: 0.05,
            angular_max_step: 0.1,
            stall_window: 20,
        })
    }

    pub fn velocity_solver(&self) -> &SNSVelocityIK {
        &self.velocity_solver
    }

    pub fn velocity_solver_mut(&mut self) -> &mut SNSVelocityIK {
        &mut self.velocity_solver
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) -> Result<(), ConfigError> {
        if max_iterations == 0 {
            return Err(ConfigError::InvalidParameter(
                "max iterations must be positive".to_string(),
            ));
        }
        self.max_iterations = max_iterations;
        Ok(())
    }

    pub fn set_integration_step(&mut self, dt: f64) -> Result<(), ConfigError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "integration step must be positive, got {}",
                dt
            )));
        }
        self.dt = dt;
        Ok(())
    }

    /// Iterations without error improvement before the goal is declared
    /// infeasible.
    pub fn set_stall_window(&mut self, window: usize) -> Result<(), ConfigError> {
        if window == 0 {
            return Err(ConfigError::InvalidParameter(
                "stall window must be positive".to_string(),
            ));
        }
        self.stall_window = window;
        Ok(())
    }

    pub fn set_step_limits(&mut self, linear: f64, angular: f64) -> Result<(), ConfigError> {
        if !(linear > 0.0 && angular > 0.0) {
            return Err(ConfigError::InvalidParameter(
                "step limits must be positive".to_string(),
            ));
        }
        self.linear_max_step = linear;
        self.angular_max_step = angular;
        Ok(())
    }

    /// Iterates from `seed` toward `goal`, optionally spending redundancy
    /// on `bias`, until every error axis is inside `tolerance` or the
    /// budget runs out. Never fails for solvable-or-not goals; `Err` is
    /// reserved for dimension mistakes.
    pub fn cart_to_jnt(
        &self,
        seed: &DVector<f64>,
        goal: &Pose,
        bias: Option<&JointBias>,
        tolerance: &PoseTolerance,
    ) -> Result<PositionSolution, ConfigError> {
        let n = self.velocity_solver.joint_count();
        if seed.len() != n {
            return Err(ConfigError::InvalidLength {
                expected: n,
                found: seed.len(),
            });
        }
        if let Some(bias) = bias {
            if let Some(&joint) = bias.joints().iter().find(|&&joint| joint >= n) {
                return Err(ConfigError::InvalidParameter(format!(
                    "bias joint index {} out of range for {} joints",
                    joint, n
                )));
            }
        }
        if tolerance.linear.iter().chain(tolerance.angular.iter()).any(|t| !(*t > 0.0)) {
            return Err(ConfigError::InvalidParameter(
                "tolerances must be positive on every axis".to_string(),
            ));
        }

        let limits = self.velocity_solver.limits().clone();
        let mut q = seed.clone();
        limits.clamp_positions(&mut q);

        let mut best_q = q.clone();
        let mut best_error = f64::INFINITY;
        let mut best_errors = (f64::INFINITY, f64::INFINITY);
        let mut stall = 0usize;

        for iteration in 0..=self.max_iterations {
            let pose = self.kinematics.forward(&q);
            let error_linear = goal.translation.vector - pose.translation.vector;
            let error_angular = (goal.rotation * pose.rotation.inverse()).scaled_axis();

            let converged = (0..3).all(|i| {
                error_linear[i].abs() <= tolerance.linear[i]
                    && error_angular[i].abs() <= tolerance.angular[i]
            });
            if converged {
                return Ok(PositionSolution {
                    joints: q,
                    status: PositionStatus::Converged,
                    iterations: iteration,
                    position_error: error_linear.norm(),
                    orientation_error: error_angular.norm(),
                });
            }

            let error_norm = (error_linear.norm_squared() + error_angular.norm_squared()).sqrt();
            let progressed = error_norm < best_error - 1e-10;
            if progressed {
                best_error = error_norm;
                best_errors = (error_linear.norm(), error_angular.norm());
                best_q = q.clone();
                stall = 0;
            } else {
                stall += 1;
                if stall >= self.stall_window {
                    return Ok(PositionSolution {
                        joints: best_q,
                        status: PositionStatus::Infeasible,
                        iterations: iteration,
                        position_error: best_errors.0,
                        orientation_error: best_errors.1,
                    });
                }
            }

            if iteration == self.max_iterations {
                break;
            }

            // Proportional control law with a bounded per-iteration step.
            let linear_scale = step_scale(error_linear.norm(), self.linear_max_step);
            let angular_scale = step_scale(error_angular.norm(), self.angular_max_step);
            let desired = DVector::from_fn(6, |i, _| {
                if i < 3 {
                    error_linear[i] * linear_scale / self.dt
                } else {
                    error_angular[i - 3] * angular_scale / self.dt
                }
            });

            let mut stack = StackOfTasks::new();
            stack.push(Task::new(self.kinematics.jacobian(&q), desired)?);
            if let Some(bias) = bias {
                stack.push(bias.as_task(&q)?);
            }

            let solution = self.velocity_solver.solve(&stack, &q)?;
            if solution.status == VelocityStatus::Infeasible && progressed {
                // An infeasible cycle is a stall event even when the error
                // still improved; at most one event per iteration.
                stall += 1;
            }
            q += solution.velocity * self.dt;
            limits.clamp_positions(&mut q);
        }

        Ok(PositionSolution {
            joints: best_q,
            status: PositionStatus::MaxIterationsExceeded,
            iterations: self.max_iterations,
            position_error: best_errors.0,
            orientation_error: best_errors.1,
        })
    }
}

fn step_scale(magnitude: f64, cap: f64) -> f64 {
    if magnitude > cap {
        cap / magnitude
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainJoint, SerialChain};
    use crate::joint_limits::JointLimits;
    use na::{Isometry3, Vector3};
    use std::f64::consts::PI;

    fn offset_z(z: f64) -> Isometry3<f64> {
        Isometry3::translation(0.0, 0.0, z)
    }

    /// Planar arm in the XZ plane: revolute Y joints separated by links
    /// along Z.
    fn planar_chain(links: &[f64]) -> Arc<SerialChain> {
        let mut joints = Vec::new();
        let mut origin = Isometry3::identity();
        for (i, &length) in links.iter().enumerate() {
            joints.push(ChainJoint::revolute(&format!("j{}", i), origin, Vector3::y()));
            origin = offset_z(length);
        }
        Arc::new(SerialChain::new(joints, origin).unwrap())
    }

    fn wide_limits(n: usize) -> JointLimits {
        JointLimits::new(
            DVector::from_element(n, -PI),
            DVector::from_element(n, PI),
            DVector::from_element(n, 10.0),
            DVector::from_element(n, 1e6),
        )
        .unwrap()
    }

    fn position_solver(chain: Arc<SerialChain>) -> SNSPositionIK {
        let n = chain.joint_count();
        let mut velocity = SNSVelocityIK::new(n, 0.01).unwrap();
        velocity.set_joint_limits(wide_limits(n)).unwrap();
        SNSPositionIK::new(chain, velocity).unwrap()
    }

    #[test]
    fn joint_count_mismatch_is_a_configuration_error() {
        let chain = planar_chain(&[1.0, 1.0]);
        let velocity = SNSVelocityIK::new(3, 0.01).unwrap();
        assert!(SNSPositionIK::new(chain, velocity).is_err());
    }

    #[test]
    fn seed_at_goal_converges_without_moving() {
        let chain = planar_chain(&[1.0, 1.0]);
        let seed = DVector::from_vec(vec![0.3, -0.7]);
        let goal = chain.forward(&seed);
        let solver = position_solver(chain);

        let solution = solver
            .cart_to_jnt(&seed, &goal, None, &PoseTolerance::default())
            .unwrap();
        assert_eq!(solution.status, PositionStatus::Converged);
        assert_eq!(solution.iterations, 0);
        assert!((solution.joints - seed).norm() == 0.0);
    }

    #[test]
    fn round_trip_reaches_a_forward_kinematics_pose() {
        let chain = planar_chain(&[1.0, 1.0, 0.5]);
        let q_goal = DVector::from_vec(vec![0.4, -0.6, 0.3]);
        let goal = chain.forward(&q_goal);
        let seed = DVector::from_vec(vec![0.1, -0.2, 0.1]);
        let solver = position_solver(chain.clone());

        let tolerance = PoseTolerance::default();
        let solution = solver.cart_to_jnt(&seed, &goal, None, &tolerance).unwrap();
        assert_eq!(
            solution.status,
            PositionStatus::Converged,
            "error {} / {} after {} iterations",
            solution.position_error,
            solution.orientation_error,
            solution.iterations
        );

        // The achieved pose matches; the joints need not (redundancy).
        let reached = chain.forward(&solution.joints);
        assert!((reached.translation.vector - goal.translation.vector).norm() < 1e-3);
        assert!(reached.rotation.angle_to(&goal.rotation) < 1e-2);
    }

    #[test]
    fn solution_respects_position_limits() {
        let chain = planar_chain(&[1.0, 1.0, 0.5]);
        let n = chain.joint_count();
        let limits = JointLimits::new(
            DVector::from_element(n, -1.0),
            DVector::from_element(n, 1.0),
            DVector::from_element(n, 10.0),
            DVector::from_element(n, 1e6),
        )
        .unwrap();
        let mut velocity = SNSVelocityIK::new(n, 0.01).unwrap();
        velocity.set_joint_limits(limits).unwrap();
        let solver = SNSPositionIK::new(chain.clone(), velocity).unwrap();

        let q_goal = DVector::from_vec(vec![0.8, -0.9, 0.5]);
        let goal = chain.forward(&q_goal);
        let solution = solver
            .cart_to_jnt(&DVector::zeros(n), &goal, None, &PoseTolerance::default())
            .unwrap();
        for i in 0..n {
            assert!(solution.joints[i].abs() <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn bias_task_spends_redundancy_without_disturbing_the_pose() {
        let chain = planar_chain(&[0.5, 0.5, 0.5, 0.5]);
        let q_goal = DVector::from_vec(vec![0.3, -0.5, 0.4, -0.2]);
        let goal = chain.forward(&q_goal);
        let seed = DVector::from_vec(vec![0.1, -0.1, 0.1, -0.1]);
        let solver = position_solver(chain.clone());
        let tolerance = PoseTolerance::default();

        let plain = solver.cart_to_jnt(&seed, &goal, None, &tolerance).unwrap();
        assert_eq!(plain.status, PositionStatus::Converged);

        let bias = JointBias::new(vec![0], DVector::from_element(1, 0.6), 1.0).unwrap();
        let biased = solver
            .cart_to_jnt(&seed, &goal, Some(&bias), &tolerance)
            .unwrap();
        assert_eq!(biased.status, PositionStatus::Converged);

        // Both achieve the pose; the bias picked a different configuration
        // out of the one-dimensional redundancy.
        let reached = chain.forward(&biased.joints);
        assert!((reached.translation.vector - goal.translation.vector).norm() < 1e-3);
        assert!((&biased.joints - &plain.joints).norm() > 1e-6);
    }

    #[test]
    fn persistent_infeasibility_stalls_once_per_iteration() {
        // A prismatic X joint cannot produce the demanded Y motion, so
        // every velocity solve is infeasible and the error never moves.
        let chain = Arc::new(
            SerialChain::new(
                vec![ChainJoint::prismatic(
                    "slide",
                    Isometry3::identity(),
                    Vector3::x(),
                )],
                Isometry3::identity(),
            )
            .unwrap(),
        );
        let mut velocity = SNSVelocityIK::new(1, 0.01).unwrap();
        velocity.set_joint_limits(wide_limits(1)).unwrap();
        let mut solver = SNSPositionIK::new(chain, velocity).unwrap();
        solver.set_stall_window(10).unwrap();

        let goal = Isometry3::translation(0.0, 0.5, 0.0);
        let solution = solver
            .cart_to_jnt(&DVector::zeros(1), &goal, None, &PoseTolerance::default())
            .unwrap();
        assert_eq!(solution.status, PositionStatus::Infeasible);
        // Iteration 0 improves on the initial infinite error and records
        // its infeasible solve; each later iteration adds exactly one
        // stall event, so the window of 10 runs out at iteration 9.
        assert_eq!(solution.iterations, 9);

        assert!(solver.set_stall_window(0).is_err());
    }

    #[test]
    fn unreachable_goal_never_reports_convergence() {
        let chain = planar_chain(&[1.0, 1.0]);
        let mut solver = position_solver(chain);
        solver.set_max_iterations(100).unwrap();

        let goal = Isometry3::translation(5.0, 0.0, 0.0);
        let solution = solver
            .cart_to_jnt(&DVector::zeros(2), &goal, None, &PoseTolerance::default())
            .unwrap();
        assert_ne!(solution.status, PositionStatus::Converged);
        assert!(solution.position_error > 1.0);
    }

    #[test]
    fn bias_validation() {
        assert!(JointBias::new(vec![], DVector::zeros(0), 1.0).is_err());
        assert!(JointBias::new(vec![0, 0], DVector::zeros(2), 1.0).is_err());
        assert!(JointBias::new(vec![0], DVector::zeros(2), 1.0).is_err());
        assert!(JointBias::new(vec![0], DVector::zeros(1), 0.0).is_err());

        // Out-of-range index is caught at solve time.
        let chain = planar_chain(&[1.0, 1.0]);
        let goal = chain.forward(&DVector::zeros(2));
        let solver = position_solver(chain);
        let bias = JointBias::new(vec![5], DVector::zeros(1), 1.0).unwrap();
        assert!(solver
            .cart_to_jnt(&DVector::zeros(2), &goal, Some(&bias), &PoseTolerance::default())
            .is_err());
    }
}
