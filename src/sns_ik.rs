//! One-stop solver facade: a chain, its limits and both solver layers
//! behind a small API keyed by joint names.
//!
//! Most applications only need this type. Construct it once from a
//! [`SerialChain`] and [`JointLimits`], then call
//! [`cart_to_jnt`](SNSIK::cart_to_jnt) for pose goals or
//! [`cart_to_jnt_vel`](SNSIK::cart_to_jnt_vel) for Cartesian velocity
//! tracking inside a control loop.

extern crate nalgebra as na;

use crate::chain::SerialChain;
use crate::config_error::ConfigError;
use crate::joint_limits::JointLimits;
use crate::kinematic_traits::{Kinematics, Pose, Twist};
use crate::position_ik::{JointBias, PoseTolerance, PositionSolution, SNSPositionIK};
use crate::task::{StackOfTasks, Task};
use crate::velocity_ik::{SNSVelocityIK, VelocitySolution, VelocitySolveType};
use na::DVector;
use std::sync::Arc;

pub struct SNSIK {
    chain: Arc<SerialChain>,
    position_solver: SNSPositionIK,
}

impl SNSIK {
    /// Wires a chain and its capability limits into a ready-to-use solver
    /// pair running at `loop_period` seconds per control cycle.
    pub fn new(
        chain: SerialChain,
        limits: JointLimits,
        loop_period: f64,
        solve_type: VelocitySolveType,
    ) -> Result<Self, ConfigError> {
        let chain = Arc::new(chain);
        let mut velocity_solver = SNSVelocityIK::new(chain.joint_count(), loop_period)?;
        velocity_solver.set_joint_limits(limits)?;
        velocity_solver.set_solve_type(solve_type);
        let position_solver = SNSPositionIK::new(chain.clone(), velocity_solver)?;
        Ok(SNSIK {
            chain,
            position_solver,
        })
    }

    pub fn joint_count(&self) -> usize {
        self.chain.joint_count()
    }

    pub fn joint_names(&self) -> Vec<String> {
        self.chain.joint_names()
    }

    pub fn chain(&self) -> &SerialChain {
        &self.chain
    }

    pub fn set_solve_type(&mut self, solve_type: VelocitySolveType) {
        self.position_solver
            .velocity_solver_mut()
            .set_solve_type(solve_type);
    }

    pub fn position_solver(&self) -> &SNSPositionIK {
        &self.position_solver
    }

    pub fn position_solver_mut(&mut self) -> &mut SNSPositionIK {
        &mut self.position_solver
    }

    pub fn velocity_solver(&self) -> &SNSVelocityIK {
        self.position_solver.velocity_solver()
    }

    /// Joint positions reaching `goal` from `seed`, within the default
    /// pose tolerance.
    pub fn cart_to_jnt(
        &self,
        seed: &DVector<f64>,
        goal: &Pose,
    ) -> Result<PositionSolution, ConfigError> {
        self.position_solver
            .cart_to_jnt(seed, goal, None, &PoseTolerance::default())
    }

    /// As [`cart_to_jnt`](Self::cart_to_jnt), spending any redundancy on
    /// pulling the named joints toward the given positions. An unknown
    /// joint name is a configuration error.
    pub fn cart_to_jnt_with_bias(
        &self,
        seed: &DVector<f64>,
        goal: &Pose,
        bias: &[(&str, f64)],
        gain: f64,
    ) -> Result<PositionSolution, ConfigError> {
        let bias = self.bias_by_name(bias, gain)?;
        self.position_solver
            .cart_to_jnt(seed, goal, Some(&bias), &PoseTolerance::default())
    }

    /// One velocity-level solve: the joint velocity tracking `twist` at
    /// the configuration `q`, under all limits.
    pub fn cart_to_jnt_vel(
        &self,
        q: &DVector<f64>,
        twist: &Twist,
    ) -> Result<VelocitySolution, ConfigError> {
        self.check_joint_vector(q)?;
        let jacobian = self.chain.jacobian(q);
        let desired = DVector::from_iterator(6, twist.iter().copied());
        let mut stack = StackOfTasks::new();
        stack.push(Task::new(jacobian, desired)?);
        self.velocity_solver().solve(&stack, q)
    }

    /// As [`cart_to_jnt_vel`](Self::cart_to_jnt_vel), with a lower-priority
    /// task pulling the named joints toward the given positions inside the
    /// twist task's null space.
    pub fn cart_to_jnt_vel_with_bias(
        &self,
        q: &DVector<f64>,
        twist: &Twist,
        bias: &[(&str, f64)],
        gain: f64,
    ) -> Result<VelocitySolution, ConfigError> {
        self.check_joint_vector(q)?;
        let bias = self.bias_by_name(bias, gain)?;
        let jacobian = self.chain.jacobian(q);
        let desired = DVector::from_iterator(6, twist.iter().copied());
        let mut stack = StackOfTasks::new();
        stack.push(Task::new(jacobian, desired)?);
        stack.push(bias.as_task(q)?);
        self.velocity_solver().solve(&stack, q)
    }

    /// The chain indexes joint vectors without further checks, so the
    /// length must be validated before any kinematics call.
    fn check_joint_vector(&self, q: &DVector<f64>) -> Result<(), ConfigError> {
        if q.len() != self.chain.joint_count() {
            return Err(ConfigError::InvalidLength {
                expected: self.chain.joint_count(),
                found: q.len(),
            });
        }
        Ok(())
    }

    fn bias_by_name(&self, bias: &[(&str, f64)], gain: f64) -> Result<JointBias, ConfigError> {
        let names = self.chain.joint_names();
        let mut indices = Vec::with_capacity(bias.len());
        let mut positions = DVector::zeros(bias.len());
        for (row, (name, position)) in bias.iter().enumerate() {
            let index = names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| ConfigError::UnknownJoint(name.to_string()))?;
            indices.push(index);
            positions[row] = *position;
        }
        JointBias::new(indices, positions, gain)
    }
}
