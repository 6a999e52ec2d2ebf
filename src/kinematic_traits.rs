//! The query interface between the solvers and the kinematics provider.

extern crate nalgebra as na;

use na::{DMatrix, DVector, Isometry3, Vector6};

/// Pose of the robot tip: Cartesian position plus rotation quaternion.
pub type Pose = Isometry3<f64>;

/// Cartesian velocity, linear (x, y, z) stacked over angular (x, y, z).
pub type Twist = Vector6<f64>;

/// Forward kinematics and Jacobian provider for a fixed kinematic chain.
///
/// Implementations are pure queries: calling them never mutates the chain,
/// so a single instance can back any number of solves. A malformed chain
/// must be rejected when the implementation is constructed; these methods
/// are infallible for any joint vector of the right length.
pub trait Kinematics {
    /// Number of actuated joints `n`. Every joint vector passed to the
    /// other methods must have exactly this length.
    fn joint_count(&self) -> usize;

    /// Pose of the tip for the given joint positions.
    fn forward(&self, joints: &DVector<f64>) -> Pose;

    /// The 6 x n geometric Jacobian at the given joint positions, mapping
    /// joint velocities to the tip twist (linear rows first).
    fn jacobian(&self, joints: &DVector<f64>) -> DMatrix<f64>;
}
