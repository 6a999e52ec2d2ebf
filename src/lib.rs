//! Rust implementation of the Saturation in the Null Space (SNS) inverse
//! kinematics solvers for redundant serial manipulators, at the velocity
//! and position levels.
//!
//! This work builds upon the 2015 paper titled _Control of Redundant Robots
//! Under Hard Joint Constraints: Saturation in the Null Space_, authored by
//! Fabrizio Flacco, Alessandro De Luca and Oussama Khatib (IEEE Transactions
//! on Robotics, vol. 31, no. 3). It also draws inspiration from a similar
//! C++ project, [RethinkRobotics/sns_ik](https://github.com/RethinkRobotics/sns_ik),
//! which served as a reference for the solver interfaces.
//!
//! # Features
//!
//! - Velocity-level IK for a priority-ordered stack of Cartesian tasks,
//!   with joint position, velocity and acceleration limits enforced as hard
//!   bounds on every command.
//! - Five saturation strategies, from the classic iterative SNS to a
//!   bounded two-pass variant for tight control-cycle budgets.
//! - Lower-priority tasks run strictly in the null space of the tasks above
//!   them; saturated joints are folded into that null space too.
//! - When a task cannot be met exactly, the command degrades gracefully
//!   (scaled or clamped) instead of failing, and the result reports how
//!   much of each task was achieved.
//! - Position-level IK by closed-loop iteration over the velocity solver,
//!   with per-axis pose tolerances and an optional nullspace bias that
//!   pulls selected joints toward preferred positions.
//! - A serial-chain kinematics model (revolute and prismatic joints) with
//!   forward kinematics and the geometric Jacobian, or bring your own via
//!   the [`kinematic_traits::Kinematics`] trait.
//!
//! # Usage
//!
//! Build a [`chain::SerialChain`] and [`joint_limits::JointLimits`], wrap
//! them in an [`sns_ik::SNSIK`], then call `cart_to_jnt` for pose goals or
//! `cart_to_jnt_vel` inside a velocity control loop.

pub mod chain;
pub mod config_error;
pub mod joint_limits;
pub mod kinematic_traits;
pub mod math_utils;
pub mod position_ik;
pub mod sns_ik;
pub mod task;
pub mod utils;
pub mod velocity_ik;
