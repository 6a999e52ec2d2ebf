//! A serial kinematic chain backing the [`Kinematics`] trait.
//!
//! The solvers only need forward kinematics and a geometric Jacobian; this
//! module provides both for an ordered list of revolute or prismatic
//! joints, each defined by a fixed origin transform and a motion axis,
//! with an optional fixed tip transform after the last joint.

extern crate nalgebra as na;

use crate::config_error::ConfigError;
use crate::kinematic_traits::{Kinematics, Pose};
use na::{DMatrix, DVector, Isometry3, Translation3, UnitQuaternion, UnitVector3, Vector3};

/// One actuated joint: the fixed transform from the previous joint frame,
/// the motion axis in the local frame, and the joint type.
#[derive(Clone, Debug)]
pub struct ChainJoint {
    pub name: String,
    /// Static transform from the parent joint frame to this joint frame.
    pub origin: Isometry3<f64>,
    /// Motion axis in this joint's local frame.
    pub axis: UnitVector3<f64>,
    /// Prismatic joints translate along the axis; revolute joints rotate
    /// about it.
    pub prismatic: bool,
}

impl ChainJoint {
    pub fn revolute(name: &str, origin: Isometry3<f64>, axis: Vector3<f64>) -> Self {
        ChainJoint {
            name: name.to_string(),
            origin,
            axis: UnitVector3::new_normalize(axis),
            prismatic: false,
        }
    }

    pub fn prismatic(name: &str, origin: Isometry3<f64>, axis: Vector3<f64>) -> Self {
        ChainJoint {
            name: name.to_string(),
            origin,
            axis: UnitVector3::new_normalize(axis),
            prismatic: true,
        }
    }
}

/// Ordered chain of actuated joints from the base to the tip.
#[derive(Clone, Debug)]
pub struct SerialChain {
    joints: Vec<ChainJoint>,
    /// Fixed transform from the last joint's frame to the tip frame.
    tip_offset: Isometry3<f64>,
}

impl SerialChain {
    /// Builds a chain, rejecting empty chains, duplicate joint names and
    /// non-finite transforms.
    pub fn new(joints: Vec<ChainJoint>, tip_offset: Isometry3<f64>) -> Result<Self, ConfigError> {
        if joints.is_empty() {
            return Err(ConfigError::MalformedChain("chain has no joints".to_string()));
        }
        for (i, joint) in joints.iter().enumerate() {
            if !is_finite_isometry(&joint.origin) || !joint.axis.iter().all(|x| x.is_finite()) {
                return Err(ConfigError::MalformedChain(format!(
                    "joint {} ({}) has a non-finite transform or axis",
                    i, joint.name
                )));
            }
            if joints[..i].iter().any(|other| other.name == joint.name) {
                return Err(ConfigError::MalformedChain(format!(
                    "duplicate joint name: {}",
                    joint.name
                )));
            }
        }
        if !is_finite_isometry(&tip_offset) {
            return Err(ConfigError::MalformedChain(
                "tip offset has a non-finite transform".to_string(),
            ));
        }
        Ok(SerialChain { joints, tip_offset })
    }

    pub fn joint_names(&self) -> Vec<String> {
        self.joints.iter().map(|j| j.name.clone()).collect()
    }

    pub fn joints(&self) -> &[ChainJoint] {
        &self.joints
    }

    /// Per-joint origins and axes expressed in the base frame, plus the tip
    /// position, at the given configuration. The raw material of the
    /// geometric Jacobian.
    fn joint_frames(&self, q: &DVector<f64>) -> (Vec<Vector3<f64>>, Vec<Vector3<f64>>, Vector3<f64>) {
        let mut transform = Isometry3::identity();
        let mut origins = Vec::with_capacity(self.joints.len());
        let mut axes = Vec::with_capacity(self.joints.len());

        for (joint, &value) in self.joints.iter().zip(q.iter()) {
            transform *= joint.origin;
            origins.push(transform.translation.vector);
            axes.push(transform.rotation * joint.axis.into_inner());
            transform *= joint_motion(joint, value);
        }
        let tip = (transform * self.tip_offset).translation.vector;
        (origins, axes, tip)
    }
}

fn is_finite_isometry(transform: &Isometry3<f64>) -> bool {
    transform.translation.vector.iter().all(|x| x.is_finite())
        && transform.rotation.coords.iter().all(|x| x.is_finite())
}

fn joint_motion(joint: &ChainJoint, value: f64) -> Isometry3<f64> {
    if joint.prismatic {
        Isometry3::from_parts(
            Translation3::from(joint.axis.into_inner() * value),
            UnitQuaternion::identity(),
        )
    } else {
        Isometry3::from_parts(
            Translation3::identity(),
            UnitQuaternion::from_axis_angle(&joint.axis, value),
        )
    }
}

impl Kinematics for SerialChain {
    fn joint_count(&self) -> usize {
        self.joints.len()
    }

    fn forward(&self, joints: &DVector<f64>) -> Pose {
        let mut transform = Isometry3::identity();
        for (joint, &value) in self.joints.iter().zip(joints.iter()) {
            transform *= joint.origin;
            transform *= joint_motion(joint, value);
        }
        transform * self.tip_offset
    }

    fn jacobian(&self, joints: &DVector<f64>) -> DMatrix<f64> {
        let n = self.joints.len();
        let (origins, axes, tip) = self.joint_frames(joints);
        let mut jacobian = DMatrix::zeros(6, n);

        for i in 0..n {
            if self.joints[i].prismatic {
                jacobian.fixed_view_mut::<3, 1>(0, i).copy_from(&axes[i]);
            } else {
                let linear = axes[i].cross(&(tip - origins[i]));
                jacobian.fixed_view_mut::<3, 1>(0, i).copy_from(&linear);
                jacobian.fixed_view_mut::<3, 1>(3, i).copy_from(&axes[i]);
            }
        }
        jacobian
    }
}
