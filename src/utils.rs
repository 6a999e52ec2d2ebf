//! Helper functions

extern crate nalgebra as na;

use na::DVector;

/// Print joint values, converting radians to degrees.
#[allow(dead_code)]
pub fn dump_joints(joints: &DVector<f64>) {
    let mut row_str = String::new();
    for &joint in joints.iter() {
        row_str.push_str(&format!("{:5.2} ", joint.to_degrees()));
    }
    println!("[{}]", row_str.trim_end());
}

/// Allows to specify joint values in degrees (converts to radians)
#[allow(dead_code)]
pub fn as_radians<const N: usize>(degrees: [i32; N]) -> DVector<f64> {
    DVector::from_iterator(N, degrees.iter().map(|&d| (d as f64).to_radians()))
}
