//! Cartesian task model: one prioritized objective and the ordered stack.

extern crate nalgebra as na;

use crate::config_error::ConfigError;
use crate::math_utils::{is_finite_matrix, is_finite_vector};
use na::{DMatrix, DVector};

/// One Cartesian objective: a linear map from joint velocities to task
/// velocities (the Jacobian) plus the desired task velocity. The task
/// dimension is the Jacobian row count (at most 6 for a full twist,
/// fewer for partial tasks); the column count is the joint count.
#[derive(Clone, Debug)]
pub struct Task {
    jacobian: DMatrix<f64>,
    desired: DVector<f64>,
}

impl Task {
    /// Creates a task, validating that the Jacobian row count matches the
    /// desired-velocity length and that all entries are finite.
    pub fn new(jacobian: DMatrix<f64>, desired: DVector<f64>) -> Result<Self, ConfigError> {
        if jacobian.nrows() != desired.len() {
            return Err(ConfigError::TaskDimensionMismatch {
                rows: jacobian.nrows(),
                desired: desired.len(),
            });
        }
        if !is_finite_matrix(&jacobian) || !is_finite_vector(&desired) {
            return Err(ConfigError::InvalidParameter(
                "task contains non-finite values".to_string(),
            ));
        }
        Ok(Task { jacobian, desired })
    }

    pub fn jacobian(&self) -> &DMatrix<f64> {
        &self.jacobian
    }

    pub fn desired(&self) -> &DVector<f64> {
        &self.desired
    }

    /// Task dimension (Jacobian row count).
    pub fn dimension(&self) -> usize {
        self.jacobian.nrows()
    }

    /// Joint count the task is expressed over (Jacobian column count).
    pub fn joint_count(&self) -> usize {
        self.jacobian.ncols()
    }
}

/// Priority-ordered sequence of tasks. Index 0 is the highest priority and
/// is satisfied first, as exactly as feasible; each following task is only
/// resolved in the null space of everything above it. Built fresh for each
/// solve call; the solver does not retain it.
#[derive(Clone, Debug, Default)]
pub struct StackOfTasks {
    tasks: Vec<Task>,
}

impl StackOfTasks {
    pub fn new() -> Self {
        StackOfTasks { tasks: Vec::new() }
    }

    /// Appends a task at the lowest priority so far.
    pub fn push(&mut self, task: Task) {
        self.tasks.push(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in priority order, highest first.
    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }
}

impl From<Vec<Task>> for StackOfTasks {
    fn from(tasks: Vec<Task>) -> Self {
        StackOfTasks { tasks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_validates_dimensions() {
        let jacobian = DMatrix::zeros(3, 7);
        let desired = DVector::zeros(3);
        assert!(Task::new(jacobian, desired).is_ok());

        let jacobian = DMatrix::zeros(3, 7);
        let desired = DVector::zeros(6);
        match Task::new(jacobian, desired) {
            Err(ConfigError::TaskDimensionMismatch { rows, desired }) => {
                assert_eq!(rows, 3);
                assert_eq!(desired, 6);
            }
            other => panic!("expected TaskDimensionMismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn task_rejects_non_finite_values() {
        let mut jacobian = DMatrix::zeros(2, 3);
        jacobian[(1, 2)] = f64::NAN;
        assert!(Task::new(jacobian, DVector::zeros(2)).is_err());
    }

    #[test]
    fn stack_preserves_insertion_order() {
        let mut stack = StackOfTasks::new();
        stack.push(Task::new(DMatrix::zeros(6, 4), DVector::zeros(6)).unwrap());
        stack.push(Task::new(DMatrix::zeros(2, 4), DVector::zeros(2)).unwrap());
        assert_eq!(stack.len(), 2);
        let dims: Vec<usize> = stack.iter().map(|t| t.dimension()).collect();
        assert_eq!(dims, vec![6, 2]);
    }
}
