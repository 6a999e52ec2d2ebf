//! Velocity-level IK with Saturation in the Null Space (SNS).
//!
//! Given a priority-ordered stack of Cartesian tasks and the current joint
//! positions, the solver produces a joint-velocity command that satisfies
//! the highest-priority tasks first while never driving any joint outside
//! its per-cycle feasible velocity window. When a task demands more than
//! the limits allow, joints are pinned ("saturated") at their bounds one by
//! one and the task is re-solved in the remaining free subspace; the
//! variants differ in how they degrade once the task cannot be satisfied
//! exactly. The algorithm family follows Flacco, De Luca and Khatib,
//! "Control of Redundant Robots Under Hard Joint Constraints: Saturation
//! in the Null Space" (IEEE T-RO, 2015).

extern crate nalgebra as na;

use crate::config_error::ConfigError;
use crate::joint_limits::JointLimits;
use crate::math_utils::{damped_pseudo_inverse, is_finite_vector, pseudo_inverse};
use crate::task::{StackOfTasks, Task};
use na::{DMatrix, DVector};

/// Damping ceiling for near-singular task Jacobians. Bounds the gain of
/// the generalized inverse to `1 / (2 * DAMPING_MAX)` in degenerate
/// directions.
const DAMPING_MAX: f64 = 1e-2;

/// Saturation policy variant. All variants honor the same hard bounds and
/// the same priority ordering; they trade solution optimality against
/// worst-case computation cost.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VelocitySolveType {
    /// Classic SNS: saturate the single most-violating joint per pass and
    /// re-solve until the task fits; hard-clamp as the last resort.
    #[default]
    Standard,
    /// As `Standard`, but when the task cannot be met exactly the desired
    /// task velocity is scaled by the largest feasible factor instead of
    /// being clamped component-wise.
    Optimal,
    /// As `Optimal`, on a velocity window shrunk toward its interior by
    /// the scale margin, so a commanded velocity never sits exactly on a
    /// hard bound.
    OptimalScaleMargin,
    /// One-pass saturation: all violating joints are pinned at once and
    /// the task re-solved a single time. Bounded, lower cost.
    Fast,
    /// One-pass structure of `Fast` with the scale-factor terminal step of
    /// `Optimal`.
    FastOptimal,
}

/// Outcome classification of a velocity solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VelocityStatus {
    /// Every task is satisfied exactly.
    Satisfied,
    /// At least one task had to be scaled down or partially dropped.
    Scaled,
    /// The top-priority task made no progress at all (for example a
    /// zero-rank Jacobian with a nonzero desired velocity).
    Infeasible,
}

/// Joint-velocity command plus diagnostics. The velocity is always a
/// best-effort, bounds-respecting vector, whatever the status says.
#[derive(Clone, Debug)]
pub struct VelocitySolution {
    pub velocity: DVector<f64>,
    pub status: VelocityStatus,
    /// Per-task achieved fraction of the desired velocity, 1.0 = exact.
    pub task_scale: Vec<f64>,
}

/// How a task resolution degrades when exact satisfaction is impossible.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Fallback {
    /// Clamp the last candidate into the window component-wise.
    Clamp,
    /// Use the best feasible scaled solution found during saturation.
    BestScale,
}

/// Transient per-task state: the projector onto the space still free for
/// this task (null space of all higher-priority tasks and of every joint
/// pinned so far) and the committed part of the velocity. Local to one
/// solve call; the solver instance itself is never mutated by `solve`.
struct TaskResolution {
    projector: DMatrix<f64>,
    fixed: DVector<f64>,
}

impl TaskResolution {
    /// Pins `joint` at `value` without disturbing any prior commitment:
    /// the correction is applied along the projector column (which lies in
    /// the null space of everything above), then that degree of freedom is
    /// deflated out of the projector. Fails when the joint has effectively
    /// no freedom left (its motion is owned by higher-priority tasks).
    fn saturate(&mut self, joint: usize, value: f64, eps: f64) -> bool {
        let denom = self.projector[(joint, joint)];
        if denom < eps {
            return false;
        }
        let column = self.projector.column(joint).clone_owned();
        let delta = (value - self.fixed[joint]) / denom;
        self.fixed += &column * delta;
        self.projector -= &column * column.transpose() / denom;
        true
    }
}

struct TaskOutcome {
    velocity: DVector<f64>,
    projector: DMatrix<f64>,
}

/// Velocity-level SNS solver. Created once per chain and reused; holds the
/// joint capabilities and the variant selection, nothing per-solve.
#[derive(Clone, Debug)]
pub struct SNSVelocityIK {
    joint_count: usize,
    loop_period: f64,
    eps: f64,
    scale_margin: f64,
    solve_type: VelocitySolveType,
    limits: JointLimits,
}

impl SNSVelocityIK {
    /// Creates a solver for `joint_count` joints running at a control
    /// cycle of `loop_period` seconds, with unbounded limits until
    /// [`set_joint_limits`](Self::set_joint_limits) is called.
    pub fn new(joint_count: usize, loop_period: f64) -> Result<Self, ConfigError> {
        if joint_count == 0 {
            return Err(ConfigError::InvalidJointCount(0));
        }
        if !(loop_period.is_finite() && loop_period > 0.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "loop period must be positive, got {}",
                loop_period
            )));
        }
        Ok(SNSVelocityIK {
            joint_count,
            loop_period,
            eps: 1e-5,
            scale_margin: 0.98,
            solve_type: VelocitySolveType::default(),
            limits: JointLimits::unbounded(joint_count),
        })
    }

    pub fn joint_count(&self) -> usize {
        self.joint_count
    }

    pub fn loop_period(&self) -> f64 {
        self.loop_period
    }

    pub fn limits(&self) -> &JointLimits {
        &self.limits
    }

    pub fn solve_type(&self) -> VelocitySolveType {
        self.solve_type
    }

    pub fn set_solve_type(&mut self, solve_type: VelocitySolveType) {
        self.solve_type = solve_type;
    }

    /// Replaces the joint capability bounds. The limit vectors must match
    /// the solver's joint count.
    pub fn set_joint_limits(&mut self, limits: JointLimits) -> Result<(), ConfigError> {
        if limits.joint_count() != self.joint_count {
            return Err(ConfigError::InvalidLength {
                expected: self.joint_count,
                found: limits.joint_count(),
            });
        }
        self.limits = limits;
        Ok(())
    }

    /// Fraction of the hard bound usable by `OptimalScaleMargin`,
    /// strictly between 0 and 1.
    pub fn set_scale_margin(&mut self, margin: f64) -> Result<(), ConfigError> {
        if !(margin > 0.0 && margin < 1.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "scale margin must be in (0, 1), got {}",
                margin
            )));
        }
        self.scale_margin = margin;
        Ok(())
    }

    /// Numerical tolerance for rank decisions and status classification.
    pub fn set_eps(&mut self, eps: f64) -> Result<(), ConfigError> {
        if !(eps.is_finite() && eps > 0.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "eps must be positive, got {}",
                eps
            )));
        }
        self.eps = eps;
        Ok(())
    }

    /// Resolves the task stack at joint position `q` into a joint-velocity
    /// command. Only configuration mistakes are an `Err`; an infeasible or
    /// partially satisfiable stack comes back as a status with a feasible
    /// best-effort velocity.
    pub fn solve(
        &self,
        stack: &StackOfTasks,
        q: &DVector<f64>,
    ) -> Result<VelocitySolution, ConfigError> {
        self.solve_inner(stack, q, None)
    }

    /// As [`solve`](Self::solve), additionally bounding the command to the
    /// velocities reachable from `current_velocity` within one control
    /// cycle under the acceleration limits.
    pub fn solve_with_velocity(
        &self,
        stack: &StackOfTasks,
        q: &DVector<f64>,
        current_velocity: &DVector<f64>,
    ) -> Result<VelocitySolution, ConfigError> {
        if current_velocity.len() != self.joint_count {
            return Err(ConfigError::InvalidLength {
                expected: self.joint_count,
                found: current_velocity.len(),
            });
        }
        if !is_finite_vector(current_velocity) {
            return Err(ConfigError::InvalidParameter(
                "joint velocity vector contains non-finite values".to_string(),
            ));
        }
        self.solve_inner(stack, q, Some(current_velocity))
    }

    fn solve_inner(
        &self,
        stack: &StackOfTasks,
        q: &DVector<f64>,
        current_velocity: Option<&DVector<f64>>,
    ) -> Result<VelocitySolution, ConfigError> {
        if q.len() != self.joint_count {
            return Err(ConfigError::InvalidLength {
                expected: self.joint_count,
                found: q.len(),
            });
        }
        if !is_finite_vector(q) {
            return Err(ConfigError::InvalidParameter(
                "joint position vector contains non-finite values".to_string(),
            ));
        }
        for task in stack.iter() {
            if task.joint_count() != self.joint_count {
                return Err(ConfigError::InvalidLength {
                    expected: self.joint_count,
                    found: task.joint_count(),
                });
            }
        }

        let (mut low, mut high) =
            self.limits
                .velocity_window(q, current_velocity, self.loop_period);
        if self.solve_type == VelocitySolveType::OptimalScaleMargin {
            apply_scale_margin(&mut low, &mut high, self.scale_margin);
        }

        let n = self.joint_count;
        let mut qdot = DVector::zeros(n);
        let mut projector = DMatrix::identity(n, n);

        for task in stack.iter() {
            if task.dimension() == 0 {
                continue;
            }
            let outcome = match self.solve_type {
                VelocitySolveType::Standard => {
                    self.resolve_iterative(task, &qdot, &projector, &low, &high, Fallback::Clamp)
                }
                VelocitySolveType::Optimal | VelocitySolveType::OptimalScaleMargin => self
                    .resolve_iterative(task, &qdot, &projector, &low, &high, Fallback::BestScale),
                VelocitySolveType::Fast => {
                    self.resolve_single_pass(task, &qdot, &projector, &low, &high, Fallback::Clamp)
                }
                VelocitySolveType::FastOptimal => self.resolve_single_pass(
                    task,
                    &qdot,
                    &projector,
                    &low,
                    &high,
                    Fallback::BestScale,
                ),
            };

            // Commit this task and remove its range from what lower
            // priorities may use, saturations included.
            let jp = task.jacobian() * &outcome.projector;
            let (pinv_jp, _) = pseudo_inverse(&jp, self.eps);
            projector = &outcome.projector - pinv_jp * jp;
            qdot = outcome.velocity;
        }

        let (status, task_scale) = self.classify(stack, &qdot);
        Ok(VelocitySolution {
            velocity: qdot,
            status,
            task_scale,
        })
    }

    /// Solves the task in the current free subspace. Returns the full
    /// candidate velocity plus the `(a, b)` decomposition with
    /// `qdot(s) = b + s * a` for the task-scaling computation.
    fn solve_step(
        &self,
        task: &Task,
        res: &TaskResolution,
    ) -> (DVector<f64>, DVector<f64>, DVector<f64>) {
        let jp = task.jacobian() * &res.projector;
        let pinv = damped_pseudo_inverse(&jp, self.eps, DAMPING_MAX);
        let a = &pinv * task.desired();
        let b = &res.fixed - pinv * (task.jacobian() * &res.fixed);
        let candidate = &b + &a;
        (candidate, a, b)
    }

    /// Iterative SNS resolution of one task: saturate the most-violating
    /// joint, re-solve, repeat. At most `n` saturations are possible, so
    /// the loop is bounded.
    fn resolve_iterative(
        &self,
        task: &Task,
        qdot_prev: &DVector<f64>,
        projector_prev: &DMatrix<f64>,
        low: &DVector<f64>,
        high: &DVector<f64>,
        fallback: Fallback,
    ) -> TaskOutcome {
        let mut res = TaskResolution {
            projector: projector_prev.clone(),
            fixed: qdot_prev.clone(),
        };
        let mut best_scale = 0.0;
        let mut best_velocity: Option<DVector<f64>> = None;
        let mut last_candidate = qdot_prev.clone();

        for _ in 0..=self.joint_count {
            let (candidate, a, b) = self.solve_step(task, &res);
            let Some((joint, bound)) = worst_violation(&candidate, low, high) else {
                return TaskOutcome {
                    velocity: candidate,
                    projector: res.projector,
                };
            };
            if fallback == Fallback::BestScale {
                if let Some(scale) = task_scaling_factor(&a, &b, low, high) {
                    if scale > best_scale {
                        best_scale = scale;
                        best_velocity = Some(&b + &a * scale);
                    }
                }
            }
            last_candidate = candidate;
            if !res.saturate(joint, bound, self.eps) {
                break;
            }
        }

        self.degrade(
            qdot_prev,
            projector_prev,
            res,
            last_candidate,
            best_velocity,
            low,
            high,
            fallback,
        )
    }

    /// One-pass resolution: pin every violating joint at once, re-solve a
    /// single time, then degrade. Exactly two subspace solves in the worst
    /// case, for tight control-cycle budgets.
    fn resolve_single_pass(
        &self,
        task: &Task,
        qdot_prev: &DVector<f64>,
        projector_prev: &DMatrix<f64>,
        low: &DVector<f64>,
        high: &DVector<f64>,
        fallback: Fallback,
    ) -> TaskOutcome {
        let mut res = TaskResolution {
            projector: projector_prev.clone(),
            fixed: qdot_prev.clone(),
        };
        let (candidate, _, _) = self.solve_step(task, &res);
        if worst_violation(&candidate, low, high).is_none() {
            return TaskOutcome {
                velocity: candidate,
                projector: res.projector,
            };
        }

        for i in 0..self.joint_count {
            if candidate[i] > high[i] {
                res.saturate(i, high[i], self.eps);
            } else if candidate[i] < low[i] {
                res.saturate(i, low[i], self.eps);
            }
        }

        let (candidate, a, b) = self.solve_step(task, &res);
        if worst_violation(&candidate, low, high).is_none() {
            return TaskOutcome {
                velocity: candidate,
                projector: res.projector,
            };
        }
        let best_velocity = task_scaling_factor(&a, &b, low, high).map(|s| &b + &a * s);
        self.degrade(
            qdot_prev,
            projector_prev,
            res,
            candidate,
            best_velocity,
            low,
            high,
            fallback,
        )
    }

    /// Terminal degradation once a task cannot be satisfied exactly. The
    /// result must stay inside the window AND must not perturb any
    /// higher-priority commitment; a candidate failing either check is
    /// replaced by the incoming velocity (the task contributes nothing).
    #[allow(clippy::too_many_arguments)]
    fn degrade(
        &self,
        qdot_prev: &DVector<f64>,
        projector_prev: &DMatrix<f64>,
        res: TaskResolution,
        last_candidate: DVector<f64>,
        best_velocity: Option<DVector<f64>>,
        low: &DVector<f64>,
        high: &DVector<f64>,
        fallback: Fallback,
    ) -> TaskOutcome {
        let candidate = match fallback {
            Fallback::Clamp => clamp_into_window(&last_candidate, low, high),
            Fallback::BestScale => best_velocity
                .unwrap_or_else(|| clamp_into_window(&last_candidate, low, high)),
        };

        let velocity = if within_window(&candidate, low, high)
            && self.preserves_higher_tasks(&candidate, qdot_prev, projector_prev)
        {
            candidate
        } else {
            qdot_prev.clone()
        };
        TaskOutcome {
            velocity,
            projector: res.projector,
        }
    }

    /// A degraded candidate may only differ from the incoming velocity
    /// along the null space of everything above this task; otherwise it
    /// would undo a commitment already made.
    fn preserves_higher_tasks(
        &self,
        candidate: &DVector<f64>,
        qdot_prev: &DVector<f64>,
        projector_prev: &DMatrix<f64>,
    ) -> bool {
        let delta = candidate - qdot_prev;
        let outside = &delta - projector_prev * &delta;
        outside.norm() <= self.eps * (1.0 + delta.norm())
    }

    /// Status and per-task achieved fractions for the final command.
    fn classify(&self, stack: &StackOfTasks, qdot: &DVector<f64>) -> (VelocityStatus, Vec<f64>) {
        let mut status = VelocityStatus::Satisfied;
        let mut task_scale = Vec::with_capacity(stack.len());
        for (k, task) in stack.iter().enumerate() {
            let desired_norm = task.desired().norm();
            let residual = (task.jacobian() * qdot - task.desired()).norm();
            let scale = if desired_norm <= self.eps {
                if residual <= self.eps { 1.0 } else { 0.0 }
            } else {
                (1.0 - residual / desired_norm).clamp(0.0, 1.0)
            };
            task_scale.push(scale);

            let tolerance = self.eps * (1.0 + desired_norm);
            if k == 0 && desired_norm > self.eps && scale <= self.eps {
                status = VelocityStatus::Infeasible;
            } else if residual > tolerance && status == VelocityStatus::Satisfied {
                status = VelocityStatus::Scaled;
            }
        }
        (status, task_scale)
    }
}

/// The joint violating its window worst (largest absolute overshoot) and
/// the bound value it should be pinned at. Ties go to the lowest joint
/// index; the rule is shared by every variant so exact numerical output is
/// reproducible.
fn worst_violation(
    qdot: &DVector<f64>,
    low: &DVector<f64>,
    high: &DVector<f64>,
) -> Option<(usize, f64)> {
    let mut worst: Option<(usize, f64, f64)> = None;
    for i in 0..qdot.len() {
        let (overshoot, bound) = if qdot[i] > high[i] {
            (qdot[i] - high[i], high[i])
        } else if qdot[i] < low[i] {
            (low[i] - qdot[i], low[i])
        } else {
            continue;
        };
        if overshoot <= 1e-12 {
            continue;
        }
        match worst {
            Some((_, best_overshoot, _)) if overshoot <= best_overshoot => {}
            _ => worst = Some((i, overshoot, bound)),
        }
    }
    worst.map(|(i, _, bound)| (i, bound))
}

/// Largest factor `s` in `[0, 1]` such that `b + s * a` stays inside the
/// window on every joint, or `None` when no such factor exists (the
/// committed part `b` itself is out of bounds somewhere).
fn task_scaling_factor(
    a: &DVector<f64>,
    b: &DVector<f64>,
    low: &DVector<f64>,
    high: &DVector<f64>,
) -> Option<f64> {
    const TINY: f64 = 1e-12;
    let mut s_min: f64 = 0.0;
    let mut s_max: f64 = 1.0;
    for i in 0..a.len() {
        if a[i].abs() < TINY {
            if b[i] > high[i] + TINY || b[i] < low[i] - TINY {
                return None;
            }
            continue;
        }
        let s1 = (low[i] - b[i]) / a[i];
        let s2 = (high[i] - b[i]) / a[i];
        let (lo_s, hi_s) = if s1 <= s2 { (s1, s2) } else { (s2, s1) };
        s_min = s_min.max(lo_s);
        s_max = s_max.min(hi_s);
    }
    if s_max < s_min - TINY || s_max < 0.0 {
        return None;
    }
    let s = s_max.clamp(0.0, 1.0);
    // Clamping must not drop below the joint-wise lower interval ends.
    if s < s_min - TINY {
        return None;
    }
    Some(s)
}

/// Shrinks each joint window toward its own interior by the margin
/// fraction of its width. The shrunk window is always contained in the
/// hard window, even when the window does not straddle zero (the
/// acceleration window around a nonzero current velocity, or the
/// collapsed window of a joint outside its position range).
fn apply_scale_margin(low: &mut DVector<f64>, high: &mut DVector<f64>, margin: f64) {
    for i in 0..low.len() {
        let width = high[i] - low[i];
        if width.is_finite() {
            let slack = 0.5 * (1.0 - margin) * width;
            low[i] += slack;
            high[i] -= slack;
        } else {
            // A semi-infinite window only needs its finite end pulled in.
            if high[i].is_finite() {
                high[i] -= (1.0 - margin) * high[i].abs();
            }
            if low[i].is_finite() {
                low[i] += (1.0 - margin) * low[i].abs();
            }
        }
    }
}

fn within_window(qdot: &DVector<f64>, low: &DVector<f64>, high: &DVector<f64>) -> bool {
    (0..qdot.len()).all(|i| qdot[i] >= low[i] - 1e-9 && qdot[i] <= high[i] + 1e-9)
}

fn clamp_into_window(qdot: &DVector<f64>, low: &DVector<f64>, high: &DVector<f64>) -> DVector<f64> {
    DVector::from_fn(qdot.len(), |i, _| qdot[i].clamp(low[i], high[i]))
}
