//! Error handling for solver configuration

/// Unified error for everything that can go wrong while configuring the
/// solvers or the kinematic chain. Solve-time degradation (scaled tasks,
/// non-convergence) is never reported through this type; it comes back as
/// a status code next to a best-effort result.
#[derive(Debug)]
pub enum ConfigError {
    /// Joint count must be positive.
    InvalidJointCount(usize),
    InvalidLength { expected: usize, found: usize },
    /// Task Jacobian row count does not match the desired-velocity length.
    TaskDimensionMismatch { rows: usize, desired: usize },
    InvalidLimits(String),
    InvalidParameter(String),
    UnknownJoint(String),
    MalformedChain(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            ConfigError::InvalidJointCount(n) =>
                write!(f, "Invalid joint count: {}", n),
            ConfigError::InvalidLength { expected, found } =>
                write!(f, "Invalid Length: expected {}, found {}", expected, found),
            ConfigError::TaskDimensionMismatch { rows, desired } =>
                write!(f, "Task dimension mismatch: jacobian has {} rows, desired vector has {}",
                       rows, desired),
            ConfigError::InvalidLimits(ref msg) =>
                write!(f, "Invalid joint limits: {}", msg),
            ConfigError::InvalidParameter(ref msg) =>
                write!(f, "Invalid parameter: {}", msg),
            ConfigError::UnknownJoint(ref name) =>
                write!(f, "Unknown joint: {}", name),
            ConfigError::MalformedChain(ref msg) =>
                write!(f, "Malformed chain: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
