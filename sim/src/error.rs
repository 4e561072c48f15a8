//! Error types for the simulator core

use thiserror::Error;

/// Simulator error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("Qubit number out of range: {0}")]
    QubitOutOfRange(usize),

    #[error("Invalid register size {0}, supported range is 1..={1} qubits")]
    InvalidRegisterSize(usize, usize),

    #[error("Phase-shift control {0} must exceed target {1}")]
    PhasePairOrder(usize, usize),

    #[error("Qubit window [{offset}, {offset}+{width}) exceeds register of {qubits} qubits")]
    WindowOutOfRange {
        offset: usize,
        width: usize,
        qubits: usize,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SimError>;
