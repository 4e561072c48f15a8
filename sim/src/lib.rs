//! # QScript Quantum Simulator
//!
//! State-vector simulation core driven by the QScript execution engine.
//!
//! ## Features
//!
//! - **QState**: Amplitude vector over 2^n basis states with in-place gate
//!   kernels (no full-matrix expansion, so registers up to 22 qubits stay
//!   within 32 MiB)
//! - **Gates**: Hadamard, Pauli, rotations, arbitrary 2x2 unitaries, CNOT,
//!   Swap, Toffoli, controlled phases
//! - **Composites**: QFT / inverse QFT windows, basis shifts, modular
//!   exponentiation permutations
//! - **Measurement**: Projective single-qubit measurement and full-register
//!   sampling without collapse
//! - **Decoherence**: Random per-qubit phase kicks
//!
//! ## Example
//!
//! ```rust
//! use qscript_sim::QState;
//! use rand::SeedableRng;
//!
//! let mut state = QState::new(2).unwrap();
//! state.hadamard(0).unwrap();
//! state.cnot(0, 1).unwrap();
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(7);
//! let outcome = state.measure(&mut rng);
//! assert!(outcome == 0 || outcome == 3);
//! ```

pub mod error;
pub mod numeric;
pub mod state;

pub use error::{Result, SimError};
pub use state::QState;

use num_complex::Complex32;

/// Complex amplitude type: two 32-bit floats per basis state.
pub type Complex = Complex32;

/// Zero complex number
pub const ZERO: Complex = Complex32::new(0.0, 0.0);

/// One complex number
pub const ONE: Complex = Complex32::new(1.0, 0.0);

/// Imaginary unit
pub const I: Complex = Complex32::new(0.0, 1.0);

/// 1/sqrt(2) for Hadamard normalization
pub const FRAC_1_SQRT_2: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Largest supported register size in qubits.
pub const MAX_QUBITS: usize = 22;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(ZERO.re, 0.0);
        assert_eq!(ONE.re, 1.0);
        assert_eq!(I.im, 1.0);
    }
}
