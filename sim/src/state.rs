//! Quantum state vector and gate kernels.
//!
//! The register is a flat vector of 2^n complex amplitudes. Every gate is
//! an in-place transform over basis-index pairs selected by bit masks;
//! nothing ever materializes a full 2^n x 2^n operator, so the largest
//! supported register (22 qubits, 32 MiB of amplitudes) stays cheap.
//!
//! Qubit `k` addresses bit `k` of the basis index (`mask = 1 << k`).

use crate::error::{Result, SimError};
use crate::numeric::exp_mod;
use crate::{Complex, FRAC_1_SQRT_2, MAX_QUBITS, ONE, ZERO};
use nalgebra::Matrix2;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

/// State vector of an n-qubit register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QState {
    qubits: usize,
    amps: Vec<Complex>,
}

impl QState {
    /// Create a register of `qubits` qubits initialized to |0...0⟩.
    pub fn new(qubits: usize) -> Result<Self> {
        if qubits == 0 || qubits > MAX_QUBITS {
            return Err(SimError::InvalidRegisterSize(qubits, MAX_QUBITS));
        }
        let mut amps = vec![ZERO; 1 << qubits];
        amps[0] = ONE;
        Ok(Self { qubits, amps })
    }

    /// Number of qubits
    pub fn num_qubits(&self) -> usize {
        self.qubits
    }

    /// Dimension (2^n)
    pub fn dimension(&self) -> usize {
        self.amps.len()
    }

    /// Amplitude of basis state `index`
    pub fn amplitude(&self, index: usize) -> Complex {
        self.amps.get(index).copied().unwrap_or(ZERO)
    }

    /// All amplitudes
    pub fn amplitudes(&self) -> &[Complex] {
        &self.amps
    }

    /// Probability weight of basis state `index` (not rescaled by the
    /// total norm, which may be below 1 after shifts or decoherence)
    pub fn probability(&self, index: usize) -> f64 {
        self.amps
            .get(index)
            .map(|a| a.norm_sqr() as f64)
            .unwrap_or(0.0)
    }

    /// Total squared norm
    pub fn norm_sqr(&self) -> f64 {
        self.amps.iter().map(|a| a.norm_sqr() as f64).sum()
    }

    /// Rescale to unit norm
    pub fn normalize(&mut self) {
        let norm = self.norm_sqr().sqrt();
        if norm > 1e-12 {
            let scale = (1.0 / norm) as f32;
            for amp in &mut self.amps {
                *amp *= scale;
            }
        }
    }

    /// Largest per-basis-state magnitude, used by hosts to scale displays
    pub fn max_amplitude(&self) -> f64 {
        self.amps
            .iter()
            .map(|a| a.norm() as f64)
            .fold(0.0, f64::max)
    }

    fn check_qubit(&self, qubit: usize) -> Result<()> {
        if qubit >= self.qubits {
            return Err(SimError::QubitOutOfRange(qubit));
        }
        Ok(())
    }

    fn check_window(&self, offset: usize, width: usize) -> Result<()> {
        if offset + width > self.qubits {
            return Err(SimError::WindowOutOfRange {
                offset,
                width,
                qubits: self.qubits,
            });
        }
        Ok(())
    }

    // ==================== Single-qubit gates ====================

    /// Apply an arbitrary 2x2 unitary to `qubit`.
    pub fn apply_unitary(&mut self, qubit: usize, m: &Matrix2<Complex>) -> Result<()> {
        self.check_qubit(qubit)?;
        let mask = 1usize << qubit;
        for i in 0..self.amps.len() {
            if i & mask != 0 {
                continue;
            }
            let j = i | mask;
            let a = self.amps[i];
            let b = self.amps[j];
            self.amps[i] = m[(0, 0)] * a + m[(0, 1)] * b;
            self.amps[j] = m[(1, 0)] * a + m[(1, 1)] * b;
        }
        Ok(())
    }

    /// Apply a 2x2 unitary given as interleaved (re, im) pairs in row-major
    /// order, the wire format of the `Unitary` builtin.
    pub fn apply_unitary_parts(&mut self, qubit: usize, parts: &[f64; 8]) -> Result<()> {
        let m = Matrix2::new(
            Complex::new(parts[0] as f32, parts[1] as f32),
            Complex::new(parts[2] as f32, parts[3] as f32),
            Complex::new(parts[4] as f32, parts[5] as f32),
            Complex::new(parts[6] as f32, parts[7] as f32),
        );
        self.apply_unitary(qubit, &m)
    }

    /// Hadamard gate
    pub fn hadamard(&mut self, qubit: usize) -> Result<()> {
        let h = Complex::new(FRAC_1_SQRT_2, 0.0);
        let m = Matrix2::new(h, h, h, -h);
        self.apply_unitary(qubit, &m)
    }

    /// Pauli-X (bit flip)
    pub fn sigma_x(&mut self, qubit: usize) -> Result<()> {
        self.check_qubit(qubit)?;
        let mask = 1usize << qubit;
        for i in 0..self.amps.len() {
            if i & mask == 0 {
                self.amps.swap(i, i | mask);
            }
        }
        Ok(())
    }

    /// Pauli-Y
    pub fn sigma_y(&mut self, qubit: usize) -> Result<()> {
        let m = Matrix2::new(ZERO, -crate::I, crate::I, ZERO);
        self.apply_unitary(qubit, &m)
    }

    /// Pauli-Z (phase flip)
    pub fn sigma_z(&mut self, qubit: usize) -> Result<()> {
        self.check_qubit(qubit)?;
        let mask = 1usize << qubit;
        for i in 0..self.amps.len() {
            if i & mask != 0 {
                self.amps[i] = -self.amps[i];
            }
        }
        Ok(())
    }

    /// Rotation about X. Off-diagonal entries carry `+i sin(θ/2)`, the
    /// convention the script language is specified against.
    pub fn rx(&mut self, qubit: usize, theta: f64) -> Result<()> {
        let c = Complex::new((theta / 2.0).cos() as f32, 0.0);
        let s = Complex::new(0.0, (theta / 2.0).sin() as f32);
        let m = Matrix2::new(c, s, s, c);
        self.apply_unitary(qubit, &m)
    }

    /// Rotation about Y: `[[cos, sin], [-sin, cos]]` on θ/2.
    pub fn ry(&mut self, qubit: usize, theta: f64) -> Result<()> {
        let c = Complex::new((theta / 2.0).cos() as f32, 0.0);
        let s = Complex::new((theta / 2.0).sin() as f32, 0.0);
        let m = Matrix2::new(c, s, -s, c);
        self.apply_unitary(qubit, &m)
    }

    /// Rotation about Z: `diag(e^{iθ/2}, e^{-iθ/2})`.
    pub fn rz(&mut self, qubit: usize, theta: f64) -> Result<()> {
        self.check_qubit(qubit)?;
        let c = (theta / 2.0).cos() as f32;
        let s = (theta / 2.0).sin() as f32;
        let pos = Complex::new(c, s);
        let neg = Complex::new(c, -s);
        let mask = 1usize << qubit;
        for (i, amp) in self.amps.iter_mut().enumerate() {
            *amp *= if i & mask == 0 { pos } else { neg };
        }
        Ok(())
    }

    // ==================== Multi-qubit gates ====================

    /// Controlled-X; a Toffoli with the control repeated.
    pub fn cnot(&mut self, control: usize, target: usize) -> Result<()> {
        self.toffoli(control, control, target)
    }

    /// Doubly-controlled X.
    pub fn toffoli(&mut self, c1: usize, c2: usize, target: usize) -> Result<()> {
        self.check_qubit(c1)?;
        self.check_qubit(c2)?;
        self.check_qubit(target)?;
        let m1 = 1usize << c1;
        let m2 = 1usize << c2;
        let mt = 1usize << target;
        for i in 0..self.amps.len() {
            if i & m1 != 0 && i & m2 != 0 && i & mt == 0 {
                self.amps.swap(i, i | mt);
            }
        }
        Ok(())
    }

    /// Exchange two qubits.
    pub fn swap(&mut self, a: usize, b: usize) -> Result<()> {
        self.check_qubit(a)?;
        self.check_qubit(b)?;
        let ma = 1usize << a;
        let mb = 1usize << b;
        for i in 0..self.amps.len() {
            if i & ma != 0 && i & mb == 0 {
                self.amps.swap(i, i ^ (ma | mb));
            }
        }
        Ok(())
    }

    /// Multiply amplitudes with both `control` and `target` bits set by
    /// `e^{iφ}`. With `control == target` this is the plain phase gate.
    pub fn cphase(&mut self, control: usize, target: usize, phi: f64) -> Result<()> {
        self.check_qubit(control)?;
        self.check_qubit(target)?;
        let factor = Complex::from_polar(1.0, phi as f32);
        let mask = (1usize << control) | (1usize << target);
        for (i, amp) in self.amps.iter_mut().enumerate() {
            if i & mask == mask {
                *amp *= factor;
            }
        }
        Ok(())
    }

    /// Diagonal phase `e^{iφ}` on one qubit.
    pub fn phase(&mut self, qubit: usize, phi: f64) -> Result<()> {
        self.cphase(qubit, qubit, phi)
    }

    /// Fourier ladder rotation: `CPhase(c, t, sign * π / 2^(c-t))`.
    /// Requires `c > t`.
    pub fn phase_shift(&mut self, control: usize, target: usize, sign: i32) -> Result<()> {
        if control <= target {
            return Err(SimError::PhasePairOrder(control, target));
        }
        self.check_qubit(control)?;
        let phi = sign as f64 * PI / (1u64 << (control - target)) as f64;
        self.cphase(control, target, phi)
    }

    // ==================== Composite transforms ====================

    /// Quantum Fourier transform over qubits `[offset, offset + width)`.
    pub fn qft(&mut self, offset: usize, width: usize) -> Result<()> {
        self.check_window(offset, width)?;
        for i in 0..width {
            self.hadamard(offset + i)?;
            for j in (i + 1)..width {
                self.phase_shift(offset + j, offset + i, -1)?;
            }
        }
        Ok(())
    }

    /// Inverse Fourier transform over the same window; exact reverse
    /// composition of [`QState::qft`].
    pub fn inv_qft(&mut self, offset: usize, width: usize) -> Result<()> {
        self.check_window(offset, width)?;
        for i in (0..width).rev() {
            for j in ((i + 1)..width).rev() {
                self.phase_shift(offset + j, offset + i, 1)?;
            }
            self.hadamard(offset + i)?;
        }
        Ok(())
    }

    /// Relabel |k⟩ → |k << bits⟩; amplitudes shifted past the top of the
    /// register are dropped, so the result may be un-normalized.
    pub fn shift_left(&mut self, bits: usize) -> Result<()> {
        if bits > self.qubits {
            return Err(SimError::InvalidParameter(format!(
                "shift amount {bits} exceeds register width {}",
                self.qubits
            )));
        }
        let dim = self.amps.len();
        let low = (1usize << bits) - 1;
        let mut next = vec![ZERO; dim];
        for (i, slot) in next.iter_mut().enumerate() {
            if i & low == 0 {
                *slot = self.amps[i >> bits];
            }
        }
        self.amps = next;
        Ok(())
    }

    /// Relabel |k⟩ → |k >> bits⟩ restricted to indices whose shifted
    /// source still fits the register.
    pub fn shift_right(&mut self, bits: usize) -> Result<()> {
        if bits > self.qubits {
            return Err(SimError::InvalidParameter(format!(
                "shift amount {bits} exceeds register width {}",
                self.qubits
            )));
        }
        let dim = self.amps.len();
        let mut next = vec![ZERO; dim];
        for (i, slot) in next.iter_mut().enumerate() {
            let j = i << bits;
            if j < dim {
                *slot = self.amps[j];
            }
        }
        self.amps = next;
        Ok(())
    }

    /// From |j⟩|0⟩ produce |j⟩|x^j mod N⟩ over a `width`-bit j register.
    /// Whatever occupied the high register before is discarded.
    pub fn exp_mod_n(&mut self, x: u64, n: u64, width: usize) -> Result<()> {
        self.permute_high_register(n, width, |i| exp_mod(x, i as u64, n))
    }

    /// From |j⟩|0⟩ produce |j⟩|j^x mod N⟩; the base varies per basis state.
    pub fn rev_exp_mod_n(&mut self, x: u64, n: u64, width: usize) -> Result<()> {
        self.permute_high_register(n, width, |i| exp_mod(i as u64, x, n))
    }

    fn permute_high_register<F>(&mut self, n: u64, width: usize, f: F) -> Result<()>
    where
        F: Fn(usize) -> u64,
    {
        if n < 2 {
            return Err(SimError::InvalidParameter(format!(
                "modulus {n} must be at least 2"
            )));
        }
        if width == 0 || width > self.qubits {
            return Err(SimError::WindowOutOfRange {
                offset: 0,
                width,
                qubits: self.qubits,
            });
        }
        let dim = self.amps.len();
        let mut next = vec![ZERO; dim];
        for i in 0..(1usize << width) {
            let j = ((f(i) as usize) << width) + i;
            if j < dim {
                next[j] = self.amps[i];
            }
        }
        self.amps = next;
        Ok(())
    }

    // ==================== Noise ====================

    /// Random per-qubit phase kicks: each qubit gets a Z rotation by
    /// ν ~ N(0, √(2·strength)). `strength` scales the variance.
    pub fn decoherence<R: Rng + ?Sized>(&mut self, strength: f64, rng: &mut R) -> Result<()> {
        if !(strength >= 0.0) {
            return Err(SimError::InvalidParameter(format!(
                "decoherence strength {strength} must be non-negative"
            )));
        }
        let normal = Normal::new(0.0, (2.0 * strength).sqrt())
            .map_err(|e| SimError::InvalidParameter(e.to_string()))?;
        for qubit in 0..self.qubits {
            let nu = normal.sample(rng);
            self.rz(qubit, nu)?;
        }
        Ok(())
    }

    // ==================== Measurement ====================

    /// Project one qubit, collapse the disagreeing amplitudes to zero and
    /// renormalize the survivors. Returns the observed bit.
    pub fn measure_bit<R: Rng + ?Sized>(&mut self, qubit: usize, rng: &mut R) -> Result<u32> {
        self.check_qubit(qubit)?;
        let mask = 1usize << qubit;
        let mut p0 = 0.0f64;
        let mut p1 = 0.0f64;
        for (i, amp) in self.amps.iter().enumerate() {
            let p = amp.norm_sqr() as f64;
            if i & mask == 0 {
                p0 += p;
            } else {
                p1 += p;
            }
        }

        let r: f64 = rng.gen();
        let outcome = if r > p0 { 1 } else { 0 };
        let p_outcome = if outcome == 0 { p0 } else { p1 };
        let keep = if outcome == 0 { 0 } else { mask };
        debug!(qubit, outcome, p_outcome, "bit measurement");

        let scale = if p_outcome > 1e-12 {
            (1.0 / p_outcome.sqrt()) as f32
        } else {
            1.0
        };
        for (i, amp) in self.amps.iter_mut().enumerate() {
            if i & mask == keep {
                *amp *= scale;
            } else {
                *amp = ZERO;
            }
        }
        Ok(outcome)
    }

    /// Sample a full-register outcome from the current distribution,
    /// rescaled by the total norm. The state is left untouched: this is a
    /// peek, not a projective measurement.
    pub fn measure<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let total = self.norm_sqr();
        let target = rng.gen::<f64>() * total;
        let mut cumulative = 0.0f64;
        for (i, amp) in self.amps.iter().enumerate() {
            cumulative += amp.norm_sqr() as f64;
            if cumulative >= target {
                return i;
            }
        }
        self.amps.len() - 1
    }

    // ==================== Display ====================

    /// Significant terms as a ket string, e.g. `(0.7071)|000011⟩`.
    pub fn terms(&self) -> String {
        let n = self.qubits;
        let parts: Vec<String> = self
            .amps
            .iter()
            .enumerate()
            .filter(|(_, a)| a.norm_sqr() > 1e-8)
            .map(|(i, a)| {
                let basis: String = (0..n)
                    .rev()
                    .map(|b| if (i >> b) & 1 == 1 { '1' } else { '0' })
                    .collect();
                format!("({:.4})|{}⟩", a, basis)
            })
            .collect();
        parts.join(" + ")
    }
}

impl std::fmt::Display for QState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.terms())
    }
}
