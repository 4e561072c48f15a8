//! Static registry of builtin commands: gates, measurements and host
//! callbacks, with their arities and the reverse table that drives
//! stepping backwards.

use serde::{Deserialize, Serialize};

/// Builtin commands callable from QScript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    VectorSize,
    Decoherence,
    Hadamard,
    SigmaX,
    SigmaY,
    SigmaZ,
    Rx,
    Ry,
    Rz,
    Unitary,
    CNot,
    Swap,
    Toffoli,
    Phase,
    CPhase,
    QftCPhase,
    InvQftCPhase,
    Qft,
    InvQft,
    ExpModN,
    RevExpModN,
    ShiftLeft,
    ShiftRight,
    MeasureBit,
    Measure,
    Print,
    Breakpoint,
    Delay,
    Display,
    SetViewAngle,
    SetViewMode,
}

/// All builtins in registry order.
pub const ALL: &[Builtin] = &[
    Builtin::VectorSize,
    Builtin::Decoherence,
    Builtin::Hadamard,
    Builtin::SigmaX,
    Builtin::SigmaY,
    Builtin::SigmaZ,
    Builtin::Rx,
    Builtin::Ry,
    Builtin::Rz,
    Builtin::Unitary,
    Builtin::CNot,
    Builtin::Swap,
    Builtin::Toffoli,
    Builtin::Phase,
    Builtin::CPhase,
    Builtin::QftCPhase,
    Builtin::InvQftCPhase,
    Builtin::Qft,
    Builtin::InvQft,
    Builtin::ExpModN,
    Builtin::RevExpModN,
    Builtin::ShiftLeft,
    Builtin::ShiftRight,
    Builtin::MeasureBit,
    Builtin::Measure,
    Builtin::Print,
    Builtin::Breakpoint,
    Builtin::Delay,
    Builtin::Display,
    Builtin::SetViewAngle,
    Builtin::SetViewMode,
];

impl Builtin {
    /// Script-visible name.
    pub fn name(self) -> &'static str {
        match self {
            Builtin::VectorSize => "VectorSize",
            Builtin::Decoherence => "Decoherence",
            Builtin::Hadamard => "Hadamard",
            Builtin::SigmaX => "SigmaX",
            Builtin::SigmaY => "SigmaY",
            Builtin::SigmaZ => "SigmaZ",
            Builtin::Rx => "Rx",
            Builtin::Ry => "Ry",
            Builtin::Rz => "Rz",
            Builtin::Unitary => "Unitary",
            Builtin::CNot => "CNot",
            Builtin::Swap => "Swap",
            Builtin::Toffoli => "Toffoli",
            Builtin::Phase => "Phase",
            Builtin::CPhase => "CPhase",
            Builtin::QftCPhase => "QFTCPhase",
            Builtin::InvQftCPhase => "InvQFTCPhase",
            Builtin::Qft => "QFT",
            Builtin::InvQft => "InvQFT",
            Builtin::ExpModN => "ExpModN",
            Builtin::RevExpModN => "RevExpModN",
            Builtin::ShiftLeft => "ShiftLeft",
            Builtin::ShiftRight => "ShiftRight",
            Builtin::MeasureBit => "MeasureBit",
            Builtin::Measure => "Measure",
            Builtin::Print => "Print",
            Builtin::Breakpoint => "Breakpoint",
            Builtin::Delay => "Delay",
            Builtin::Display => "Display",
            Builtin::SetViewAngle => "SetViewAngle",
            Builtin::SetViewMode => "SetViewMode",
        }
    }

    /// Number of arguments the parser requires.
    pub fn arity(self) -> usize {
        match self {
            Builtin::Measure | Builtin::Breakpoint => 0,
            Builtin::VectorSize
            | Builtin::Decoherence
            | Builtin::Hadamard
            | Builtin::SigmaX
            | Builtin::SigmaY
            | Builtin::SigmaZ
            | Builtin::ShiftLeft
            | Builtin::ShiftRight
            | Builtin::MeasureBit
            | Builtin::Print
            | Builtin::Delay
            | Builtin::Display
            | Builtin::SetViewAngle
            | Builtin::SetViewMode => 1,
            Builtin::Rx
            | Builtin::Ry
            | Builtin::Rz
            | Builtin::CNot
            | Builtin::Swap
            | Builtin::Phase
            | Builtin::QftCPhase
            | Builtin::InvQftCPhase
            | Builtin::Qft
            | Builtin::InvQft => 2,
            Builtin::Toffoli | Builtin::CPhase | Builtin::ExpModN | Builtin::RevExpModN => 3,
            Builtin::Unitary => 9,
        }
    }

    /// Look up a builtin by its script name.
    pub fn from_name(name: &str) -> Option<Self> {
        ALL.iter().copied().find(|b| b.name() == name)
    }

    /// True when the builtin only talks to the host and leaves the quantum
    /// state alone.
    pub fn is_host_callback(self) -> bool {
        matches!(
            self,
            Builtin::Print
                | Builtin::Breakpoint
                | Builtin::Delay
                | Builtin::Display
                | Builtin::SetViewAngle
                | Builtin::SetViewMode
        )
    }
}

/// How to undo a builtin when stepping backwards.
#[derive(Debug, Clone, PartialEq)]
pub enum Reverse {
    /// Apply this builtin with these argument values.
    Apply(Builtin, Vec<f64>),
    /// Replay the same gate with the same arguments.
    SelfInverse,
    /// Nothing to undo on the quantum state.
    Skip,
    /// Irreversible; the state stays as measured and the host is warned.
    Warn,
}

/// Reverse table: maps a forward gate and its evaluated arguments to the
/// operation that undoes it.
pub fn reverse(builtin: Builtin, args: &[f64]) -> Reverse {
    match builtin {
        Builtin::Phase => Reverse::Apply(Builtin::Phase, vec![args[0], -args[1]]),
        Builtin::CPhase => Reverse::Apply(Builtin::CPhase, vec![args[0], args[1], -args[2]]),
        Builtin::QftCPhase => Reverse::Apply(Builtin::InvQftCPhase, args.to_vec()),
        Builtin::InvQftCPhase => Reverse::Apply(Builtin::QftCPhase, args.to_vec()),
        Builtin::Qft => Reverse::Apply(Builtin::InvQft, args.to_vec()),
        Builtin::InvQft => Reverse::Apply(Builtin::Qft, args.to_vec()),
        Builtin::ShiftLeft => Reverse::Apply(Builtin::ShiftRight, args.to_vec()),
        Builtin::ShiftRight => Reverse::Apply(Builtin::ShiftLeft, args.to_vec()),
        Builtin::Rx => Reverse::Apply(Builtin::Rx, vec![args[0], -args[1]]),
        Builtin::Ry => Reverse::Apply(Builtin::Ry, vec![args[0], -args[1]]),
        Builtin::Rz => Reverse::Apply(Builtin::Rz, vec![args[0], -args[1]]),
        Builtin::Hadamard
        | Builtin::SigmaX
        | Builtin::SigmaY
        | Builtin::SigmaZ
        | Builtin::CNot
        | Builtin::Swap
        | Builtin::Toffoli
        | Builtin::Unitary => Reverse::SelfInverse,
        Builtin::Measure => Reverse::Warn,
        Builtin::VectorSize
        | Builtin::MeasureBit
        | Builtin::ExpModN
        | Builtin::RevExpModN
        | Builtin::Decoherence => Reverse::Skip,
        // Host callbacks are not re-invoked when stepping back.
        _ => Reverse::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_round_trip() {
        for &builtin in ALL {
            assert_eq!(Builtin::from_name(builtin.name()), Some(builtin));
        }
        assert_eq!(Builtin::from_name("NotAGate"), None);
    }

    #[test]
    fn test_arities() {
        assert_eq!(Builtin::Measure.arity(), 0);
        assert_eq!(Builtin::Hadamard.arity(), 1);
        assert_eq!(Builtin::CNot.arity(), 2);
        assert_eq!(Builtin::Toffoli.arity(), 3);
        assert_eq!(Builtin::Unitary.arity(), 9);
    }

    #[test]
    fn test_reverse_table() {
        assert_eq!(
            reverse(Builtin::Phase, &[2.0, 0.5]),
            Reverse::Apply(Builtin::Phase, vec![2.0, -0.5])
        );
        assert_eq!(
            reverse(Builtin::Qft, &[0.0, 6.0]),
            Reverse::Apply(Builtin::InvQft, vec![0.0, 6.0])
        );
        assert_eq!(
            reverse(Builtin::ShiftLeft, &[2.0]),
            Reverse::Apply(Builtin::ShiftRight, vec![2.0])
        );
        assert_eq!(reverse(Builtin::Hadamard, &[0.0]), Reverse::SelfInverse);
        assert_eq!(reverse(Builtin::Measure, &[]), Reverse::Warn);
        assert_eq!(reverse(Builtin::ExpModN, &[7.0, 15.0, 4.0]), Reverse::Skip);
        assert_eq!(reverse(Builtin::Print, &[0.0]), Reverse::Skip);
    }
}
