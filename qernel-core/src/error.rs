#![forbid(unsafe_code)]

use std::fmt;

use miette::Diagnostic;
use qernel_ir::{BinOp, UnaryOp, VerifyError};
use thiserror::Error;

use crate::types::Type;

/// Accepted actual-argument counts for a callee.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: usize,
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{} to {}", self.min, self.max)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error, Diagnostic)]
pub enum BuildError {
    #[error("call to `{callee}` expects {expected} argument(s), got {actual}")]
    #[diagnostic(
        code(qernel::call::arity),
        help("pass exactly one argument per parameter; only fixed-size register parameters may be spread over individual qubits")
    )]
    ArityMismatch {
        callee: String,
        expected: Arity,
        actual: usize,
    },

    #[error("call to `{callee}`: argument {argument} has type {actual}, but parameter {param} expects {expected}")]
    #[diagnostic(code(qernel::call::type_mismatch))]
    TypeMismatch {
        callee: String,
        param: usize,
        argument: usize,
        expected: Type,
        actual: Type,
    },

    #[error("call to `{callee}`: parameter {param} ({expected}) mixes individual qubits with a register at argument {argument} ({actual})")]
    #[diagnostic(
        code(qernel::call::ambiguous_flattening),
        help("supply either one register of the declared width or that many individual qubits")
    )]
    AmbiguousFlattening {
        callee: String,
        param: usize,
        argument: usize,
        expected: Type,
        actual: Type,
    },

    #[error("kernel `{kernel}` is finalized and cannot be extended")]
    #[diagnostic(code(qernel::kernel::finalized))]
    ExtensionAfterFinalize { kernel: String },

    #[error("kernel `{kernel}` cannot use {what} recorded by kernel `{owner}`")]
    #[diagnostic(
        code(qernel::kernel::foreign_value),
        help("values and parameters are only valid inside the kernel that produced them; pass them through a call instead")
    )]
    ForeignValue {
        kernel: String,
        owner: String,
        what: String,
    },

    #[error("index {index} is out of range for a register of width {width}")]
    #[diagnostic(code(qernel::kernel::index_out_of_range))]
    IndexOutOfRange { index: u32, width: u32 },

    #[error("gate `{gate}`: {role} operand {position} has type {actual}, expected {expected}")]
    #[diagnostic(code(qernel::gate::operand))]
    GateOperand {
        gate: String,
        role: &'static str,
        position: usize,
        expected: Type,
        actual: Type,
    },

    #[error("gate `{gate}` takes {expected_targets} target(s) and {expected_params} parameter(s), got {targets} and {params}")]
    #[diagnostic(code(qernel::gate::arity))]
    GateArity {
        gate: String,
        expected_targets: usize,
        expected_params: usize,
        targets: usize,
        params: usize,
    },

    #[error("operator `{op:?}` cannot combine {lhs} with {rhs}")]
    #[diagnostic(code(qernel::expr::binary))]
    BinaryOperands { op: BinOp, lhs: Type, rhs: Type },

    #[error("operator `{op:?}` cannot apply to {operand}")]
    #[diagnostic(code(qernel::expr::unary))]
    UnaryOperand { op: UnaryOp, operand: Type },

    #[error("{what} must be {expected}, found {actual}")]
    #[diagnostic(code(qernel::kernel::operand))]
    OperandType {
        what: &'static str,
        expected: Type,
        actual: Type,
    },
}

#[derive(Debug, Error, Diagnostic)]
pub enum LowerError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Verification(#[from] VerifyError),

    #[error("lowering `{kernel}`: slot {slot} has no lowered value")]
    #[diagnostic(code(qernel::lower::unresolved))]
    Unresolved { kernel: String, slot: u32 },

    #[error("lowering `{kernel}`: callee `{callee}` was not lowered before its caller")]
    #[diagnostic(code(qernel::lower::callee_order))]
    MissingCallee { kernel: String, callee: String },
}
