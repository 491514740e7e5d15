#![forbid(unsafe_code)]

mod call;
mod error;
mod expr;
mod kernel;
mod lower;
mod types;

pub use call::arity;
pub use error::{Arity, BuildError, LowerError};
pub use expr::{BinOp, Expr, Literal, UnaryOp};
pub use kernel::{
    AllocSize, BoundArg, Call, ExtractIndex, Gate, Kernel, KernelBuilder, KernelContext, KernelId, Op, Operand,
    Origin, SlotId, Unit, Value,
};
pub use lower::{LowerConfig, lower_kernel, symbol_name};
pub use types::{Type, Width};

pub use qernel_ir as ir;
