#![forbid(unsafe_code)]

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Width {
    Fixed(u32),
    Dynamic,
}

/// Parameter and value kinds understood by the kernel builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Numeric,
    Boolean,
    /// A single qubit handle.
    Qubit,
    /// A register of qubits.
    Register(Width),
}

impl Type {
    pub fn register(width: u32) -> Self {
        Type::Register(Width::Fixed(width))
    }

    pub fn dynamic_register() -> Self {
        Type::Register(Width::Dynamic)
    }

    pub fn is_quantum(&self) -> bool {
        matches!(self, Type::Qubit | Type::Register(_))
    }

    pub fn is_classical(&self) -> bool {
        !self.is_quantum()
    }

    /// Static width of a fixed register, or 1 for a single qubit.
    pub fn fixed_width(&self) -> Option<u32> {
        match self {
            Type::Qubit => Some(1),
            Type::Register(Width::Fixed(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn display(&self) -> String {
        match self {
            Type::Numeric => "f64".to_string(),
            Type::Boolean => "i1".to_string(),
            Type::Qubit => "qubit".to_string(),
            Type::Register(Width::Fixed(n)) => format!("qreg<{n}>"),
            Type::Register(Width::Dynamic) => "qreg<?>".to_string(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

pub(crate) fn lower_type(ty: Type) -> qernel_ir::Type {
    match ty {
        Type::Numeric => qernel_ir::Type::F64,
        Type::Boolean => qernel_ir::Type::I1,
        Type::Qubit => qernel_ir::Type::Ref,
        Type::Register(Width::Fixed(n)) => qernel_ir::Type::Veq(Some(n)),
        Type::Register(Width::Dynamic) => qernel_ir::Type::Veq(None),
    }
}
