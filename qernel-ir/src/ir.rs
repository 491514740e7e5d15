#![forbid(unsafe_code)]

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub u32);

/// IR-level types. Independent of the builder's parameter vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    F64,
    I1,
    I64,
    /// Reference to a single qubit.
    Ref,
    /// Qubit vector; `None` is a vector of unknown width.
    Veq(Option<u32>),
}

impl Type {
    pub fn display(&self) -> String {
        match self {
            Type::F64 => "f64".to_string(),
            Type::I1 => "i1".to_string(),
            Type::I64 => "i64".to_string(),
            Type::Ref => "!qernel.ref".to_string(),
            Type::Veq(Some(n)) => format!("!qernel.veq<{n}>"),
            Type::Veq(None) => "!qernel.veq<?>".to_string(),
        }
    }

    pub fn is_quantum(&self) -> bool {
        matches!(self, Type::Ref | Type::Veq(_))
    }
}

/// An SSA value together with the type it was defined with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Value {
    pub id: ValueId,
    pub ty: Type,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    And,
    Or,
}

impl BinOp {
    pub fn is_arith(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }

    pub fn is_ordering(self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Index {
    Const(u32),
    Dynamic(Value),
}

#[derive(Clone, Debug, PartialEq)]
pub enum InstKind {
    ConstF64(f64),
    ConstBool(bool),

    Unary { op: UnaryOp, operand: Value },

    Binary { op: BinOp, lhs: Value, rhs: Value },

    /// Float to signed integer conversion, used for register sizes and indices.
    FpToSi { operand: Value },

    /// Allocate a qubit vector. A dynamic allocation carries its `i64` size.
    Alloca { size: Option<Value> },

    /// Reference one qubit of a vector.
    ExtractRef { register: Value, index: Index },

    /// Contiguous sub-vector view.
    SubVeq { register: Value, start: u32, len: u32 },

    /// Build a vector view from refs and fixed-width vectors, in order.
    Concat { parts: Vec<Value> },

    /// Forget the static width of a vector.
    RelaxSize { register: Value },

    Gate {
        name: String,
        adjoint: bool,
        params: Vec<Value>,
        controls: Vec<Value>,
        targets: Vec<Value>,
    },

    Measure { targets: Vec<Value> },

    Reset { targets: Vec<Value> },

    Call { callee: String, args: Vec<Value> },
}

impl InstKind {
    /// Every operand the instruction reads, in rendering order.
    pub fn operands(&self) -> Vec<Value> {
        match self {
            InstKind::ConstF64(_) | InstKind::ConstBool(_) => Vec::new(),
            InstKind::Unary { operand, .. } | InstKind::FpToSi { operand } => vec![*operand],
            InstKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            InstKind::Alloca { size } => size.iter().copied().collect(),
            InstKind::ExtractRef { register, index } => match index {
                Index::Const(_) => vec![*register],
                Index::Dynamic(i) => vec![*register, *i],
            },
            InstKind::SubVeq { register, .. } | InstKind::RelaxSize { register } => vec![*register],
            InstKind::Concat { parts } => parts.clone(),
            InstKind::Gate {
                params,
                controls,
                targets,
                ..
            } => params
                .iter()
                .chain(controls.iter())
                .chain(targets.iter())
                .copied()
                .collect(),
            InstKind::Measure { targets } | InstKind::Reset { targets } => targets.clone(),
            InstKind::Call { args, .. } => args.clone(),
        }
    }

    pub fn has_result(&self) -> bool {
        !matches!(
            self,
            InstKind::Gate { .. } | InstKind::Measure { .. } | InstKind::Reset { .. } | InstKind::Call { .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Inst {
    pub result: Option<Value>,
    pub kind: InstKind,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionIR {
    pub name: String,
    pub params: Vec<Value>,
    pub entry_point: bool,
    pub body: Vec<Inst>,
}

impl FunctionIR {
    pub fn param_types(&self) -> Vec<Type> {
        self.params.iter().map(|p| p.ty).collect()
    }

    pub fn calls(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.body.iter().filter_map(|inst| match &inst.kind {
            InstKind::Call { callee, args } => Some((callee.as_str(), args.as_slice())),
            _ => None,
        })
    }
}

/// Functions in emission order; the entry point comes first when lowered.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleIR {
    pub entry_attribute: String,
    pub functions: Vec<FunctionIR>,
}

impl ModuleIR {
    pub fn new(entry_attribute: impl Into<String>) -> Self {
        Self {
            entry_attribute: entry_attribute.into(),
            functions: Vec::new(),
        }
    }

    pub fn function(&self, name: &str) -> Option<&FunctionIR> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn entry(&self) -> Option<&FunctionIR> {
        self.functions.iter().find(|f| f.entry_point)
    }
}

#[derive(Default, Debug)]
pub struct IdGen {
    next_value: u32,
}

impl IdGen {
    pub fn fresh_value(&mut self, ty: Type) -> Value {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        Value { id, ty }
    }
}
