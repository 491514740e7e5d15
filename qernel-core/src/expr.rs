#![forbid(unsafe_code)]

pub use qernel_ir::{BinOp, UnaryOp};

use crate::error::BuildError;
use crate::kernel::KernelId;
use crate::types::Type;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Literal {
    Numeric(f64),
    Boolean(bool),
}

impl Literal {
    pub fn ty(&self) -> Type {
        match self {
            Literal::Numeric(_) => Type::Numeric,
            Literal::Boolean(_) => Type::Boolean,
        }
    }
}

impl From<f64> for Literal {
    fn from(x: f64) -> Self {
        Literal::Numeric(x)
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Boolean(b)
    }
}

/// Classical expression over kernel parameters and literals.
///
/// Composite nodes cache their result type; literal-only subtrees are always
/// folded, so a `Binary` or `Unary` node has at least one parameter below it.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Param {
        kernel: KernelId,
        position: usize,
        ty: Type,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        ty: Type,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        ty: Type,
    },
}

impl Expr {
    pub fn literal(value: impl Into<Literal>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn ty(&self) -> Type {
        match self {
            Expr::Literal(l) => l.ty(),
            Expr::Param { ty, .. } | Expr::Unary { ty, .. } | Expr::Binary { ty, .. } => *ty,
        }
    }

    pub fn as_literal(&self) -> Option<Literal> {
        match self {
            Expr::Literal(l) => Some(*l),
            _ => None,
        }
    }

    pub fn binary(op: BinOp, lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Result<Expr, BuildError> {
        let lhs = lhs.into();
        let rhs = rhs.into();
        let Some(ty) = binary_result_type(op, lhs.ty(), rhs.ty()) else {
            return Err(BuildError::BinaryOperands {
                op,
                lhs: lhs.ty(),
                rhs: rhs.ty(),
            });
        };
        if let (Some(a), Some(b)) = (lhs.as_literal(), rhs.as_literal()) {
            return fold_binary(op, a, b).map(Expr::Literal).ok_or(BuildError::BinaryOperands {
                op,
                lhs: lhs.ty(),
                rhs: rhs.ty(),
            });
        }
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            ty,
        })
    }

    pub fn unary(op: UnaryOp, operand: impl Into<Expr>) -> Result<Expr, BuildError> {
        let operand = operand.into();
        let ty = match (op, operand.ty()) {
            (UnaryOp::Neg, Type::Numeric) => Type::Numeric,
            (UnaryOp::Not, Type::Boolean) => Type::Boolean,
            (_, other) => return Err(BuildError::UnaryOperand { op, operand: other }),
        };
        match operand.as_literal() {
            Some(Literal::Numeric(x)) => Ok(Expr::Literal(Literal::Numeric(-x))),
            Some(Literal::Boolean(b)) => Ok(Expr::Literal(Literal::Boolean(!b))),
            None => Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
                ty,
            }),
        }
    }

    /// First kernel other than `kernel` whose parameter this expression mentions.
    pub(crate) fn foreign_owner(&self, kernel: KernelId) -> Option<KernelId> {
        match self {
            Expr::Literal(_) => None,
            Expr::Param { kernel: owner, .. } => (*owner != kernel).then_some(*owner),
            Expr::Unary { operand, .. } => operand.foreign_owner(kernel),
            Expr::Binary { lhs, rhs, .. } => lhs.foreign_owner(kernel).or_else(|| rhs.foreign_owner(kernel)),
        }
    }
}

impl From<Literal> for Expr {
    fn from(l: Literal) -> Self {
        Expr::Literal(l)
    }
}

impl From<f64> for Expr {
    fn from(x: f64) -> Self {
        Expr::Literal(Literal::Numeric(x))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Literal(Literal::Boolean(b))
    }
}

impl From<&Expr> for Expr {
    fn from(e: &Expr) -> Self {
        e.clone()
    }
}

fn binary_result_type(op: BinOp, lhs: Type, rhs: Type) -> Option<Type> {
    if lhs != rhs || lhs.is_quantum() {
        return None;
    }
    match (op, lhs) {
        (op, Type::Numeric) if op.is_arith() => Some(Type::Numeric),
        (op, Type::Numeric) if op.is_ordering() => Some(Type::Boolean),
        (BinOp::Eq | BinOp::Ne, _) => Some(Type::Boolean),
        (op, Type::Boolean) if op.is_logical() => Some(Type::Boolean),
        _ => None,
    }
}

/// `None` when `op` does not apply to these literal kinds.
fn fold_binary(op: BinOp, a: Literal, b: Literal) -> Option<Literal> {
    use Literal::{Boolean, Numeric};
    let folded = match (op, a, b) {
        (BinOp::Add, Numeric(x), Numeric(y)) => Numeric(x + y),
        (BinOp::Sub, Numeric(x), Numeric(y)) => Numeric(x - y),
        (BinOp::Mul, Numeric(x), Numeric(y)) => Numeric(x * y),
        (BinOp::Div, Numeric(x), Numeric(y)) => Numeric(x / y),
        (BinOp::Lt, Numeric(x), Numeric(y)) => Boolean(x < y),
        (BinOp::Gt, Numeric(x), Numeric(y)) => Boolean(x > y),
        (BinOp::Le, Numeric(x), Numeric(y)) => Boolean(x <= y),
        (BinOp::Ge, Numeric(x), Numeric(y)) => Boolean(x >= y),
        (BinOp::Eq, Numeric(_), Numeric(_)) | (BinOp::Eq, Boolean(_), Boolean(_)) => Boolean(a == b),
        (BinOp::Ne, Numeric(_), Numeric(_)) | (BinOp::Ne, Boolean(_), Boolean(_)) => Boolean(a != b),
        (BinOp::And, Boolean(x), Boolean(y)) => Boolean(x && y),
        (BinOp::Or, Boolean(x), Boolean(y)) => Boolean(x || y),
        _ => return None,
    };
    Some(folded)
}
