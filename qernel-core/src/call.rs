#![forbid(unsafe_code)]

use tracing::debug;

use crate::error::{Arity, BuildError};
use crate::kernel::{BoundArg, Call, Kernel, KernelBuilder, Op, Operand, Origin, Unit, Value};
use crate::types::{Type, Width};

/// Number of actual arguments one formal parameter may consume.
fn consumable(formal: Type) -> usize {
    match formal {
        Type::Register(Width::Fixed(n)) if n > 1 => n as usize,
        _ => 1,
    }
}

pub fn arity(callee: &Kernel) -> Arity {
    Arity {
        min: callee.params().len(),
        max: callee.params().iter().map(|&f| consumable(f)).sum(),
    }
}

fn unit_of(v: &Value) -> Unit {
    match v.origin() {
        Origin::Extract {
            register,
            index: Some(index),
        } => Unit::Slot { register, index },
        _ => Unit::Value(v.slot()),
    }
}

struct Binder<'a> {
    caller: &'a KernelBuilder,
    callee: &'a Kernel,
    args: &'a [Operand],
    arity: Arity,
}

impl Binder<'_> {
    fn arity_mismatch(&self) -> BuildError {
        BuildError::ArityMismatch {
            callee: self.callee.name(),
            expected: self.arity,
            actual: self.args.len(),
        }
    }

    fn type_mismatch(&self, param: usize, argument: usize, expected: Type) -> BuildError {
        BuildError::TypeMismatch {
            callee: self.callee.name(),
            param,
            argument,
            expected,
            actual: self.args[argument].ty(),
        }
    }

    fn bind(&self) -> Result<Vec<BoundArg>, BuildError> {
        let mut bound = Vec::with_capacity(self.callee.params().len());
        let mut next = 0usize;

        for (param, &formal) in self.callee.params().iter().enumerate() {
            let Some(first) = self.args.get(next) else {
                return Err(self.arity_mismatch());
            };
            let (arg, consumed) = match (formal, first) {
                (Type::Numeric | Type::Boolean, Operand::Expr(e)) if e.ty() == formal => {
                    (BoundArg::Classical(e.clone()), 1)
                }
                (Type::Qubit, Operand::Value(v)) => match v.ty() {
                    Type::Qubit => (BoundArg::Qubit(unit_of(v)), 1),
                    Type::Register(Width::Fixed(1)) => (
                        BoundArg::Qubit(Unit::Slot {
                            register: v.slot(),
                            index: 0,
                        }),
                        1,
                    ),
                    _ => return Err(self.type_mismatch(param, next, formal)),
                },
                (Type::Register(Width::Fixed(n)), Operand::Value(v)) => match v.ty() {
                    Type::Register(_) if v.ty() == formal => (BoundArg::Register(v.slot()), 1),
                    Type::Qubit if n > 0 => (self.flatten(param, next, n)?, n as usize),
                    Type::Register(Width::Fixed(m)) if m < n && self.qubit_follows(next) => {
                        return Err(BuildError::AmbiguousFlattening {
                            callee: self.callee.name(),
                            param,
                            argument: next,
                            expected: formal,
                            actual: v.ty(),
                        });
                    }
                    _ => return Err(self.type_mismatch(param, next, formal)),
                },
                (Type::Register(Width::Dynamic), Operand::Value(v)) if matches!(v.ty(), Type::Register(_)) => {
                    (BoundArg::Register(v.slot()), 1)
                }
                _ => return Err(self.type_mismatch(param, next, formal)),
            };
            bound.push(arg);
            next += consumed;
        }

        if next != self.args.len() {
            return Err(self.arity_mismatch());
        }
        Ok(bound)
    }

    fn qubit_follows(&self, argument: usize) -> bool {
        matches!(self.args.get(argument + 1), Some(Operand::Value(v)) if v.ty() == Type::Qubit)
    }

    /// Consume `n` consecutive qubit actuals starting at `start` for one register formal.
    fn flatten(&self, param: usize, start: usize, n: u32) -> Result<BoundArg, BuildError> {
        let formal = Type::register(n);
        let mut units = Vec::with_capacity(n as usize);
        for argument in start..start + n as usize {
            match self.args.get(argument) {
                None => return Err(self.arity_mismatch()),
                Some(Operand::Value(v)) if v.ty() == Type::Qubit => units.push(unit_of(v)),
                Some(Operand::Value(v)) => {
                    return Err(BuildError::AmbiguousFlattening {
                        callee: self.callee.name(),
                        param,
                        argument,
                        expected: formal,
                        actual: v.ty(),
                    });
                }
                Some(Operand::Expr(_)) => return Err(self.type_mismatch(param, argument, formal)),
            }
        }
        Ok(self.canonical(units))
    }

    /// A run covering a whole fixed register in order is that register.
    fn canonical(&self, units: Vec<Unit>) -> BoundArg {
        let Some(Unit::Slot { register, .. }) = units.first().copied() else {
            return BoundArg::Flattened(units);
        };
        let whole = self.caller.value_type(register) == Some(Type::register(units.len() as u32))
            && units.iter().enumerate().all(|(i, u)| {
                *u == Unit::Slot {
                    register,
                    index: i as u32,
                }
            });
        if whole {
            BoundArg::Register(register)
        } else {
            BoundArg::Flattened(units)
        }
    }
}

/// Check `args` against `callee`'s parameters and append the call to `caller`.
///
///  * each formal consumes one actual, except a fixed-width register formal which may
///    instead consume that many consecutive qubits
///  * every actual must be consumed
///  * on error the caller's body is left unchanged
pub(crate) fn bind_call(caller: &mut KernelBuilder, callee: &Kernel, args: &[Operand]) -> Result<(), BuildError> {
    caller.ensure_open()?;

    let arity = arity(callee);
    let binder = Binder {
        caller: &*caller,
        callee,
        args,
        arity,
    };
    if args.len() < arity.min || args.len() > arity.max {
        return Err(binder.arity_mismatch());
    }
    for a in args {
        caller.check_operand(a)?;
    }

    let bound = binder.bind()?;
    debug!(
        caller = %caller.name(),
        callee = %callee.name(),
        args = args.len(),
        "bound call"
    );
    caller.push(Op::Call(Call {
        callee: callee.clone(),
        args: bound,
    }));
    Ok(())
}
