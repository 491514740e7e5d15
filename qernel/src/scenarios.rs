#![forbid(unsafe_code)]

//! Built-in kernel graphs exercised by the driver and the regression tests.

use qernel_core::{BinOp, BuildError, Expr, Kernel, KernelContext, Operand, Type};

pub struct Scenario {
    pub name: &'static str,
    pub summary: &'static str,
    pub build: fn(&KernelContext) -> Result<Kernel, BuildError>,
}

pub const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "controlled-rotation",
        summary: "root allocates two qubits and calls cx; rz(2c); cx with (q0, q1, theta)",
        build: controlled_rotation,
    },
    Scenario {
        name: "dropped-argument",
        summary: "same callee, but theta is left out of the call",
        build: dropped_argument,
    },
    Scenario {
        name: "trailing-argument",
        summary: "a spare qubit follows the arguments a qreg<2> and angle callee accepts",
        build: trailing_argument,
    },
    Scenario {
        name: "flattened-register",
        summary: "two extracted qubits fill a qreg<2> parameter",
        build: flattened_register,
    },
];

pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.name == name)
}

/// Callee taking `(qubit a, qubit b, f64 c)` with body `cx(a, b); rz(2c, b); cx(a, b)`.
pub fn entangling_rotation(ctx: &KernelContext) -> Result<Kernel, BuildError> {
    let (mut k, p) = ctx.begin_named("entangling_rotation", &[Type::Qubit, Type::Qubit, Type::Numeric]);
    let (a, b, c) = (handle(&p[0])?, handle(&p[1])?, numeric(&p[2])?);
    k.cx(&a, &b)?;
    k.rz(Expr::binary(BinOp::Mul, c, 2.0)?, &b)?;
    k.cx(&a, &b)?;
    Ok(k.finalize())
}

fn controlled_rotation(ctx: &KernelContext) -> Result<Kernel, BuildError> {
    let callee = entangling_rotation(ctx)?;
    let (mut root, p) = ctx.begin_named("controlled_rotation", &[Type::Numeric]);
    let reg = root.allocate(2)?;
    let q0 = root.extract(&reg, 0)?;
    let q1 = root.extract(&reg, 1)?;
    root.call(&callee, &[q0.into(), q1.into(), p[0].clone()])?;
    Ok(root.finalize())
}

fn dropped_argument(ctx: &KernelContext) -> Result<Kernel, BuildError> {
    let callee = entangling_rotation(ctx)?;
    let (mut root, _) = ctx.begin_named("dropped_argument", &[Type::Numeric]);
    let reg = root.allocate(2)?;
    let q0 = root.extract(&reg, 0)?;
    let q1 = root.extract(&reg, 1)?;
    root.call(&callee, &[q0.into(), q1.into()])?;
    Ok(root.finalize())
}

fn trailing_argument(ctx: &KernelContext) -> Result<Kernel, BuildError> {
    let (mut callee, cp) = ctx.begin_named("pair_rotation", &[Type::register(2), Type::Numeric]);
    let pair = handle(&cp[0])?;
    let angle = numeric(&cp[1])?;
    let q0 = callee.extract(&pair, 0)?;
    callee.rx(angle, &q0)?;
    let callee = callee.finalize();

    let (mut root, p) = ctx.begin_named("trailing_argument", &[Type::Numeric]);
    let reg = root.allocate(3)?;
    let q0 = root.extract(&reg, 0)?;
    let q1 = root.extract(&reg, 1)?;
    let q2 = root.extract(&reg, 2)?;
    root.call(&callee, &[q0.into(), q1.into(), p[0].clone(), q2.into()])?;
    Ok(root.finalize())
}

fn flattened_register(ctx: &KernelContext) -> Result<Kernel, BuildError> {
    let (mut callee, cp) = ctx.begin_named("bell_pair", &[Type::register(2)]);
    let pair = handle(&cp[0])?;
    let a = callee.extract(&pair, 0)?;
    let b = callee.extract(&pair, 1)?;
    callee.h(&a)?;
    callee.cx(&a, &b)?;
    let callee = callee.finalize();

    let (mut root, _) = ctx.begin_named("flattened_register", &[]);
    let reg = root.allocate(2)?;
    let q0 = root.extract(&reg, 0)?;
    let q1 = root.extract(&reg, 1)?;
    root.call(&callee, &[q0.into(), q1.into()])?;
    root.mz(&[reg])?;
    Ok(root.finalize())
}

fn handle(op: &Operand) -> Result<qernel_core::Value, BuildError> {
    op.as_value().ok_or_else(|| BuildError::OperandType {
        what: "scenario parameter",
        expected: Type::Qubit,
        actual: op.ty(),
    })
}

fn numeric(op: &Operand) -> Result<Expr, BuildError> {
    op.as_expr().cloned().ok_or_else(|| BuildError::OperandType {
        what: "scenario parameter",
        expected: Type::Numeric,
        actual: op.ty(),
    })
}
