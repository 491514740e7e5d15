#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};

use miette::Diagnostic;
use thiserror::Error;

use crate::{FunctionIR, Index, Inst, InstKind, ModuleIR, Type, UnaryOp, Value, ValueId};

/// A lowered module broke one of its own typing rules.
///
/// Reaching this means the front end accepted something it should not have.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("verification failure in @{function}{}: {message}", inst.map(|i| format!(" at instruction {i}")).unwrap_or_default())]
#[diagnostic(
    code(qernel::verify),
    help("this is an internal defect of the kernel builder, not a user error")
)]
pub struct VerifyError {
    pub function: String,
    pub inst: Option<usize>,
    pub message: String,
}

/// Check every function and instruction of `module` against the IR type rules.
pub fn verify_module(module: &ModuleIR) -> Result<(), VerifyError> {
    let module_err = |message: String| VerifyError {
        function: "<module>".to_string(),
        inst: None,
        message,
    };

    let mut signatures: BTreeMap<&str, Vec<Type>> = BTreeMap::new();
    for f in &module.functions {
        if signatures.insert(f.name.as_str(), f.param_types()).is_some() {
            return Err(module_err(format!("duplicate function symbol @{}", f.name)));
        }
    }

    let entries = module.functions.iter().filter(|f| f.entry_point).count();
    if entries != 1 {
        return Err(module_err(format!(
            "expected exactly one entry-point function, found {entries}"
        )));
    }

    for f in &module.functions {
        verify_function(f, &signatures)?;
    }
    Ok(())
}

struct FnCheck<'m> {
    func: &'m FunctionIR,
    signatures: &'m BTreeMap<&'m str, Vec<Type>>,
    defs: HashMap<ValueId, Type>,
    pos: Option<usize>,
}

impl FnCheck<'_> {
    fn err(&self, message: impl Into<String>) -> VerifyError {
        VerifyError {
            function: self.func.name.clone(),
            inst: self.pos,
            message: message.into(),
        }
    }

    fn define(&mut self, v: Value) -> Result<(), VerifyError> {
        if self.defs.insert(v.id, v.ty).is_some() {
            return Err(self.err(format!("value {} defined twice", v.id.0)));
        }
        Ok(())
    }

    fn use_value(&self, v: &Value) -> Result<(), VerifyError> {
        match self.defs.get(&v.id) {
            None => Err(self.err(format!("use of undefined value {}", v.id.0))),
            Some(def) if *def != v.ty => Err(self.err(format!(
                "value {} used as {} but defined as {}",
                v.id.0, v.ty, def
            ))),
            Some(_) => Ok(()),
        }
    }

    fn expect(&self, what: &str, v: &Value, want: Type) -> Result<(), VerifyError> {
        if v.ty != want {
            return Err(self.err(format!("{what} must be {want}, found {}", v.ty)));
        }
        Ok(())
    }

    fn expect_result(&self, inst: &Inst, want: Type) -> Result<(), VerifyError> {
        match inst.result {
            Some(r) if r.ty == want => Ok(()),
            Some(r) => Err(self.err(format!("result must be {want}, found {}", r.ty))),
            None => Err(self.err("instruction is missing its result")),
        }
    }

    fn result_ty(&self, inst: &Inst) -> Result<Type, VerifyError> {
        inst.result
            .map(|r| r.ty)
            .ok_or_else(|| self.err("instruction is missing its result"))
    }

    fn check_inst(&self, inst: &Inst) -> Result<(), VerifyError> {
        match &inst.kind {
            InstKind::ConstF64(_) => self.expect_result(inst, Type::F64),
            InstKind::ConstBool(_) => self.expect_result(inst, Type::I1),
            InstKind::Unary { op, operand } => {
                let ty = match op {
                    UnaryOp::Neg => Type::F64,
                    UnaryOp::Not => Type::I1,
                };
                self.expect("unary operand", operand, ty)?;
                self.expect_result(inst, ty)
            }
            InstKind::Binary { op, lhs, rhs } => {
                if lhs.ty != rhs.ty {
                    return Err(self.err(format!(
                        "binary operands disagree: {} vs {}",
                        lhs.ty, rhs.ty
                    )));
                }
                if op.is_arith() {
                    self.expect("arithmetic operand", lhs, Type::F64)?;
                    self.expect_result(inst, Type::F64)
                } else if op.is_logical() {
                    self.expect("logical operand", lhs, Type::I1)?;
                    self.expect_result(inst, Type::I1)
                } else {
                    let comparable = match lhs.ty {
                        Type::F64 => true,
                        Type::I1 => !op.is_ordering(),
                        _ => false,
                    };
                    if !comparable {
                        return Err(self.err(format!("cannot compare values of type {}", lhs.ty)));
                    }
                    self.expect_result(inst, Type::I1)
                }
            }
            InstKind::FpToSi { operand } => {
                self.expect("conversion operand", operand, Type::F64)?;
                self.expect_result(inst, Type::I64)
            }
            InstKind::Alloca { size: None } => match self.result_ty(inst)? {
                Type::Veq(Some(_)) => Ok(()),
                other => Err(self.err(format!("static alloca must produce a sized vector, found {other}"))),
            },
            InstKind::Alloca { size: Some(size) } => {
                self.expect("alloca size", size, Type::I64)?;
                self.expect_result(inst, Type::Veq(None))
            }
            InstKind::ExtractRef { register, index } => {
                let Type::Veq(width) = register.ty else {
                    return Err(self.err(format!("extract_ref from non-vector {}", register.ty)));
                };
                match index {
                    Index::Const(i) => {
                        if let Some(n) = width {
                            if *i >= n {
                                return Err(self.err(format!("index {i} out of range for width {n}")));
                            }
                        }
                    }
                    Index::Dynamic(i) => self.expect("extract index", i, Type::I64)?,
                }
                self.expect_result(inst, Type::Ref)
            }
            InstKind::SubVeq { register, start, len } => {
                let Type::Veq(width) = register.ty else {
                    return Err(self.err(format!("subveq of non-vector {}", register.ty)));
                };
                if let Some(n) = width {
                    if u64::from(*start) + u64::from(*len) > u64::from(n) {
                        return Err(self.err(format!("subveq {start}+{len} exceeds width {n}")));
                    }
                }
                self.expect_result(inst, Type::Veq(Some(*len)))
            }
            InstKind::Concat { parts } => {
                let mut width = 0u32;
                for p in parts {
                    let part = match p.ty {
                        Type::Ref => 1,
                        Type::Veq(Some(n)) => n,
                        other => return Err(self.err(format!("cannot concat a value of type {other}"))),
                    };
                    width = width
                        .checked_add(part)
                        .ok_or_else(|| self.err("concat width overflows u32"))?;
                }
                self.expect_result(inst, Type::Veq(Some(width)))
            }
            InstKind::RelaxSize { register } => {
                if !matches!(register.ty, Type::Veq(Some(_))) {
                    return Err(self.err(format!("relax_size needs a sized vector, found {}", register.ty)));
                }
                self.expect_result(inst, Type::Veq(None))
            }
            InstKind::Gate {
                name,
                params,
                controls,
                targets,
                ..
            } => {
                if targets.is_empty() {
                    return Err(self.err(format!("gate {name} has no targets")));
                }
                for p in params {
                    self.expect("gate parameter", p, Type::F64)?;
                }
                for q in controls.iter().chain(targets.iter()) {
                    self.expect("gate qubit operand", q, Type::Ref)?;
                }
                Ok(())
            }
            InstKind::Measure { targets } | InstKind::Reset { targets } => {
                if targets.is_empty() {
                    return Err(self.err("measurement/reset with no targets"));
                }
                for t in targets {
                    if !t.ty.is_quantum() {
                        return Err(self.err(format!("cannot measure or reset a {}", t.ty)));
                    }
                }
                Ok(())
            }
            InstKind::Call { callee, args } => {
                let Some(sig) = self.signatures.get(callee.as_str()) else {
                    return Err(self.err(format!("call to unknown symbol @{callee}")));
                };
                if sig.len() != args.len() {
                    return Err(self.err(format!(
                        "call to @{callee} passes {} operand(s), callee declares {}",
                        args.len(),
                        sig.len()
                    )));
                }
                for (i, (arg, want)) in args.iter().zip(sig.iter()).enumerate() {
                    if arg.ty != *want {
                        return Err(self.err(format!(
                            "call to @{callee} operand {i} is {}, callee expects {want}",
                            arg.ty
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

fn verify_function(func: &FunctionIR, signatures: &BTreeMap<&str, Vec<Type>>) -> Result<(), VerifyError> {
    let mut check = FnCheck {
        func,
        signatures,
        defs: HashMap::new(),
        pos: None,
    };

    let mut seen = BTreeSet::new();
    for p in &func.params {
        if !seen.insert(p.id) {
            return Err(check.err(format!("parameter value {} declared twice", p.id.0)));
        }
        check.define(*p)?;
    }

    for (i, inst) in func.body.iter().enumerate() {
        check.pos = Some(i);
        for operand in inst.kind.operands() {
            check.use_value(&operand)?;
        }
        if inst.kind.has_result() != inst.result.is_some() {
            return Err(check.err(if inst.result.is_some() {
                "void instruction carries a result"
            } else {
                "instruction is missing its result"
            }));
        }
        check.check_inst(inst)?;
        if let Some(r) = inst.result {
            check.define(r)?;
        }
    }
    Ok(())
}
