#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;

use crate::{BinOp, FunctionIR, Index, Inst, InstKind, ModuleIR, Type, UnaryOp, Value, ValueId};

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl fmt::Display for ModuleIR {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, func) in self.functions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            render_function(f, func, &self.entry_attribute)?;
        }
        Ok(())
    }
}

/// Positional names: `%argN` for parameters, `%N` for results in definition order.
struct Names {
    names: HashMap<ValueId, String>,
}

impl Names {
    fn for_function(func: &FunctionIR) -> Self {
        let mut names = HashMap::new();
        for (i, p) in func.params.iter().enumerate() {
            names.insert(p.id, format!("%arg{i}"));
        }
        let mut n = 0usize;
        for inst in &func.body {
            if let Some(r) = inst.result {
                names.insert(r.id, format!("%{n}"));
                n += 1;
            }
        }
        Self { names }
    }

    fn get(&self, v: &Value) -> String {
        self.names
            .get(&v.id)
            .cloned()
            .unwrap_or_else(|| format!("%<undef {}>", v.id.0))
    }

    fn list(&self, vs: &[Value]) -> String {
        vs.iter().map(|v| self.get(v)).collect::<Vec<_>>().join(", ")
    }
}

fn type_list(vs: &[Value]) -> String {
    vs.iter().map(|v| v.ty.display()).collect::<Vec<_>>().join(", ")
}

fn render_function(f: &mut fmt::Formatter<'_>, func: &FunctionIR, entry_attribute: &str) -> fmt::Result {
    let names = Names::for_function(func);
    let params = func
        .params
        .iter()
        .map(|p| format!("{}: {}", names.get(p), p.ty))
        .collect::<Vec<_>>()
        .join(", ");
    write!(f, "func.func @{}({params})", func.name)?;
    if func.entry_point {
        write!(f, " attributes {{\"{entry_attribute}\"}}")?;
    }
    writeln!(f, " {{")?;
    for inst in &func.body {
        writeln!(f, "  {}", render_inst(inst, &names))?;
    }
    writeln!(f, "  return")?;
    writeln!(f, "}}")
}

fn binop_mnemonic(op: BinOp, operand_ty: Type) -> String {
    let float = operand_ty == Type::F64;
    match op {
        BinOp::Add => "arith.addf".to_string(),
        BinOp::Sub => "arith.subf".to_string(),
        BinOp::Mul => "arith.mulf".to_string(),
        BinOp::Div => "arith.divf".to_string(),
        BinOp::And => "arith.andi".to_string(),
        BinOp::Or => "arith.ori".to_string(),
        cmp => {
            let pred = match (cmp, float) {
                (BinOp::Eq, true) => "oeq",
                (BinOp::Ne, true) => "one",
                (BinOp::Lt, _) => "olt",
                (BinOp::Gt, _) => "ogt",
                (BinOp::Le, _) => "ole",
                (BinOp::Ge, _) => "oge",
                (BinOp::Eq, false) => "eq",
                _ => "ne",
            };
            if float {
                format!("arith.cmpf {pred},")
            } else {
                format!("arith.cmpi {pred},")
            }
        }
    }
}

fn render_inst(inst: &Inst, names: &Names) -> String {
    let body = match &inst.kind {
        InstKind::ConstF64(x) => format!("arith.constant {x:?} : f64"),
        InstKind::ConstBool(b) => format!("arith.constant {b} : i1"),
        InstKind::Unary { op, operand } => {
            let m = match op {
                UnaryOp::Neg => "arith.negf",
                UnaryOp::Not => "arith.noti",
            };
            format!("{m} {} : {}", names.get(operand), operand.ty)
        }
        InstKind::Binary { op, lhs, rhs } => format!(
            "{} {}, {} : {}",
            binop_mnemonic(*op, lhs.ty),
            names.get(lhs),
            names.get(rhs),
            lhs.ty
        ),
        InstKind::FpToSi { operand } => {
            format!("arith.fptosi {} : f64 to i64", names.get(operand))
        }
        InstKind::Alloca { size: None } => {
            let ty = inst.result.map(|r| r.ty).unwrap_or(Type::Veq(None));
            format!("qernel.alloca {ty}")
        }
        InstKind::Alloca { size: Some(size) } => {
            format!("qernel.alloca {}[{} : i64]", Type::Veq(None), names.get(size))
        }
        InstKind::ExtractRef { register, index } => match index {
            Index::Const(i) => format!(
                "qernel.extract_ref {}[{i}] : ({}) -> {}",
                names.get(register),
                register.ty,
                Type::Ref
            ),
            Index::Dynamic(i) => format!(
                "qernel.extract_ref {}[{}] : ({}, i64) -> {}",
                names.get(register),
                names.get(i),
                register.ty,
                Type::Ref
            ),
        },
        InstKind::SubVeq { register, start, len } => format!(
            "qernel.subveq {}, {start}, {len} : ({}) -> {}",
            names.get(register),
            register.ty,
            Type::Veq(Some(*len))
        ),
        InstKind::Concat { parts } => format!(
            "qernel.concat {} : ({}) -> {}",
            names.list(parts),
            type_list(parts),
            inst.result.map(|r| r.ty).unwrap_or(Type::Veq(None))
        ),
        InstKind::RelaxSize { register } => format!(
            "qernel.relax_size {} : ({}) -> {}",
            names.get(register),
            register.ty,
            Type::Veq(None)
        ),
        InstKind::Gate {
            name,
            adjoint,
            params,
            controls,
            targets,
        } => {
            let mut s = format!("qernel.{name}");
            if *adjoint {
                s.push_str("<adj>");
            }
            if !params.is_empty() {
                s.push_str(&format!(" ({})", names.list(params)));
            }
            if !controls.is_empty() {
                s.push_str(&format!(" [{}]", names.list(controls)));
            }
            let all: Vec<Value> = inst.kind.operands();
            format!("{s} {} : ({}) -> ()", names.list(targets), type_list(&all))
        }
        InstKind::Measure { targets } => format!(
            "qernel.mz {} : ({}) -> ()",
            names.list(targets),
            type_list(targets)
        ),
        InstKind::Reset { targets } => format!(
            "qernel.reset {} : ({}) -> ()",
            names.list(targets),
            type_list(targets)
        ),
        InstKind::Call { callee, args } => format!(
            "call @{callee}({}) : ({}) -> ()",
            names.list(args),
            type_list(args)
        ),
    };
    match inst.result {
        Some(r) => format!("{} = {body}", names.get(&r)),
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdGen;

    #[test]
    fn renders_positional_names_and_entry_attribute() {
        let mut id = IdGen::default();
        let theta = id.fresh_value(Type::F64);
        let reg = id.fresh_value(Type::Veq(Some(2)));
        let q0 = id.fresh_value(Type::Ref);

        let mut m = ModuleIR::new("entry");
        m.functions.push(FunctionIR {
            name: "root".to_string(),
            params: vec![theta],
            entry_point: true,
            body: vec![
                Inst {
                    result: Some(reg),
                    kind: InstKind::Alloca { size: None },
                },
                Inst {
                    result: Some(q0),
                    kind: InstKind::ExtractRef {
                        register: reg,
                        index: Index::Const(0),
                    },
                },
                Inst {
                    result: None,
                    kind: InstKind::Gate {
                        name: "rz".to_string(),
                        adjoint: false,
                        params: vec![theta],
                        controls: vec![],
                        targets: vec![q0],
                    },
                },
            ],
        });

        let text = m.to_string();
        let expected = "\
func.func @root(%arg0: f64) attributes {\"entry\"} {
  %0 = qernel.alloca !qernel.veq<2>
  %1 = qernel.extract_ref %0[0] : (!qernel.veq<2>) -> !qernel.ref
  qernel.rz (%arg0) %1 : (f64, !qernel.ref) -> ()
  return
}
";
        assert_eq!(text, expected);
    }

    #[test]
    fn renders_controlled_gate_and_float_compare() {
        let mut id = IdGen::default();
        let a = id.fresh_value(Type::Ref);
        let b = id.fresh_value(Type::Ref);
        let x = id.fresh_value(Type::F64);
        let c = id.fresh_value(Type::I1);
        let f = FunctionIR {
            name: "k".to_string(),
            params: vec![a, b, x],
            entry_point: false,
            body: vec![
                Inst {
                    result: Some(c),
                    kind: InstKind::Binary {
                        op: BinOp::Lt,
                        lhs: x,
                        rhs: x,
                    },
                },
                Inst {
                    result: None,
                    kind: InstKind::Gate {
                        name: "x".to_string(),
                        adjoint: false,
                        params: vec![],
                        controls: vec![a],
                        targets: vec![b],
                    },
                },
            ],
        };
        let names = Names::for_function(&f);
        assert_eq!(
            render_inst(&f.body[0], &names),
            "%0 = arith.cmpf olt, %arg2, %arg2 : f64"
        );
        assert_eq!(
            render_inst(&f.body[1], &names),
            "qernel.x [%arg0] %arg1 : (!qernel.ref, !qernel.ref) -> ()"
        );
    }
}
