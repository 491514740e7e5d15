#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use qernel_ir::{FunctionIR, IdGen, Index, Inst, InstKind, ModuleIR, Type as IrType, Value as IrValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::error::LowerError;
use crate::expr::{Expr, Literal};
use crate::kernel::{AllocSize, BoundArg, ExtractIndex, Kernel, KernelId, Op, SlotId, Unit};
use crate::types::{Type, Width, lower_type};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LowerConfig {
    /// Prepended to every generated function symbol.
    pub symbol_prefix: String,
    /// Attribute marking the root function.
    pub entry_attribute: String,
    /// Run the structural verifier on the lowered module.
    pub verify: bool,
    /// Merge kernels whose lowered bodies are identical.
    pub dedup_structural: bool,
}

impl Default for LowerConfig {
    fn default() -> Self {
        Self {
            symbol_prefix: "__qernel__".to_string(),
            entry_attribute: "qernel-entrypoint".to_string(),
            verify: true,
            dedup_structural: false,
        }
    }
}

/// Function symbol for `kernel`: `{prefix}{name}_{digest}`.
///
/// The digest is derived from kernel identity only, so two kernels never share a
/// symbol and the lowered structure never depends on it.
pub fn symbol_name(kernel: &Kernel, prefix: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"qernel.kernel");
    hasher.update(kernel.id().context.to_le_bytes());
    hasher.update(kernel.id().index.to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    let base = kernel
        .given_name()
        .map(sanitize)
        .unwrap_or_else(|| "builder_kernel".to_string());
    format!("{prefix}{base}_{}", &digest[..12])
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Callees before callers, each kernel once.
fn post_order(root: &Kernel) -> Vec<Kernel> {
    fn visit(k: &Kernel, seen: &mut HashSet<KernelId>, out: &mut Vec<Kernel>) {
        if !seen.insert(k.id()) {
            return;
        }
        for callee in k.callees() {
            visit(callee, seen, out);
        }
        out.push(k.clone());
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    visit(root, &mut seen, &mut out);
    out
}

/// Lower `root` and every kernel it reaches into one module.
#[instrument(skip_all, fields(root = %root.name()))]
pub fn lower_kernel(root: &Kernel, config: &LowerConfig) -> Result<ModuleIR, LowerError> {
    let mut symbols: HashMap<KernelId, String> = HashMap::new();
    let mut by_shape: HashMap<String, String> = HashMap::new();
    let mut functions = Vec::new();

    for kernel in post_order(root) {
        let is_root = kernel.id() == root.id();
        let symbol = symbol_name(&kernel, &config.symbol_prefix);
        let func = FunctionLowerer::new(&kernel, &symbols).lower(symbol.clone(), is_root)?;

        if config.dedup_structural && !is_root {
            let shape = fingerprint(&func);
            if let Some(existing) = by_shape.get(&shape) {
                debug!(kernel = %kernel.name(), symbol = %existing, "reusing structurally identical function");
                symbols.insert(kernel.id(), existing.clone());
                continue;
            }
            by_shape.insert(shape, symbol.clone());
        }

        debug!(kernel = %kernel.name(), %symbol, insts = func.body.len(), "lowered kernel");
        symbols.insert(kernel.id(), symbol);
        functions.push(func);
    }

    functions.reverse();
    let module = ModuleIR {
        entry_attribute: config.entry_attribute.clone(),
        functions,
    };
    if config.verify {
        qernel_ir::verify_module(&module)?;
    }
    Ok(module)
}

/// Digest of a function's signature and body, ignoring its own symbol.
fn fingerprint(func: &FunctionIR) -> String {
    let anonymous = FunctionIR {
        name: String::new(),
        entry_point: false,
        ..func.clone()
    };
    let text = ModuleIR {
        entry_attribute: String::new(),
        functions: vec![anonymous],
    }
    .to_string();
    hex::encode(Sha256::digest(text.as_bytes()))
}

struct FunctionLowerer<'k> {
    kernel: &'k Kernel,
    symbols: &'k HashMap<KernelId, String>,
    id: IdGen,
    body: Vec<Inst>,
    values: HashMap<SlotId, IrValue>,
    /// Most recent constant extract of each register position.
    extracted: HashMap<(SlotId, u32), IrValue>,
}

impl<'k> FunctionLowerer<'k> {
    fn new(kernel: &'k Kernel, symbols: &'k HashMap<KernelId, String>) -> Self {
        Self {
            kernel,
            symbols,
            id: IdGen::default(),
            body: Vec::new(),
            values: HashMap::new(),
            extracted: HashMap::new(),
        }
    }

    fn lower(mut self, name: String, entry_point: bool) -> Result<FunctionIR, LowerError> {
        let mut params = Vec::with_capacity(self.kernel.params().len());
        for (i, &ty) in self.kernel.params().iter().enumerate() {
            let v = self.id.fresh_value(lower_type(ty));
            self.values.insert(SlotId(i as u32), v);
            params.push(v);
        }

        for op in self.kernel.body() {
            self.lower_op(op)?;
        }

        Ok(FunctionIR {
            name,
            params,
            entry_point,
            body: self.body,
        })
    }

    fn value(&self, slot: SlotId) -> Result<IrValue, LowerError> {
        self.values.get(&slot).copied().ok_or_else(|| LowerError::Unresolved {
            kernel: self.kernel.name(),
            slot: slot.0,
        })
    }

    fn emit(&mut self, ty: IrType, kind: InstKind) -> IrValue {
        let result = self.id.fresh_value(ty);
        self.body.push(Inst {
            result: Some(result),
            kind,
        });
        result
    }

    fn emit_void(&mut self, kind: InstKind) {
        self.body.push(Inst { result: None, kind });
    }

    fn lower_expr(&mut self, e: &Expr) -> Result<IrValue, LowerError> {
        match e {
            Expr::Literal(Literal::Numeric(x)) => Ok(self.emit(IrType::F64, InstKind::ConstF64(*x))),
            Expr::Literal(Literal::Boolean(b)) => Ok(self.emit(IrType::I1, InstKind::ConstBool(*b))),
            Expr::Param { position, .. } => self.value(SlotId(*position as u32)),
            Expr::Unary { op, operand, ty } => {
                let operand = self.lower_expr(operand)?;
                Ok(self.emit(lower_type(*ty), InstKind::Unary { op: *op, operand }))
            }
            Expr::Binary { op, lhs, rhs, ty } => {
                let lhs = self.lower_expr(lhs)?;
                let rhs = self.lower_expr(rhs)?;
                Ok(self.emit(lower_type(*ty), InstKind::Binary { op: *op, lhs, rhs }))
            }
        }
    }

    fn lower_index(&mut self, e: &Expr) -> Result<IrValue, LowerError> {
        let operand = self.lower_expr(e)?;
        Ok(self.emit(IrType::I64, InstKind::FpToSi { operand }))
    }

    fn lower_unit(&mut self, unit: Unit) -> Result<IrValue, LowerError> {
        match unit {
            Unit::Value(slot) => self.value(slot),
            Unit::Slot { register, index } => {
                if let Some(v) = self.extracted.get(&(register, index)) {
                    return Ok(*v);
                }
                let reg = self.value(register)?;
                let v = self.emit(
                    IrType::Ref,
                    InstKind::ExtractRef {
                        register: reg,
                        index: Index::Const(index),
                    },
                );
                self.extracted.insert((register, index), v);
                Ok(v)
            }
        }
    }

    fn lower_slots(&self, slots: &[SlotId]) -> Result<Vec<IrValue>, LowerError> {
        slots.iter().map(|s| self.value(*s)).collect()
    }

    fn lower_op(&mut self, op: &Op) -> Result<(), LowerError> {
        match op {
            Op::Alloc { dest, size } => {
                let v = match size {
                    AllocSize::Fixed(n) => self.emit(IrType::Veq(Some(*n)), InstKind::Alloca { size: None }),
                    AllocSize::Dynamic(e) => {
                        let size = self.lower_index(e)?;
                        self.emit(IrType::Veq(None), InstKind::Alloca { size: Some(size) })
                    }
                };
                self.values.insert(*dest, v);
            }
            Op::Extract { dest, register, index } => {
                let reg = self.value(*register)?;
                let v = match index {
                    ExtractIndex::Const(i) => {
                        let v = self.emit(
                            IrType::Ref,
                            InstKind::ExtractRef {
                                register: reg,
                                index: Index::Const(*i),
                            },
                        );
                        self.extracted.insert((*register, *i), v);
                        v
                    }
                    ExtractIndex::Dynamic(e) => {
                        let i = self.lower_index(e)?;
                        self.emit(
                            IrType::Ref,
                            InstKind::ExtractRef {
                                register: reg,
                                index: Index::Dynamic(i),
                            },
                        )
                    }
                };
                self.values.insert(*dest, v);
            }
            Op::Slice {
                dest,
                register,
                start,
                len,
            } => {
                let reg = self.value(*register)?;
                let v = self.emit(
                    IrType::Veq(Some(*len)),
                    InstKind::SubVeq {
                        register: reg,
                        start: *start,
                        len: *len,
                    },
                );
                self.values.insert(*dest, v);
            }
            Op::Gate(g) => {
                let mut params = Vec::with_capacity(g.params.len());
                for p in &g.params {
                    params.push(self.lower_expr(p)?);
                }
                let controls = self.lower_slots(&g.controls)?;
                let targets = self.lower_slots(&g.targets)?;
                self.emit_void(InstKind::Gate {
                    name: g.name.clone(),
                    adjoint: g.adjoint,
                    params,
                    controls,
                    targets,
                });
            }
            Op::Measure { targets } => {
                let targets = self.lower_slots(targets)?;
                self.emit_void(InstKind::Measure { targets });
            }
            Op::Reset { targets } => {
                let targets = self.lower_slots(targets)?;
                self.emit_void(InstKind::Reset { targets });
            }
            Op::Call(call) => {
                let Some(callee) = self.symbols.get(&call.callee.id()).cloned() else {
                    return Err(LowerError::MissingCallee {
                        kernel: self.kernel.name(),
                        callee: call.callee.name(),
                    });
                };
                let mut args = Vec::with_capacity(call.args.len());
                for (arg, &formal) in call.args.iter().zip(call.callee.params()) {
                    let v = match arg {
                        BoundArg::Classical(e) => self.lower_expr(e)?,
                        BoundArg::Qubit(u) => self.lower_unit(*u)?,
                        BoundArg::Register(slot) => {
                            let reg = self.value(*slot)?;
                            if formal == Type::Register(Width::Dynamic) && reg.ty != IrType::Veq(None) {
                                self.emit(IrType::Veq(None), InstKind::RelaxSize { register: reg })
                            } else {
                                reg
                            }
                        }
                        BoundArg::Flattened(units) => {
                            let mut parts = Vec::with_capacity(units.len());
                            for u in units {
                                parts.push(self.lower_unit(*u)?);
                            }
                            self.emit(IrType::Veq(Some(parts.len() as u32)), InstKind::Concat { parts })
                        }
                    };
                    args.push(v);
                }
                self.emit_void(InstKind::Call { callee, args });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinOp;
    use crate::kernel::KernelContext;

    fn lower(root: &Kernel) -> ModuleIR {
        lower_kernel(root, &LowerConfig::default()).unwrap()
    }

    #[test]
    fn symbols_are_per_identity() {
        let ctx = KernelContext::new();
        let (mut a, _) = ctx.begin_named("same", &[]);
        let (mut b, _) = ctx.begin_named("same", &[]);
        let a = a.finalize();
        let b = b.finalize();
        let sa = symbol_name(&a, "p_");
        let sb = symbol_name(&b, "p_");
        assert_ne!(sa, sb);
        assert!(sa.starts_with("p_same_"));
        assert_eq!(sa.len(), "p_same_".len() + 12);
        assert_eq!(sa, symbol_name(&a, "p_"));
    }

    #[test]
    fn sanitizes_given_names() {
        let ctx = KernelContext::new();
        let (mut k, _) = ctx.begin_named("bell pair!", &[]);
        let k = k.finalize();
        assert!(symbol_name(&k, "").starts_with("bell_pair__"));
    }

    #[test]
    fn dynamic_sizes_and_indices_are_converted() {
        let ctx = KernelContext::new();
        let (mut k, p) = ctx.begin(&[Type::Numeric]);
        let n = p[0].as_expr().unwrap().clone();
        let reg = k.allocate_dynamic(n.clone()).unwrap();
        let last = Expr::binary(BinOp::Sub, &n, 1.0).unwrap();
        let q = k.extract_dynamic(&reg, last).unwrap();
        k.h(&q).unwrap();
        k.mz(&[reg]).unwrap();
        let m = lower(&k.finalize());

        let kinds: Vec<&InstKind> = m.functions[0].body.iter().map(|i| &i.kind).collect();
        assert!(matches!(kinds[0], InstKind::FpToSi { .. }));
        assert!(matches!(kinds[1], InstKind::Alloca { size: Some(_) }));
        assert!(matches!(kinds[2], InstKind::ConstF64(x) if *x == 1.0));
        assert!(matches!(kinds[3], InstKind::Binary { op: BinOp::Sub, .. }));
        assert!(matches!(kinds[4], InstKind::FpToSi { .. }));
        assert!(matches!(kinds[5], InstKind::ExtractRef { index: Index::Dynamic(_), .. }));
        assert!(matches!(kinds[6], InstKind::Gate { .. }));
        assert!(matches!(kinds[7], InstKind::Measure { .. }));
    }

    #[test]
    fn fixed_register_passed_to_dynamic_formal_is_relaxed() {
        let ctx = KernelContext::new();
        let (mut callee, cp) = ctx.begin_named("any_width", &[Type::dynamic_register()]);
        let reg = cp[0].as_value().unwrap();
        callee.reset(&[reg]).unwrap();
        let callee = callee.finalize();

        let (mut root, _) = ctx.begin(&[]);
        let reg = root.allocate(4).unwrap();
        root.call(&callee, &[reg.into()]).unwrap();
        let m = lower(&root.finalize());

        let body = &m.functions[0].body;
        assert!(matches!(body[1].kind, InstKind::RelaxSize { .. }));
        let InstKind::Call { args, .. } = &body[2].kind else {
            panic!("expected call, got {:?}", body[2]);
        };
        assert_eq!(args[0].ty, IrType::Veq(None));
    }

    #[test]
    fn flattened_view_is_concatenated() {
        let ctx = KernelContext::new();
        let (mut callee, _) = ctx.begin_named("pair", &[Type::register(2)]);
        let callee = callee.finalize();

        let (mut root, _) = ctx.begin(&[]);
        let reg = root.allocate(3).unwrap();
        let q2 = root.extract(&reg, 2).unwrap();
        let q0 = root.extract(&reg, 0).unwrap();
        root.call(&callee, &[q2.into(), q0.into()]).unwrap();
        let m = lower(&root.finalize());

        let body = &m.functions[0].body;
        assert_eq!(body.len(), 5);
        let InstKind::Concat { parts } = &body[3].kind else {
            panic!("expected concat, got {:?}", body[3]);
        };
        assert_eq!(parts, &vec![body[1].result.unwrap(), body[2].result.unwrap()]);
        assert_eq!(body[3].result.map(|r| r.ty), Some(IrType::Veq(Some(2))));
    }

    #[test]
    fn single_qubit_slice_is_extracted_at_the_call() {
        let ctx = KernelContext::new();
        let (mut callee, cp) = ctx.begin_named("flip", &[Type::Qubit]);
        callee.x(&cp[0].as_value().unwrap()).unwrap();
        let callee = callee.finalize();

        let (mut root, _) = ctx.begin(&[]);
        let reg = root.allocate(2).unwrap();
        let one = root.slice(&reg, 1, 1).unwrap();
        root.call(&callee, &[one.into()]).unwrap();
        let m = lower(&root.finalize());

        let body = &m.functions[0].body;
        assert!(matches!(body[1].kind, InstKind::SubVeq { start: 1, len: 1, .. }));
        assert!(matches!(body[2].kind, InstKind::ExtractRef { index: Index::Const(0), .. }));
        assert!(matches!(body[3].kind, InstKind::Call { .. }));
    }

    #[test]
    fn shared_callee_is_lowered_once() {
        let ctx = KernelContext::new();
        let (mut leaf, lp) = ctx.begin_named("leaf", &[Type::Qubit]);
        leaf.h(&lp[0].as_value().unwrap()).unwrap();
        let leaf = leaf.finalize();

        let (mut mid, mp) = ctx.begin_named("mid", &[Type::Qubit]);
        mid.call(&leaf, &[mp[0].clone()]).unwrap();
        let mid = mid.finalize();

        let (mut root, _) = ctx.begin(&[]);
        let reg = root.allocate(1).unwrap();
        let q = root.extract(&reg, 0).unwrap();
        root.call(&leaf, &[q.into()]).unwrap();
        root.call(&mid, &[q.into()]).unwrap();
        let m = lower(&root.finalize());

        assert_eq!(m.functions.len(), 3);
        assert!(m.functions[0].entry_point);
        assert!(m.functions[1..].iter().all(|f| !f.entry_point));
        let leaf_symbol = symbol_name(&leaf, &LowerConfig::default().symbol_prefix);
        assert_eq!(
            m.functions.iter().filter(|f| f.name == leaf_symbol).count(),
            1
        );
    }

    #[test]
    fn kernels_from_separate_contexts_stay_distinct() {
        let first = KernelContext::new();
        let second = KernelContext::new();
        let flip = |ctx: &KernelContext, phase: bool| {
            let (mut k, p) = ctx.begin(&[Type::Qubit]);
            let q = p[0].as_value().unwrap();
            let recorded = if phase { k.z(&q) } else { k.h(&q) };
            recorded.unwrap();
            k.finalize()
        };
        let h = flip(&first, false);
        let z = flip(&second, true);
        assert_ne!(h.id(), z.id());
        assert_ne!(h, z);

        let (mut root, _) = first.begin(&[]);
        let reg = root.allocate(1).unwrap();
        let q = root.extract(&reg, 0).unwrap();
        root.call(&h, &[q.into()]).unwrap();
        root.call(&z, &[q.into()]).unwrap();
        let m = lower(&root.finalize());

        assert_eq!(m.functions.len(), 3);
        let callees: Vec<&str> = m.functions[0].calls().map(|(c, _)| c).collect();
        assert_ne!(callees[0], callees[1]);
        let gate_of = |symbol: &str| {
            m.function(symbol).and_then(|f| {
                f.body.iter().find_map(|i| match &i.kind {
                    InstKind::Gate { name, .. } => Some(name.clone()),
                    _ => None,
                })
            })
        };
        assert_eq!(gate_of(callees[0]).as_deref(), Some("h"));
        assert_eq!(gate_of(callees[1]).as_deref(), Some("z"));
    }

    #[test]
    fn structural_dedup_is_opt_in() {
        let ctx = KernelContext::new();
        let twin = |ctx: &KernelContext| {
            let (mut k, p) = ctx.begin(&[Type::Qubit]);
            k.h(&p[0].as_value().unwrap()).unwrap();
            k.finalize()
        };
        let a = twin(&ctx);
        let b = twin(&ctx);

        let (mut root, _) = ctx.begin(&[]);
        let reg = root.allocate(1).unwrap();
        let q = root.extract(&reg, 0).unwrap();
        root.call(&a, &[q.into()]).unwrap();
        root.call(&b, &[q.into()]).unwrap();
        let root = root.finalize();

        assert_eq!(lower(&root).functions.len(), 3);

        let config = LowerConfig {
            dedup_structural: true,
            ..LowerConfig::default()
        };
        let m = lower_kernel(&root, &config).unwrap();
        assert_eq!(m.functions.len(), 2);
        let callees: Vec<&str> = m.functions[0].calls().map(|(c, _)| c).collect();
        assert_eq!(callees[0], callees[1]);
    }
}
