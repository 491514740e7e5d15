#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, trace};

use crate::call::bind_call;
use crate::error::BuildError;
use crate::expr::{Expr, Literal};
use crate::types::{Type, Width};

/// Kernel identity: the creating context plus a per-context counter.
///
/// Context numbers are drawn from a process-wide counter, so no two kernels
/// in one process share an identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelId {
    pub context: u32,
    pub index: u32,
}

impl KernelId {
    pub fn new(context: u32, index: u32) -> Self {
        Self { context, index }
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.context, self.index)
    }
}

static NEXT_CONTEXT: AtomicU32 = AtomicU32::new(0);

/// Index of a value in its kernel's value table. Parameters occupy the first slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Origin {
    Param(usize),
    Alloc,
    /// A view of one qubit of `register`; `index` is known for constant extracts.
    Extract { register: SlotId, index: Option<u32> },
    Slice { register: SlotId, start: u32 },
}

/// A quantum value recorded by a kernel builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Value {
    kernel: KernelId,
    slot: SlotId,
    ty: Type,
    origin: Origin,
}

impl Value {
    pub fn kernel(&self) -> KernelId {
        self.kernel
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }
}

/// One actual argument or parameter proxy: a quantum value or a classical expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Value(Value),
    Expr(Expr),
}

impl Operand {
    pub fn ty(&self) -> Type {
        match self {
            Operand::Value(v) => v.ty,
            Operand::Expr(e) => e.ty(),
        }
    }

    /// Parameter position, if this operand is a kernel parameter.
    pub fn position(&self) -> Option<usize> {
        match self {
            Operand::Value(Value {
                origin: Origin::Param(p),
                ..
            })
            | Operand::Expr(Expr::Param { position: p, .. }) => Some(*p),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<Value> {
        match self {
            Operand::Value(v) => Some(*v),
            Operand::Expr(_) => None,
        }
    }

    pub fn as_expr(&self) -> Option<&Expr> {
        match self {
            Operand::Expr(e) => Some(e),
            Operand::Value(_) => None,
        }
    }
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Value(v)
    }
}

impl From<&Value> for Operand {
    fn from(v: &Value) -> Self {
        Operand::Value(*v)
    }
}

impl From<Expr> for Operand {
    fn from(e: Expr) -> Self {
        Operand::Expr(e)
    }
}

impl From<&Expr> for Operand {
    fn from(e: &Expr) -> Self {
        Operand::Expr(e.clone())
    }
}

impl From<f64> for Operand {
    fn from(x: f64) -> Self {
        Operand::Expr(Expr::literal(x))
    }
}

impl From<bool> for Operand {
    fn from(b: bool) -> Self {
        Operand::Expr(Expr::literal(b))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AllocSize {
    Fixed(u32),
    Dynamic(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExtractIndex {
    Const(u32),
    Dynamic(Expr),
}

/// A single logical qubit at a call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Unit {
    /// Constant position inside a register.
    Slot { register: SlotId, index: u32 },
    /// A qubit value with no constant position (parameter, dynamic extract).
    Value(SlotId),
}

/// A call argument after binding, one per callee parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum BoundArg {
    Classical(Expr),
    Qubit(Unit),
    Register(SlotId),
    /// Individually supplied qubits standing in for a fixed-width register.
    Flattened(Vec<Unit>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Gate {
    pub name: String,
    pub adjoint: bool,
    pub params: Vec<Expr>,
    pub controls: Vec<SlotId>,
    pub targets: Vec<SlotId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub callee: Kernel,
    pub args: Vec<BoundArg>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Alloc { dest: SlotId, size: AllocSize },
    Extract { dest: SlotId, register: SlotId, index: ExtractIndex },
    Slice { dest: SlotId, register: SlotId, start: u32, len: u32 },
    Gate(Gate),
    Measure { targets: Vec<SlotId> },
    Reset { targets: Vec<SlotId> },
    Call(Call),
}

#[derive(Debug)]
struct KernelDef {
    id: KernelId,
    name: Option<String>,
    params: Vec<Type>,
    body: Vec<Op>,
    values: Vec<Type>,
}

/// A finalized kernel. Cloning shares the same immutable definition.
#[derive(Clone)]
pub struct Kernel(Arc<KernelDef>);

impl Kernel {
    pub fn id(&self) -> KernelId {
        self.0.id
    }

    /// The user-given name, or `kernel#<id>`.
    pub fn name(&self) -> String {
        kernel_label(self.0.id, self.0.name.as_deref())
    }

    pub fn given_name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn params(&self) -> &[Type] {
        &self.0.params
    }

    pub fn body(&self) -> &[Op] {
        &self.0.body
    }

    pub fn value_type(&self, slot: SlotId) -> Option<Type> {
        self.0.values.get(slot.0 as usize).copied()
    }

    pub fn callees(&self) -> impl Iterator<Item = &Kernel> {
        self.0.body.iter().filter_map(|op| match op {
            Op::Call(c) => Some(&c.callee),
            _ => None,
        })
    }
}

impl PartialEq for Kernel {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Kernel {}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("params", &self.0.params)
            .field("ops", &self.0.body.len())
            .finish()
    }
}

fn kernel_label(id: KernelId, name: Option<&str>) -> String {
    match name {
        Some(n) => n.to_string(),
        None => format!("kernel#{id}"),
    }
}

/// Identity allocator for kernels.
#[derive(Debug)]
pub struct KernelContext {
    context: u32,
    next_id: AtomicU32,
}

impl Default for KernelContext {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelContext {
    pub fn new() -> Self {
        Self {
            context: NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed),
            next_id: AtomicU32::new(0),
        }
    }

    /// Start recording a kernel with the given parameter types.
    ///
    /// Returns the builder and one operand per parameter: quantum parameters are
    /// values, classical ones are parameter expressions.
    pub fn begin(&self, params: &[Type]) -> (KernelBuilder, Vec<Operand>) {
        self.start(None, params)
    }

    pub fn begin_named(&self, name: impl Into<String>, params: &[Type]) -> (KernelBuilder, Vec<Operand>) {
        self.start(Some(name.into()), params)
    }

    fn start(&self, name: Option<String>, params: &[Type]) -> (KernelBuilder, Vec<Operand>) {
        let id = KernelId::new(self.context, self.next_id.fetch_add(1, Ordering::Relaxed));
        let proxies = params
            .iter()
            .enumerate()
            .map(|(position, &ty)| {
                if ty.is_quantum() {
                    Operand::Value(Value {
                        kernel: id,
                        slot: SlotId(position as u32),
                        ty,
                        origin: Origin::Param(position),
                    })
                } else {
                    Operand::Expr(Expr::Param {
                        kernel: id,
                        position,
                        ty,
                    })
                }
            })
            .collect();
        trace!(kernel = %id, params = params.len(), "begin kernel");
        let builder = KernelBuilder {
            id,
            name,
            params: params.to_vec(),
            body: Vec::new(),
            values: params.to_vec(),
            finalized: None,
        };
        (builder, proxies)
    }
}

/// Records operations for one kernel until `finalize`.
#[derive(Debug)]
pub struct KernelBuilder {
    id: KernelId,
    name: Option<String>,
    params: Vec<Type>,
    body: Vec<Op>,
    values: Vec<Type>,
    finalized: Option<Kernel>,
}

impl KernelBuilder {
    pub fn id(&self) -> KernelId {
        self.id
    }

    pub fn name(&self) -> String {
        kernel_label(self.id, self.name.as_deref())
    }

    pub fn params(&self) -> &[Type] {
        &self.params
    }

    pub fn body(&self) -> &[Op] {
        &self.body
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    pub(crate) fn value_type(&self, slot: SlotId) -> Option<Type> {
        self.values.get(slot.0 as usize).copied()
    }

    pub(crate) fn ensure_open(&self) -> Result<(), BuildError> {
        if self.finalized.is_some() {
            return Err(BuildError::ExtensionAfterFinalize { kernel: self.name() });
        }
        Ok(())
    }

    fn foreign(&self, owner: KernelId, what: &str) -> BuildError {
        BuildError::ForeignValue {
            kernel: self.name(),
            owner: kernel_label(owner, None),
            what: what.to_string(),
        }
    }

    pub(crate) fn check_value(&self, v: &Value) -> Result<SlotId, BuildError> {
        if v.kernel != self.id {
            return Err(self.foreign(v.kernel, &format!("a {} value", v.ty)));
        }
        Ok(v.slot)
    }

    pub(crate) fn check_expr(&self, e: &Expr) -> Result<(), BuildError> {
        match e.foreign_owner(self.id) {
            Some(owner) => Err(self.foreign(owner, "a parameter")),
            None => Ok(()),
        }
    }

    pub(crate) fn check_operand(&self, op: &Operand) -> Result<(), BuildError> {
        match op {
            Operand::Value(v) => self.check_value(v).map(|_| ()),
            Operand::Expr(e) => self.check_expr(e),
        }
    }

    fn fresh(&mut self, ty: Type, origin: Origin) -> Value {
        let slot = SlotId(self.values.len() as u32);
        self.values.push(ty);
        Value {
            kernel: self.id,
            slot,
            ty,
            origin,
        }
    }

    pub(crate) fn push(&mut self, op: Op) {
        trace!(kernel = %self.id, ?op, "record");
        self.body.push(op);
    }

    fn numeric(&self, what: &'static str, e: &Expr) -> Result<(), BuildError> {
        self.check_expr(e)?;
        if e.ty() != Type::Numeric {
            return Err(BuildError::OperandType {
                what,
                expected: Type::Numeric,
                actual: e.ty(),
            });
        }
        Ok(())
    }

    fn register_width(&self, what: &'static str, register: &Value) -> Result<Width, BuildError> {
        self.check_value(register)?;
        match register.ty {
            Type::Register(w) => Ok(w),
            other => Err(BuildError::OperandType {
                what,
                expected: Type::dynamic_register(),
                actual: other,
            }),
        }
    }

    /// Allocate a register of `size` qubits.
    pub fn allocate(&mut self, size: u32) -> Result<Value, BuildError> {
        self.ensure_open()?;
        let v = self.fresh(Type::register(size), Origin::Alloc);
        self.push(Op::Alloc {
            dest: v.slot,
            size: AllocSize::Fixed(size),
        });
        Ok(v)
    }

    /// Allocate a register whose size is a numeric expression.
    ///
    /// A literal non-negative integer size yields a fixed-width register.
    pub fn allocate_dynamic(&mut self, size: impl Into<Expr>) -> Result<Value, BuildError> {
        self.ensure_open()?;
        let size = size.into();
        self.numeric("allocation size", &size)?;
        if let Some(n) = literal_index(&size) {
            return self.allocate(n);
        }
        let v = self.fresh(Type::dynamic_register(), Origin::Alloc);
        self.push(Op::Alloc {
            dest: v.slot,
            size: AllocSize::Dynamic(size),
        });
        Ok(v)
    }

    /// Reference qubit `index` of `register`.
    ///
    /// Every call records its own extract, even for an index extracted before.
    pub fn extract(&mut self, register: &Value, index: u32) -> Result<Value, BuildError> {
        self.ensure_open()?;
        if let Width::Fixed(width) = self.register_width("extract source", register)? {
            if index >= width {
                return Err(BuildError::IndexOutOfRange { index, width });
            }
        }
        let v = self.fresh(
            Type::Qubit,
            Origin::Extract {
                register: register.slot,
                index: Some(index),
            },
        );
        self.push(Op::Extract {
            dest: v.slot,
            register: register.slot,
            index: ExtractIndex::Const(index),
        });
        Ok(v)
    }

    pub fn extract_dynamic(&mut self, register: &Value, index: impl Into<Expr>) -> Result<Value, BuildError> {
        self.ensure_open()?;
        let index = index.into();
        self.register_width("extract source", register)?;
        self.numeric("extract index", &index)?;
        if let Some(i) = literal_index(&index) {
            return self.extract(register, i);
        }
        let v = self.fresh(
            Type::Qubit,
            Origin::Extract {
                register: register.slot,
                index: None,
            },
        );
        self.push(Op::Extract {
            dest: v.slot,
            register: register.slot,
            index: ExtractIndex::Dynamic(index),
        });
        Ok(v)
    }

    /// Contiguous `len`-qubit view of `register` starting at `start`.
    pub fn slice(&mut self, register: &Value, start: u32, len: u32) -> Result<Value, BuildError> {
        self.ensure_open()?;
        if let Width::Fixed(width) = self.register_width("slice source", register)? {
            let end = u64::from(start) + u64::from(len);
            if end > u64::from(width) {
                let index = u32::try_from(end - 1).unwrap_or(u32::MAX);
                return Err(BuildError::IndexOutOfRange { index, width });
            }
        }
        let v = self.fresh(
            Type::register(len),
            Origin::Slice {
                register: register.slot,
                start,
            },
        );
        self.push(Op::Slice {
            dest: v.slot,
            register: register.slot,
            start,
            len,
        });
        Ok(v)
    }

    fn qubit_operands(&self, gate: &str, role: &'static str, qubits: &[Value]) -> Result<Vec<SlotId>, BuildError> {
        qubits
            .iter()
            .enumerate()
            .map(|(position, q)| {
                let slot = self.check_value(q)?;
                if q.ty != Type::Qubit {
                    return Err(BuildError::GateOperand {
                        gate: gate.to_string(),
                        role,
                        position,
                        expected: Type::Qubit,
                        actual: q.ty,
                    });
                }
                Ok(slot)
            })
            .collect()
    }

    fn record_gate(
        &mut self,
        name: &str,
        adjoint: bool,
        controls: &[Value],
        targets: &[Value],
        params: Vec<Expr>,
    ) -> Result<(), BuildError> {
        self.ensure_open()?;
        if targets.is_empty() {
            return Err(BuildError::GateArity {
                gate: name.to_string(),
                expected_targets: 1,
                expected_params: params.len(),
                targets: 0,
                params: params.len(),
            });
        }
        let controls = self.qubit_operands(name, "control", controls)?;
        let targets = self.qubit_operands(name, "target", targets)?;
        for (position, p) in params.iter().enumerate() {
            self.check_expr(p)?;
            if p.ty() != Type::Numeric {
                return Err(BuildError::GateOperand {
                    gate: name.to_string(),
                    role: "parameter",
                    position,
                    expected: Type::Numeric,
                    actual: p.ty(),
                });
            }
        }
        self.push(Op::Gate(Gate {
            name: name.to_string(),
            adjoint,
            params,
            controls,
            targets,
        }));
        Ok(())
    }

    /// Record an arbitrary gate. Its name is opaque to the builder.
    pub fn gate(
        &mut self,
        name: &str,
        controls: &[Value],
        targets: &[Value],
        params: Vec<Expr>,
    ) -> Result<(), BuildError> {
        self.record_gate(name, false, controls, targets, params)
    }

    pub fn adjoint_gate(
        &mut self,
        name: &str,
        controls: &[Value],
        targets: &[Value],
        params: Vec<Expr>,
    ) -> Result<(), BuildError> {
        self.record_gate(name, true, controls, targets, params)
    }

    fn fixed_gate(
        &mut self,
        name: &str,
        n_targets: usize,
        controls: &[Value],
        targets: &[Value],
        params: Vec<Expr>,
        n_params: usize,
    ) -> Result<(), BuildError> {
        if targets.len() != n_targets || params.len() != n_params {
            return Err(BuildError::GateArity {
                gate: name.to_string(),
                expected_targets: n_targets,
                expected_params: n_params,
                targets: targets.len(),
                params: params.len(),
            });
        }
        self.record_gate(name, false, controls, targets, params)
    }

    pub fn h(&mut self, target: &Value) -> Result<(), BuildError> {
        self.fixed_gate("h", 1, &[], &[*target], vec![], 0)
    }

    pub fn x(&mut self, target: &Value) -> Result<(), BuildError> {
        self.fixed_gate("x", 1, &[], &[*target], vec![], 0)
    }

    pub fn y(&mut self, target: &Value) -> Result<(), BuildError> {
        self.fixed_gate("y", 1, &[], &[*target], vec![], 0)
    }

    pub fn z(&mut self, target: &Value) -> Result<(), BuildError> {
        self.fixed_gate("z", 1, &[], &[*target], vec![], 0)
    }

    pub fn s(&mut self, target: &Value) -> Result<(), BuildError> {
        self.fixed_gate("s", 1, &[], &[*target], vec![], 0)
    }

    pub fn t(&mut self, target: &Value) -> Result<(), BuildError> {
        self.fixed_gate("t", 1, &[], &[*target], vec![], 0)
    }

    /// Controlled X, recorded as `x` with one control.
    pub fn cx(&mut self, control: &Value, target: &Value) -> Result<(), BuildError> {
        self.fixed_gate("x", 1, &[*control], &[*target], vec![], 0)
    }

    pub fn cz(&mut self, control: &Value, target: &Value) -> Result<(), BuildError> {
        self.fixed_gate("z", 1, &[*control], &[*target], vec![], 0)
    }

    pub fn rx(&mut self, angle: impl Into<Expr>, target: &Value) -> Result<(), BuildError> {
        self.fixed_gate("rx", 1, &[], &[*target], vec![angle.into()], 1)
    }

    pub fn ry(&mut self, angle: impl Into<Expr>, target: &Value) -> Result<(), BuildError> {
        self.fixed_gate("ry", 1, &[], &[*target], vec![angle.into()], 1)
    }

    pub fn rz(&mut self, angle: impl Into<Expr>, target: &Value) -> Result<(), BuildError> {
        self.fixed_gate("rz", 1, &[], &[*target], vec![angle.into()], 1)
    }

    pub fn r1(&mut self, angle: impl Into<Expr>, target: &Value) -> Result<(), BuildError> {
        self.fixed_gate("r1", 1, &[], &[*target], vec![angle.into()], 1)
    }

    pub fn swap(&mut self, a: &Value, b: &Value) -> Result<(), BuildError> {
        self.fixed_gate("swap", 2, &[], &[*a, *b], vec![], 0)
    }

    fn quantum_targets(&self, what: &'static str, targets: &[Value]) -> Result<Vec<SlotId>, BuildError> {
        if targets.is_empty() {
            return Err(BuildError::GateArity {
                gate: what.to_string(),
                expected_targets: 1,
                expected_params: 0,
                targets: 0,
                params: 0,
            });
        }
        targets
            .iter()
            .map(|t| {
                let slot = self.check_value(t)?;
                if !t.ty.is_quantum() {
                    return Err(BuildError::OperandType {
                        what,
                        expected: Type::Qubit,
                        actual: t.ty,
                    });
                }
                Ok(slot)
            })
            .collect()
    }

    /// Measure qubits or whole registers in the Z basis.
    pub fn mz(&mut self, targets: &[Value]) -> Result<(), BuildError> {
        self.ensure_open()?;
        let targets = self.quantum_targets("mz", targets)?;
        self.push(Op::Measure { targets });
        Ok(())
    }

    pub fn reset(&mut self, targets: &[Value]) -> Result<(), BuildError> {
        self.ensure_open()?;
        let targets = self.quantum_targets("reset", targets)?;
        self.push(Op::Reset { targets });
        Ok(())
    }

    /// Record a call to `callee` after checking `args` against its parameters.
    ///
    /// On error nothing is recorded.
    pub fn call(&mut self, callee: &Kernel, args: &[Operand]) -> Result<(), BuildError> {
        bind_call(self, callee, args)
    }

    /// Freeze the recorded body. Calling this again returns the same kernel.
    pub fn finalize(&mut self) -> Kernel {
        if let Some(k) = &self.finalized {
            return k.clone();
        }
        let kernel = Kernel(Arc::new(KernelDef {
            id: self.id,
            name: self.name.clone(),
            params: self.params.clone(),
            body: self.body.clone(),
            values: self.values.clone(),
        }));
        debug!(
            kernel = %kernel.name(),
            params = kernel.params().len(),
            ops = kernel.body().len(),
            "finalized kernel"
        );
        self.finalized = Some(kernel.clone());
        kernel
    }
}

fn literal_index(e: &Expr) -> Option<u32> {
    match e.as_literal() {
        Some(Literal::Numeric(x)) if x >= 0.0 && x.fract() == 0.0 && x <= f64::from(u32::MAX) => Some(x as u32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinOp;

    fn qubits(ops: &[Operand]) -> Vec<Value> {
        ops.iter().filter_map(Operand::as_value).collect()
    }

    #[test]
    fn begin_hands_out_typed_parameter_proxies() {
        let ctx = KernelContext::new();
        let (k, params) = ctx.begin(&[Type::Qubit, Type::Numeric, Type::register(3)]);
        assert_eq!(params.len(), 3);
        assert_eq!(params[0].ty(), Type::Qubit);
        assert_eq!(params[1].ty(), Type::Numeric);
        assert_eq!(params[2].ty(), Type::register(3));
        for (i, p) in params.iter().enumerate() {
            assert_eq!(p.position(), Some(i));
        }
        assert!(params[1].as_expr().is_some());
        assert_eq!(params[0].as_value().map(|v| v.kernel()), Some(k.id()));
    }

    #[test]
    fn identities_are_unique_per_context() {
        let ctx = KernelContext::new();
        let (a, _) = ctx.begin(&[]);
        let (b, _) = ctx.begin(&[]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn identities_differ_across_contexts() {
        let first = KernelContext::new();
        let second = KernelContext::new();
        let (mut a, _) = first.begin(&[]);
        let (mut b, _) = second.begin(&[]);
        assert_eq!(a.id().index, b.id().index);
        assert_ne!(a.id(), b.id());
        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn rejects_values_from_another_context() {
        let first = KernelContext::new();
        let second = KernelContext::new();
        let (mut k, _) = first.begin_named("main", &[]);
        let (mut other, op) = second.begin_named("other", &[Type::Numeric]);
        let reg = other.allocate(1).unwrap();
        let q = other.extract(&reg, 0).unwrap();
        let theta = op[0].as_expr().unwrap().clone();

        assert!(matches!(k.h(&q), Err(BuildError::ForeignValue { .. })));
        let own = k.allocate(1).unwrap();
        let own_q = k.extract(&own, 0).unwrap();
        assert!(matches!(k.rz(theta, &own_q), Err(BuildError::ForeignValue { .. })));
        assert_eq!(k.body().len(), 2);
    }

    #[test]
    fn duplicate_extracts_are_recorded_separately() {
        let ctx = KernelContext::new();
        let (mut k, _) = ctx.begin(&[]);
        let reg = k.allocate(2).unwrap();
        let a = k.extract(&reg, 0).unwrap();
        let b = k.extract(&reg, 0).unwrap();
        assert_ne!(a.slot(), b.slot());
        assert_eq!(a.origin(), b.origin());
        assert_eq!(a.ty(), b.ty());
        assert_eq!(k.body().len(), 3);
    }

    #[test]
    fn extract_checks_register_bounds() {
        let ctx = KernelContext::new();
        let (mut k, _) = ctx.begin(&[]);
        let reg = k.allocate(2).unwrap();
        assert_eq!(
            k.extract(&reg, 2).unwrap_err(),
            BuildError::IndexOutOfRange { index: 2, width: 2 }
        );
        assert!(k.slice(&reg, 1, 2).is_err());
        let view = k.slice(&reg, 1, 1).unwrap();
        assert_eq!(view.ty(), Type::register(1));
    }

    #[test]
    fn dynamic_allocation_with_literal_size_is_fixed() {
        let ctx = KernelContext::new();
        let (mut k, params) = ctx.begin(&[Type::Numeric]);
        let n = params[0].as_expr().unwrap().clone();
        let fixed = k.allocate_dynamic(Expr::binary(BinOp::Add, 1.0, 2.0).unwrap()).unwrap();
        assert_eq!(fixed.ty(), Type::register(3));
        let dynamic = k.allocate_dynamic(n).unwrap();
        assert_eq!(dynamic.ty(), Type::dynamic_register());
        assert!(matches!(k.allocate_dynamic(true), Err(BuildError::OperandType { .. })));
    }

    #[test]
    fn gates_validate_operand_types() {
        let ctx = KernelContext::new();
        let (mut k, params) = ctx.begin(&[Type::Qubit, Type::register(2), Type::Boolean]);
        let q = params[0].as_value().unwrap();
        let reg = params[1].as_value().unwrap();
        let flag = params[2].as_expr().unwrap().clone();

        let err = k.cx(&reg, &q).unwrap_err();
        assert!(matches!(err, BuildError::GateOperand { role: "control", actual: Type::Register(_), .. }));

        let err = k.rz(flag, &q).unwrap_err();
        assert!(matches!(err, BuildError::GateOperand { role: "parameter", actual: Type::Boolean, .. }));

        let generic = k.gate("rz", &[], &[q], vec![]);
        assert!(generic.is_ok(), "generic gates do not enforce a signature");
        assert!(matches!(k.swap(&q, &q), Ok(())));
        assert!(k.mz(&[reg]).is_ok());
        assert!(k.reset(&[]).is_err());
        assert_eq!(k.body().len(), 3);
    }

    #[test]
    fn finalize_is_idempotent_and_closes_the_session() {
        let ctx = KernelContext::new();
        let (mut k, params) = ctx.begin(&[Type::Qubit]);
        let q = qubits(&params)[0];
        k.h(&q).unwrap();
        let first = k.finalize();
        let second = k.finalize();
        assert_eq!(first, second);
        assert_eq!(first.body().len(), 1);
        assert!(k.is_finalized());
        assert!(matches!(k.x(&q), Err(BuildError::ExtensionAfterFinalize { .. })));
        assert!(matches!(k.allocate(1), Err(BuildError::ExtensionAfterFinalize { .. })));
        assert_eq!(first.body().len(), 1);
    }

    #[test]
    fn rejects_values_from_other_kernels() {
        let ctx = KernelContext::new();
        let (_other, other_params) = ctx.begin_named("other", &[Type::Qubit, Type::Numeric]);
        let (mut k, _) = ctx.begin_named("main", &[]);
        let foreign_q = other_params[0].as_value().unwrap();
        let foreign_theta = other_params[1].as_expr().unwrap().clone();

        assert!(matches!(k.h(&foreign_q), Err(BuildError::ForeignValue { .. })));
        let reg = k.allocate(1).unwrap();
        let q = k.extract(&reg, 0).unwrap();
        assert!(matches!(k.rz(foreign_theta, &q), Err(BuildError::ForeignValue { .. })));
        assert_eq!(k.body().len(), 2);
    }
}
