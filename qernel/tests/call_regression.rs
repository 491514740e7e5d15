use qernel::scenarios::{self, entangling_rotation};
use qernel::render_scenario;
use qernel_core::{Arity, BuildError, KernelContext, LowerConfig, Type, lower_kernel, symbol_name};
use qernel_ir::{InstKind, Type as IrType};

#[test]
fn controlled_rotation_lowers_to_expected_module() {
    let ctx = KernelContext::new();
    let callee = entangling_rotation(&ctx).unwrap();
    let (mut root, p) = ctx.begin_named("controlled_rotation", &[Type::Numeric]);
    let reg = root.allocate(2).unwrap();
    let q0 = root.extract(&reg, 0).unwrap();
    let q1 = root.extract(&reg, 1).unwrap();
    root.call(&callee, &[q0.into(), q1.into(), p[0].clone()]).unwrap();
    let root = root.finalize();

    let config = LowerConfig::default();
    let module = lower_kernel(&root, &config).unwrap();
    let root_sym = symbol_name(&root, &config.symbol_prefix);
    let callee_sym = symbol_name(&callee, &config.symbol_prefix);

    let expected = format!(
        "\
func.func @{root_sym}(%arg0: f64) attributes {{\"qernel-entrypoint\"}} {{
  %0 = qernel.alloca !qernel.veq<2>
  %1 = qernel.extract_ref %0[0] : (!qernel.veq<2>) -> !qernel.ref
  %2 = qernel.extract_ref %0[1] : (!qernel.veq<2>) -> !qernel.ref
  call @{callee_sym}(%1, %2, %arg0) : (!qernel.ref, !qernel.ref, f64) -> ()
  return
}}

func.func @{callee_sym}(%arg0: !qernel.ref, %arg1: !qernel.ref, %arg2: f64) {{
  qernel.x [%arg0] %arg1 : (!qernel.ref, !qernel.ref) -> ()
  %0 = arith.constant 2.0 : f64
  %1 = arith.mulf %arg2, %0 : f64
  qernel.rz (%1) %arg1 : (f64, !qernel.ref) -> ()
  qernel.x [%arg0] %arg1 : (!qernel.ref, !qernel.ref) -> ()
  return
}}
"
    );
    assert_eq!(module.to_string(), expected);
}

#[test]
fn controlled_rotation_call_has_three_typed_operands() {
    let ctx = KernelContext::new();
    let root = (scenarios::find("controlled-rotation").unwrap().build)(&ctx).unwrap();
    let module = lower_kernel(&root, &LowerConfig::default()).unwrap();

    assert_eq!(module.functions.len(), 2);
    let entry = module.entry().unwrap();
    assert_eq!(entry.name, module.functions[0].name);

    let calls: Vec<_> = entry.calls().collect();
    assert_eq!(calls.len(), 1);
    let (callee, args) = calls[0];
    let tys: Vec<IrType> = args.iter().map(|a| a.ty).collect();
    assert_eq!(tys, vec![IrType::Ref, IrType::Ref, IrType::F64]);

    let callee = module.function(callee).unwrap();
    let gates: Vec<&str> = callee
        .body
        .iter()
        .filter_map(|i| match &i.kind {
            InstKind::Gate { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(gates, vec!["x", "rz", "x"]);
}

#[test]
fn dropping_theta_is_rejected_at_the_call() {
    let ctx = KernelContext::new();
    let callee = entangling_rotation(&ctx).unwrap();
    let (mut root, _) = ctx.begin(&[Type::Numeric]);
    let reg = root.allocate(2).unwrap();
    let q0 = root.extract(&reg, 0).unwrap();
    let q1 = root.extract(&reg, 1).unwrap();
    let before = root.body().to_vec();

    let err = root.call(&callee, &[q0.into(), q1.into()]).unwrap_err();
    assert_eq!(
        err,
        BuildError::ArityMismatch {
            callee: "entangling_rotation".to_string(),
            expected: Arity { min: 3, max: 3 },
            actual: 2,
        }
    );
    assert_eq!(root.body(), before.as_slice());
}

#[test]
fn failing_scenarios_report_binder_errors() {
    for (name, actual) in [("dropped-argument", 2), ("trailing-argument", 4)] {
        let scenario = scenarios::find(name).unwrap();
        let report = render_scenario(scenario, &LowerConfig::default()).unwrap_err();
        let err = report
            .downcast_ref::<BuildError>()
            .unwrap_or_else(|| panic!("{name}: expected a build error, got {report:?}"));
        assert!(
            matches!(err, BuildError::ArityMismatch { actual: a, .. } if *a == actual),
            "{name}: {err:?}"
        );
    }
}

#[test]
fn succeeding_scenarios_render() {
    for name in ["controlled-rotation", "flattened-register"] {
        let text = render_scenario(scenarios::find(name).unwrap(), &LowerConfig::default()).unwrap();
        assert_eq!(text.matches("func.func").count(), 2, "{name}:\n{text}");
        assert_eq!(text.matches("qernel-entrypoint").count(), 1, "{name}:\n{text}");
    }
}

#[test]
fn flattened_register_passes_the_whole_register() {
    let ctx = KernelContext::new();
    let root = (scenarios::find("flattened-register").unwrap().build)(&ctx).unwrap();
    let module = lower_kernel(&root, &LowerConfig::default()).unwrap();
    let entry = module.entry().unwrap();
    let (_, args) = entry.calls().next().unwrap();
    assert_eq!(args.len(), 1);
    assert_eq!(args[0], entry.body[0].result.unwrap());
    assert!(!entry.body.iter().any(|i| matches!(i.kind, InstKind::Concat { .. })));
}

#[test]
fn scenario_names_are_unique() {
    let mut names: Vec<&str> = scenarios::SCENARIOS.iter().map(|s| s.name).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), scenarios::SCENARIOS.len());
}
