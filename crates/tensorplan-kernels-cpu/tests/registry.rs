use tensorplan::{kernel, Device, OpKind};
use tensorplan_kernels_cpu as _;

#[test]
fn every_operator_kind_has_a_cpu_kernel() {
    let kinds = [
        OpKind::Add,
        OpKind::Sub,
        OpKind::Mul,
        OpKind::Div,
        OpKind::MatMul,
        OpKind::Transpose,
        OpKind::Concat,
    ];
    for kind in kinds {
        assert!(
            kernel::lookup(Device::Cpu, kind).is_some(),
            "missing cpu kernel for {kind}"
        );
    }
}

#[test]
fn registry_definitions_are_keyed_consistently() {
    for def in kernel::registered() {
        let found = kernel::lookup(def.device, def.kind).unwrap();
        assert_eq!(found.kind, def.kind);
        assert_eq!(found.device, def.device);
    }
}
