//! VM tests


use crate::frontend;
use crate::runtime::value::Value;
use crate::vm::{LocalHost, VMResult, VM};

pub(super) fn new_vm() -> VM {
    let mut vm = VM::new();
    crate::std::install(&mut vm).unwrap();
    vm
}

/// Compile and run `src` as a plain call, returning its results
pub(super) fn eval_in(
    vm: &mut VM,
    src: &str,
) -> VMResult<Vec<Value>> {
    let proto = frontend::compile(src, "test").unwrap();
    let function = vm.load(proto).unwrap();
    vm.call(function, Vec::new(), &mut LocalHost::default())
}

pub(super) fn eval(src: &str) -> VMResult<Vec<Value>> {
    eval_in(&mut new_vm(), src)
}

pub(super) fn eval_one(src: &str) -> Value {
    eval(src).unwrap().into_iter().next().unwrap_or_default()
}

/// Error message of a failing chunk
pub(super) fn eval_err(src: &str) -> String {
    eval(src).unwrap_err().to_string()
}
