//! 代码生成测试

use crate::frontend::compile;
use crate::middle::bytecode::{Capture, Constant, Instr, Want};

#[test]
fn test_local_and_return() {
    let proto = compile("local x = 1 return x", "test").unwrap();
    assert_eq!(
        proto.code,
        vec![
            Instr::Const(0),
            Instr::GetLocal(0),
            Instr::Return {
                count: 1,
                multi: false
            },
            Instr::Pop(1),
            Instr::Return {
                count: 0,
                multi: false
            },
        ]
    );
    assert_eq!(proto.constants, vec![Constant::Int(1)]);
}

#[test]
fn test_constants_are_deduplicated() {
    let proto = compile("a = 'x' b = 'x' c = 'x'", "test").unwrap();
    let strings = proto
        .constants
        .iter()
        .filter(|c| matches!(c, Constant::Str(s) if &**s == "x"))
        .count();
    assert_eq!(strings, 1);
}

#[test]
fn test_captured_local_is_boxed() {
    let proto = compile(
        "local n = 0 local function inc() n = n + 1 end",
        "test",
    )
    .unwrap();
    assert!(proto.code.contains(&Instr::NewCell(0)));
    let inner = &proto.protos[0];
    assert_eq!(inner.captures, vec![Capture::Local(0)]);
    assert!(inner.code.contains(&Instr::GetUpval(0)));
    assert!(inner.code.contains(&Instr::SetUpval(0)));
}

#[test]
fn test_nested_capture_goes_through_upvalue() {
    let proto = compile(
        "local n = 0 local function outer() return function() return n end end",
        "test",
    )
    .unwrap();
    let outer = &proto.protos[0];
    let inner = &outer.protos[0];
    assert_eq!(outer.captures, vec![Capture::Local(0)]);
    assert_eq!(inner.captures, vec![Capture::Upvalue(0)]);
}

#[test]
fn test_multi_call_in_arguments() {
    let proto = compile("print(f())", "test").unwrap();
    assert!(proto.code.contains(&Instr::Call {
        argc: 0,
        want: Want::Multi,
        multi_tail: false
    }));
    assert!(proto.code.contains(&Instr::Call {
        argc: 1,
        want: Want::Fixed(0),
        multi_tail: true
    }));
}

#[test]
fn test_method_call_passes_receiver() {
    let proto = compile("obj:go(1)", "test").unwrap();
    assert!(proto.code.iter().any(|i| matches!(i, Instr::SelfMethod(_))));
    assert!(proto.code.contains(&Instr::Call {
        argc: 2,
        want: Want::Fixed(0),
        multi_tail: false
    }));
}

#[test]
fn test_table_constructor_flushes_positionals() {
    let proto = compile("t = { 1, 2, x = 3, 4 }", "test").unwrap();
    let lists: Vec<_> = proto
        .code
        .iter()
        .filter_map(|i| match i {
            Instr::SetList { start, count, .. } => Some((*start, *count)),
            _ => None,
        })
        .collect();
    assert_eq!(lists, vec![(1, 2), (3, 1)]);
}

#[test]
fn test_line_table_matches_code() {
    let proto = compile("local a = 1\n\nlocal b = a + 2\n", "test").unwrap();
    assert_eq!(proto.lines.len(), proto.code.len());
    assert_eq!(proto.line_at(0), 1);
    assert!(proto.lines.contains(&3));
}

#[test]
fn test_break_outside_loop_is_error() {
    let err = compile("break", "test").unwrap_err();
    assert!(err.to_string().contains("break outside a loop"));
    assert_eq!(err.line(), 1);
}

#[test]
fn test_compiled_proto_validates() {
    let proto = compile(
        r#"
        local t = {}
        for i = 1, 10 do t[i] = i * 2 end
        for k, v in pairs(t) do if v > 4 then break end end
        repeat local z = 1 until z == 1
        while false do end
        "#,
        "test",
    )
    .unwrap();
    assert_eq!(proto.validate(), Ok(()));
}

#[test]
fn test_validate_rejects_empty_multi_lists() {
    let proto = compile("local t = { f() } return f(g())", "test").unwrap();
    assert_eq!(proto.validate(), Ok(()));

    let broken = [
        Instr::Call {
            argc: 0,
            want: Want::Fixed(1),
            multi_tail: true,
        },
        Instr::Return {
            count: 0,
            multi: true,
        },
        Instr::SetList {
            start: 1,
            count: 0,
            multi: true,
        },
    ];
    for instr in broken {
        let mut patched = (*proto).clone();
        patched.code[0] = instr;
        let err = patched.validate().unwrap_err();
        assert!(err.contains("expands an empty list"), "{}", err);
    }
}
