use indoc::indoc;
use pretty_assertions::assert_eq;

use super::TypeChecker;
use crate::{
    diagnostics::{Diagnostic, DiagnosticCollector, DiagnosticKind, Severity},
    frontend::{
        SourceFile, SourceFileOrigin,
        ast::{
            Expression, Module,
            visit::{self, Visitor},
        },
        parser::Parser,
    },
    middle::{
        primitive::DEFAULT_INTEGER,
        resolve::{Resolver, SymbolTable},
        ty::{TypeId, TypeTable},
    },
};

struct Checked<'a> {
    module: &'a Module<'a>,
    symbols: SymbolTable,
    types: &'a TypeTable,
    diagnostics: Vec<Diagnostic>,
}

impl Checked<'_> {
    fn kinds(&self) -> Vec<DiagnosticKind> {
        self.diagnostics.iter().map(|d| d.kind).collect()
    }

    /// Type of the first variable with this name, as written in source
    fn variable_type(&self, name: &str) -> String {
        let symbol = self
            .symbols
            .symbols
            .iter()
            .find(|symbol| symbol.name.value() == name && symbol.is_variable())
            .unwrap_or_else(|| panic!("no variable named `{name}`"));

        self.types
            .display(symbol.ty().unwrap_or(TypeId::ERROR))
            .to_string()
    }
}

fn with_checked<R>(text: &str, f: impl FnOnce(&Checked) -> R) -> R {
    let source = SourceFile::new(text, SourceFileOrigin::Memory);
    let types = TypeTable::new();
    let mut diagnostics = DiagnosticCollector::new();

    let module = Parser::parse_module(&source, &mut diagnostics);
    let symbols = Resolver::resolve_names(&module, &mut diagnostics);
    assert!(
        !diagnostics.has_errors(),
        "fixture does not resolve: {:?}",
        diagnostics.into_vec()
    );

    TypeChecker::check_module(&module, &symbols, &types, DEFAULT_INTEGER, &mut diagnostics);

    f(&Checked {
        module: &module,
        symbols,
        types: &types,
        diagnostics: diagnostics.into_vec(),
    })
}

fn check(text: &str) -> Vec<DiagnosticKind> {
    with_checked(text, |checked| checked.kinds())
}

/// Every expression of a module in visit order
#[derive(Default)]
struct ExpressionTypes(Vec<Option<TypeId>>);

impl<'ast> Visitor<'ast> for ExpressionTypes {
    fn visit_expression(&mut self, expression: &'ast Expression) {
        self.0.push(expression.ty());
        visit::walk_expression(self, expression);
    }
}

#[test]
fn mixed_width_arithmetic_is_one_mismatch() {
    let diagnostics = with_checked(
        "fn f(a: i8, b: i32) -> i8 { return a + b; }",
        |checked| checked.diagnostics.clone(),
    );

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind, DiagnosticKind::TypeMismatch);
    assert_eq!(diagnostics[0].message, "cannot apply `+` to `i8` and `i32`");
}

#[test]
fn literals_take_their_context_type() {
    with_checked(
        indoc! {"
            fn main() {
                let a: u8 = 200;
                let b = a + 1;
                let c = 1 + a;
                let d = 7;
                let e = 5usize;
                let f: [i64; 2] = [1, 2];
                let g = -3 * (b as i16);
            }
        "},
        |checked| {
            assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
            assert_eq!(checked.variable_type("b"), "u8");
            assert_eq!(checked.variable_type("c"), "u8");
            assert_eq!(checked.variable_type("d"), "i32");
            assert_eq!(checked.variable_type("e"), "usize");
            assert_eq!(checked.variable_type("f"), "[i64; 2]");
            assert_eq!(checked.variable_type("g"), "i16");
        },
    );
}

#[test]
fn literal_overflow_uses_signed_minimum() {
    let kinds = check(indoc! {"
        fn main() {
            let a: u8 = 256;
            let b: i8 = -128;
            let c: i8 = -129;
            let d = 300i8;
            let e: u64 = 18446744073709551615;
        }
    "});

    assert_eq!(kinds, vec![DiagnosticKind::OverflowInLiteral; 3]);
}

#[test]
fn address_then_deref_is_identity() {
    with_checked(
        indoc! {"
            struct P { x: u16 }
            fn main(p: P) {
                let x: u16 = 3;
                let y = *(&x);
                let z = *(&p);
                let w = *&*&x;
            }
        "},
        |checked| {
            assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
            assert_eq!(checked.variable_type("y"), "u16");
            assert_eq!(checked.variable_type("z"), "P");
            assert_eq!(checked.variable_type("w"), "u16");
        },
    );
}

#[test]
fn pointer_operators_need_pointers_and_places() {
    let kinds = check(indoc! {"
        fn one() -> i32 { return 1; }
        fn main() {
            let x = 1;
            *x;
            &1;
            &one();
            &x;
        }
    "});

    assert_eq!(
        kinds,
        vec![
            DiagnosticKind::TypeMismatch,
            DiagnosticKind::NotAddressable,
            DiagnosticKind::NotAddressable,
        ]
    );
}

#[test]
fn assignment_needs_a_mutable_place() {
    let kinds = check(indoc! {"
        struct S { a: i32 }
        fn f(p: *i32, s: S, mut t: S, items: [i32]) {
            *p = 1;
            s.a = 2;
            t.a = 3;
            items[0] = 4;
            let x = 5;
            x = 6;
            let mut y = 7;
            y += 8;
            f = f;
            1 = 2;
        }
    "});

    assert_eq!(
        kinds,
        vec![
            DiagnosticKind::ImmutableAssignment,
            DiagnosticKind::ImmutableAssignment,
            DiagnosticKind::NotAddressable,
            DiagnosticKind::NotAddressable,
        ]
    );
}

#[test]
fn writes_through_a_fresh_address_keep_mutability() {
    let kinds = check(indoc! {"
        struct S { v: i32 }
        fn main(p: *i32) {
            let x = 1;
            let s: S;
            let a = [1, 2];
            *(&x) = 2;
            (&s).v = 3;
            a[0..][0] = 4;

            let mut y = 5;
            *(&y) = 6;
            let q = &x;
            *q = 7;
            *p = 8;
        }
    "});

    assert_eq!(kinds, vec![DiagnosticKind::ImmutableAssignment; 3]);
}

#[test]
fn assignment_right_side_must_match_exactly() {
    let kinds = check(indoc! {"
        fn main() {
            let mut a: i64 = 0;
            let b: i32 = 1;
            a = b;
            a = 2;
            a -= true;
        }
    "});

    assert_eq!(
        kinds,
        vec![DiagnosticKind::TypeMismatch, DiagnosticKind::TypeMismatch]
    );
}

#[test]
fn conditions_must_be_bool() {
    let kinds = check(indoc! {"
        fn main() {
            if 1 {}
            while 'a' {}
            for (;0;) {}
            if 1 == 1 && !false {}
        }
    "});

    assert_eq!(kinds, vec![DiagnosticKind::InvalidConditionType; 3]);
}

#[test]
fn comparisons_by_operand_type() {
    let kinds = check(indoc! {"
        fn main() {
            let a = true == false;
            let b = true < false;
            let c = 'a' < 'b';
            let d = 'a' + 'b';
            let e: *u8 = 0 as usize as *u8;
            let f = e != e;
        }
    "});

    assert_eq!(
        kinds,
        vec![DiagnosticKind::TypeMismatch, DiagnosticKind::TypeMismatch]
    );
}

#[test]
fn missing_return_follows_divergence() {
    let kinds = check(indoc! {"
        fn a(c: bool) -> i32 { if c { return 1; } }
        fn b(c: bool) -> i32 { if c { return 1; } else { return 2; } }
        fn c() -> i32 { while true { return 1; } }
        fn d(c: bool) -> i32 { if c { return 1; } else if !c { return 2; } else { return 3; } }
        fn e() -> i32 { { return 1; } }
        fn f() {}
    "});

    assert_eq!(kinds, vec![DiagnosticKind::MissingReturn]);
}

#[test]
fn endless_loops_diverge_unless_they_break() {
    let kinds = check(indoc! {"
        fn a() -> i32 { while true { return 1; } }
        fn b() -> i32 { while (true) { } }
        fn c() -> i32 { for (;;) { if true { return 1; } } }
        fn d() -> i32 { while true { while true { break; } } }
        fn e() -> i32 { while true { break; } }
        fn f(n: i32) -> i32 { for (let mut i = 0; i < n; i += 1) { return i; } }
    "});

    assert_eq!(kinds, vec![DiagnosticKind::MissingReturn; 2]);
}

#[test]
fn objects_larger_than_the_address_space() {
    with_checked(
        indoc! {"
            struct Big { bytes: [u8; 9223372036854775807], tail: u8 }
            struct Fits { bytes: [u8; 9223372036854775807] }
            fn main() {
                let a: [[i64; 4611686018427387904]; 4];
                let b: [u8; 9223372036854775807];
                let c = 0 as usize as *[u32; 4611686018427387904];
            }
        "},
        |checked| {
            assert_eq!(checked.kinds(), vec![DiagnosticKind::TypeTooLarge; 2]);
            assert_eq!(checked.diagnostics[0].span.line, 1);
            assert_eq!(checked.diagnostics[1].span.line, 4);
            assert_eq!(checked.variable_type("a"), "{unknown}");
            assert_eq!(checked.variable_type("b"), "[u8; 9223372036854775807]");
        },
    );
}

#[test]
fn return_value_must_match() {
    let kinds = check(indoc! {"
        fn a() -> bool { return 1; }
        fn b() -> i32 { return; }
        fn c() { return; }
    "});

    assert_eq!(
        kinds,
        vec![DiagnosticKind::TypeMismatch, DiagnosticKind::TypeMismatch]
    );
}

#[test]
fn loop_control_outside_loops() {
    let kinds = check(indoc! {"
        fn main() {
            while true { break; }
            for (;;) { continue; }
            break;
        }
        fn other() { continue; }
    "});

    assert_eq!(kinds, vec![DiagnosticKind::InvalidLoopControl; 2]);
}

#[test]
fn unreachable_code_is_a_warning() {
    with_checked(
        indoc! {"
            fn main() -> i32 {
                return 1;
                let x = 2;
                x;
            }
        "},
        |checked| {
            assert_eq!(checked.kinds(), vec![DiagnosticKind::UnreachableCode]);
            assert_eq!(checked.diagnostics[0].severity, Severity::Warning);
            assert_eq!(checked.diagnostics[0].span.line, 3);
        },
    );
}

#[test]
fn cast_table() {
    let kinds = check(indoc! {"
        fn f() {}
        fn main(p: *i32) {
            65 as char;
            'a' as u32;
            true as u8;
            p as *u8;
            p as usize;
            1usize as *u8;
            f as *u8;
            'a' as bool;
            p as i32;
            1 as bool;
        }
    "});

    assert_eq!(kinds, vec![DiagnosticKind::InvalidCast; 3]);
}

#[test]
fn calls_check_arity_and_arguments() {
    let kinds = check(indoc! {"
        fn add(a: i32, b: i32) -> i32 { return a + b; }
        fn apply(f: fn(i32, i32) -> i32, x: i32) -> i32 { return f(x, 1); }
        fn main() {
            add(1);
            add(1, true);
            let r: i32 = apply(add, 2);
            let s: i64 = add(1, 2);
            r(1);
        }
    "});

    assert_eq!(
        kinds,
        vec![
            DiagnosticKind::ArgumentMismatch,
            DiagnosticKind::ArgumentMismatch,
            DiagnosticKind::TypeMismatch,
            DiagnosticKind::TypeMismatch,
        ]
    );
}

#[test]
fn fields_auto_deref_one_pointer() {
    with_checked(
        indoc! {"
            struct Point { x: i32, y: i32 }
            fn main(p: Point, q: *Point, r: **Point, s: [u8], a: [i32; 4]) {
                let px = p.x;
                let qy = q.y;
                let len = s.len;
                let ptr = s.ptr;
                let alen = a.len;
                p.z;
                r.x;
            }
        "},
        |checked| {
            assert_eq!(
                checked.kinds(),
                vec![DiagnosticKind::UnknownField, DiagnosticKind::UnknownField]
            );
            assert_eq!(checked.variable_type("px"), "i32");
            assert_eq!(checked.variable_type("qy"), "i32");
            assert_eq!(checked.variable_type("len"), "usize");
            assert_eq!(checked.variable_type("ptr"), "*u8");
            assert_eq!(checked.variable_type("alen"), "usize");
        },
    );
}

#[test]
fn indexing_and_constant_bounds() {
    with_checked(
        indoc! {"
            fn main(items: [i32], i: u8) {
                let mut a: [i32; 3] = [1, 2, 3];
                let first = a[0];
                let last = items[i];
                let whole = a[..];
                let part = a[1..3];
                a[3];
                a[2..4];
                a[2..1];
                a[true];
                first[0];
            }
        "},
        |checked| {
            assert_eq!(
                checked.kinds(),
                vec![
                    DiagnosticKind::IndexOutOfBounds,
                    DiagnosticKind::IndexOutOfBounds,
                    DiagnosticKind::IndexOutOfBounds,
                    DiagnosticKind::TypeMismatch,
                    DiagnosticKind::TypeMismatch,
                ]
            );
            assert_eq!(checked.variable_type("first"), "i32");
            assert_eq!(checked.variable_type("last"), "i32");
            assert_eq!(checked.variable_type("whole"), "[i32]");
            assert_eq!(checked.variable_type("part"), "[i32]");
        },
    );
}

#[test]
fn globals_need_constant_initializers() {
    with_checked(
        indoc! {"
            global A: i32 = 1 + 2;
            global B: [u8; 2] = [1, 2];
            global C = -5;
            global mut D: i64 = (7);
            global E: i32 = A;
            global NAME = \"brook\";
        "},
        |checked| {
            assert_eq!(
                checked.kinds(),
                vec![DiagnosticKind::NonConstantInitializer; 2]
            );
            assert_eq!(checked.variable_type("B"), "[u8; 2]");
            assert_eq!(checked.variable_type("C"), "i32");
            assert_eq!(checked.variable_type("NAME"), "[u8]");
        },
    );
}

#[test]
fn structs_containing_themselves() {
    let kinds = check(indoc! {"
        struct A { b: B }
        struct B { items: [A; 2] }
        struct Node { value: i32, next: *Node }
        struct List { nodes: [Node] }
    "});

    assert_eq!(kinds, vec![DiagnosticKind::RecursiveType; 2]);
}

#[test]
fn struct_names_are_not_values() {
    let kinds = check(indoc! {"
        struct S { a: i32 }
        fn main() { let s = S; }
    "});

    assert_eq!(kinds, vec![DiagnosticKind::TypeMismatch]);
}

#[test]
fn every_expression_gets_a_type() {
    with_checked(
        indoc! {"
            struct S { v: [u8; 4] }
            fn g(s: *S) -> u8 { return s.v[1] + 2; }
            fn main() {
                let mut s: S;
                let x = g(&s) as i64 * -(3);
                for (let mut i = 0; i < 4; i += 1) { s.v[i] = 0; }
            }
        "},
        |checked| {
            assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
            assert_eq!(checked.variable_type("x"), "i64");

            let mut types = ExpressionTypes::default();
            visit::walk_module(&mut types, checked.module);

            assert!(types.0.iter().all(Option::is_some));
        },
    );
}

#[test]
fn checking_twice_attaches_the_same_types() {
    let source = SourceFile::new(
        indoc! {"
            struct Pair { a: i32, b: *Pair }
            fn sum(p: *Pair) -> i32 { return p.a + (*p.b).a; }
            fn main() -> i32 {
                let mut pair: [Pair; 1];
                let bytes = \"hi\";
                return sum(&pair[0]) + bytes.len as i32 + -ONE;
            }
            global ONE: i32 = 1;
        "},
        SourceFileOrigin::Memory,
    );
    let types = TypeTable::new();
    let mut diagnostics = DiagnosticCollector::new();

    let module = Parser::parse_module(&source, &mut diagnostics);
    let symbols = Resolver::resolve_names(&module, &mut diagnostics);

    TypeChecker::check_module(&module, &symbols, &types, DEFAULT_INTEGER, &mut diagnostics);
    let mut first = ExpressionTypes::default();
    visit::walk_module(&mut first, &module);
    let interned = types.len();

    TypeChecker::check_module(&module, &symbols, &types, DEFAULT_INTEGER, &mut diagnostics);
    let mut second = ExpressionTypes::default();
    visit::walk_module(&mut second, &module);

    assert!(!diagnostics.has_errors(), "{:?}", diagnostics.into_vec());
    assert_eq!(first.0, second.0);
    assert_eq!(types.len(), interned);
}
