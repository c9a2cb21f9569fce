use brookc::{
    CompileOptions, CompiledUnit, Session, compile_source,
    diagnostics::{DiagnosticKind, Severity, Stage},
    frontend::SourceFileOrigin,
    middle::lir::{InstructionKind, Terminator},
};
use indoc::indoc;
use pretty_assertions::assert_eq;

fn compile(text: &str) -> CompiledUnit {
    compile_source(text, SourceFileOrigin::Memory).expect("no internal errors")
}

fn error_kinds(unit: &CompiledUnit) -> Vec<DiagnosticKind> {
    unit.diagnostics
        .iter()
        .filter(|diagnostic| diagnostic.severity == Severity::Error)
        .map(|diagnostic| diagnostic.kind)
        .collect()
}

#[test]
fn a_small_program_compiles() {
    let unit = compile(indoc! {"
        struct Point { x: i32, y: i32 }

        global ORIGIN: [i32; 2] = [0, 0];

        fn length_squared(p: *Point) -> i32 {
            return p.x * p.x + p.y * p.y;
        }

        fn sum(values: [i32]) -> i32 {
            let mut total = 0;
            for (let mut i: usize = 0; i < values.len; i += 1) {
                total += values[i];
            }
            return total;
        }

        fn main() -> i32 {
            let mut p: Point;
            p.x = 3;
            p.y = 4;

            let numbers = [1, 2, 3, 4];
            if sum(numbers[1..]) != 9 {
                return 1;
            }

            return length_squared(&p) - 25 + ORIGIN[0];
        }
    "});

    assert_eq!(unit.diagnostics, Vec::new());

    let module = unit.module.expect("module is lowered");
    let names: Vec<_> = module
        .functions
        .iter()
        .map(|function| function.name.value())
        .collect();

    assert_eq!(names, vec!["length_squared", "sum", "main"]);
}

#[test]
fn returning_arms_need_no_merge_block() {
    let unit = compile("fn f(c: bool) -> i32 { if (c) { return 1; } else { return 2; } }");
    let module = unit.module.expect("module is lowered");
    let f = &module.functions.raw[0];

    assert_eq!(f.blocks.len(), 3);
    assert!(matches!(
        f.blocks.raw[0].terminator,
        Some(Terminator::Branch { .. })
    ));
}

#[test]
fn later_fields_have_larger_offsets() {
    let unit = compile(indoc! {"
        struct P { x: i32, y: i32 }
        fn x(p: *P) -> i32 { return p.x; }
        fn y(p: *P) -> i32 { return p.y; }
    "});
    let module = unit.module.expect("module is lowered");

    let offset = |index: usize| {
        module.functions.raw[index]
            .blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .find_map(|instruction| match instruction.kind {
                InstructionKind::Gep { offset, .. } => Some(offset),
                _ => None,
            })
            .expect("field access computes an address")
    };

    assert!(offset(1) > offset(0));
}

#[test]
fn compiling_twice_gives_the_same_module() {
    let text = indoc! {"
        fn fib(n: u32) -> u32 {
            if n < 2 { return n; }
            return fib(n - 1) + fib(n - 2);
        }

        fn main() -> i32 {
            let mut i: u32 = 0;
            while i < 10 && fib(i) < 100 { i += 1; }
            return i as i32;
        }
    "};

    let session = Session::default();
    let first = session
        .compile_source(text, SourceFileOrigin::Memory)
        .expect("no internal errors");
    let second = session
        .compile_source(text, SourceFileOrigin::Memory)
        .expect("no internal errors");

    assert!(first.module.is_some());
    assert_eq!(first.module, second.module);
}

#[test]
fn mixed_integer_widths_need_a_cast() {
    let failing = compile(indoc! {"
        fn main() -> i32 {
            let a: i8 = 1;
            let b: i32 = 2;
            return a + b;
        }
    "});

    assert_eq!(error_kinds(&failing), vec![DiagnosticKind::TypeMismatch]);
    assert!(failing.module.is_none());

    let passing = compile(indoc! {"
        fn main() -> i32 {
            let a: i8 = 1;
            let b: i32 = 2;
            return (a as i32) + b;
        }
    "});

    assert_eq!(error_kinds(&passing), Vec::new());
    assert!(passing.module.is_some());
}

#[test]
fn address_then_deref_is_accepted() {
    let unit = compile(indoc! {"
        struct S { a: u8 }
        fn main() -> u8 {
            let x: u8 = 7;
            let s: S;
            return *(&x) + (*(&s)).a;
        }
    "});

    assert_eq!(error_kinds(&unit), Vec::new());
    assert!(unit.module.is_some());
}

#[test]
fn shadowing_and_redeclaration() {
    let shadowing = compile(indoc! {"
        fn main() -> i32 {
            let x = 1;
            {
                let x = 2;
                return x;
            }
        }
    "});

    assert_eq!(error_kinds(&shadowing), Vec::new());

    let redeclaration = compile(indoc! {"
        fn main() -> i32 {
            let x = 1;
            let x = 2;
            return x;
        }
    "});

    assert_eq!(
        error_kinds(&redeclaration),
        vec![DiagnosticKind::DuplicateDeclaration]
    );
}

#[test]
fn independent_syntax_errors_are_all_reported() {
    let unit = compile(indoc! {"
        fn main() {
            let a = ;
            let b = 2
            let c = 3;
        }
    "});

    let parse_errors = unit
        .diagnostics
        .iter()
        .filter(|diagnostic| diagnostic.kind.stage() == Stage::Parse)
        .count();

    assert_eq!(parse_errors, 2);
    assert_eq!(unit.diagnostics.len(), 2);
    assert!(unit.module.is_none());
}

#[test]
fn type_errors_keep_accumulating() {
    let unit = compile(indoc! {"
        struct S { a: i32 }
        fn f(s: S) -> i32 { return s.b; }
        fn g() -> bool { return 1; }
        fn h() { if 1 { } }
    "});

    assert_eq!(
        error_kinds(&unit),
        vec![
            DiagnosticKind::UnknownField,
            DiagnosticKind::TypeMismatch,
            DiagnosticKind::InvalidConditionType,
        ]
    );
}

#[test]
fn rendered_diagnostics_carry_their_tag() {
    let unit = compile("fn main() { return missing; }");
    let rendered = strip_ansi_escapes::strip_str(unit.render_diagnostics());

    assert!(rendered.contains("ResolveError::UnresolvedName"), "{rendered}");
    assert!(rendered.contains("missing"), "{rendered}");
}

#[test]
fn sessions_share_types_across_units() {
    let session = Session::new(CompileOptions::default());
    let paths: Vec<std::path::PathBuf> = Vec::new();

    assert!(session.compile_all(&paths).is_empty());

    let a = session
        .compile_source("fn a() -> *u8 { let x: u8 = 1; return &x; }", SourceFileOrigin::Memory)
        .expect("no internal errors");
    let b = session
        .compile_source("fn b(p: *u8) -> u8 { return *p; }", SourceFileOrigin::Memory)
        .expect("no internal errors");

    assert!(a.module.is_some());
    assert!(b.module.is_some());
}

#[test]
fn unit_locals_and_parameters() {
    let unit = compile(indoc! {"
        fn nothing() {}
        fn pick(u: (), x: i32) -> i32 { return x; }
        fn main() -> i32 {
            let x = nothing();
            let mut y = x;
            y = nothing();
            return pick(y, 3) - 3;
        }
    "});

    assert_eq!(error_kinds(&unit), Vec::new());

    let module = unit.module.expect("module is lowered");
    let pick = &module.functions.raw[1];
    assert_eq!(pick.blocks.raw[0].parameters.len(), 1);
}

#[test]
fn oversized_types_are_diagnosed() {
    let unit = compile(indoc! {"
        struct Huge { a: [i64; 1152921504606846975], b: i64 }
        fn main() {
            let a: [[i64; 4611686018427387904]; 4];
        }
    "});

    assert_eq!(
        error_kinds(&unit),
        vec![DiagnosticKind::TypeTooLarge, DiagnosticKind::TypeTooLarge]
    );
    assert!(unit.module.is_none());
}

#[test]
fn slices_of_constant_literals_are_writable() {
    let unit = compile(indoc! {"
        fn clear(values: [i32]) { values[0] = 0; }
        fn main() { clear([1, 2, 3][1..]); }
    "});

    assert_eq!(error_kinds(&unit), Vec::new());

    let module = unit.module.expect("module is lowered");
    let main = &module.functions.raw[1];
    let copies_literal = main
        .blocks
        .iter()
        .flat_map(|block| &block.instructions)
        .any(|instruction| matches!(instruction.kind, InstructionKind::Copy { size: 12, .. }));

    assert!(copies_literal);
    assert!(module.globals.iter().all(|global| !global.is_mutable));
}

#[test]
fn endless_loops_need_no_trailing_return() {
    let unit = compile(indoc! {"
        fn serve(limit: i32) -> i32 {
            let mut handled = 0;
            while true {
                handled += 1;
                if handled == limit { return handled; }
            }
        }
    "});

    assert_eq!(error_kinds(&unit), Vec::new());
    assert!(unit.module.is_some());
}
