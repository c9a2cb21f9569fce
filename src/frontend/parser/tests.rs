use indoc::indoc;
use pretty_assertions::assert_eq;

use super::Parser;
use crate::{
    diagnostics::{DiagnosticCollector, DiagnosticKind},
    frontend::{
        SourceFile, SourceFileOrigin,
        ast::{
            Else, Expression, ExpressionKind, ItemKind, LiteralKind, Module, StatementKind, Type,
            TypeKind,
        },
    },
};

fn source(text: &str) -> SourceFile {
    SourceFile::new(text, SourceFileOrigin::Memory)
}

fn parse(source: &SourceFile) -> (Module<'_>, DiagnosticCollector) {
    let mut diagnostics = DiagnosticCollector::new();
    let module = Parser::parse_module(source, &mut diagnostics);

    (module, diagnostics)
}

fn kinds(diagnostics: &DiagnosticCollector) -> Vec<DiagnosticKind> {
    diagnostics.iter().map(|d| d.kind).collect()
}

/// Fully parenthesized rendering of an expression tree
fn sexp(expression: &Expression) -> String {
    match &expression.kind {
        ExpressionKind::Literal(literal) => match &literal.kind {
            LiteralKind::Integer { value, .. } => value.to_string(),
            LiteralKind::Boolean(value) => value.to_string(),
            LiteralKind::Char(c) => format!("{c:?}"),
            LiteralKind::String(bytes) => format!("{:?}", String::from_utf8_lossy(bytes)),
        },
        ExpressionKind::Identifier(identifier) => identifier.name.to_string(),
        ExpressionKind::Grouping(inner) => sexp(inner),
        ExpressionKind::Array(elements) => format!(
            "[{}]",
            elements.iter().map(sexp).collect::<Vec<_>>().join(" ")
        ),
        ExpressionKind::FunctionCall { target, arguments } => format!(
            "(call {}{})",
            sexp(target),
            arguments
                .arguments
                .iter()
                .map(|a| format!(" {}", sexp(a)))
                .collect::<String>()
        ),
        ExpressionKind::Index { target, index } => format!("(index {} {})", sexp(target), sexp(index)),
        ExpressionKind::Slice { target, start, end } => format!(
            "(slice {} {} {})",
            sexp(target),
            start.as_deref().map_or("_".to_owned(), sexp),
            end.as_deref().map_or("_".to_owned(), sexp)
        ),
        ExpressionKind::Field { target, field } => format!("(. {} {})", sexp(target), field.name),
        ExpressionKind::Binary { lhs, operator, rhs } => {
            format!("({} {} {})", operator.kind, sexp(lhs), sexp(rhs))
        }
        ExpressionKind::Unary { operator, operand } => {
            format!("({} {})", operator.kind, sexp(operand))
        }
        ExpressionKind::Cast { expression, ty } => {
            format!("(as {} {})", sexp(expression), type_name(ty))
        }
        ExpressionKind::Assignment(assignment) => format!(
            "({}= {} {})",
            assignment
                .operator
                .as_ref()
                .map_or(String::new(), |op| op.kind.binary_operator().to_string()),
            sexp(&assignment.lhs),
            sexp(&assignment.rhs)
        ),
    }
}

fn type_name(ty: &Type) -> String {
    match &ty.kind {
        TypeKind::Unit => "()".to_owned(),
        TypeKind::Primitive(primitive) => primitive.to_string(),
        TypeKind::Named(identifier) => identifier.name.to_string(),
        TypeKind::Pointer(inner) => format!("*{}", type_name(inner)),
        TypeKind::Slice(inner) => format!("[{}]", type_name(inner)),
        TypeKind::Array { ty, length } => format!("[{}; {length}]", type_name(ty)),
        TypeKind::Function {
            parameters,
            return_type,
        } => format!(
            "fn({}){}",
            parameters.iter().map(type_name).collect::<Vec<_>>().join(", "),
            return_type
                .as_deref()
                .map_or(String::new(), |ty| format!(" -> {}", type_name(ty)))
        ),
    }
}

fn expression(text: &str) -> String {
    let source = source(text);
    let (expression, diagnostics) = Parser::parse_expression_from(&source);

    assert!(diagnostics.is_empty(), "{diagnostics:?}");

    sexp(&expression.expect("expression should parse"))
}

#[test]
fn binary_precedence() {
    assert_eq!(expression("1 + 2 * 3"), "(+ 1 (* 2 3))");
    assert_eq!(expression("1 - 2 - 3"), "(- (- 1 2) 3)");
    assert_eq!(expression("a || b && c"), "(|| a (&& b c))");
    assert_eq!(expression("a == b < c"), "(== a (< b c))");
    assert_eq!(expression("a | b ^ c & d"), "(| a (^ b (& c d)))");
    assert_eq!(expression("a << 1 + 2"), "(<< a (+ 1 2))");
    assert_eq!(expression("a < b | c"), "(< a (| b c))");
}

#[test]
fn assignment_is_right_associative() {
    assert_eq!(expression("a = b = c"), "(= a (= b c))");
    assert_eq!(expression("a += b * 2"), "(+= a (* b 2))");
}

#[test]
fn cast_binds_between_multiplicative_and_unary() {
    assert_eq!(expression("a * b as i64"), "(* a (as b i64))");
    assert_eq!(expression("-x as i64"), "(as (- x) i64)");
    assert_eq!(expression("x as u8 as u32"), "(as (as x u8) u32)");
}

#[test]
fn unary_and_postfix() {
    assert_eq!(expression("*p.f"), "(* (. p f))");
    assert_eq!(expression("-*&x"), "(- (* (& x)))");
    assert_eq!(expression("!!b"), "(! (! b))");
    assert_eq!(expression("& &x"), "(& (& x))");
    assert_eq!(expression("&(&x)"), "(& (& x))");
    assert_eq!(expression("f(1, g(2))[3].x"), "(. (index (call f 1 (call g 2)) 3) x)");
}

#[test]
fn slices_and_arrays() {
    assert_eq!(expression("a[1..2]"), "(slice a 1 2)");
    assert_eq!(expression("a[..n]"), "(slice a _ n)");
    assert_eq!(expression("a[i..]"), "(slice a i _)");
    assert_eq!(expression("a[..]"), "(slice a _ _)");
    assert_eq!(expression("[1, 2, 3,]"), "[1 2 3]");
}

#[test]
fn double_ampersand_is_not_double_address_of() {
    let source = source("&&x");
    let (expression, diagnostics) = Parser::parse_expression_from(&source);

    assert!(expression.is_none());
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind, DiagnosticKind::UnexpectedToken);
}

#[test]
fn parses_items() {
    let source = source(indoc! {"
        struct Point { x: i32, y: i32 }
        struct Legacy { a: u8; b: *Point; }
        global mut COUNTER: u64 = 0;
        global NAME = \"brook\";

        fn add(a: i32, mut b: i32) -> i32 {
            return a + b;
        }

        fn apply(f: fn(i32, i32) -> i32, values: [i32; 4], rest: [u8]) {}
    "});
    let (module, diagnostics) = parse(&source);

    assert!(!diagnostics.has_errors());
    assert_eq!(module.items.len(), 6);

    let ItemKind::StructDefinition(point) = &module.items[0].kind else {
        panic!("expected a struct");
    };
    assert_eq!(point.fields.len(), 2);
    assert_eq!(point.fields[1].name.name.value(), "y");

    let ItemKind::StructDefinition(legacy) = &module.items[1].kind else {
        panic!("expected a struct");
    };
    assert_eq!(type_name(&legacy.fields[1].ty), "*Point");

    let ItemKind::GlobalDefinition(counter) = &module.items[2].kind else {
        panic!("expected a global");
    };
    assert!(counter.is_mutable);

    let ItemKind::FunctionDefinition(add) = &module.items[4].kind else {
        panic!("expected a function");
    };
    assert!(!add.signature.parameters.parameters[0].is_mutable);
    assert!(add.signature.parameters.parameters[1].is_mutable);

    let ItemKind::FunctionDefinition(apply) = &module.items[5].kind else {
        panic!("expected a function");
    };
    assert_eq!(
        apply
            .signature
            .parameters
            .parameters
            .iter()
            .map(|p| type_name(&p.ty))
            .collect::<Vec<_>>(),
        vec!["fn(i32, i32) -> i32", "[i32; 4]", "[u8]"]
    );
}

#[test]
fn parses_statements() {
    let source = source(indoc! {"
        fn main() {
            let mut i: i32 = 0;
            let j;
            i = i + 1;
            f(i);
            ;
            { return; }
            if a { } else if b { } else { }
            while i < 10 { break; }
            for (let mut k = 0; k < 10; k += 1) { continue; }
            for (;;) {}
        }
    "});
    let (module, diagnostics) = parse(&source);

    assert!(!diagnostics.has_errors(), "{:?}", kinds(&diagnostics));

    let ItemKind::FunctionDefinition(main) = &module.items[0].kind else {
        panic!("expected a function");
    };
    let statements = &main.body.statements;

    assert!(matches!(statements[0].kind, StatementKind::Local(_)));
    assert!(matches!(statements[1].kind, StatementKind::Local(_)));
    assert!(matches!(statements[2].kind, StatementKind::Assignment(_)));
    assert!(matches!(statements[3].kind, StatementKind::Expression(_)));
    assert!(matches!(statements[4].kind, StatementKind::Empty));
    assert!(matches!(statements[5].kind, StatementKind::Block(_)));

    let StatementKind::If(if_statement) = &statements[6].kind else {
        panic!("expected an if statement");
    };
    let Some(Else::If(else_if)) = &if_statement.negative else {
        panic!("expected an else if");
    };
    assert!(matches!(else_if.negative, Some(Else::Block(_))));

    assert!(matches!(statements[7].kind, StatementKind::While(_)));

    let StatementKind::For(for_loop) = &statements[8].kind else {
        panic!("expected a for loop");
    };
    assert!(matches!(
        for_loop.initializer.as_deref().map(|s| &s.kind),
        Some(StatementKind::Local(_))
    ));
    assert_eq!(for_loop.step.as_deref().map(sexp).as_deref(), Some("(+= k 1)"));

    let StatementKind::For(forever) = &statements[9].kind else {
        panic!("expected a for loop");
    };
    assert!(forever.initializer.is_none() && forever.condition.is_none() && forever.step.is_none());
}

#[test]
fn two_syntax_errors_produce_exactly_two_diagnostics() {
    let source = source(indoc! {"
        fn main() {
            let x: i32 = ;
            let y: i32 = 2
            let z = 3;
            return;
        }

        fn other() {}
    "});
    let (module, diagnostics) = parse(&source);

    assert_eq!(
        kinds(&diagnostics),
        vec![DiagnosticKind::UnexpectedToken, DiagnosticKind::UnexpectedToken]
    );
    // Both functions survive recovery
    assert_eq!(module.items.len(), 2);
}

#[test]
fn errors_point_at_found_token_with_previous_as_secondary() {
    let source = source("fn main() { let y = 2 }");
    let (_, diagnostics) = parse(&source);

    let diagnostic = diagnostics.iter().next().expect("one diagnostic");

    assert_eq!(diagnostic.kind, DiagnosticKind::UnexpectedToken);
    assert_eq!(diagnostic.message, "expected `;`, found `}`");
    assert_eq!(source.value_of_span(diagnostic.span), "}");
    assert_eq!(source.value_of_span(diagnostic.secondary[0].span), "2");
}

#[test]
fn unclosed_delimiter_at_eof_is_fatal() {
    let source = source(indoc! {"
        fn main() {
            let x = (1 + 2;
    "});
    let (_, diagnostics) = parse(&source);

    assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::UnexpectedToken, DiagnosticKind::UnmatchedDelimiter]);
}

#[test]
fn unclosed_brace_is_reported_once() {
    let source = source("fn main() { if x { return; ");
    let (module, diagnostics) = parse(&source);

    assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::UnmatchedDelimiter]);
    assert_eq!(diagnostics.iter().next().map(|d| d.span.column), Some(18));
    assert!(module.items.is_empty());
}

#[test]
fn stray_close_delimiter_is_recoverable() {
    let source = source("} fn main() {}");
    let (module, diagnostics) = parse(&source);

    assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::UnmatchedDelimiter]);
    assert_eq!(module.items.len(), 1);
}

#[test]
fn lexer_diagnostics_come_first() {
    let source = source("fn main() { let s = \"\\q\"; let = 1; }");
    let (_, diagnostics) = parse(&source);

    assert_eq!(
        kinds(&diagnostics),
        vec![DiagnosticKind::InvalidEscape, DiagnosticKind::UnexpectedToken]
    );
}

#[test]
fn node_ids_are_unique() {
    let source = source("fn f(a: i32) -> i32 { return a * 2 + 1; }");
    let (module, _) = parse(&source);

    let ItemKind::FunctionDefinition(f) = &module.items[0].kind else {
        panic!("expected a function");
    };

    assert!(f.id.0 < module.node_count);
    assert!(module.items[0].id.0 < module.node_count);
    assert_ne!(f.id, module.items[0].id);
}

#[test]
fn array_lengths_only_take_usize_suffixes() {
    let source = source("fn f(a: [i32; 3u8], b: [i32; 4usize], c: [[u8; 2]; 5]) {}");
    let (module, diagnostics) = parse(&source);

    let diagnostic = diagnostics.iter().next().expect("one diagnostic");
    assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::UnexpectedToken]);
    assert_eq!(source.value_of_span(diagnostic.span), "3u8");

    let ItemKind::FunctionDefinition(function) = &module.items[0].kind else {
        panic!("expected a function");
    };
    let lengths: Vec<_> = function
        .signature
        .parameters
        .parameters
        .iter()
        .map(|parameter| match &parameter.ty.kind {
            TypeKind::Array { length, .. } => *length,
            _ => panic!("expected an array type"),
        })
        .collect();

    assert_eq!(lengths, vec![3, 4, 5]);
}

#[test]
fn raw_identifiers_name_keywords() {
    let source = source("fn r#while(r#let: i32) -> i32 { return r#let; }");
    let (module, diagnostics) = parse(&source);

    assert_eq!(kinds(&diagnostics), Vec::new());

    let ItemKind::FunctionDefinition(function) = &module.items[0].kind else {
        panic!("expected a function");
    };
    assert_eq!(function.signature.name.name.value(), "while");
    assert_eq!(
        function.signature.parameters.parameters[0].name.name.value(),
        "let"
    );
}
