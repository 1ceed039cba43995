//! Integration tests for the parser

use super::*;

/// Helper to parse an expression from source
fn parse_expr(source: &str) -> ParseResult<AstExpr> {
    let lexer = Lexer::new(source);
    let mut parser = Parser::new(lexer);
    parser.parse_expr()
}

/// Helper to parse a single statement from source
fn parse_stmt(source: &str) -> AstStatement {
    let program = parse(source).unwrap();
    assert_eq!(program.statements.len(), 1, "expected one statement in {:?}", source);
    program.statements.into_iter().next().unwrap()
}

fn local(name: &str) -> Local {
    Local {
        name: name.to_string(),
        depth: 0,
        is_captured: false,
    }
}

#[test]
fn test_parse_literals() {
    assert!(matches!(parse_expr("42").unwrap(), AstExpr::Int { value: 42, .. }));
    assert!(matches!(parse_expr("true").unwrap(), AstExpr::Bool { value: true, .. }));
    assert!(matches!(parse_expr("null").unwrap(), AstExpr::Null { .. }));
    match parse_expr("'hi'").unwrap() {
        AstExpr::String { value, .. } => assert_eq!(value, "hi"),
        other => panic!("Expected String, got {:?}", other),
    }
    match parse_expr("2.5").unwrap() {
        AstExpr::Float { value, .. } => assert!((value - 2.5).abs() < f64::EPSILON),
        other => panic!("Expected Float, got {:?}", other),
    }
}

#[test]
fn test_precedence() {
    // 1 + 2 * 3 parses as 1 + (2 * 3)
    match parse_expr("1 + 2 * 3").unwrap() {
        AstExpr::Binary {
            op: BinaryOp::Add,
            right,
            ..
        } => assert!(matches!(*right, AstExpr::Binary { op: BinaryOp::Mul, .. })),
        other => panic!("Expected Add, got {:?}", other),
    }

    // a or b and c parses as a or (b and c)
    match parse_expr("a or b and c").unwrap() {
        AstExpr::Binary {
            op: BinaryOp::Or,
            right,
            ..
        } => assert!(matches!(*right, AstExpr::Binary { op: BinaryOp::And, .. })),
        other => panic!("Expected Or, got {:?}", other),
    }
}

#[test]
fn test_left_associative_subtraction() {
    // 10 - 3 - 2 parses as (10 - 3) - 2
    match parse_expr("10 - 3 - 2").unwrap() {
        AstExpr::Binary {
            op: BinaryOp::Sub,
            left,
            right,
            ..
        } => {
            assert!(matches!(*left, AstExpr::Binary { op: BinaryOp::Sub, .. }));
            assert!(matches!(*right, AstExpr::Int { value: 2, .. }));
        }
        other => panic!("Expected Sub, got {:?}", other),
    }
}

#[test]
fn test_unary_binds_tighter_than_binary() {
    match parse_expr("-a * 2").unwrap() {
        AstExpr::Binary {
            op: BinaryOp::Mul,
            left,
            ..
        } => assert!(matches!(*left, AstExpr::Unary { op: UnaryOp::Neg, .. })),
        other => panic!("Expected Mul, got {:?}", other),
    }
    assert!(matches!(
        parse_expr("not x").unwrap(),
        AstExpr::Unary { op: UnaryOp::Not, .. }
    ));
    assert!(matches!(
        parse_expr("!x").unwrap(),
        AstExpr::Unary { op: UnaryOp::Not, .. }
    ));
}

#[test]
fn test_postfix_chain() {
    match parse_expr("a.b[0]").unwrap() {
        AstExpr::IndexAccess { object, .. } => match *object {
            AstExpr::FieldAccess { field, .. } => assert_eq!(field, "b"),
            other => panic!("Expected FieldAccess, got {:?}", other),
        },
        other => panic!("Expected IndexAccess, got {:?}", other),
    }
}

#[test]
fn test_containers() {
    match parse_expr("[1, 2, 3,]").unwrap() {
        AstExpr::Array { items, .. } => assert_eq!(items.len(), 3),
        other => panic!("Expected Array, got {:?}", other),
    }
    match parse_expr("{a: 1, 'b': 2, (1 + 1): 3}").unwrap() {
        AstExpr::Dict { entries, .. } => {
            assert_eq!(entries.len(), 3);
            assert!(matches!(&entries[0].0, AstExpr::String { value, .. } if value == "a"));
            assert!(matches!(&entries[1].0, AstExpr::String { value, .. } if value == "b"));
            assert!(matches!(&entries[2].0, AstExpr::Binary { .. }));
        }
        other => panic!("Expected Dict, got {:?}", other),
    }
    assert!(matches!(parse_expr("[]").unwrap(), AstExpr::Array { items, .. } if items.is_empty()));
    assert!(matches!(parse_expr("{}").unwrap(), AstExpr::Dict { entries, .. } if entries.is_empty()));
}

#[test]
fn test_function_call() {
    match parse_expr("print('a', 1)").unwrap() {
        AstExpr::Call { function, args, .. } => {
            assert_eq!(function, "print");
            assert_eq!(args.len(), 2);
        }
        other => panic!("Expected Call, got {:?}", other),
    }
}

#[test]
fn test_calling_a_non_name_fails() {
    let err = parse_expr("a.b()").unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidExpression);
    assert!(err.message.contains("Only named functions"));
}

#[test]
fn test_let_statement() {
    match parse_stmt("let x := 1 + 2") {
        AstStatement::Let { name, value, .. } => {
            assert_eq!(name, "x");
            assert!(matches!(value, AstExpr::Binary { .. }));
        }
        other => panic!("Expected Let, got {:?}", other),
    }
}

#[test]
fn test_let_with_single_equals_suggests_walrus() {
    let err = parse("let x = 1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnexpectedToken);
    assert!(err.suggestion.as_deref().unwrap().contains(":="));
    assert!(err.source.is_some());
}

#[test]
fn test_assignment_targets() {
    match parse_stmt("x := 2") {
        AstStatement::Assign { target, .. } => {
            assert_eq!(target.name, "x");
            assert!(target.path.is_empty());
        }
        other => panic!("Expected Assign, got {:?}", other),
    }

    match parse_stmt("a[0].b := 2") {
        AstStatement::Assign { target, .. } => {
            assert_eq!(target.name, "a");
            assert_eq!(target.path.len(), 2);
            assert!(matches!(target.path[0], AstExpr::Int { value: 0, .. }));
            assert!(matches!(&target.path[1], AstExpr::String { value, .. } if value == "b"));
        }
        other => panic!("Expected Assign, got {:?}", other),
    }
}

#[test]
fn test_invalid_assignment_target() {
    let err = parse("f(1) := 2").unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidAssignment);

    let err = parse("x = 2").unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidAssignment);
    assert!(err.suggestion.unwrap().contains(":="));
}

#[test]
fn test_function_declaration() {
    match parse_stmt("fun add(a, b) { return a + b }") {
        AstStatement::Function {
            name, params, body, ..
        } => {
            assert_eq!(name, "add");
            assert_eq!(params, vec!["a", "b"]);
            assert!(matches!(body[0], AstStatement::Return { value: Some(_), .. }));
        }
        other => panic!("Expected Function, got {:?}", other),
    }

    assert!(parse("fun f(a, a) { }").is_err());
}

#[test]
fn test_bare_return() {
    match parse_stmt("fun f() { return }") {
        AstStatement::Function { body, .. } => {
            assert!(matches!(body[0], AstStatement::Return { value: None, .. }))
        }
        other => panic!("Expected Function, got {:?}", other),
    }
}

#[test]
fn test_else_if_chain() {
    match parse_stmt("if (a) { 1 } else if (b) { 2 } else { 3 }") {
        AstStatement::If { else_branch, .. } => {
            let else_branch = else_branch.unwrap();
            assert_eq!(else_branch.len(), 1);
            match &else_branch[0] {
                AstStatement::If { else_branch, .. } => assert!(else_branch.is_some()),
                other => panic!("Expected nested If, got {:?}", other),
            }
        }
        other => panic!("Expected If, got {:?}", other),
    }
}

#[test]
fn test_while_and_try() {
    assert!(matches!(
        parse_stmt("while (i < 3) { i := i + 1 }"),
        AstStatement::While { .. }
    ));

    match parse_stmt("try { throw 'x' } catch (e) { print(e) }") {
        AstStatement::Try {
            body,
            catch_name,
            catch_body,
            ..
        } => {
            assert!(matches!(body[0], AstStatement::Throw { .. }));
            assert_eq!(catch_name.as_deref(), Some("e"));
            assert_eq!(catch_body.len(), 1);
        }
        other => panic!("Expected Try, got {:?}", other),
    }

    match parse_stmt("try { 1 } catch { 2 }") {
        AstStatement::Try { catch_name, .. } => assert!(catch_name.is_none()),
        other => panic!("Expected Try, got {:?}", other),
    }
}

#[test]
fn test_statements_and_semicolons() {
    let program = parse("let a := 1; let b := 2\n a + b;;").unwrap();
    assert_eq!(program.statements.len(), 3);
    assert!(parse("").unwrap().statements.is_empty());
}

#[test]
fn test_unclosed_brace() {
    let err = parse("if (x) { 1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnexpectedEof);
    assert!(err.suggestion.unwrap().contains("closing brace"));
}

#[test]
fn test_invalid_token_rendering() {
    let err = parse("let x := 'open").unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidToken);
    let rendered = err.render();
    assert!(rendered.contains("1 | let x := 'open"));
    assert!(rendered.contains('^'));
}

#[test]
fn test_compile_threads_locals_between_chunks() {
    let first = compile("let a := 1", &[]).unwrap();
    assert_eq!(first.locals, vec![local("a")]);

    let second = compile("let b := a + 1", &first.locals).unwrap();
    assert_eq!(second.locals, vec![local("a"), local("b")]);

    let third = compile("a + b", &second.locals).unwrap();
    assert_eq!(third.locals, second.locals);
}

#[test]
fn test_compile_error_carries_source() {
    let err = compile("missing := 1", &[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Resolution);
    assert!(err.render().contains("1 | missing := 1"));
}
