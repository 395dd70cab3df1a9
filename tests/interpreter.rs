use simi::prelude::*;

fn make_expression(source: &'static str) -> Expr {
    let tokens = Scanner::new(source, "test.simi").scan_tokens();
    let mut parser = Parser::new(tokens);
    parser.parse_expression().expect("failed to parse the source")
}

macro_rules! assert_literal {
    ($source:literal, $expected:expr) => {
        let mut ipr = Interpreter::new();
        let expr = make_expression($source);
        let res = ipr.evaluate_expr(&expr);
        assert!(res.is_ok());
        assert_eq!(res.unwrap(), $expected);
    };
}

macro_rules! assert_integer {
    ($source:literal, $expected:expr) => {
        assert_literal!($source, Value::Integer($expected));
    };
}

macro_rules! assert_float {
    ($source:literal, $expected:expr) => {
        assert_literal!($source, Value::Float($expected));
    };
}

macro_rules! assert_string {
    ($source:literal, $expected:expr) => {
        assert_literal!($source, Value::Str($expected.to_string()));
    };
}

macro_rules! assert_boolean {
    ($source:literal, $expected:expr) => {
        assert_literal!($source, Value::Boolean($expected));
    };
}

#[test]
fn unary_minus() {
    assert_float!("-3.14", -3.14);
    assert_integer!("-3", -3);
}

#[test]
fn unary_not() {
    assert_boolean!("not true", false);
    assert_boolean!("not nil", true);
}

#[test]
fn binary_plus_numbers() {
    assert_integer!("10 + 20", 30);
    assert_float!("10 + 0.5", 10.5);
}

#[test]
fn binary_plus_strings() {
    assert_string!(r#" "Hello " + "World!" "#, "Hello World!");
}

#[test]
fn binary_minus() {
    assert_integer!("10 - 20", -10);
}

#[test]
fn binary_star() {
    assert_integer!("10 * 20", 200);
}

#[test]
fn binary_slash() {
    assert_float!("10 / 20", 0.5);
    assert_integer!("7 // 2", 3);
    assert_integer!("7 % 3", 1);
}

#[test]
fn comparisons() {
    assert_boolean!("1 < 2", true);
    assert_boolean!("2 <= 1", false);
    assert_boolean!("1 == 1.0", true);
    assert_boolean!("\"a\" != \"b\"", true);
}

#[test]
fn logical_operators_short_circuit() {
    assert_integer!("nil or 3", 3);
    assert_boolean!("false and undefined", false);
    assert_integer!("nil ?? 4", 4);
}

#[test]
fn interpolated_strings() {
    assert_string!("\"1 + 1 = \\(1 + 1)\"", "1 + 1 = 2");
}

#[test]
fn division_by_zero_is_an_error() {
    let mut ipr = Interpreter::new();
    let expr = make_expression("1 // 0");
    assert!(ipr.evaluate_expr(&expr).is_err());
}
