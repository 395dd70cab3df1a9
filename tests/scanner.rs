use simi::prelude::{Scanner, TokenType};

#[test]
fn scanner_works() {
    let input = "2 and 3";
    let mut scanner = Scanner::new(input, "test.simi");
    let tokens = scanner.scan_tokens();
    assert_eq!(tokens.len(), 4);
    assert_eq!(scanner.error_count(), 0);
}

#[test]
fn newlines_end_statements() {
    use TokenType::*;
    let tokens = Scanner::new("$x = 1\nprint x", "test.simi").scan_tokens();
    let types: Vec<_> = tokens.iter().map(|t| t.token_type).collect();
    assert_eq!(types, vec![Dollar, Identifier, Equal, Number, Newline, Print, Identifier, Eof]);
}

#[test]
fn unexpected_characters_are_counted() {
    let mut scanner = Scanner::new("a ~ b ?", "test.simi");
    scanner.scan_tokens();
    assert_eq!(scanner.error_count(), 2);
}
