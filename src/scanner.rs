use std::rc::Rc;

use crate::error::SharedErrorHub;
use crate::token::{Literal, Token, TokenType};

/// Word that turns a line comment into an authored breakpoint.
pub const BREAKPOINT_MARKER: &str = "BP";

const TAB_WIDTH: usize = 4;

#[derive(Debug)]
pub struct Scanner {
    source_chars: Vec<char>,
    tokens: Vec<Token>,
    start: usize,
    current: usize,
    line: u32,
    file: Rc<str>,
    indent: usize,
    at_line_start: bool,
    /// Open `\(` interpolations: paren depth inside each and its quote char.
    interpolations: Vec<(usize, char)>,
    error_count: usize,
    error_hub: Option<SharedErrorHub>,
}

impl Scanner {
    pub fn new(source: &str, file: &str) -> Self {
        Self {
            source_chars: source.chars().collect(),
            tokens: Vec::new(),
            start: 0,
            current: 0,
            line: 1,
            file: Rc::from(file),
            indent: 0,
            at_line_start: true,
            interpolations: vec![],
            error_count: 0,
            error_hub: None,
        }
    }

    pub fn with_error_reporting(self, error_hub: SharedErrorHub) -> Self {
        Self { error_hub: Some(error_hub), ..self }
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn scan_tokens(&mut self) -> Vec<Token> {
        while !self.is_at_end() {
            if self.at_line_start {
                self.measure_indent();
                if self.is_at_end() {
                    break;
                }
            }
            self.start = self.current;
            self.scan_token();
        }

        if !self.interpolations.is_empty() {
            self.error(self.line, "Unterminated string interpolation.");
        }

        self.push_token(TokenType::Eof, "", None);
        tracing::trace!("scanned {} tokens from {}", self.tokens.len(), self.file);

        std::mem::take(&mut self.tokens)
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source_chars.len()
    }

    fn measure_indent(&mut self) {
        let mut indent = 0;
        while !self.is_at_end() {
            match self.peek() {
                ' ' => indent += 1,
                '\t' => indent += TAB_WIDTH,
                _ => break,
            }
            self.current += 1;
        }
        self.indent = indent;
        self.at_line_start = false;
    }

    fn scan_token(&mut self) {
        let c = self.advance();

        match c {
            '(' => {
                if let Some((depth, _)) = self.interpolations.last_mut() {
                    *depth += 1;
                }
                self.add_token(TokenType::LeftParen);
            }
            ')' => self.right_paren(),
            '[' => self.add_token(TokenType::LeftBracket),
            ']' => self.add_token(TokenType::RightBracket),
            ',' => self.add_token(TokenType::Comma),
            '.' => self.add_token(TokenType::Dot),
            ':' => self.add_token(TokenType::Colon),
            ';' => self.add_token(TokenType::Semicolon),
            '$' => self.add_token(TokenType::Dollar),
            '@' => self.add_token(TokenType::At),
            '-' => self.either('=', TokenType::MinusEqual, TokenType::Minus),
            '+' => self.either('=', TokenType::PlusEqual, TokenType::Plus),
            '*' => self.either('=', TokenType::StarEqual, TokenType::Star),
            '%' => self.either('=', TokenType::ModEqual, TokenType::Mod),
            '!' => self.either('=', TokenType::BangEqual, TokenType::Bang),
            '=' => self.either('=', TokenType::EqualEqual, TokenType::Equal),
            '<' => self.either('=', TokenType::LessEqual, TokenType::Less),
            '>' => self.either('=', TokenType::GreaterEqual, TokenType::Greater),
            '/' => {
                if self.match_next('/') {
                    self.either('=', TokenType::SlashSlashEqual, TokenType::SlashSlash);
                } else {
                    self.either('=', TokenType::SlashEqual, TokenType::Slash);
                }
            }
            '?' => {
                if self.match_next('?') {
                    self.either('=', TokenType::QuestionQuestionEqual, TokenType::QuestionQuestion);
                } else {
                    self.error(self.line, "Unexpected character '?'.");
                }
            }
            '#' => {
                if self.match_next('#') {
                    self.block_comment();
                } else {
                    self.line_comment();
                }
            }
            ' ' | '\r' | '\t' => {}
            '\n' => {
                self.add_token(TokenType::Newline);
                self.line += 1;
                self.at_line_start = true;
            }
            '"' | '\'' => self.string(c),
            '0'..='9' => self.number(),
            c if is_alpha(c) => self.identifier(),
            c => self.error(self.line, &format!("Unexpected character '{c}'.")),
        }
    }

    fn either(&mut self, next: char, matched: TokenType, otherwise: TokenType) {
        let token_type = if self.match_next(next) { matched } else { otherwise };
        self.add_token(token_type);
    }

    fn right_paren(&mut self) {
        match self.interpolations.last().copied() {
            Some((depth, quote)) if depth > 0 => {
                self.interpolations.pop();
                self.interpolations.push((depth - 1, quote));
                self.add_token(TokenType::RightParen);
            }
            Some((_, quote)) => {
                self.interpolations.pop();
                self.push_token(TokenType::RightParen, ")", None);

                // Nothing left of the literal: drop the trailing `+ ""`.
                if self.peek() == quote {
                    self.advance();
                    return;
                }
                self.push_token(TokenType::Plus, "+", None);
                self.start = self.current;
                self.string_body(quote);
            }
            None => self.add_token(TokenType::RightParen),
        }
    }

    fn line_comment(&mut self) {
        let start = self.current;
        while self.peek() != '\n' && !self.is_at_end() {
            self.advance();
        }

        let text: String = self.source_chars[start..self.current].iter().collect();
        if text.split_whitespace().any(|word| word == BREAKPOINT_MARKER) {
            let line = self.line;
            for token in self.tokens.iter_mut().rev().take_while(|t| t.line == line) {
                token.has_breakpoint = true;
            }
        }
    }

    fn block_comment(&mut self) {
        loop {
            if self.is_at_end() {
                self.error(self.line, "Unterminated block comment.");
                return;
            }
            let c = self.advance();
            if c == '\n' {
                self.line += 1;
            } else if c == '#' && self.match_next('#') {
                return;
            }
        }
    }

    fn string(&mut self, quote: char) {
        self.start = self.current;
        self.string_body(quote);
    }

    /// Scans literal text up to the closing quote or an interpolation start.
    fn string_body(&mut self, quote: char) {
        let mut text = String::new();

        loop {
            if self.is_at_end() {
                self.error(self.line, "Unterminated string.");
                return;
            }

            let c = self.advance();
            if c == quote {
                self.push_token(TokenType::Str, &text.clone(), Some(Literal::Str(text)));
                return;
            }

            match c {
                '\n' => {
                    self.line += 1;
                    text.push(c);
                }
                '\\' => match self.advance_or_nul() {
                    'n' => text.push('\n'),
                    't' => text.push('\t'),
                    'r' => text.push('\r'),
                    '0' => text.push('\0'),
                    '\\' => text.push('\\'),
                    '"' => text.push('"'),
                    '\'' => text.push('\''),
                    '(' => {
                        self.push_token(TokenType::Str, &text.clone(), Some(Literal::Str(text)));
                        self.push_token(TokenType::Plus, "+", None);
                        self.push_token(TokenType::LeftParen, "(", None);
                        self.interpolations.push((0, quote));
                        return;
                    }
                    other => {
                        self.error(self.line, &format!("Invalid escape sequence '\\{other}'."));
                    }
                },
                _ => text.push(c),
            }
        }
    }

    fn number(&mut self) {
        let integer_only = matches!(self.tokens.last(), Some(t) if t.token_type == TokenType::Dot);

        while self.peek().is_ascii_digit() || self.peek() == '_' {
            self.advance();
        }

        if !integer_only {
            if self.peek() == '.' && self.peek_next().is_ascii_digit() {
                self.advance();
                while self.peek().is_ascii_digit() || self.peek() == '_' {
                    self.advance();
                }
            }

            if matches!(self.peek(), 'e' | 'E') {
                let sign = matches!(self.peek_next(), '+' | '-');
                let digit_at = if sign { self.current + 2 } else { self.current + 1 };
                if self.source_chars.get(digit_at).map_or(false, |c| c.is_ascii_digit()) {
                    self.current = digit_at;
                    while self.peek().is_ascii_digit() {
                        self.advance();
                    }
                }
            }
        }

        let text = self.source_substring(self.start, self.current);
        let digits: String = text.chars().filter(|c| *c != '_').collect();

        let literal = match digits.parse::<i64>() {
            Ok(i) => Literal::Integer(i),
            Err(_) => match digits.parse::<f64>() {
                Ok(f) => Literal::Float(f),
                Err(_) => {
                    self.error(self.line, &format!("Invalid number '{text}'."));
                    return;
                }
            },
        };

        self.push_token(TokenType::Number, &text, Some(literal));
    }

    fn identifier(&mut self) {
        while is_alpha_numeric(self.peek()) {
            self.advance();
        }

        let text = self.source_substring(self.start, self.current);
        let token_type = get_keyword(&text).unwrap_or(TokenType::Identifier);
        self.add_token(token_type);
    }

    fn error(&mut self, line: u32, message: &str) {
        self.error_count += 1;
        match &self.error_hub {
            Some(hub) => hub.borrow_mut().report(line, "", message),
            None => tracing::warn!("[line {line}] {message}"),
        }
    }

    fn advance(&mut self) -> char {
        let c = self.peek();
        self.current += 1;
        c
    }

    fn advance_or_nul(&mut self) -> char {
        if self.is_at_end() {
            return '\0';
        }
        self.advance()
    }

    fn add_token(&mut self, token_type: TokenType) {
        let text = self.source_substring(self.start, self.current);
        self.push_token(token_type, &text, None);
    }

    fn push_token(&mut self, token_type: TokenType, lexeme: &str, literal: Option<Literal>) {
        let mut token = Token::new(token_type, lexeme, literal, self.line);
        token.file = self.file.clone();
        token.indent = self.indent;
        self.tokens.push(token);
    }

    fn source_substring(&self, start: usize, end: usize) -> String {
        self.source_chars[start..end.min(self.source_chars.len())].iter().collect()
    }

    fn match_next(&mut self, expected: char) -> bool {
        if self.peek() == expected && !self.is_at_end() {
            self.current += 1;
            return true;
        }
        false
    }

    fn peek(&self) -> char {
        *self.source_chars.get(self.current).unwrap_or(&'\0')
    }

    fn peek_next(&self) -> char {
        *self.source_chars.get(self.current + 1).unwrap_or(&'\0')
    }
}

fn is_alpha(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_alpha_numeric(c: char) -> bool {
    is_alpha(c) || c.is_ascii_digit()
}

pub fn get_keyword(text: &str) -> Option<TokenType> {
    match text {
        "and" => Some(TokenType::And),
        "break" => Some(TokenType::Break),
        "class" => Some(TokenType::Class),
        "continue" => Some(TokenType::Continue),
        "def" => Some(TokenType::Def),
        "elsif" => Some(TokenType::Elsif),
        "else" => Some(TokenType::Else),
        "end" => Some(TokenType::End),
        "false" => Some(TokenType::False),
        "for" => Some(TokenType::For),
        "if" => Some(TokenType::If),
        "import" => Some(TokenType::Import),
        "in" => Some(TokenType::In),
        "is" => Some(TokenType::Is),
        "native" => Some(TokenType::Native),
        "nil" => Some(TokenType::Nil),
        "not" => Some(TokenType::Not),
        "or" => Some(TokenType::Or),
        "pass" => Some(TokenType::Pass),
        "print" => Some(TokenType::Print),
        "raise" => Some(TokenType::Raise),
        "rescue" => Some(TokenType::Rescue),
        "return" => Some(TokenType::Return),
        "self" => Some(TokenType::SelfKw),
        "super" => Some(TokenType::Super),
        "true" => Some(TokenType::True),
        "when" => Some(TokenType::When),
        "while" => Some(TokenType::While),
        "yield" => Some(TokenType::Yield),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(source: &str) -> Vec<TokenType> {
        Scanner::new(source, "test.simi").scan_tokens().into_iter().map(|t| t.token_type).collect()
    }

    #[test]
    fn compound_operators() {
        use TokenType::*;
        assert_eq!(
            types("a //= b ?? c %= 2"),
            vec![Identifier, SlashSlashEqual, Identifier, QuestionQuestion, Identifier, ModEqual, Number, Eof]
        );
    }

    #[test]
    fn interpolation_splits_the_literal() {
        use TokenType::*;
        let tokens = Scanner::new("\"a\\(x + 1)b\"", "t").scan_tokens();
        assert_eq!(
            tokens.iter().map(|t| t.token_type).collect::<Vec<_>>(),
            vec![Str, Plus, LeftParen, Identifier, Plus, Number, RightParen, Plus, Str, Eof]
        );
        assert_eq!(tokens[0].literal, Some(Literal::Str("a".to_owned())));
        assert_eq!(tokens[8].literal, Some(Literal::Str("b".to_owned())));
    }

    #[test]
    fn interpolation_at_the_end_has_no_trailing_literal() {
        use TokenType::*;
        assert_eq!(
            types("'n = \\(f(n))'"),
            vec![Str, Plus, LeftParen, Identifier, LeftParen, Identifier, RightParen, RightParen, Eof]
        );
    }

    #[test]
    fn numbers_after_dot_stay_integers() {
        let tokens = Scanner::new("arr.0.1 1_000 2.5e-1", "t").scan_tokens();
        assert_eq!(tokens[2].literal, Some(Literal::Integer(0)));
        assert_eq!(tokens[4].literal, Some(Literal::Integer(1)));
        assert_eq!(tokens[5].literal, Some(Literal::Integer(1000)));
        assert_eq!(tokens[6].literal, Some(Literal::Float(0.25)));
    }

    #[test]
    fn breakpoint_comment_flags_the_line() {
        let tokens = Scanner::new("a = 1\nb = 2 # BP\nc = 3", "t").scan_tokens();
        let flagged: Vec<_> =
            tokens.iter().filter(|t| t.has_breakpoint).map(|t| t.lexeme.as_str()).collect();
        assert_eq!(flagged, vec!["b", "=", "2"]);
    }

    #[test]
    fn block_comments_span_lines() {
        use TokenType::*;
        let tokens = Scanner::new("## one\ntwo ##\nx", "t").scan_tokens();
        assert_eq!(tokens.iter().map(|t| t.token_type).collect::<Vec<_>>(), vec![Newline, Identifier, Eof]);
        assert_eq!(tokens[1].line, 3);
    }

    #[test]
    fn tokens_carry_line_indentation() {
        let tokens = Scanner::new("if a:\n    b\n", "t").scan_tokens();
        let b = tokens.iter().find(|t| t.lexeme == "b").unwrap();
        assert_eq!(b.indent, 4);
        assert_eq!(tokens[0].indent, 0);
        assert_eq!(&*b.file, "t");
    }

    #[test]
    fn bad_input_is_counted_and_scanning_continues() {
        let mut scanner = Scanner::new("a ~ b\n'open", "t");
        let tokens = scanner.scan_tokens();
        assert_eq!(scanner.error_count(), 2);
        assert!(tokens.iter().any(|t| t.lexeme == "b"));
    }
}
