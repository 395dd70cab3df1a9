use std::rc::Rc;

use crate::error::SharedErrorHub;
use crate::prelude::*;
use crate::printer::Printer;

type Item = fn(&mut Parser) -> Option<Stmt>;

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    error_count: usize,
    error_hub: Option<SharedErrorHub>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0, error_count: 0, error_hub: None }
    }

    pub fn with_error_reporting(self, error_hub: SharedErrorHub) -> Self {
        Self { error_hub: Some(error_hub), ..self }
    }

    /// Parses the whole token stream. On failure returns the number of
    /// reported errors; every error has already gone to the hub.
    pub fn parse(&mut self) -> Result<Vec<Rc<Stmt>>, usize> {
        let mut statements = vec![];

        self.skip_newlines();
        while !self.is_at_end() {
            if let Some(stmt) = self.declaration() {
                statements.push(Rc::new(stmt));
            }
            self.skip_newlines();
        }

        tracing::debug!("parsed {} top-level statements", statements.len());
        if self.error_count > 0 {
            Err(self.error_count)
        } else {
            Ok(statements)
        }
    }

    /// Parses a single expression, as typed at the debugger prompt.
    pub fn parse_expression(&mut self) -> Result<Expr, usize> {
        self.skip_newlines();
        let expr = self.expression();
        self.skip_newlines();

        match expr {
            Some(expr) if self.error_count == 0 && self.is_at_end() => Ok(expr),
            Some(_) if self.error_count == 0 => {
                self.error(&self.peek().clone(), "Expect end of expression.");
                Err(self.error_count)
            }
            _ => Err(self.error_count.max(1)),
        }
    }

    fn declaration(&mut self) -> Option<Stmt> {
        let result = self.declaration_item();
        if result.is_none() {
            self.synchronize();
        }
        result
    }

    fn declaration_item(&mut self) -> Option<Stmt> {
        if self.check(&TokenType::Bang) {
            let annotations = self.annotations()?;
            return self.annotated(annotations);
        }

        if self.check(&TokenType::Def) && self.check_next(&TokenType::Identifier) {
            self.advance();
            return self.function(vec![]);
        }

        if self.match_tt(&[TokenType::Class]) {
            return self.class_declaration(vec![]);
        }

        self.statement()
    }

    fn annotations(&mut self) -> Option<Vec<Expr>> {
        let mut annotations = vec![];
        while self.match_tt(&[TokenType::Bang]) {
            annotations.push(self.expression()?);
            self.end_statement("annotation")?;
            self.skip_newlines();
        }
        Some(annotations)
    }

    fn annotated(&mut self, annotations: Vec<Expr>) -> Option<Stmt> {
        if self.match_tt(&[TokenType::Def]) {
            self.function(annotations)
        } else if self.match_tt(&[TokenType::Class]) {
            self.class_declaration(annotations)
        } else {
            self.error(&self.peek().clone(), "Annotations must precede a function or a class.");
            None
        }
    }

    fn function(&mut self, annotations: Vec<Expr>) -> Option<Stmt> {
        let keyword = self.previous();
        let name = self.consume(TokenType::Identifier, "Expect function name.")?;
        self.consume(TokenType::LeftParen, "Expect '(' after function name.")?;
        let (params, guards) = self.parameters()?;
        self.consume(TokenType::Colon, "Expect ':' before function body.")?;

        if self.match_tt(&[TokenType::Native]) {
            self.end_statement("'native'")?;
            return Some(Stmt::Function { name, block: Rc::new(Block::native(params)), annotations });
        }

        let mut statements = self.block(&keyword)?;

        if is_pass_only(&statements) {
            if name.lexeme == "init" {
                statements = params.iter().map(|p| self_assignment(&p.name.lexeme, &p.name)).collect();
            } else if let Some(field) = setter_field(&name.lexeme) {
                if let [param] = params.as_slice() {
                    let value = Expr::variable(param.name.clone());
                    statements = vec![Rc::new(set_on_self(&field, value, &param.name))];
                }
            }
        }

        let statements = guards.into_iter().map(Rc::new).chain(statements).collect();
        Some(Stmt::Function { name, block: Rc::new(Block::new(params, statements)), annotations })
    }

    /// Parameter list after '('. Typed parameters produce guard statements
    /// that raise on mismatch.
    fn parameters(&mut self) -> Option<(Vec<Param>, Vec<Stmt>)> {
        let mut params = vec![];
        let mut guards = vec![];

        self.skip_newlines();
        if !self.check(&TokenType::RightParen) {
            loop {
                if params.len() >= 255 {
                    self.error(&self.peek().clone(), "Can't have more than 255 parameters.");
                }

                let mutable = self.match_tt(&[TokenType::Dollar]);
                let name = self.consume(TokenType::Identifier, "Expect parameter name.")?;
                if self.match_tt(&[TokenType::Is]) {
                    let type_expr = self.call()?;
                    guards.push(type_guard(&name, type_expr));
                }
                params.push(Param { name, mutable });

                self.skip_newlines();
                if !self.match_tt(&[TokenType::Comma]) {
                    break;
                }
                self.skip_newlines();
            }
        }

        self.consume(TokenType::RightParen, "Expect ')' after parameters.")?;
        Some((params, guards))
    }

    fn class_declaration(&mut self, annotations: Vec<Expr>) -> Option<Stmt> {
        let keyword = self.previous();
        let mutable = self.match_tt(&[TokenType::Dollar]);
        let name = self.consume(TokenType::Identifier, "Expect class name.")?;

        let mut superclasses = vec![];
        if self.match_tt(&[TokenType::LeftParen]) {
            if !self.check(&TokenType::RightParen) {
                loop {
                    superclasses.push(self.call()?);
                    if !self.match_tt(&[TokenType::Comma]) {
                        break;
                    }
                }
            }
            self.consume(TokenType::RightParen, "Expect ')' after superclasses.")?;
        }

        self.consume(TokenType::Colon, "Expect ':' before class body.")?;
        let body = self.block_of(&keyword, Self::class_member)?;

        Some(Stmt::Class { name, superclasses, body, mutable, annotations })
    }

    fn class_member(&mut self) -> Option<Stmt> {
        if self.check(&TokenType::Bang) {
            let annotations = self.annotations()?;
            return self.annotated(annotations);
        }
        if self.match_tt(&[TokenType::Def]) {
            return self.function(vec![]);
        }
        if self.match_tt(&[TokenType::Class]) {
            return self.class_declaration(vec![]);
        }
        if self.match_tt(&[TokenType::Import]) {
            return self.mixin();
        }
        if self.match_tt(&[TokenType::Pass]) {
            let keyword = self.previous();
            self.end_statement("'pass'")?;
            return Some(Stmt::Pass { keyword });
        }

        let token = self.peek().clone();
        let stmt = self.expression_statement()?;
        match &stmt {
            Stmt::Expression { expr: Expr::Assign { .. }, .. } => Some(stmt),
            _ => {
                self.error(
                    &token,
                    "Only methods, constants, nested classes and mixins can appear in a class body.",
                );
                None
            }
        }
    }

    fn mixin(&mut self) -> Option<Stmt> {
        let keyword = self.previous();
        let mut classes = vec![self.call()?];
        while self.match_tt(&[TokenType::Comma]) {
            classes.push(self.call()?);
        }
        self.end_statement("import")?;
        Some(Stmt::Mixin { keyword, classes })
    }

    fn statement(&mut self) -> Option<Stmt> {
        let token = self.peek().clone();

        match token.token_type {
            TokenType::If => {
                self.advance();
                self.if_statement()
            }
            TokenType::While => {
                self.advance();
                self.while_statement()
            }
            TokenType::For => {
                self.advance();
                self.for_statement()
            }
            TokenType::Return | TokenType::Yield => {
                self.advance();
                let value = if self.at_statement_end() { None } else { Some(self.expression()?) };
                self.end_statement(&format!("'{}'", token.lexeme))?;
                if token.token_type == TokenType::Return {
                    Some(Stmt::Return { keyword: token, value })
                } else {
                    Some(Stmt::Yield { keyword: token, value })
                }
            }
            TokenType::Break => {
                self.advance();
                self.end_statement("'break'")?;
                Some(Stmt::Break { keyword: token })
            }
            TokenType::Continue => {
                self.advance();
                self.end_statement("'continue'")?;
                Some(Stmt::Continue { keyword: token })
            }
            TokenType::Print => {
                self.advance();
                self.print_statement()
            }
            TokenType::Raise => {
                self.advance();
                let value = self.expression()?;
                self.end_statement("'raise'")?;
                Some(Stmt::Raise { keyword: token, value })
            }
            TokenType::Rescue => {
                self.advance();
                let name = self.consume(TokenType::Identifier, "Expect exception name after 'rescue'.")?;
                self.consume(TokenType::Colon, "Expect ':' after rescue variable.")?;
                let statements = self.block(&token)?;
                let block = Block::new(vec![Param { name, mutable: false }], statements);
                Some(Stmt::Rescue { keyword: token, block: Rc::new(block) })
            }
            TokenType::When => {
                self.advance();
                self.when_statement()
            }
            TokenType::Pass => {
                self.advance();
                self.end_statement("'pass'")?;
                Some(Stmt::Pass { keyword: token })
            }
            TokenType::Import => {
                self.error(&token, "Mixin imports are only allowed inside a class body.");
                None
            }
            TokenType::End => {
                self.error(&token, "Unexpected 'end'.");
                None
            }
            _ => self.expression_statement(),
        }
    }

    fn if_statement(&mut self) -> Option<Stmt> {
        let keyword = self.previous();
        let condition = self.expression()?;
        self.consume(TokenType::Colon, "Expect ':' after if condition.")?;
        let body = self.block(&keyword)?;

        let mut branches = vec![(condition, Rc::new(Block::new(vec![], body)))];
        let mut else_branch = None;

        loop {
            let checkpoint = self.current;
            self.skip_newlines();

            if self.peek().indent != keyword.indent {
                self.current = checkpoint;
                break;
            }

            if self.match_tt(&[TokenType::Elsif]) {
                let elsif = self.previous();
                let condition = self.expression()?;
                self.consume(TokenType::Colon, "Expect ':' after elsif condition.")?;
                let body = self.block(&elsif)?;
                branches.push((condition, Rc::new(Block::new(vec![], body))));
            } else if self.match_tt(&[TokenType::Else]) {
                let else_token = self.previous();
                self.consume(TokenType::Colon, "Expect ':' after 'else'.")?;
                else_branch = Some(Rc::new(Block::new(vec![], self.block(&else_token)?)));
                break;
            } else {
                self.current = checkpoint;
                break;
            }
        }

        Some(Stmt::If { keyword, branches, else_branch })
    }

    fn while_statement(&mut self) -> Option<Stmt> {
        let keyword = self.previous();
        let condition = self.expression()?;
        self.consume(TokenType::Colon, "Expect ':' after while condition.")?;
        let body = self.block(&keyword)?;

        Some(Stmt::While { keyword, condition, body: Rc::new(Block::new(vec![], body)) })
    }

    fn for_statement(&mut self) -> Option<Stmt> {
        let keyword = self.previous();
        let mutable = self.match_tt(&[TokenType::Dollar]);
        let name = self.consume(TokenType::Identifier, "Expect loop variable after 'for'.")?;
        self.consume(TokenType::In, "Expect 'in' after loop variable.")?;
        let iterable = self.expression()?;
        self.consume(TokenType::Colon, "Expect ':' after for iterable.")?;
        let body = self.block(&keyword)?;

        Some(Stmt::For {
            keyword,
            variable: Param { name, mutable },
            iterable,
            body: Rc::new(Block::new(vec![], body)),
        })
    }

    fn print_statement(&mut self) -> Option<Stmt> {
        let keyword = self.previous();
        let mut exprs = vec![];

        if !self.at_statement_end() {
            exprs.push(self.expression()?);
            while self.match_tt(&[TokenType::Comma]) {
                exprs.push(self.expression()?);
            }
        }

        self.end_statement("print statement")?;
        Some(Stmt::Print { keyword, exprs })
    }

    /// `when subject:` followed by clauses, rewritten into an if/elsif/else
    /// chain. Each clause compares a copy of the subject expression.
    fn when_statement(&mut self) -> Option<Stmt> {
        let keyword = self.previous();
        let subject = grouped(self.expression()?);
        self.consume(TokenType::Colon, "Expect ':' after when subject.")?;
        if !self.check(&TokenType::Newline) {
            self.error(&self.peek().clone(), "Expect newline before when clauses.");
            return None;
        }
        self.skip_newlines();

        let mut branches = vec![];
        let mut else_branch = None;

        while !self.is_at_end() && self.peek().indent > keyword.indent {
            let clause = self.peek().clone();

            if self.match_tt(&[TokenType::Else]) {
                self.consume(TokenType::Colon, "Expect ':' after 'else'.")?;
                else_branch = Some(Rc::new(Block::new(vec![], self.block(&clause)?)));
                self.skip_newlines();
                break;
            }

            let condition = self.when_condition(&subject)?;
            self.consume(TokenType::Colon, "Expect ':' after when clause.")?;
            let body = self.block(&clause)?;
            branches.push((condition, Rc::new(Block::new(vec![], body))));
            self.skip_newlines();
        }

        if self.check(&TokenType::End) && self.peek().indent >= keyword.indent {
            self.advance();
        }

        if branches.is_empty() {
            match else_branch.take() {
                Some(block) => branches.push((Expr::Literal { value: Value::Boolean(true) }, block)),
                None => {
                    self.error(&keyword, "Expect at least one when clause.");
                    return None;
                }
            }
        }

        Some(Stmt::If { keyword, branches, else_branch })
    }

    fn when_condition(&mut self, subject: &Expr) -> Option<Expr> {
        let compare = |left: &Expr, operator: Token, right: Expr| Expr::Binary {
            left: Box::new(left.clone()),
            operator,
            right: Box::new(right),
        };

        if self.match_tt(&[TokenType::Is]) {
            let is = self.previous();
            let operator = if self.match_tt(&[TokenType::Not]) {
                Token::synthetic(TokenType::IsNot, "is not", &is)
            } else {
                is
            };
            return Some(compare(subject, operator, self.comparison()?));
        }

        if self.match_tt(&[TokenType::In]) {
            let operator = self.previous();
            return Some(compare(subject, operator, self.comparison()?));
        }

        if self.check(&TokenType::Not) && self.check_next(&TokenType::In) {
            let not = self.advance();
            self.advance();
            let operator = Token::synthetic(TokenType::NotIn, "not in", &not);
            return Some(compare(subject, operator, self.comparison()?));
        }

        let first = self.comparison()?;
        let equal = Token::synthetic(TokenType::EqualEqual, "==", &self.previous());
        let mut condition = compare(subject, equal.clone(), first);

        while self.match_tt(&[TokenType::Or]) {
            let or = self.previous();
            let value = self.comparison()?;
            condition = Expr::Logical {
                left: Box::new(condition),
                operator: or,
                right: Box::new(compare(subject, equal.clone(), value)),
            };
        }

        Some(condition)
    }

    /// Body after ':'. Either one statement on the same line, or an indented
    /// run of statements ending at `end` or at the first line indented no
    /// deeper than `opener`'s line.
    fn block(&mut self, opener: &Token) -> Option<Vec<Rc<Stmt>>> {
        self.block_of(opener, Self::declaration_item)
    }

    fn block_of(&mut self, opener: &Token, item: Item) -> Option<Vec<Rc<Stmt>>> {
        if !self.check(&TokenType::Newline) {
            if self.is_at_end() {
                self.error(&self.peek().clone(), "Expect block after ':'.");
                return None;
            }
            return Some(vec![Rc::new(item(self)?)]);
        }

        self.skip_newlines();
        let mut statements = vec![];

        while !self.is_at_end() {
            let next = self.peek();
            if next.token_type == TokenType::End {
                if next.indent >= opener.indent {
                    self.advance();
                }
                break;
            }
            if next.indent <= opener.indent {
                break;
            }

            match item(self) {
                Some(stmt) => statements.push(Rc::new(stmt)),
                None => self.synchronize(),
            }
            self.skip_newlines();
        }

        Some(statements)
    }

    fn expression_statement(&mut self) -> Option<Stmt> {
        let token = self.peek().clone();
        let expr = self.expression()?;
        self.end_statement("expression")?;
        Some(Stmt::Expression { token, expr })
    }

    fn expression(&mut self) -> Option<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> Option<Expr> {
        let mutable = self.check(&TokenType::Dollar) && self.check_next(&TokenType::Identifier);
        if mutable {
            self.advance();
        }

        let expr = self.or()?;

        if self.match_tt(&[
            TokenType::Equal,
            TokenType::PlusEqual,
            TokenType::MinusEqual,
            TokenType::StarEqual,
            TokenType::SlashEqual,
            TokenType::SlashSlashEqual,
            TokenType::ModEqual,
            TokenType::QuestionQuestionEqual,
        ]) {
            let equals = self.previous();
            let value = self.assignment()?;
            let value = desugar_compound(&expr, &equals, value);

            return match expr {
                Expr::Variable { name, .. } => Some(Expr::Assign {
                    id: ExprId::fresh(),
                    name,
                    value: Box::new(value),
                    mutable,
                }),
                Expr::Get { object, name, key, .. } if !mutable => {
                    Some(Expr::Set { object, name, key, value: Box::new(value) })
                }
                _ => {
                    self.error(&equals, "Invalid assignment target.");
                    None
                }
            };
        }

        if mutable {
            self.error(&self.peek().clone(), "Expect '=' after mutable variable name.");
            return None;
        }

        Some(expr)
    }

    fn or(&mut self) -> Option<Expr> {
        let mut expr = self.and()?;

        while self.match_tt(&[TokenType::Or]) {
            let operator = self.previous();
            let right = self.and()?;
            expr = Expr::Logical { left: Box::new(expr), operator, right: Box::new(right) };
        }

        Some(expr)
    }

    fn and(&mut self) -> Option<Expr> {
        let mut expr = self.equality()?;

        while self.match_tt(&[TokenType::And]) {
            let operator = self.previous();
            let right = self.equality()?;
            expr = Expr::Logical { left: Box::new(expr), operator, right: Box::new(right) };
        }

        Some(expr)
    }

    fn equality(&mut self) -> Option<Expr> {
        let mut expr = self.comparison()?;

        loop {
            let operator = if self.match_tt(&[TokenType::EqualEqual, TokenType::BangEqual, TokenType::In])
            {
                self.previous()
            } else if self.match_tt(&[TokenType::Is]) {
                let is = self.previous();
                if self.match_tt(&[TokenType::Not]) {
                    Token::synthetic(TokenType::IsNot, "is not", &is)
                } else {
                    is
                }
            } else if self.check(&TokenType::Not) && self.check_next(&TokenType::In) {
                let not = self.advance();
                self.advance();
                Token::synthetic(TokenType::NotIn, "not in", &not)
            } else {
                break;
            };

            let right = self.comparison()?;
            expr = Expr::Binary { left: Box::new(expr), operator, right: Box::new(right) };
        }

        Some(expr)
    }

    fn comparison(&mut self) -> Option<Expr> {
        let mut expr = self.term()?;

        while self.match_tt(&[
            TokenType::GreaterEqual,
            TokenType::Greater,
            TokenType::LessEqual,
            TokenType::Less,
        ]) {
            let operator = self.previous();
            let right = self.term()?;
            expr = Expr::Binary { left: Box::new(expr), operator, right: Box::new(right) };
        }

        Some(expr)
    }

    fn term(&mut self) -> Option<Expr> {
        let mut expr = self.factor()?;

        while self.match_tt(&[TokenType::Minus, TokenType::Plus]) {
            let operator = self.previous();
            let right = self.factor()?;
            expr = Expr::Binary { left: Box::new(expr), operator, right: Box::new(right) };
        }

        Some(expr)
    }

    fn factor(&mut self) -> Option<Expr> {
        let mut expr = self.nil_coalescing()?;

        while self.match_tt(&[TokenType::Slash, TokenType::SlashSlash, TokenType::Star, TokenType::Mod])
        {
            let operator = self.previous();
            let right = self.nil_coalescing()?;
            expr = Expr::Binary { left: Box::new(expr), operator, right: Box::new(right) };
        }

        Some(expr)
    }

    fn nil_coalescing(&mut self) -> Option<Expr> {
        let mut expr = self.unary()?;

        while self.match_tt(&[TokenType::QuestionQuestion]) {
            let operator = self.previous();
            let right = self.unary()?;
            expr = Expr::Logical { left: Box::new(expr), operator, right: Box::new(right) };
        }

        Some(expr)
    }

    fn unary(&mut self) -> Option<Expr> {
        if self.match_tt(&[TokenType::Not, TokenType::Minus]) {
            let operator = self.previous();
            let right = self.unary()?;
            return Some(Expr::Unary { operator, right: Box::new(right) });
        }

        self.call()
    }

    fn call(&mut self) -> Option<Expr> {
        let mut expr = self.primary()?;

        loop {
            if self.match_tt(&[TokenType::LeftParen]) {
                expr = self.finish_call(expr)?;
            } else if self.match_tt(&[TokenType::Dot]) {
                expr = self.member(expr)?;
            } else {
                break;
            }
        }

        Some(expr)
    }

    fn member(&mut self, object: Expr) -> Option<Expr> {
        if self.match_tt(&[TokenType::LeftParen]) {
            let name = self.previous();
            let key = self.expression()?;
            self.consume(TokenType::RightParen, "Expect ')' after computed key.")?;
            return Some(Expr::Get {
                object: Box::new(object),
                name,
                key: Some(Box::new(key)),
                arity: None,
            });
        }

        if self.match_tt(&[TokenType::Identifier, TokenType::Number]) {
            let name = self.previous();
            return Some(Expr::Get { object: Box::new(object), name, key: None, arity: None });
        }

        self.error(&self.peek().clone(), "Expect property name after '.'.");
        None
    }

    fn finish_call(&mut self, callee: Expr) -> Option<Expr> {
        let mut arguments = vec![];

        self.skip_newlines();
        if !self.check(&TokenType::RightParen) {
            loop {
                if arguments.len() >= 255 {
                    self.error(&self.peek().clone(), "Can't have more than 255 arguments.");
                }

                arguments.push(self.expression()?);

                self.skip_newlines();
                if !self.match_tt(&[TokenType::Comma]) {
                    break;
                }
                self.skip_newlines();
            }
        }

        let paren = self.consume(TokenType::RightParen, "Expect ')' after arguments.")?;

        // The callee learns its arity so overloads can be picked on lookup.
        let callee = match callee {
            Expr::Get { object, name, key, .. } => {
                Expr::Get { object, name, key, arity: Some(arguments.len()) }
            }
            Expr::Super { id, keyword, method, .. } => {
                Expr::Super { id, keyword, method, arity: Some(arguments.len()) }
            }
            other => other,
        };

        Some(Expr::Call { callee: Box::new(callee), paren, arguments })
    }

    fn primary(&mut self) -> Option<Expr> {
        if self.is_at_end() {
            self.error(&self.peek().clone(), "Expect expression.");
            return None;
        }

        let token = self.advance();

        match token.token_type {
            TokenType::False => Some(Expr::Literal { value: Value::Boolean(false) }),
            TokenType::True => Some(Expr::Literal { value: Value::Boolean(true) }),
            TokenType::Nil => Some(Expr::Literal { value: Value::Nil }),
            TokenType::Number | TokenType::Str => match token.literal {
                Some(literal) => Some(Expr::Literal { value: literal.into() }),
                None => {
                    self.error(&token, "Missing literal value.");
                    None
                }
            },
            TokenType::Identifier => Some(Expr::variable(token)),
            TokenType::SelfKw => Some(Expr::SelfRef { id: ExprId::fresh(), keyword: token }),
            TokenType::Super => {
                self.consume(TokenType::Dot, "Expect '.' after 'super'.")?;
                let method = self.consume(TokenType::Identifier, "Expect superclass method name.")?;
                Some(Expr::Super { id: ExprId::fresh(), keyword: token, method, arity: None })
            }
            TokenType::At => {
                let name = self.consume(TokenType::Identifier, "Expect field name after '@'.")?;
                let keyword = Token::synthetic(TokenType::SelfKw, "self", &token);
                Some(Expr::Get {
                    object: Box::new(Expr::SelfRef { id: ExprId::fresh(), keyword }),
                    name,
                    key: None,
                    arity: None,
                })
            }
            TokenType::LeftParen => {
                self.skip_newlines();
                let expr = self.expression()?;
                self.skip_newlines();
                self.consume(TokenType::RightParen, "Expect ')' after expression.")?;
                Some(Expr::Grouping { expr: Box::new(expr) })
            }
            TokenType::LeftBracket => self.object_literal(token, false),
            TokenType::Dollar if self.check(&TokenType::LeftBracket) => {
                let bracket = self.advance();
                self.object_literal(bracket, true)
            }
            TokenType::Def => self.lambda(token),
            _ => {
                self.current -= 1;
                self.error(&token, "Expect expression.");
                None
            }
        }
    }

    fn object_literal(&mut self, bracket: Token, mutable: bool) -> Option<Expr> {
        let mut entries = vec![];

        self.skip_newlines();
        while !self.check(&TokenType::RightBracket) && !self.is_at_end() {
            let key = if self.check(&TokenType::Identifier) && self.check_next(&TokenType::Equal) {
                let key = self.advance();
                self.advance();
                Some(key)
            } else {
                None
            };
            entries.push((key, self.expression()?));

            self.skip_newlines();
            if !self.match_tt(&[TokenType::Comma]) {
                break;
            }
            self.skip_newlines();
        }

        self.consume(TokenType::RightBracket, "Expect ']' after object literal.")?;
        Some(Expr::ObjectLiteral { bracket, entries, mutable })
    }

    fn lambda(&mut self, keyword: Token) -> Option<Expr> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'def'.")?;
        let (params, guards) = self.parameters()?;
        self.consume(TokenType::Colon, "Expect ':' before lambda body.")?;
        let mut statements = self.block(&keyword)?;

        // A lone expression body is the lambda's result.
        if let [stmt] = statements.as_slice() {
            if let Stmt::Expression { token, expr } = stmt.as_ref() {
                let value = Some(expr.clone());
                let keyword = Token::synthetic(TokenType::Return, "return", token);
                statements = vec![Rc::new(Stmt::Return { keyword, value })];
            }
        }

        let statements = guards.into_iter().map(Rc::new).chain(statements).collect();
        Some(Expr::Lambda { keyword, block: Rc::new(Block::new(params, statements)) })
    }

    fn end_statement(&mut self, what: &str) -> Option<()> {
        if self.match_tt(&[TokenType::Newline, TokenType::Semicolon]) {
            return Some(());
        }

        // A nested block already consumed the line break.
        if self.current > 0
            && matches!(self.previous().token_type, TokenType::Newline | TokenType::End)
        {
            return Some(());
        }

        if self.at_statement_end() {
            return Some(());
        }

        self.error(&self.peek().clone(), &format!("Expect newline after {what}."));
        None
    }

    fn at_statement_end(&self) -> bool {
        self.is_at_end()
            || matches!(
                self.peek().token_type,
                TokenType::Newline
                    | TokenType::Semicolon
                    | TokenType::End
                    | TokenType::RightBracket
                    | TokenType::RightParen
                    | TokenType::Comma
            )
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenType::Newline) {
            self.advance();
        }
    }

    fn synchronize(&mut self) {
        if !self.is_at_end() {
            self.advance();
        }

        while !self.is_at_end() {
            if self.previous().token_type == TokenType::Newline {
                return;
            }

            match self.peek().token_type {
                TokenType::Class
                | TokenType::Def
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return
                | TokenType::Yield
                | TokenType::When
                | TokenType::Raise => return,
                _ => {}
            }

            self.advance();
        }
    }

    /// Return the next token if its `token_type` matches the given type as input.
    /// Otherwise, report the error and return `None`.
    fn consume(&mut self, token_type: TokenType, message: &str) -> Option<Token> {
        if self.check(&token_type) {
            return Some(self.advance());
        }

        self.error(&self.peek().clone(), message);
        None
    }

    fn error(&mut self, token: &Token, message: &str) {
        self.error_count += 1;
        match &self.error_hub {
            Some(hub) => hub.borrow_mut().token_error(token, message),
            None => tracing::warn!("[line {}] {message}", token.line),
        }
    }

    fn match_tt(&mut self, types: &[TokenType]) -> bool {
        for tt in types {
            if self.check(tt) {
                self.advance();
                return true;
            }
        }

        false
    }

    /// Check to see if the next token's type matches the given `token_type`.
    fn check(&self, token_type: &TokenType) -> bool {
        if self.is_at_end() {
            return false;
        }

        self.peek().token_type == *token_type
    }

    fn check_next(&self, token_type: &TokenType) -> bool {
        matches!(self.tokens.get(self.current + 1), Some(t) if t.token_type == *token_type)
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }

        self.previous()
    }

    fn is_at_end(&self) -> bool {
        self.peek().token_type == TokenType::Eof
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.current.min(last)]
    }

    fn previous(&self) -> Token {
        self.tokens[self.current.saturating_sub(1)].clone()
    }
}

fn is_pass_only(statements: &[Rc<Stmt>]) -> bool {
    matches!(statements, [stmt] if matches!(stmt.as_ref(), Stmt::Pass { .. }))
}

/// `setName` -> `name`.
fn setter_field(name: &str) -> Option<String> {
    let rest = name.strip_prefix("set")?;
    let mut chars = rest.chars();
    let first = chars.next()?;
    if !first.is_uppercase() {
        return None;
    }
    Some(first.to_lowercase().chain(chars).collect())
}

fn set_on_self(field: &str, value: Expr, origin: &Token) -> Stmt {
    let keyword = Token::synthetic(TokenType::SelfKw, "self", origin);
    Stmt::Expression {
        token: origin.clone(),
        expr: Expr::Set {
            object: Box::new(Expr::SelfRef { id: ExprId::fresh(), keyword }),
            name: Token::identifier(field, origin),
            key: None,
            value: Box::new(value),
        },
    }
}

fn self_assignment(field: &str, origin: &Token) -> Rc<Stmt> {
    Rc::new(set_on_self(field, Expr::variable(Token::identifier(field, origin)), origin))
}

/// `if not (name is Type): raise TypeMismatchException("...")`
fn type_guard(name: &Token, type_expr: Expr) -> Stmt {
    let message = format!("Expected '{}' to be {}.", name.lexeme, Printer::expression(&type_expr));

    let check = Expr::Binary {
        left: Box::new(Expr::variable(name.clone())),
        operator: Token::synthetic(TokenType::Is, "is", name),
        right: Box::new(type_expr),
    };
    let condition = Expr::Unary {
        operator: Token::synthetic(TokenType::Not, "not", name),
        right: Box::new(Expr::Grouping { expr: Box::new(check) }),
    };

    let exception = Token::identifier(ErrorKind::TypeMismatch.class_name(), name);
    let raise = Stmt::Raise {
        keyword: Token::synthetic(TokenType::Raise, "raise", name),
        value: Expr::Call {
            callee: Box::new(Expr::variable(exception)),
            paren: Token::synthetic(TokenType::RightParen, ")", name),
            arguments: vec![Expr::str_literal(&message)],
        },
    };

    Stmt::If {
        keyword: Token::synthetic(TokenType::If, "if", name),
        branches: vec![(condition, Rc::new(Block::new(vec![], vec![Rc::new(raise)])))],
        else_branch: None,
    }
}

/// `a op= b` becomes `a = a op b`; the target is read through a copy.
fn desugar_compound(target: &Expr, equals: &Token, value: Expr) -> Expr {
    let (token_type, lexeme) = match equals.token_type {
        TokenType::PlusEqual => (TokenType::Plus, "+"),
        TokenType::MinusEqual => (TokenType::Minus, "-"),
        TokenType::StarEqual => (TokenType::Star, "*"),
        TokenType::SlashEqual => (TokenType::Slash, "/"),
        TokenType::SlashSlashEqual => (TokenType::SlashSlash, "//"),
        TokenType::ModEqual => (TokenType::Mod, "%"),
        TokenType::QuestionQuestionEqual => {
            return Expr::Logical {
                left: Box::new(target.clone()),
                operator: Token::synthetic(TokenType::QuestionQuestion, "??", equals),
                right: Box::new(grouped(value)),
            };
        }
        _ => return value,
    };

    let read = match target {
        Expr::Get { object, name, key, .. } => Expr::Get {
            object: object.clone(),
            name: name.clone(),
            key: key.clone(),
            arity: None,
        },
        Expr::Variable { name, .. } => Expr::variable(name.clone()),
        other => other.clone(),
    };

    Expr::Binary {
        left: Box::new(read),
        operator: Token::synthetic(token_type, lexeme, equals),
        right: Box::new(grouped(value)),
    }
}

/// Keeps operator precedence when a parsed expression is spliced under a
/// new operator.
fn grouped(expr: Expr) -> Expr {
    match expr {
        Expr::Binary { .. } | Expr::Logical { .. } | Expr::Assign { .. } | Expr::Set { .. } => {
            Expr::Grouping { expr: Box::new(expr) }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Result<Vec<Rc<Stmt>>, usize> {
        let tokens = Scanner::new(source, "test.simi").scan_tokens();
        Parser::new(tokens).parse()
    }

    fn function_body(stmt: &Stmt) -> &Block {
        match stmt {
            Stmt::Function { block, .. } => block,
            other => panic!("expected a function, got {other:?}"),
        }
    }

    #[test]
    fn indentation_closes_blocks() {
        let source = "class A:\n  def init(n):\n    self.n = n\n  def get():\n    return self.n\nend\na = A(5)\nprint a.get()\n";
        let stmts = parse(source).unwrap();
        assert_eq!(stmts.len(), 3);

        match stmts[0].as_ref() {
            Stmt::Class { body, .. } => assert_eq!(body.len(), 2),
            other => panic!("expected a class, got {other:?}"),
        }
    }

    #[test]
    fn end_closes_only_its_own_level() {
        let source = "if a:\n    while b:\n        c = 1\n    end\n    d = 2\nend\ne = 3\n";
        let stmts = parse(source).unwrap();
        assert_eq!(stmts.len(), 2);

        match stmts[0].as_ref() {
            Stmt::If { branches, .. } => assert_eq!(branches[0].1.statements.len(), 2),
            other => panic!("expected an if, got {other:?}"),
        }
    }

    #[test]
    fn elsif_and_else_attach_by_indentation() {
        let source = "if a: print 1\nelsif b: print 2\nelse: print 3\n";
        match parse(source).unwrap()[0].as_ref() {
            Stmt::If { branches, else_branch, .. } => {
                assert_eq!(branches.len(), 2);
                assert!(else_branch.is_some());
            }
            other => panic!("expected an if, got {other:?}"),
        }
    }

    #[test]
    fn init_shorthand_assigns_fields() {
        let stmts = parse("def init(a, b): pass\n").unwrap();
        let body = function_body(&stmts[0]);
        assert_eq!(body.statements.len(), 2);
        assert!(matches!(
            body.statements[1].as_ref(),
            Stmt::Expression { expr: Expr::Set { name, .. }, .. } if name.lexeme == "b"
        ));
    }

    #[test]
    fn setter_shorthand_assigns_field() {
        let stmts = parse("def setName(v): pass\n").unwrap();
        let body = function_body(&stmts[0]);
        assert!(matches!(
            body.statements[0].as_ref(),
            Stmt::Expression { expr: Expr::Set { name, .. }, .. } if name.lexeme == "name"
        ));
    }

    #[test]
    fn typed_parameters_become_guards() {
        let stmts = parse("def f(x is Number): return x\n").unwrap();
        let body = function_body(&stmts[0]);
        assert_eq!(body.arity(), 1);
        assert!(matches!(body.statements[0].as_ref(), Stmt::If { .. }));
        assert!(matches!(body.statements[1].as_ref(), Stmt::Return { .. }));
    }

    #[test]
    fn when_becomes_an_if_chain() {
        let source = "when x:\n    1 or 2: print 'low'\n    is String: print 's'\n    else: print 'other'\nprint 'after'\n";
        let stmts = parse(source).unwrap();
        assert_eq!(stmts.len(), 2);
        match stmts[0].as_ref() {
            Stmt::If { branches, else_branch, .. } => {
                assert_eq!(branches.len(), 2);
                assert!(matches!(branches[0].0, Expr::Logical { .. }));
                assert!(else_branch.is_some());
            }
            other => panic!("expected an if, got {other:?}"),
        }
    }

    #[test]
    fn compound_assignment_desugars() {
        let stmts = parse("$x = 1\nx += 2\n").unwrap();
        match stmts[1].as_ref() {
            Stmt::Expression { expr: Expr::Assign { value, mutable, .. }, .. } => {
                assert!(!mutable);
                assert!(matches!(value.as_ref(), Expr::Binary { operator, .. } if operator.lexeme == "+"));
            }
            other => panic!("expected an assignment, got {other:?}"),
        }
    }

    #[test]
    fn method_calls_record_arity() {
        let stmts = parse("a.b(1, 2)\na.c\n").unwrap();
        match stmts[0].as_ref() {
            Stmt::Expression { expr: Expr::Call { callee, .. }, .. } => {
                assert!(matches!(callee.as_ref(), Expr::Get { arity: Some(2), .. }));
            }
            other => panic!("expected a call, got {other:?}"),
        }
        assert!(matches!(
            stmts[1].as_ref(),
            Stmt::Expression { expr: Expr::Get { arity: None, .. }, .. }
        ));
    }

    #[test]
    fn lambda_expression_body_returns() {
        let stmts = parse("f = def (x): x * 2\n").unwrap();
        match stmts[0].as_ref() {
            Stmt::Expression { expr: Expr::Assign { value, .. }, .. } => match value.as_ref() {
                Expr::Lambda { block, .. } => {
                    assert!(matches!(block.statements[0].as_ref(), Stmt::Return { value: Some(_), .. }))
                }
                other => panic!("expected a lambda, got {other:?}"),
            },
            other => panic!("expected an assignment, got {other:?}"),
        }
    }

    #[test]
    fn object_literals_mix_keys_and_positions() {
        let stmts = parse("o = $[a = 1,\n  2]\n").unwrap();
        match stmts[0].as_ref() {
            Stmt::Expression { expr: Expr::Assign { value, .. }, .. } => {
                assert!(matches!(
                    value.as_ref(),
                    Expr::ObjectLiteral { mutable: true, entries, .. } if entries.len() == 2
                ));
            }
            other => panic!("expected an assignment, got {other:?}"),
        }
    }

    #[test]
    fn errors_are_counted_and_parsing_recovers() {
        assert!(matches!(parse("x = \nprint 1\ny = )\n"), Err(2)));
    }
}
