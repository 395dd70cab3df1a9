use std::rc::Rc;

use crate::prelude::*;

const INDENT: usize = 4;

/// Renders syntax trees back into source form.
pub struct Printer {
    indent: usize,
}

impl Printer {
    pub fn program(statements: &[Rc<Stmt>]) -> String {
        let printer = Printer { indent: 0 };
        statements.iter().map(|s| printer.statement(s)).collect::<Vec<_>>().join("\n")
    }

    pub fn expression(expr: &Expr) -> String {
        Printer { indent: 0 }.expr(expr)
    }

    /// First line of a statement, as shown by the debugger.
    pub fn statement_head(stmt: &Stmt) -> String {
        let text = Printer { indent: 0 }.statement(stmt);
        text.lines().next().unwrap_or_default().to_owned()
    }

    fn nested(&self) -> Printer {
        Printer { indent: self.indent + INDENT }
    }

    fn pad(&self) -> String {
        " ".repeat(self.indent)
    }

    fn statement(&self, stmt: &Stmt) -> String {
        let pad = self.pad();

        match stmt {
            Stmt::Expression { expr, .. } => format!("{pad}{}", self.expr(expr)),
            Stmt::Print { exprs, .. } => {
                if exprs.is_empty() {
                    format!("{pad}print")
                } else {
                    format!("{pad}print {}", self.list(exprs))
                }
            }
            Stmt::If { branches, else_branch, .. } => {
                let mut out = String::new();
                for (i, (condition, block)) in branches.iter().enumerate() {
                    let keyword = if i == 0 { "if" } else { "elsif" };
                    out += &format!("{pad}{keyword} {}:\n{}\n", self.expr(condition), self.body(block));
                }
                if let Some(block) = else_branch {
                    out += &format!("{pad}else:\n{}\n", self.body(block));
                }
                out + &format!("{pad}end")
            }
            Stmt::While { condition, body, .. } => {
                format!("{pad}while {}:\n{}\n{pad}end", self.expr(condition), self.body(body))
            }
            Stmt::For { variable, iterable, body, .. } => format!(
                "{pad}for {} in {}:\n{}\n{pad}end",
                param(variable),
                self.expr(iterable),
                self.body(body)
            ),
            Stmt::Return { value, .. } => self.keyword_value(&pad, "return", value),
            Stmt::Yield { value, .. } => self.keyword_value(&pad, "yield", value),
            Stmt::Break { .. } => format!("{pad}break"),
            Stmt::Continue { .. } => format!("{pad}continue"),
            Stmt::Raise { value, .. } => format!("{pad}raise {}", self.expr(value)),
            Stmt::Rescue { block, .. } => {
                let name = block.params.first().map(param).unwrap_or_default();
                format!("{pad}rescue {name}:\n{}\n{pad}end", self.body(block))
            }
            Stmt::Function { name, block, annotations } => {
                let mut out = self.annotations(annotations);
                let params = block.params.iter().map(param).collect::<Vec<_>>().join(", ");
                if block.is_native {
                    out += &format!("{pad}def {}({params}): native", name.lexeme);
                } else {
                    out += &format!(
                        "{pad}def {}({params}):\n{}\n{pad}end",
                        name.lexeme,
                        self.body(block)
                    );
                }
                out
            }
            Stmt::Class { name, superclasses, body, mutable, annotations } => {
                let mut out = self.annotations(annotations);
                out += &format!("{pad}class {}{}", if *mutable { "$" } else { "" }, name.lexeme);
                if !superclasses.is_empty() {
                    out += &format!("({})", self.list(superclasses));
                }
                out += ":\n";
                out += &self.statements(body);
                out + &format!("\n{pad}end")
            }
            Stmt::Mixin { classes, .. } => format!("{pad}import {}", self.list(classes)),
            Stmt::Pass { .. } => format!("{pad}pass"),
        }
    }

    fn keyword_value(&self, pad: &str, keyword: &str, value: &Option<Expr>) -> String {
        match value {
            Some(value) => format!("{pad}{keyword} {}", self.expr(value)),
            None => format!("{pad}{keyword}"),
        }
    }

    fn annotations(&self, annotations: &[Expr]) -> String {
        annotations.iter().map(|a| format!("{}!{}\n", self.pad(), self.expr(a))).collect()
    }

    fn body(&self, block: &Block) -> String {
        self.statements(&block.statements)
    }

    fn statements(&self, statements: &[Rc<Stmt>]) -> String {
        let nested = self.nested();
        if statements.is_empty() {
            return format!("{}pass", nested.pad());
        }
        statements.iter().map(|s| nested.statement(s)).collect::<Vec<_>>().join("\n")
    }

    fn list(&self, exprs: &[Expr]) -> String {
        exprs.iter().map(|e| self.expr(e)).collect::<Vec<_>>().join(", ")
    }

    fn expr(&self, expr: &Expr) -> String {
        match expr {
            Expr::Literal { value } => literal(value),
            Expr::Variable { name, .. } => name.lexeme.clone(),
            Expr::Assign { name, value, mutable, .. } => {
                format!("{}{} = {}", if *mutable { "$" } else { "" }, name.lexeme, self.expr(value))
            }
            Expr::Binary { left, operator, right } | Expr::Logical { left, operator, right } => {
                format!("{} {} {}", self.expr(left), operator.lexeme, self.expr(right))
            }
            Expr::Unary { operator, right } => {
                if operator.token_type == TokenType::Not {
                    format!("not {}", self.expr(right))
                } else {
                    format!("{}{}", operator.lexeme, self.expr(right))
                }
            }
            Expr::Grouping { expr } => format!("({})", self.expr(expr)),
            Expr::Call { callee, arguments, .. } => {
                format!("{}({})", self.expr(callee), self.list(arguments))
            }
            Expr::Get { object, name, key, .. } => {
                format!("{}.{}", self.expr(object), self.member(name, key))
            }
            Expr::Set { object, name, key, value } => format!(
                "{}.{} = {}",
                self.expr(object),
                self.member(name, key),
                self.expr(value)
            ),
            Expr::SelfRef { .. } => "self".to_owned(),
            Expr::Super { method, .. } => format!("super.{}", method.lexeme),
            Expr::ObjectLiteral { entries, mutable, .. } => {
                let entries = entries
                    .iter()
                    .map(|(key, value)| match key {
                        Some(key) => format!("{} = {}", key.lexeme, self.expr(value)),
                        None => self.expr(value),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}[{entries}]", if *mutable { "$" } else { "" })
            }
            Expr::Lambda { block, .. } => {
                let params = block.params.iter().map(param).collect::<Vec<_>>().join(", ");
                match block.statements.as_slice() {
                    [stmt] => match stmt.as_ref() {
                        Stmt::Return { value: Some(value), .. } => {
                            format!("def ({params}): {}", self.expr(value))
                        }
                        _ => self.multiline_lambda(&params, block),
                    },
                    _ => self.multiline_lambda(&params, block),
                }
            }
        }
    }

    fn multiline_lambda(&self, params: &str, block: &Block) -> String {
        format!("def ({params}):\n{}\n{}end", self.body(block), self.pad())
    }

    fn member(&self, name: &Token, key: &Option<Box<Expr>>) -> String {
        match key {
            Some(key) => format!("({})", self.expr(key)),
            None => name.lexeme.clone(),
        }
    }
}

fn param(param: &Param) -> String {
    format!("{}{}", if param.mutable { "$" } else { "" }, param.name.lexeme)
}

fn literal(value: &Value) -> String {
    match value {
        Value::Float(n) => format!("{n:?}"),
        Value::Str(s) => {
            let mut out = String::from("\"");
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    '\r' => out.push_str("\\r"),
                    '\0' => out.push_str("\\0"),
                    c => out.push(c),
                }
            }
            out.push('"');
            out
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<Rc<Stmt>> {
        let tokens = Scanner::new(source, "test.simi").scan_tokens();
        Parser::new(tokens).parse().unwrap()
    }

    fn token_types(source: &str) -> Vec<TokenType> {
        Scanner::new(source, "test.simi")
            .scan_tokens()
            .into_iter()
            .map(|t| t.token_type)
            .filter(|t| *t != TokenType::Newline)
            .collect()
    }

    #[test]
    fn print_an_expression() {
        let expr = Expr::Binary {
            left: Box::new(Expr::Unary {
                operator: Token::new(TokenType::Minus, "-", None, 1),
                right: Box::new(Expr::int_literal(123)),
            }),
            operator: Token::new(TokenType::Star, "*", None, 1),
            right: Box::new(Expr::Grouping { expr: Box::new(Expr::Literal { value: Value::Float(45.67) }) }),
        };

        assert_eq!(Printer::expression(&expr), "-123 * (45.67)");
    }

    #[test]
    fn round_trip_is_stable() {
        let source = r#"
!Tagged("x")
class $Point(Base, Mixin):
    ORIGIN = [x = 0, y = 0]
    import Helpers
    def init(x, y): pass
    def norm(): native
    def move($dx is Number):
        @x += dx
        return self
end
$total = 0
for $i in $[1, 2.5, "three\n"]:
    if i is Number and not (i in [7]): total += i
    elsif i is not String: continue
    else:
        print "got \(i) here", total ?? 0
rescue e:
    raise e
while total < 10:
    total = total * 2 // 1 % 7
    break
f = def (a): a.(0).1
g = def ():
    yield super.call(1)
end
when total:
    1 or 2: pass
    in [3]: print "three"
    else: print -total
"#;

        let first = Printer::program(&parse(source));
        let second = Printer::program(&parse(&first));
        assert_eq!(first, second);
        assert_eq!(token_types(&first), token_types(&second));
    }

    #[test]
    fn statement_heads_are_one_line() {
        let stmts = parse("while x < 3:\n    x = x + 1\n");
        assert_eq!(Printer::statement_head(&stmts[0]), "while x < 3:");
    }
}
