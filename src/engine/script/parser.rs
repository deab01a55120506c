//! Parser for the indentation-structured script grammar

use super::ast::{BinOp, Expr, ImportName, Literal, Program, Stmt, StmtKind, UnaryOp};
use super::lexer::{indent_width, tokenize, Token, TokenKind};
use crate::engine::error::CompileError;

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "if", "elif", "else", "while", "for", "break", "continue", "pass",
    "import", "from", "as", "await", "True", "False", "None",
];

/// Deepest nesting of parentheses, calls, unary operators or blocks
const MAX_NESTING: usize = 64;

/// Operator and call nodes allowed in the expressions of one line
const MAX_NODES: usize = 256;

/// Python keywords the grammar deliberately leaves out
const UNSUPPORTED: &[&str] = &[
    "def", "class", "return", "lambda", "try", "except", "finally", "with", "global",
    "nonlocal", "yield", "async", "del", "raise", "assert", "is",
];

struct Line {
    number: usize,
    indent: usize,
    tokens: Vec<Token>,
}

/// Parse an executable body whose every line sits at `base_indent` or deeper
pub fn parse(text: &str, base_indent: usize) -> Result<Program, CompileError> {
    let mut lines = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let number = idx + 1;
        let tokens = tokenize(raw).map_err(|e| CompileError::new(number, e.to_string()))?;
        if tokens.is_empty() {
            continue;
        }
        lines.push(Line {
            number,
            indent: indent_width(raw),
            tokens,
        });
    }

    let mut parser = Parser {
        lines,
        pos: 0,
        depth: 0,
    };
    if let Some(first) = parser.lines.first() {
        if first.indent != base_indent {
            return Err(CompileError::new(first.number, "unexpected indent"));
        }
    }
    let body = parser.block(base_indent)?;

    // A dedent below the base level ends the top block early
    if let Some(line) = parser.lines.get(parser.pos) {
        return Err(CompileError::new(line.number, "unindent below script level"));
    }
    Ok(Program { body })
}

struct Parser {
    lines: Vec<Line>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn block(&mut self, indent: usize) -> Result<Vec<Stmt>, CompileError> {
        let mut stmts = Vec::new();
        while let Some(line) = self.lines.get(self.pos) {
            if line.indent < indent {
                break;
            }
            if line.indent > indent {
                return Err(CompileError::new(line.number, "unexpected indent"));
            }
            stmts.push(self.statement(indent)?);
        }
        Ok(stmts)
    }

    /// Body of a compound statement whose header is at `indent`
    fn suite(&mut self, header_line: usize, indent: usize) -> Result<Vec<Stmt>, CompileError> {
        match self.lines.get(self.pos) {
            Some(next) if next.indent > indent => {
                if self.depth >= MAX_NESTING {
                    return Err(CompileError::new(next.number, "too many nested blocks"));
                }
                let inner = next.indent;
                self.depth += 1;
                let body = self.block(inner);
                self.depth -= 1;
                body
            }
            _ => Err(CompileError::new(header_line, "expected an indented block")),
        }
    }

    fn statement(&mut self, indent: usize) -> Result<Stmt, CompileError> {
        let line = &self.lines[self.pos];
        let number = line.number;
        let tokens = line.tokens.clone();
        self.pos += 1;

        let mut cur = Cursor::new(&tokens, number);
        let kind = match cur.peek_name() {
            Some("import") => {
                cur.next();
                let name = cur.dotted_name()?;
                let alias = cur.alias()?;
                StmtKind::Import(ImportName { name, alias })
            }
            Some("from") => {
                cur.next();
                let module = cur.dotted_name()?;
                cur.expect_name("import")?;
                let mut names = Vec::new();
                loop {
                    let name = cur.identifier()?;
                    let alias = cur.alias()?;
                    names.push(ImportName { name, alias });
                    if !cur.eat_punct(",") {
                        break;
                    }
                }
                StmtKind::FromImport { module, names }
            }
            Some("while") => {
                cur.next();
                let cond = cur.expression()?;
                cur.expect_punct(":")?;
                cur.finish()?;
                let body = self.suite(number, indent)?;
                return Ok(Stmt {
                    line: number,
                    kind: StmtKind::While { cond, body },
                });
            }
            Some("for") => {
                cur.next();
                let var = cur.identifier()?;
                cur.expect_name("in")?;
                let iter = cur.expression()?;
                cur.expect_punct(":")?;
                cur.finish()?;
                let body = self.suite(number, indent)?;
                return Ok(Stmt {
                    line: number,
                    kind: StmtKind::For { var, iter, body },
                });
            }
            Some("if") => {
                cur.next();
                let cond = cur.expression()?;
                cur.expect_punct(":")?;
                cur.finish()?;
                let body = self.suite(number, indent)?;
                return self.if_chain(number, indent, cond, body);
            }
            Some("elif") | Some("else") => {
                return Err(CompileError::new(number, "'elif'/'else' without matching 'if'"));
            }
            Some("break") => {
                cur.next();
                StmtKind::Break
            }
            Some("continue") => {
                cur.next();
                StmtKind::Continue
            }
            Some("pass") => {
                cur.next();
                StmtKind::Pass
            }
            Some(word) if UNSUPPORTED.contains(&word) => {
                return Err(CompileError::new(number, format!("'{word}' is not supported")));
            }
            _ => cur.assignment_or_expr()?,
        };
        cur.finish()?;

        Ok(Stmt { line: number, kind })
    }

    fn if_chain(
        &mut self,
        number: usize,
        indent: usize,
        cond: Expr,
        body: Vec<Stmt>,
    ) -> Result<Stmt, CompileError> {
        let mut branches = vec![(cond, body)];
        let mut orelse = Vec::new();

        while let Some(line) = self.lines.get(self.pos) {
            if line.indent != indent {
                break;
            }
            let header = line.number;
            let tokens = line.tokens.clone();
            let mut cur = Cursor::new(&tokens, header);
            match cur.peek_name() {
                Some("elif") => {
                    self.pos += 1;
                    cur.next();
                    let cond = cur.expression()?;
                    cur.expect_punct(":")?;
                    cur.finish()?;
                    let body = self.suite(header, indent)?;
                    branches.push((cond, body));
                }
                Some("else") => {
                    self.pos += 1;
                    cur.next();
                    cur.expect_punct(":")?;
                    cur.finish()?;
                    orelse = self.suite(header, indent)?;
                    break;
                }
                _ => break,
            }
        }

        Ok(Stmt {
            line: number,
            kind: StmtKind::If { branches, orelse },
        })
    }
}

/// Token cursor over one line
struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
    line: usize,
    depth: usize,
    nodes: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [Token], line: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            line,
            depth: 0,
            nodes: 0,
        }
    }

    /// Run `parse` one nesting level deeper
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, CompileError>,
    ) -> Result<T, CompileError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("expression too deeply nested"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Count one operator or call node; keeps every tree shallow
    fn node(&mut self, expr: Expr) -> Result<Expr, CompileError> {
        self.nodes += 1;
        if self.nodes > MAX_NODES {
            return Err(self.error("expression too complex"));
        }
        Ok(expr)
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(self.line, message)
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_name(&self) -> Option<&'a str> {
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Name(n)) => Some(n.as_str()),
            _ => None,
        }
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_punct(punct)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_name(&mut self, name: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_name(name)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), CompileError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{punct}'")))
        }
    }

    fn expect_name(&mut self, name: &str) -> Result<(), CompileError> {
        if self.eat_name(name) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{name}'")))
        }
    }

    fn finish(&self) -> Result<(), CompileError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(self.error(format!("unexpected {}", describe(token)))),
        }
    }

    fn identifier(&mut self) -> Result<String, CompileError> {
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Name(n)) if !KEYWORDS.contains(&n.as_str()) => {
                let name = n.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    fn dotted_name(&mut self) -> Result<String, CompileError> {
        let mut name = self.identifier()?;
        while self.eat_punct(".") {
            name.push('.');
            name.push_str(&self.identifier()?);
        }
        Ok(name)
    }

    fn alias(&mut self) -> Result<Option<String>, CompileError> {
        if self.eat_name("as") {
            Ok(Some(self.identifier()?))
        } else {
            Ok(None)
        }
    }

    fn assignment_or_expr(&mut self) -> Result<StmtKind, CompileError> {
        let target = match (self.tokens.first(), self.tokens.get(1)) {
            (Some(first), Some(op)) if matches!(op.kind, TokenKind::Punct(_)) => match &first.kind {
                TokenKind::Name(n) if !KEYWORDS.contains(&n.as_str()) => Some(n.clone()),
                _ => None,
            },
            _ => None,
        };

        if let Some(target) = target {
            let aug = match self.tokens[1].kind {
                TokenKind::Punct("=") => None,
                TokenKind::Punct("+=") => Some(BinOp::Add),
                TokenKind::Punct("-=") => Some(BinOp::Sub),
                TokenKind::Punct("*=") => Some(BinOp::Mul),
                TokenKind::Punct("//=") => Some(BinOp::FloorDiv),
                _ => return Ok(StmtKind::Expr(self.expression()?)),
            };
            self.pos = 2;
            let value = self.expression()?;
            return Ok(match aug {
                None => StmtKind::Assign { target, value },
                Some(op) => StmtKind::AugAssign { target, op, value },
            });
        }

        Ok(StmtKind::Expr(self.expression()?))
    }

    fn expression(&mut self) -> Result<Expr, CompileError> {
        self.nested(Self::or_expr)
    }

    fn or_expr(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.and_expr()?;
        while self.eat_name("or") {
            let right = self.and_expr()?;
            left = self.node(Expr::Or(Box::new(left), Box::new(right)))?;
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.not_expr()?;
        while self.eat_name("and") {
            let right = self.not_expr()?;
            left = self.node(Expr::And(Box::new(left), Box::new(right)))?;
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, CompileError> {
        if self.eat_name("not") {
            let operand = self.nested(Self::not_expr)?;
            return self.node(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    /// `a < b < c` becomes `a < b and b < c`
    fn comparison(&mut self) -> Result<Expr, CompileError> {
        let first = self.sum()?;
        let mut left = first.clone();
        let mut result: Option<Expr> = None;

        while let Some(op) = self.compare_op() {
            let right = self.sum()?;
            let cmp = self.node(Expr::Binary(op, Box::new(left), Box::new(right.clone())))?;
            result = Some(match result {
                None => cmp,
                Some(prev) => self.node(Expr::And(Box::new(prev), Box::new(cmp)))?,
            });
            left = right;
        }

        Ok(result.unwrap_or(first))
    }

    fn compare_op(&mut self) -> Option<BinOp> {
        let op = match self.peek()?.kind {
            TokenKind::Punct("==") => BinOp::Eq,
            TokenKind::Punct("!=") => BinOp::NotEq,
            TokenKind::Punct("<") => BinOp::Lt,
            TokenKind::Punct("<=") => BinOp::LtEq,
            TokenKind::Punct(">") => BinOp::Gt,
            TokenKind::Punct(">=") => BinOp::GtEq,
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn sum(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.term()?;
        loop {
            let op = if self.eat_punct("+") {
                BinOp::Add
            } else if self.eat_punct("-") {
                BinOp::Sub
            } else {
                break;
            };
            let right = self.term()?;
            left = self.node(Expr::Binary(op, Box::new(left), Box::new(right)))?;
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat_punct("*") {
                BinOp::Mul
            } else if self.eat_punct("//") {
                BinOp::FloorDiv
            } else if self.eat_punct("/") {
                BinOp::Div
            } else if self.eat_punct("%") {
                BinOp::Mod
            } else {
                break;
            };
            let right = self.unary()?;
            left = self.node(Expr::Binary(op, Box::new(left), Box::new(right)))?;
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, CompileError> {
        if self.eat_punct("-") {
            let operand = self.nested(Self::unary)?;
            return match operand {
                Expr::Literal(Literal::Int(n)) => Ok(Expr::Literal(Literal::Int(-n))),
                Expr::Literal(Literal::Float(f)) => Ok(Expr::Literal(Literal::Float(-f))),
                other => self.node(Expr::Unary(UnaryOp::Neg, Box::new(other))),
            };
        }
        if self.eat_punct("+") {
            return self.nested(Self::unary);
        }
        if self.eat_name("await") {
            let operand = self.nested(Self::postfix)?;
            return self.node(Expr::Await(Box::new(operand)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_punct(".") {
                let attr = self.identifier()?;
                expr = self.node(Expr::Attr(Box::new(expr), attr))?;
            } else if self.eat_punct("(") {
                let mut args = Vec::new();
                if !self.eat_punct(")") {
                    loop {
                        args.push(self.expression()?);
                        if self.eat_punct(")") {
                            break;
                        }
                        self.expect_punct(",")?;
                        // trailing comma
                        if self.eat_punct(")") {
                            break;
                        }
                    }
                }
                expr = self.node(Expr::Call(Box::new(expr), args))?;
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn atom(&mut self) -> Result<Expr, CompileError> {
        let token = match self.next() {
            Some(token) => token,
            None => return Err(self.error("unexpected end of line")),
        };

        match &token.kind {
            TokenKind::Int(n) => Ok(Expr::Literal(Literal::Int(*n))),
            TokenKind::Float(f) => Ok(Expr::Literal(Literal::Float(*f))),
            TokenKind::Str(s) => Ok(Expr::Literal(Literal::Str(s.clone()))),
            TokenKind::Name(n) => match n.as_str() {
                "True" => Ok(Expr::Literal(Literal::Bool(true))),
                "False" => Ok(Expr::Literal(Literal::Bool(false))),
                "None" => Ok(Expr::Literal(Literal::None)),
                word if KEYWORDS.contains(&word) || UNSUPPORTED.contains(&word) => {
                    Err(self.error(format!("unexpected keyword '{word}'")))
                }
                _ => Ok(Expr::Name(n.clone())),
            },
            TokenKind::Punct("(") => {
                let inner = self.expression()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            TokenKind::Punct(_) => Err(self.error(format!("unexpected {}", describe(token)))),
        }
    }
}

fn describe(token: &Token) -> String {
    match &token.kind {
        TokenKind::Name(n) => format!("name '{n}'"),
        TokenKind::Int(n) => format!("number {n}"),
        TokenKind::Float(f) => format!("number {f}"),
        TokenKind::Str(_) => "string".to_string(),
        TokenKind::Punct(p) => format!("'{p}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(lines: &[&str]) -> String {
        lines
            .iter()
            .map(|l| format!("  {l}\n"))
            .collect::<String>()
    }

    fn parse_body(lines: &[&str]) -> Result<Program, CompileError> {
        parse(&body(lines), 2)
    }

    #[test]
    fn test_imports_and_assignment() {
        let program = parse_body(&[
            "import uasyncio as asyncio",
            "from hardware import Motors, Servos as S",
            "motors = Motors()",
        ])
        .unwrap();

        assert_eq!(program.body.len(), 3);
        assert_eq!(
            program.body[0].kind,
            StmtKind::Import(ImportName {
                name: "uasyncio".into(),
                alias: Some("asyncio".into()),
            })
        );
        match &program.body[1].kind {
            StmtKind::FromImport { module, names } => {
                assert_eq!(module, "hardware");
                assert_eq!(names[1].binding(), "S");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            &program.body[2].kind,
            StmtKind::Assign { target, value: Expr::Call(..) } if target == "motors"
        ));
    }

    #[test]
    fn test_nested_blocks_and_lines() {
        let program = parse_body(&[
            "i = 0",
            "while not stop_event.is_set():",
            "    i += 1",
            "    if i > 3:",
            "        break",
            "    elif i == 2:",
            "        pass",
            "    else:",
            "        await asyncio.sleep(0.1)",
            "print(i)",
        ])
        .unwrap();

        assert_eq!(program.body.len(), 3);
        let StmtKind::While { cond, body } = &program.body[1].kind else {
            panic!("expected while");
        };
        assert!(matches!(cond, Expr::Unary(UnaryOp::Not, _)));
        assert_eq!(body.len(), 2);
        let StmtKind::If { branches, orelse } = &body[1].kind else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert!(matches!(orelse[0].kind, StmtKind::Expr(Expr::Await(_))));
        assert_eq!(program.body[2].line, 10);
    }

    #[test]
    fn test_precedence() {
        let program = parse_body(&["x = 1 + 2 * 3 < 10 and not y"]).unwrap();
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assign");
        };
        let Expr::And(cmp, not) = value else {
            panic!("expected and, got {:?}", value);
        };
        assert!(matches!(**not, Expr::Unary(UnaryOp::Not, _)));
        let Expr::Binary(BinOp::Lt, sum, _) = &**cmp else {
            panic!("expected comparison");
        };
        assert!(matches!(**sum, Expr::Binary(BinOp::Add, _, _)));
    }

    #[test]
    fn test_chained_comparison() {
        let program = parse_body(&["ok = 0 <= angle <= 180"]).unwrap();
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assign");
        };
        assert!(matches!(value, Expr::And(_, _)));
    }

    #[test]
    fn test_syntax_errors_report_line() {
        let err = parse_body(&["x = 1", "motors.set_speed(1,", "y = 2"]).unwrap_err();
        assert_eq!(err.line, 2);

        let err = parse_body(&["while True:", "print(1)"]).unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("indented block"));

        let err = parse_body(&["x = 1", "    y = 2"]).unwrap_err();
        assert!(err.message.contains("unexpected indent"));

        let err = parse_body(&["def f():", "    pass"]).unwrap_err();
        assert!(err.message.contains("not supported"));

        let err = parse_body(&["else:", "    pass"]).unwrap_err();
        assert!(err.message.contains("without matching"));
    }

    #[test]
    fn test_nesting_limits() {
        let deep = MAX_NESTING + 1;
        let deep_parens = format!("x = {}1{}", "(".repeat(deep), ")".repeat(deep));
        let err = parse_body(&[deep_parens.as_str()]).unwrap_err();
        assert!(err.message.contains("too deeply nested"));

        let deep_not = format!("x = {}1", "not ".repeat(deep));
        assert!(parse_body(&[deep_not.as_str()]).is_err());

        let long_chain = format!("x = 1{}", "+1".repeat(MAX_NODES + 1));
        let err = parse_body(&[long_chain.as_str()]).unwrap_err();
        assert!(err.message.contains("too complex"));

        let nested_calls = format!(
            "print({}1{})",
            "abs(".repeat(MAX_NESTING),
            ")".repeat(MAX_NESTING)
        );
        assert!(parse_body(&[nested_calls.as_str()]).is_err());

        let blocks: Vec<String> = (0..=MAX_NESTING)
            .map(|depth| format!("{}if True:", " ".repeat(depth)))
            .chain(std::iter::once(format!("{}pass", " ".repeat(MAX_NESTING + 1))))
            .collect();
        let text: String = blocks.iter().map(|l| format!("  {l}\n")).collect();
        let err = parse(&text, 2).unwrap_err();
        assert!(err.message.contains("nested blocks"));
    }

    #[test]
    fn test_reasonable_nesting_still_parses() {
        let parens = format!("x = {}1{}", "(".repeat(20), ")".repeat(20));
        parse_body(&[parens.as_str(), "y = -(-(-x)) + abs(min(1, max(2, 3)))"]).unwrap();
        let chain = format!("z = 0{}", " + 1".repeat(100));
        parse_body(&[chain.as_str()]).unwrap();
    }

    #[test]
    fn test_dedent_below_base() {
        let err = parse("  x = 1\ny = 2\n", 2).unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_blank_and_comment_lines_skipped() {
        let program = parse_body(&["", "# setup", "x = 1  # one", ""]).unwrap();
        assert_eq!(program.body.len(), 1);
        assert_eq!(program.body[0].line, 3);
    }
}
