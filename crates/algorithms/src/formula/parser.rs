//! Tokenizer and recursive descent parser for formula expressions

use super::FormulaError;

/// Deepest expression tree a formula may produce
const MAX_DEPTH: usize = 256;

/// Longest formula, in tokens
const MAX_TOKENS: usize = 4096;

/// A token with its character offset in the source
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char), // + - * / ^
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        function: String,
        args: Vec<Expr>,
    },
}

fn parse_error(position: usize, message: impl Into<String>) -> FormulaError {
    FormulaError::Parse {
        position,
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, FormulaError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let start = i;
        match chars[i] {
            c if c.is_whitespace() => {
                i += 1;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push((start, Token::Op('^')));
                i += 2;
            }
            c @ ('+' | '-' | '*' | '/' | '^') => {
                tokens.push((start, Token::Op(c)));
                i += 1;
            }
            '(' => {
                tokens.push((start, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((start, Token::RParen));
                i += 1;
            }
            ',' => {
                tokens.push((start, Token::Comma));
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent only when digits follow, so `2e` stays a syntax error
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        while j < chars.len() && chars[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| parse_error(start, format!("invalid number '{}'", text)))?;
                tokens.push((start, Token::Number(value)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
            }
            c => {
                return Err(parse_error(start, format!("unexpected character '{}'", c)));
            }
        }
        if tokens.len() > MAX_TOKENS {
            return Err(parse_error(start, format!("formula is longer than {} tokens", MAX_TOKENS)));
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
    /// Current recursion depth
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    /// Offset of the current token, or the end of input
    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(p, _)| *p).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_rparen(&mut self) -> Result<(), FormulaError> {
        let at = self.offset();
        match self.advance() {
            Some(Token::RParen) => Ok(()),
            _ => Err(parse_error(at, "expected ')'")),
        }
    }

    /// expr = term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_term()?;
        while let Some(Token::Op(c @ ('+' | '-'))) = self.peek() {
            let op = if *c == '+' { BinaryOp::Add } else { BinaryOp::Sub };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// term = unary (('*' | '/') unary)*
    fn parse_term(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_unary()?;
        while let Some(Token::Op(c @ ('*' | '/'))) = self.peek() {
            let op = if *c == '*' { BinaryOp::Mul } else { BinaryOp::Div };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// Every nested operand passes through here, so this bounds recursion
    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        if self.depth >= MAX_DEPTH {
            return Err(too_deep(self.offset()));
        }
        self.depth += 1;
        let result = self.parse_unary_inner();
        self.depth -= 1;
        result
    }

    /// unary = ('+' | '-') unary | power
    fn parse_unary_inner(&mut self) -> Result<Expr, FormulaError> {
        match self.peek() {
            Some(Token::Op(c @ ('+' | '-'))) => {
                let op = if *c == '+' { UnaryOp::Plus } else { UnaryOp::Minus };
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            _ => self.parse_power(),
        }
    }

    /// power = primary ('^' unary)?, right-associative through `unary`
    fn parse_power(&mut self) -> Result<Expr, FormulaError> {
        let base = self.parse_primary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.advance();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    /// primary = number | ident | ident '(' args ')' | '(' expr ')'
    fn parse_primary(&mut self) -> Result<Expr, FormulaError> {
        let at = self.offset();
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.advance();
                    let args = self.parse_args()?;
                    Ok(Expr::Call {
                        function: name,
                        args,
                    })
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Some(other) => Err(parse_error(at, format!("unexpected {}", describe(&other)))),
            None => Err(parse_error(at, "unexpected end of formula")),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, FormulaError> {
        let mut args = Vec::new();
        if let Some(Token::RParen) = self.peek() {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.peek() {
                Some(Token::Comma) => {
                    self.advance();
                }
                _ => {
                    self.expect_rparen()?;
                    return Ok(args);
                }
            }
        }
    }
}

fn too_deep(position: usize) -> FormulaError {
    parse_error(position, format!("formula nests deeper than {} levels", MAX_DEPTH))
}

/// Height of the tree, walked without recursion
fn depth(expr: &Expr) -> usize {
    let mut deepest = 0;
    let mut stack = vec![(expr, 1)];
    while let Some((node, level)) = stack.pop() {
        deepest = deepest.max(level);
        match node {
            Expr::Number(_) | Expr::Variable(_) => {}
            Expr::Unary { operand, .. } => stack.push((operand, level + 1)),
            Expr::Binary { left, right, .. } => {
                stack.push((left, level + 1));
                stack.push((right, level + 1));
            }
            Expr::Call { args, .. } => stack.extend(args.iter().map(|a| (a, level + 1))),
        }
    }
    deepest
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => format!("number {}", n),
        Token::Ident(name) => format!("name '{}'", name),
        Token::Op(c) => format!("operator '{}'", c),
        Token::LParen => "'('".into(),
        Token::RParen => "')'".into(),
        Token::Comma => "','".into(),
    }
}

/// Parse a complete formula
pub fn parse(source: &str) -> Result<Expr, FormulaError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(parse_error(0, "formula is empty"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.chars().count(),
        depth: 0,
    };
    let expr = parser.parse_expr()?;
    if let Some(token) = parser.peek().cloned() {
        return Err(parse_error(
            parser.offset(),
            format!("unexpected {} after expression", describe(&token)),
        ));
    }
    // Long operator chains nest to the left without recursing while parsing
    if depth(&expr) > MAX_DEPTH {
        return Err(too_deep(0));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Box<Expr> {
        Box::new(Expr::Number(n))
    }

    #[test]
    fn test_precedence() {
        let e = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            e,
            Expr::Binary {
                op: BinaryOp::Add,
                left: num(1.0),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: num(2.0),
                    right: num(3.0),
                }),
            }
        );
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        // -2^2 parses as -(2^2)
        let e = parse("-2^2").unwrap();
        assert!(matches!(e, Expr::Unary { op: UnaryOp::Minus, .. }));
    }

    #[test]
    fn test_double_star_and_scientific_notation() {
        assert_eq!(parse("2 ** 3").unwrap(), parse("2 ^ 3").unwrap());
        assert_eq!(parse("1.5e3").unwrap(), Expr::Number(1500.0));
        assert_eq!(parse("2E-2").unwrap(), Expr::Number(0.02));
    }

    #[test]
    fn test_calls() {
        let e = parse("max(A_mean, 0)").unwrap();
        match e {
            Expr::Call { function, args } => {
                assert_eq!(function, "max");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected call, got {:?}", other),
        }
        assert!(matches!(parse("pi()").unwrap(), Expr::Call { ref args, .. } if args.is_empty()));
    }

    #[test]
    fn test_error_positions() {
        match parse("(a + ").unwrap_err() {
            FormulaError::Parse { position, .. } => assert_eq!(position, 5),
            other => panic!("unexpected {:?}", other),
        }
        match parse("a $ b").unwrap_err() {
            FormulaError::Parse { position, .. } => assert_eq!(position, 2),
            other => panic!("unexpected {:?}", other),
        }
        match parse("a b").unwrap_err() {
            FormulaError::Parse { position, .. } => assert_eq!(position, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse("").is_err());
        assert!(parse("2e").is_err());
        assert!(parse("1..2").is_err());
    }

    #[test]
    fn test_nesting_is_bounded() {
        let huge = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert!(matches!(parse(&huge), Err(FormulaError::Parse { .. })));

        let deep = format!("{}1{}", "(".repeat(300), ")".repeat(300));
        match parse(&deep) {
            Err(FormulaError::Parse { message, .. }) => assert!(message.contains("deeper")),
            other => panic!("unexpected {:?}", other),
        }

        let negations = format!("{}1", "-".repeat(1_000));
        assert!(matches!(parse(&negations), Err(FormulaError::Parse { .. })));

        let chain = ["x"; 1_000].join(" + ");
        assert!(matches!(parse(&chain), Err(FormulaError::Parse { .. })));

        let nested = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(parse(&nested).unwrap(), Expr::Number(1.0));
        assert!(parse(&["x"; 100].join(" + ")).is_ok());
    }
}
