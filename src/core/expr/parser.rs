//! Recursive-descent parser.
//!
//! Precedence, lowest first: `? :`, `||`, `&&`, relations
//! (`== != < <= > >= in`), `+ -`, `* / %`, unary `! -`, then member
//! access, calls and indexing.

use super::lexer::Token;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Literal),
    Ident(String),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Member(Box<Expr>, String),
    Call(Box<Expr>, String, Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
}

/// Parse a full token stream into one expression.
pub(crate) fn parse(tokens: Vec<Token>) -> Result<Expr, String> {
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(format!("unexpected token '{}'", token)),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), String> {
        if self.eat(token) {
            return Ok(());
        }
        match self.peek() {
            Some(found) => Err(format!("expected '{}', found '{}'", token, found)),
            None => Err(format!("expected '{}', found end of input", token)),
        }
    }

    fn expression(&mut self) -> Result<Expr, String> {
        let condition = self.or()?;
        if !self.eat(&Token::Question) {
            return Ok(condition);
        }
        let then = self.expression()?;
        self.expect(&Token::Colon)?;
        let otherwise = self.expression()?;
        Ok(Expr::Ternary(
            Box::new(condition),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut left = self.relation()?;
        while self.eat(&Token::And) {
            let right = self.relation()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn relation(&mut self) -> Result<Expr, String> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::In) => BinaryOp::In,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        self.member()
    }

    fn member(&mut self) -> Result<Expr, String> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.tokens.get(self.pos).cloned() {
                    Some(Token::Ident(name)) => name,
                    Some(other) => return Err(format!("expected field name, found '{}'", other)),
                    None => return Err("expected field name, found end of input".to_string()),
                };
                self.pos += 1;
                expr = if self.eat(&Token::LParen) {
                    let args = self.arguments(&Token::RParen)?;
                    Expr::Call(Box::new(expr), name, args)
                } else {
                    Expr::Member(Box::new(expr), name)
                };
            } else if self.eat(&Token::LBracket) {
                let index = self.expression()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, String> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "unexpected end of input".to_string())?;
        self.pos += 1;

        Ok(match token {
            Token::Null => Expr::Literal(Literal::Null),
            Token::True => Expr::Literal(Literal::Bool(true)),
            Token::False => Expr::Literal(Literal::Bool(false)),
            Token::Int(n) => Expr::Literal(Literal::Int(n)),
            Token::Float(n) => Expr::Literal(Literal::Float(n)),
            Token::Str(s) => Expr::Literal(Literal::Str(s)),
            Token::Ident(name) => Expr::Ident(name),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(&Token::RParen)?;
                inner
            }
            Token::LBracket => Expr::List(self.arguments(&Token::RBracket)?),
            other => return Err(format!("unexpected token '{}'", other)),
        })
    }

    /// Comma-separated expressions up to `close`, which is consumed.
    fn arguments(&mut self, close: &Token) -> Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(close) {
                return Ok(args);
            }
            self.expect(&Token::Comma)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn ast(source: &str) -> Expr {
        parse(tokenize(source).unwrap()).unwrap()
    }

    #[test]
    fn test_precedence() {
        let expr = ast("a || b && c");
        match expr {
            Expr::Binary(BinaryOp::Or, _, right) => {
                assert!(matches!(*right, Expr::Binary(BinaryOp::And, _, _)))
            }
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn test_method_chain() {
        let expr = ast(r#"p.secret("k").is_base64()"#);
        match expr {
            Expr::Call(target, method, args) => {
                assert_eq!(method, "is_base64");
                assert!(args.is_empty());
                assert!(matches!(*target, Expr::Call(_, ref m, _) if m == "secret"));
            }
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn test_ternary_and_lists() {
        let expr = ast(r#"p.name in ["a", "b"] ? 1 : -2"#);
        assert!(matches!(expr, Expr::Ternary(_, _, _)));
    }

    #[test]
    fn test_index() {
        let expr = ast(r#"p.labels["tier"] == "front""#);
        assert!(matches!(expr, Expr::Binary(BinaryOp::Eq, _, _)));
    }

    #[test]
    fn test_errors() {
        for source in ["p.", "(a", "a b", "[1, 2", "p.has_secret(", "&&"] {
            let result = tokenize(source).and_then(parse);
            assert!(result.is_err(), "{source} should not parse");
        }
    }
}
