use std::iter::Peekable;
use std::vec;

use log::debug;

use super::ast::Expression;
use super::lexer::{Token, TokenKind};
use crate::shell::error::ShellError;

pub struct Parser {
    tokens: Peekable<vec::IntoIter<Token>>,
    asts: Vec<Expression>,
}

fn syntax_error(token: Option<Token>) -> ShellError {
    match token {
        Some(token) => ShellError::Syntax(token.content),
        None => ShellError::Syntax(String::from("newline")),
    }
}

/// 运算符优先级，`|` > `&&` > `;`，非运算符节点最高
fn precedence(kind: TokenKind) -> u8 {
    match kind {
        TokenKind::Sequential => 1,
        TokenKind::SequentialIf => 2,
        TokenKind::Pipe => 3,
        _ => u8::MAX,
    }
}

/// 把 `op right` 接到已解析的 `left` 上。同种运算符直接追加，
/// 优先级更高的运算符作用在 `left` 的最后一个子节点上。
fn attach(mut left: Expression, op: Token, right: Expression) -> Result<Expression, ShellError> {
    if left.kind() == op.kind {
        left.children.push(right);
        return Ok(left);
    }

    if precedence(left.kind()) < precedence(op.kind) {
        if let Some(last) = left.children.pop() {
            let merged = attach(last, op, right)?;
            left.children.push(merged);
            return Ok(left);
        }
    }

    let invalid_left = match op.kind {
        TokenKind::Pipe => !left.is_command(),
        _ => left.kind() == TokenKind::Background,
    };
    if invalid_left {
        return Err(ShellError::Syntax(op.content));
    }

    Ok(Expression::new(op, vec![left, right]))
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        let tokens: Vec<Token> = tokens
            .into_iter()
            .filter(|token| token.kind != TokenKind::Whitespace)
            .collect();
        Parser {
            tokens: tokens.into_iter().peekable(),
            asts: Vec::new(),
        }
    }

    pub fn parse(mut self) -> Result<Vec<Expression>, ShellError> {
        while let Some(token) = self.tokens.next() {
            match token.kind {
                TokenKind::Executable | TokenKind::Keyword => {
                    let command = self.command(token);
                    self.asts.push(command?);
                }
                TokenKind::Pipe | TokenKind::Sequential | TokenKind::SequentialIf => {
                    self.sequential(token)?
                }
                TokenKind::Equal => self.assignment(token)?,
                TokenKind::Background => self.background(token)?,
                TokenKind::RedirectIn | TokenKind::RedirectOut => {
                    // 重定向只能跟在命令后面
                    return Err(ShellError::Syntax(token.content));
                }
                TokenKind::Whitespace => {}
                _ => {
                    let word = self.word(token);
                    self.asts.push(word);
                }
            }
        }

        if let Some(bare) = self.asts.iter().find(|ast| ast.is_word()) {
            return Err(ShellError::NotFound(bare.to_string()));
        }

        for ast in &self.asts {
            debug!("解析结果: {}", ast);
        }
        Ok(self.asts)
    }

    fn peek_kind(&mut self) -> Option<TokenKind> {
        self.tokens.peek().map(|token| token.kind)
    }

    /// 合并粘连的片段为一个单词
    fn word(&mut self, first: Token) -> Expression {
        let mut fragments = vec![first];
        loop {
            let glued = match (fragments.last(), self.tokens.peek()) {
                (Some(prev), Some(next)) => {
                    next.kind.is_fragment()
                        && (prev.kind == TokenKind::StickyRight
                            || next.kind == TokenKind::StickyLeft
                            || next.glued)
                }
                _ => false,
            };
            if !glued {
                break;
            }
            match self.tokens.next() {
                Some(next) => fragments.push(next),
                None => break,
            }
        }

        let mut parts: Vec<Expression> = Vec::new();
        let mut literal: Option<String> = None;
        for fragment in fragments {
            if fragment.kind == TokenKind::Eval {
                if let Some(text) = literal.take() {
                    parts.push(Expression::leaf(Token::new(TokenKind::String, text)));
                }
                parts.push(Expression::leaf(fragment));
            } else {
                literal
                    .get_or_insert_with(String::new)
                    .push_str(&fragment.content);
            }
        }
        if let Some(text) = literal {
            parts.push(Expression::leaf(Token::new(TokenKind::String, text)));
        }

        if parts.len() == 1 {
            if let Some(part) = parts.pop() {
                return part;
            }
        }
        Expression::new(Token::new(TokenKind::String, ""), parts)
    }

    fn redirect(&mut self, op: Token) -> Result<Expression, ShellError> {
        match self.tokens.next() {
            Some(target) if target.kind.is_fragment() => {
                let target = self.word(target);
                Ok(Expression::new(op, vec![target]))
            }
            other => Err(syntax_error(other)),
        }
    }

    /// 命令名之后贪婪吸收参数和重定向
    fn command(&mut self, name: Token) -> Result<Expression, ShellError> {
        let mut command = Expression::leaf(name);
        loop {
            match self.peek_kind() {
                Some(kind) if kind.is_fragment() || kind.is_redirect() => {}
                _ => break,
            }
            let Some(token) = self.tokens.next() else {
                break;
            };
            let child = if token.kind.is_redirect() {
                self.redirect(token)?
            } else {
                self.word(token)
            };
            command.children.push(child);
        }
        Ok(command)
    }

    fn assignment_value(&mut self, key: Expression, op: Token) -> Result<Expression, ShellError> {
        if !key.is_literal() {
            return Err(ShellError::Syntax(op.content));
        }
        match self.tokens.next() {
            Some(value) if value.kind.is_fragment() => {
                let value = self.word(value);
                Ok(Expression::new(op, vec![key, value]))
            }
            other => Err(syntax_error(other)),
        }
    }

    fn assignment(&mut self, op: Token) -> Result<(), ShellError> {
        let key = match self.asts.pop() {
            Some(key) => key,
            None => return Err(ShellError::Syntax(op.content)),
        };
        let assignment = self.assignment_value(key, op)?;
        self.asts.push(assignment);
        Ok(())
    }

    fn sequential(&mut self, op: Token) -> Result<(), ShellError> {
        let left = match self.asts.pop() {
            Some(left) if left.is_word() => return Err(ShellError::NotFound(left.to_string())),
            Some(left) if left.kind() != TokenKind::Background => left,
            _ => return Err(ShellError::Syntax(op.content)),
        };

        let right = match self.tokens.next() {
            Some(token) if matches!(token.kind, TokenKind::Executable | TokenKind::Keyword) => {
                self.command(token)?
            }
            Some(token)
                if token.kind.is_fragment()
                    && op.kind != TokenKind::Pipe
                    && self.peek_kind() == Some(TokenKind::Equal) =>
            {
                let key = self.word(token);
                match self.tokens.next() {
                    Some(equal) => self.assignment_value(key, equal)?,
                    None => return Err(syntax_error(None)),
                }
            }
            Some(token) if token.kind.is_fragment() => {
                let word = self.word(token);
                return Err(ShellError::NotFound(word.to_string()));
            }
            other => return Err(syntax_error(other)),
        };

        let joined = attach(left, op, right)?;
        self.asts.push(joined);
        Ok(())
    }

    fn background(&mut self, op: Token) -> Result<(), ShellError> {
        fn backgroundable(node: &Expression) -> bool {
            matches!(
                node.kind(),
                TokenKind::Executable | TokenKind::Pipe | TokenKind::SequentialIf
            )
        }

        let wrapped = match self.asts.pop() {
            Some(node) if backgroundable(&node) => Expression::new(op, vec![node]),
            // `a ; b &` 只把 b 放到后台
            Some(mut node) if node.kind() == TokenKind::Sequential => {
                match node.children.pop() {
                    Some(last) if backgroundable(&last) => {
                        node.children.push(Expression::new(op, vec![last]));
                        node
                    }
                    _ => return Err(ShellError::Syntax(op.content)),
                }
            }
            Some(node) if node.is_word() => return Err(ShellError::NotFound(node.to_string())),
            _ => return Err(ShellError::Syntax(op.content)),
        };
        self.asts.push(wrapped);
        Ok(())
    }
}
