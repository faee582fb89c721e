use std::fmt;

use super::lexer::{Token, TokenKind};

/// 语法树节点：一个 token 加上有序的子节点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub token: Token,
    pub children: Vec<Expression>,
}

impl Expression {
    pub fn new(token: Token, children: Vec<Expression>) -> Self {
        Expression { token, children }
    }

    pub fn leaf(token: Token) -> Self {
        Expression {
            token,
            children: Vec::new(),
        }
    }

    pub fn kind(&self) -> TokenKind {
        self.token.kind
    }

    pub fn content(&self) -> &str {
        &self.token.content
    }

    pub fn is_command(&self) -> bool {
        matches!(self.kind(), TokenKind::Executable | TokenKind::Keyword)
    }

    /// 不含命令替换的普通单词
    pub fn is_literal(&self) -> bool {
        self.kind() == TokenKind::String && self.children.is_empty()
    }

    pub fn is_word(&self) -> bool {
        matches!(self.kind(), TokenKind::String | TokenKind::Eval)
    }

    /// 命令的参数（不含重定向）
    pub fn arguments(&self) -> impl Iterator<Item = &Expression> {
        self.children.iter().filter(|child| child.is_word())
    }

    pub fn redirects(&self) -> impl Iterator<Item = &Expression> {
        self.children.iter().filter(|child| child.kind().is_redirect())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            TokenKind::Executable | TokenKind::Keyword => {
                f.write_str(self.content())?;
                for child in &self.children {
                    write!(f, " {}", child)?;
                }
                Ok(())
            }
            TokenKind::String if self.children.is_empty() => {
                f.write_str(&shell_words::quote(self.content()))
            }
            TokenKind::String => self.children.iter().try_for_each(|part| write!(f, "{}", part)),
            TokenKind::Eval => write!(f, "$({})", self.content()),
            TokenKind::RedirectIn | TokenKind::RedirectOut => {
                f.write_str(self.content())?;
                match self.children.first() {
                    Some(target) => write!(f, " {}", target),
                    None => Ok(()),
                }
            }
            TokenKind::Pipe | TokenKind::Sequential | TokenKind::SequentialIf => {
                let separator = match self.kind() {
                    TokenKind::Pipe => " | ",
                    TokenKind::Sequential => "; ",
                    _ => " && ",
                };
                for (i, child) in self.children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(separator)?;
                    }
                    write!(f, "{}", child)?;
                }
                Ok(())
            }
            TokenKind::Background => {
                for child in &self.children {
                    write!(f, "{} ", child)?;
                }
                f.write_str("&")
            }
            TokenKind::Equal => {
                let mut parts = self.children.iter();
                if let Some(key) = parts.next() {
                    write!(f, "{}", key)?;
                }
                f.write_str("=")?;
                parts.try_for_each(|value| write!(f, "{}", value))
            }
            _ => f.write_str(self.content()),
        }
    }
}
