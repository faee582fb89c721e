pub mod ast;
pub mod lexer;
#[allow(clippy::module_inception)]
pub mod parser;

use crate::shell::error::ShellError;
use ast::Expression;
use lexer::Lexer;
use parser::Parser;

/// 词法分析加语法分析，任何错误都丢弃整行
pub fn parse_line(line: &str) -> Result<Vec<Expression>, ShellError> {
    let tokens = Lexer::new(line).tokenize()?;
    Parser::new(tokens).parse()
}
