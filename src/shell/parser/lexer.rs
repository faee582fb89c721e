use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use log::trace;

use crate::shell::error::{LexError, Quote};
use crate::utils::path::find_executable;

/// 在 shell 进程内执行的关键字
pub const KEYWORDS: &[&str] = &["cd", "exit", "export", "jobs", "unset"];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    String,
    Equal,
    Executable,
    Background,
    Sequential,
    SequentialIf,
    Pipe,
    RedirectOut,
    RedirectIn,
    Keyword,
    Eval,
    /// 与右侧片段粘连，中间没有分词边界
    StickyRight,
    /// 与左侧片段粘连
    StickyLeft,
    /// 仅用于原样回显（语法高亮）
    Whitespace,
}

impl TokenKind {
    /// 能组成一个参数单词的片段
    pub fn is_fragment(self) -> bool {
        matches!(
            self,
            TokenKind::String | TokenKind::Eval | TokenKind::StickyLeft | TokenKind::StickyRight
        )
    }

    pub fn is_redirect(self) -> bool {
        matches!(self, TokenKind::RedirectIn | TokenKind::RedirectOut)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::String => "STRING",
            TokenKind::Equal => "EQUAL",
            TokenKind::Executable => "EXECUTABLE",
            TokenKind::Background => "BACKGROUND",
            TokenKind::Sequential => "SEQUENTIAL",
            TokenKind::SequentialIf => "SEQUENTIAL_IF",
            TokenKind::Pipe => "PIPE",
            TokenKind::RedirectOut => "REDIRECT_OUT",
            TokenKind::RedirectIn => "REDIRECT_IN",
            TokenKind::Keyword => "KEYWORD",
            TokenKind::Eval => "EVAL",
            TokenKind::StickyRight => "STICKY_RIGHT",
            TokenKind::StickyLeft => "STICKY_LEFT",
            TokenKind::Whitespace => "WHITESPACE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub content: String,
    /// 与前一个片段之间没有分词边界
    pub glued: bool,
}

impl Token {
    pub fn new(kind: TokenKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            glued: false,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{:?}", self.kind, self.content)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Blank,
    Quote,
    Assign,
}

pub struct Lexer<'a> {
    input: Peekable<CharIndices<'a>>,
    buffer: String,
    tokens: Vec<Token>,
    force_string: bool,
    adjacent: bool,
    preserve_whitespace: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.char_indices().peekable(),
            buffer: String::new(),
            tokens: Vec::new(),
            force_string: false,
            adjacent: false,
            preserve_whitespace: false,
        }
    }

    /// 保留空白和引号定界符，拼接所有 token 内容即可还原输入
    pub fn preserve_whitespace(mut self, preserve: bool) -> Self {
        self.preserve_whitespace = preserve;
        self
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        while let Some((pos, c)) = self.input.next() {
            match c {
                c if c.is_whitespace() => {
                    self.flush(Boundary::Blank);
                    self.adjacent = false;
                    self.push_whitespace(c.to_string());
                }
                '\'' => {
                    self.open_quote("'");
                    let text = self.read_single_quoted(pos)?;
                    self.close_literal(text, "'");
                }
                '"' => {
                    self.open_quote("\"");
                    let text = self.read_double_quoted(pos)?;
                    self.close_literal(text, "\"");
                }
                '`' => {
                    self.open_quote("`");
                    let text = self.read_backtick(pos)?;
                    self.close_eval(text, "`");
                }
                '$' if self.peek_char() == Some('(') => {
                    self.input.next();
                    self.open_quote("$(");
                    let text = self.read_substitution(pos)?;
                    self.close_eval(text, ")");
                }
                '\\' => match self.input.next() {
                    Some((_, escaped)) => self.buffer.push(escaped),
                    None => self.buffer.push('\\'),
                },
                '>' | '<' | '|' | ';' | '&' => self.operator(c),
                '=' if !self.force_string => self.operator(c),
                _ => self.buffer.push(c),
            }
        }
        self.flush(Boundary::Blank);

        for token in &self.tokens {
            trace!("token: {}", token);
        }
        Ok(self.tokens)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.input.peek().map(|&(_, c)| c)
    }

    /// 向前多看一个字符，匹配时吞掉它（`&&`、`>>`）
    fn gobble(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.input.next();
            true
        } else {
            false
        }
    }

    fn operator(&mut self, c: char) {
        // `=` 左边是变量名，不做 PATH 查找
        let boundary = if c == '=' {
            Boundary::Assign
        } else {
            Boundary::Blank
        };
        self.flush(boundary);
        self.adjacent = false;

        let (kind, content) = match c {
            '&' if self.gobble('&') => (TokenKind::SequentialIf, "&&"),
            '&' => (TokenKind::Background, "&"),
            '>' if self.gobble('>') => (TokenKind::RedirectOut, ">>"),
            '>' => (TokenKind::RedirectOut, ">"),
            '<' => (TokenKind::RedirectIn, "<"),
            '|' => (TokenKind::Pipe, "|"),
            ';' => (TokenKind::Sequential, ";"),
            _ => (TokenKind::Equal, "="),
        };

        // 重定向目标和赋值右值都不再识别为命令
        self.force_string = matches!(
            kind,
            TokenKind::RedirectOut | TokenKind::RedirectIn | TokenKind::Equal
        );
        self.tokens.push(Token::new(kind, content));
    }

    fn flush(&mut self, boundary: Boundary) {
        if self.buffer.is_empty() {
            return;
        }

        let text = std::mem::take(&mut self.buffer);
        let kind = if self.adjacent {
            TokenKind::StickyLeft
        } else {
            match boundary {
                Boundary::Quote => TokenKind::StickyRight,
                Boundary::Assign => TokenKind::String,
                Boundary::Blank => self.classify(&text),
            }
        };

        self.tokens.push(Token::new(kind, text));
        self.adjacent = boundary == Boundary::Quote;
    }

    fn classify(&mut self, word: &str) -> TokenKind {
        if self.force_string {
            return TokenKind::String;
        }

        let kind = if is_keyword(word) {
            TokenKind::Keyword
        } else if find_executable(word).is_some() {
            TokenKind::Executable
        } else {
            return TokenKind::String;
        };
        self.force_string = true;
        kind
    }

    fn open_quote(&mut self, delimiter: &str) {
        self.flush(Boundary::Quote);
        self.push_whitespace(delimiter);
    }

    fn close_literal(&mut self, text: String, delimiter: &str) {
        let glued = self.adjacent
            && self
                .last_fragment()
                .is_some_and(|prev| prev.kind != TokenKind::StickyRight);
        let kind = if glued {
            TokenKind::StickyLeft
        } else {
            TokenKind::String
        };

        self.tokens.push(Token::new(kind, text));
        self.push_whitespace(delimiter);
        self.adjacent = true;
    }

    fn close_eval(&mut self, text: String, delimiter: &str) {
        let mut token = Token::new(TokenKind::Eval, text);
        // 紧贴在前一个片段之后：`"a"b$(c)`、`$(a)$(b)` 都是一个单词
        if self.adjacent {
            if let Some(prev) = self.last_fragment_mut() {
                if prev.kind == TokenKind::String {
                    prev.kind = TokenKind::StickyRight;
                }
                token.glued = true;
            }
        }

        self.tokens.push(token);
        self.push_whitespace(delimiter);
        self.adjacent = true;
    }

    fn last_fragment(&self) -> Option<&Token> {
        self.tokens
            .iter()
            .rev()
            .find(|token| token.kind != TokenKind::Whitespace)
    }

    fn last_fragment_mut(&mut self) -> Option<&mut Token> {
        self.tokens
            .iter_mut()
            .rev()
            .find(|token| token.kind != TokenKind::Whitespace)
    }

    fn push_whitespace(&mut self, content: impl Into<String>) {
        if self.preserve_whitespace {
            self.tokens.push(Token::new(TokenKind::Whitespace, content));
        }
    }

    fn read_single_quoted(&mut self, start: usize) -> Result<String, LexError> {
        let mut text = String::new();
        for (_, c) in self.input.by_ref() {
            if c == '\'' {
                return Ok(text);
            }
            text.push(c);
        }
        Err(LexError::Unterminated {
            quote: Quote::Single,
            position: start,
        })
    }

    fn read_double_quoted(&mut self, start: usize) -> Result<String, LexError> {
        let mut text = String::new();
        while let Some((_, c)) = self.input.next() {
            match c {
                '"' => return Ok(text),
                '\\' => match self.peek_char() {
                    Some(next @ ('"' | '\\' | '`' | '$')) => {
                        self.input.next();
                        text.push(next);
                    }
                    _ => text.push('\\'),
                },
                _ => text.push(c),
            }
        }
        Err(LexError::Unterminated {
            quote: Quote::Double,
            position: start,
        })
    }

    fn read_backtick(&mut self, start: usize) -> Result<String, LexError> {
        let mut text = String::new();
        while let Some((_, c)) = self.input.next() {
            match c {
                '`' => return Ok(text),
                '\\' if self.peek_char() == Some('`') => {
                    self.input.next();
                    text.push('`');
                }
                _ => text.push(c),
            }
        }
        Err(LexError::Unterminated {
            quote: Quote::Backtick,
            position: start,
        })
    }

    /// 读取 `$(` 之后的内容直到匹配的 `)`，内部的括号和引号不会提前闭合
    fn read_substitution(&mut self, start: usize) -> Result<String, LexError> {
        let mut text = String::new();
        let mut depth = 1usize;
        let mut quote: Option<char> = None;

        while let Some((_, c)) = self.input.next() {
            match quote {
                Some(q) if c == q => quote = None,
                Some(q) if c == '\\' && q != '\'' => {
                    text.push(c);
                    if let Some((_, next)) = self.input.next() {
                        text.push(next);
                    }
                    continue;
                }
                Some(_) => {}
                None => match c {
                    '\'' | '"' | '`' => quote = Some(c),
                    '\\' => {
                        text.push(c);
                        if let Some((_, next)) = self.input.next() {
                            text.push(next);
                        }
                        continue;
                    }
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            return Ok(text);
                        }
                    }
                    _ => {}
                },
            }
            text.push(c);
        }
        Err(LexError::Unterminated {
            quote: Quote::Substitution,
            position: start,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::TokenKind::*;
    use super::*;

    #[allow(clippy::unwrap_used)]
    fn lex(input: &str) -> Vec<(TokenKind, std::string::String)> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|token| (token.kind, token.content))
            .collect()
    }

    fn tok(kind: TokenKind, content: &str) -> (TokenKind, std::string::String) {
        (kind, content.to_string())
    }

    #[test]
    fn test_simple_command() {
        assert_eq!(lex("ls -l"), vec![tok(Executable, "ls"), tok(String, "-l")]);
    }

    #[test]
    fn test_keyword_and_force_string() {
        assert_eq!(lex("cd /tmp"), vec![tok(Keyword, "cd"), tok(String, "/tmp")]);
        // 第一个命令之后不再识别命令名
        assert_eq!(
            lex("echo ls cd"),
            vec![tok(Executable, "echo"), tok(String, "ls"), tok(String, "cd")]
        );
    }

    #[test]
    fn test_operators() {
        let kinds: Vec<TokenKind> = lex("ls | wc -l; echo a && echo b &")
            .into_iter()
            .map(|(kind, _)| kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                Executable,
                Pipe,
                Executable,
                String,
                Sequential,
                Executable,
                String,
                SequentialIf,
                Executable,
                String,
                Background
            ]
        );
    }

    #[test]
    fn test_double_ampersand_and_append_are_gobbled() {
        assert_eq!(
            lex("true&&echo x>>log"),
            vec![
                tok(Executable, "true"),
                tok(SequentialIf, "&&"),
                tok(Executable, "echo"),
                tok(String, "x"),
                tok(RedirectOut, ">>"),
                tok(String, "log"),
            ]
        );
    }

    #[test]
    fn test_redirect_target_is_never_a_command() {
        assert_eq!(
            lex("echo hi > ls"),
            vec![
                tok(Executable, "echo"),
                tok(String, "hi"),
                tok(RedirectOut, ">"),
                tok(String, "ls"),
            ]
        );
    }

    #[test]
    fn test_equal_only_once() {
        assert_eq!(
            lex("A=b=c"),
            vec![tok(String, "A"), tok(Equal, "="), tok(String, "b=c")]
        );
        // 变量名和值都不做 PATH 查找
        assert_eq!(
            lex("test=ls"),
            vec![tok(String, "test"), tok(Equal, "="), tok(String, "ls")]
        );
        assert_eq!(
            lex("echo a=b"),
            vec![tok(Executable, "echo"), tok(String, "a=b")]
        );
    }

    #[test]
    fn test_sticky_quotes() {
        assert_eq!(
            lex(r#"echo foo"bar baz"qux"#),
            vec![
                tok(Executable, "echo"),
                tok(StickyRight, "foo"),
                tok(String, "bar baz"),
                tok(StickyLeft, "qux"),
            ]
        );
        assert_eq!(
            lex(r#"echo "a"b'c'"#),
            vec![
                tok(Executable, "echo"),
                tok(String, "a"),
                tok(StickyLeft, "b"),
                tok(StickyLeft, "c"),
            ]
        );
    }

    #[test]
    fn test_substitution_fragments() {
        assert_eq!(
            lex("echo pre$(echo x)post"),
            vec![
                tok(Executable, "echo"),
                tok(StickyRight, "pre"),
                tok(Eval, "echo x"),
                tok(StickyLeft, "post"),
            ]
        );
        assert_eq!(
            lex(r#"echo "a"`pwd`"#),
            vec![tok(Executable, "echo"), tok(StickyRight, "a"), tok(Eval, "pwd")]
        );
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_substitution_after_sticky_left() {
        for input in [r#"echo "a"b$(echo c)"#, "echo $(echo a)b$(echo c)"] {
            let tokens = Lexer::new(input).tokenize().unwrap();
            assert_eq!(tokens.len(), 4, "{:?}", input);
            assert_eq!(tokens[2].kind, StickyLeft);
            assert_eq!(tokens[2].content, "b");
            assert_eq!(tokens[3].kind, Eval);
            assert!(tokens[3].glued, "{:?}", input);
        }

        // 空白或运算符之后的替换不粘连
        let tokens = Lexer::new("echo b $(pwd);$(pwd)").tokenize().unwrap();
        assert!(tokens.iter().all(|token| !token.glued));
        let tokens = Lexer::new("A=$(pwd)").tokenize().unwrap();
        assert!(!tokens[2].glued);
    }

    #[test]
    fn test_nested_substitution() {
        assert_eq!(
            lex("echo $(echo $(pwd)) `echo hi`"),
            vec![
                tok(Executable, "echo"),
                tok(Eval, "echo $(pwd)"),
                tok(Eval, "echo hi"),
            ]
        );
        assert_eq!(
            lex(r#"echo $(echo ")")"#),
            vec![tok(Executable, "echo"), tok(Eval, r#"echo ")""#)]
        );
    }

    #[test]
    fn test_quotes_keep_operators_literal() {
        assert_eq!(
            lex(r#"echo "a | b; c" 'it''s'"#),
            vec![
                tok(Executable, "echo"),
                tok(String, "a | b; c"),
                tok(String, "it"),
                tok(StickyLeft, "s"),
            ]
        );
    }

    #[test]
    fn test_escapes() {
        assert_eq!(
            lex(r#"echo a\ b "x\"y" \|"#),
            vec![
                tok(Executable, "echo"),
                tok(String, "a b"),
                tok(String, "x\"y"),
                tok(String, "|"),
            ]
        );
    }

    #[test]
    fn test_unterminated_quotes_are_errors() {
        assert_eq!(
            Lexer::new("echo \"abc").tokenize(),
            Err(LexError::Unterminated {
                quote: Quote::Double,
                position: 5
            })
        );
        assert!(matches!(
            Lexer::new("echo $(ls").tokenize(),
            Err(LexError::Unterminated {
                quote: Quote::Substitution,
                ..
            })
        ));
        assert!(matches!(
            Lexer::new("echo 'x").tokenize(),
            Err(LexError::Unterminated {
                quote: Quote::Single,
                ..
            })
        ));
        assert!(Lexer::new("echo `x").tokenize().is_err());
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_preserve_whitespace_round_trip() {
        let input = r#"echo  "hi there" $(pwd) | wc -l>out"#;
        let tokens = Lexer::new(input)
            .preserve_whitespace(true)
            .tokenize()
            .unwrap();
        let rendered: std::string::String = tokens.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(rendered, input);
        assert!(tokens.iter().any(|t| t.kind == Whitespace));
    }

    #[test]
    fn test_empty_input() {
        assert!(lex("").is_empty());
        assert!(lex("   ").is_empty());
    }
}
