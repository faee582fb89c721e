use std::borrow::Cow;
use std::collections::HashMap;

use colored::{Color, Colorize};
use lazy_static::lazy_static;
use log::{debug, error, warn};
pub use rustyline::error::ReadlineError;
use rustyline::completion::Completer;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::FileHistory;
use rustyline::validate::Validator;
use rustyline::{CompletionType, Config as RLConfig, Editor, Helper};

use crate::shell::parser::lexer::{Lexer, TokenKind};
use crate::utils::config::Config;

lazy_static! {
    static ref TOKEN_COLORS: HashMap<TokenKind, Color> = {
        let mut colors = HashMap::new();
        colors.insert(TokenKind::Executable, Color::Blue);
        colors.insert(TokenKind::Keyword, Color::Blue);
        colors.insert(TokenKind::Background, Color::Red);
        colors.insert(TokenKind::Sequential, Color::Red);
        colors.insert(TokenKind::SequentialIf, Color::Green);
        colors.insert(TokenKind::Pipe, Color::Green);
        colors.insert(TokenKind::RedirectOut, Color::Green);
        colors.insert(TokenKind::RedirectIn, Color::Green);
        colors.insert(TokenKind::Eval, Color::Cyan);
        colors
    };
}

/// 输入行的语法高亮
pub struct LineHighlighter;

impl Completer for LineHighlighter {
    type Candidate = String;
}

impl Hinter for LineHighlighter {
    type Hint = String;
}

impl Validator for LineHighlighter {}

impl Highlighter for LineHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        let tokens = match Lexer::new(line).preserve_whitespace(true).tokenize() {
            Ok(tokens) => tokens,
            Err(_) => return Cow::Borrowed(line),
        };

        // 转义字符等无法原样还原时不做高亮
        let rendered: String = tokens.iter().map(|token| token.content.as_str()).collect();
        if rendered != line {
            return Cow::Borrowed(line);
        }

        let mut highlighted = String::with_capacity(line.len() * 2);
        for token in &tokens {
            match TOKEN_COLORS.get(&token.kind) {
                Some(color) => highlighted.push_str(&token.content.color(*color).to_string()),
                None => highlighted.push_str(&token.content),
            }
        }
        Cow::Owned(highlighted)
    }
}

impl Helper for LineHighlighter {}

pub struct ReadlineManager<'a> {
    config: &'a Config,
    editor: Editor<LineHighlighter, FileHistory>,
}

impl<'a> ReadlineManager<'a> {
    pub fn new(config: &'a Config) -> Result<Self, ReadlineError> {
        let rl_config = RLConfig::builder()
            .history_ignore_space(true)
            .completion_type(CompletionType::List)
            .edit_mode(config.get_edit_mode())
            .build();

        let mut editor = Editor::with_config(rl_config).map_err(|err| {
            error!("无法初始化 readline: {}", err);
            err
        })?;
        editor.set_helper(Some(LineHighlighter));
        Ok(Self { config, editor })
    }

    pub fn load_history(&mut self) -> Result<(), ReadlineError> {
        if let Err(err) = self.editor.load_history(&self.config.history_file) {
            warn!(
                "无法加载历史记录: {} {}",
                self.config.history_file.display(),
                err
            );
        } else {
            debug!("历史记录加载成功");
        }
        Ok(())
    }

    pub fn readline(&mut self, prompt: &str) -> Result<String, ReadlineError> {
        self.editor.readline(prompt)
    }

    pub fn add_history(&mut self, line: &str) -> Result<bool, ReadlineError> {
        self.editor.add_history_entry(line)
    }

    pub fn save_history(&mut self) -> Result<(), ReadlineError> {
        if let Some(dir) = self.config.history_file.parent() {
            if let Err(err) = std::fs::create_dir_all(dir) {
                warn!("无法创建历史记录目录 {}: {}", dir.display(), err);
            }
        }
        if let Err(err) = self.editor.save_history(&self.config.history_file) {
            error!("保存历史记录失败: {}", err);
        } else {
            debug!("历史记录保存成功");
        }
        Ok(())
    }
}
