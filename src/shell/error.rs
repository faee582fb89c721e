use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quote {
    Single,
    Double,
    Backtick,
    Substitution,
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Quote::Single => "single quote",
            Quote::Double => "double quote",
            Quote::Backtick => "backtick",
            Quote::Substitution => "command substitution",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("unterminated {quote} starting at column {}", .position + 1)]
    Unterminated { quote: Quote, position: usize },
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("syntax error near unexpected token `{0}'")]
    Syntax(String),

    #[error("command not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Runtime(String),

    /// 父进程中的资源失败（fork、pipe、waitpid），不可恢复
    #[error("{context}: {source}")]
    System {
        context: &'static str,
        #[source]
        source: nix::Error,
    },
}

impl ShellError {
    pub fn system(context: &'static str) -> impl FnOnce(nix::Error) -> ShellError {
        move |source| ShellError::System { context, source }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ShellError::System { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = ShellError::from(LexError::Unterminated {
            quote: Quote::Double,
            position: 4,
        });
        assert_eq!(err.to_string(), "unterminated double quote starting at column 5");
        assert_eq!(
            ShellError::Syntax("|".into()).to_string(),
            "syntax error near unexpected token `|'"
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_system_errors_are_fatal() {
        let err = ShellError::system("fork")(nix::Error::EAGAIN);
        assert!(err.is_fatal());
        assert!(err.to_string().starts_with("fork: "));
    }
}
