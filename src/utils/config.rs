use dotenv::dotenv;
use rustyline::EditMode;
use std::env;
use std::path::PathBuf;

/// 命令替换默认允许的嵌套层数
pub const DEFAULT_EVAL_DEPTH: usize = 16;

pub struct Config {
    pub name: String,
    pub config_dir: PathBuf,
    pub theme: String,
    pub history_file: PathBuf,
    pub editor_mode: String,
    pub logger_level: String,
    pub logger_dir: PathBuf,
    pub logger_stderr: bool,
    pub max_eval_depth: usize,
}

impl Config {
    fn get_config_dir() -> PathBuf {
        if let Ok(home) = env::var("HOME") {
            PathBuf::from(home).join(".config/forksh")
        } else {
            env::temp_dir().join("forksh")
        }
    }

    fn default() -> Self {
        let config_dir = Self::get_config_dir();
        Config {
            name: String::from(env!("CARGO_PKG_NAME")),
            theme: String::from("default"),
            history_file: config_dir.join(".forksh_history"),
            editor_mode: String::from("emacs"),
            logger_level: String::from("info"),
            logger_dir: config_dir.join("logs"),
            logger_stderr: false,
            max_eval_depth: DEFAULT_EVAL_DEPTH,
            config_dir,
        }
    }

    pub fn new() -> Self {
        // 优先加载环境变量
        if cfg!(debug_assertions) {
            dotenv::from_filename(".env.development").ok();
        } else {
            dotenv().ok();
        }

        let mut config = Config::default();

        if let Ok(theme) = env::var("FORKSH_THEME") {
            config.theme = theme;
        }

        if let Ok(editor) = env::var("FORKSH_EDITOR") {
            config.editor_mode = editor;
        }

        if let Ok(history) = env::var("FORKSH_HISTORY") {
            config.history_file = PathBuf::from(history);
        }

        if let Ok(level) = env::var("FORKSH_LOG_LEVEL") {
            config.logger_level = level;
        }

        if let Ok(dir) = env::var("FORKSH_LOG_DIR") {
            config.logger_dir = PathBuf::from(dir);
        }

        config.logger_stderr = env::var_os("FORKSH_LOG_STDERR").is_some();

        if let Ok(depth) = env::var("FORKSH_EVAL_DEPTH") {
            config.max_eval_depth = parse_depth(&depth);
        }

        config
    }

    pub fn get_edit_mode(&self) -> EditMode {
        match self.editor_mode.to_lowercase().as_str() {
            "vi" => EditMode::Vi,
            _ => EditMode::Emacs,
        }
    }
}

/// 非法或为 0 的值回退到默认层数
fn parse_depth(value: &str) -> usize {
    match value.trim().parse::<usize>() {
        Ok(depth) if depth > 0 => depth,
        _ => DEFAULT_EVAL_DEPTH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_depth() {
        assert_eq!(parse_depth("4"), 4);
        assert_eq!(parse_depth(" 32 "), 32);
        assert_eq!(parse_depth("0"), DEFAULT_EVAL_DEPTH);
        assert_eq!(parse_depth("deep"), DEFAULT_EVAL_DEPTH);
    }

    #[test]
    fn test_edit_mode() {
        let mut config = Config::default();
        assert_eq!(config.get_edit_mode(), EditMode::Emacs);
        config.editor_mode = String::from("VI");
        assert_eq!(config.get_edit_mode(), EditMode::Vi);
    }

    #[test]
    fn test_default_paths_live_under_config_dir() {
        let config = Config::default();
        assert!(config.history_file.starts_with(&config.config_dir));
        assert!(config.logger_dir.starts_with(&config.config_dir));
        assert_eq!(config.name, "forksh");
    }
}
