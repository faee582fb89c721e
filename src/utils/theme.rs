use colored::Colorize;

use crate::utils::path::{basename, current_dir};

type Style = Box<dyn Fn(String) -> String>;

pub struct Theme {
    pub prompt_symbol: String,
    pub prompt_style: Style,
    pub dir_style: Style,
    pub error_style: Style,
    pub warning_style: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Theme {
            prompt_symbol: String::from("$"),
            prompt_style: Box::new(|s| s.bright_cyan().to_string()),
            dir_style: Box::new(|s| s.bright_blue().to_string()),
            error_style: Box::new(|s| s.bright_red().to_string()),
            warning_style: Box::new(|s| s.yellow().to_string()),
        }
    }
}

impl Theme {
    pub fn load_theme(theme_name: &str) -> Theme {
        match theme_name {
            "dark" => Theme {
                prompt_symbol: String::from("➤"),
                prompt_style: Box::new(|s| s.bright_purple().to_string()),
                dir_style: Box::new(|s| s.purple().to_string()),
                error_style: Box::new(|s| s.red().to_string()),
                warning_style: Box::new(|s| s.bright_yellow().to_string()),
            },
            _ => Theme::default(),
        }
    }

    /// `forksh:<目录名>$ `，上一条命令失败时符号标红
    pub fn prompt(&self, name: &str, last_status: i32) -> String {
        let cwd = current_dir();
        let symbol = if last_status == 0 {
            (self.prompt_style)(self.prompt_symbol.clone())
        } else {
            (self.error_style)(self.prompt_symbol.clone())
        };
        format!(
            "{}:{}{} ",
            (self.prompt_style)(name.to_string()),
            (self.dir_style)(basename(&cwd).to_string()),
            symbol
        )
    }

    pub fn error(&self, message: impl std::fmt::Display) -> String {
        (self.error_style)(format!("forksh: {}", message))
    }

    pub fn warning(&self, message: impl std::fmt::Display) -> String {
        (self.warning_style)(format!("forksh: {}", message))
    }
}
