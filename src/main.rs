use log::debug;

use crate::shell::Shell;
use crate::utils::config::Config;
use crate::utils::log::init_logger;
use crate::utils::theme::Theme;

mod shell;
mod utils;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::new();
    let theme = Theme::load_theme(&config.theme);

    if let Err(err) = init_logger(&config) {
        eprintln!("{}", theme.warning(format!("日志初始化失败: {}", err)));
    }
    debug!("配置加载成功 {}", config.config_dir.display());

    let code = Shell::new(&config, theme)?.run()?;
    std::process::exit(code)
}
