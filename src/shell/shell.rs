use log::{debug, error, warn};
use std::error::Error;
use std::io::{self, Write};

use crate::shell::error::ShellError;
use crate::shell::executor::Executor;
use crate::shell::parser::parse_line;
use crate::shell::readline::{ReadlineError, ReadlineManager};
use crate::shell::signals;
use crate::utils::config::Config;
use crate::utils::theme::Theme;

pub struct Shell<'a> {
    config: &'a Config,
    theme: Theme,
    readline: ReadlineManager<'a>,
    executor: Executor,
}

impl<'a> Shell<'a> {
    pub fn new(config: &'a Config, theme: Theme) -> Result<Self, ReadlineError> {
        Ok(Self {
            config,
            theme,
            readline: ReadlineManager::new(config)?,
            executor: Executor::new(config.max_eval_depth),
        })
    }

    /// 运行交互循环，返回 shell 的退出状态
    pub fn run(&mut self) -> Result<i32, Box<dyn Error>> {
        debug!("初始化 forksh...");

        signals::ignore_interrupt()?;
        self.readline.load_history()?;
        debug!("forksh 准备就绪...");

        let code = self.run_loop()?;
        self.readline.save_history()?;

        debug!("退出 forksh，状态 {}", code);
        Ok(code)
    }

    fn run_loop(&mut self) -> Result<i32, Box<dyn Error>> {
        loop {
            self.report_jobs();
            io::stdout().flush()?;

            let prompt = self
                .theme
                .prompt(&self.config.name, self.executor.last_status());
            match self.readline.readline(&prompt) {
                Ok(line) => {
                    if let Some(code) = self.handle_input(&line)? {
                        return Ok(code);
                    }
                }
                Err(ReadlineError::Eof) => {
                    debug!("接收到 EOF，退出 forksh...");
                    return Ok(0);
                }
                Err(ReadlineError::Interrupted) => {
                    debug!("接收到中断信号...");
                }
                Err(err) => {
                    error!("读取输入失败: {}", err);
                    return Err(err.into());
                }
            }
        }
    }

    /// 每次提示符前报告已结束的后台任务
    fn report_jobs(&mut self) {
        let finished = self.executor.reap_jobs();
        if finished.is_empty() {
            return;
        }
        for job in &finished {
            println!("{}", job);
        }
        debug!(
            "回收 {} 个后台任务，最近状态 {}",
            finished.len(),
            self.executor.last_bg_status()
        );
    }

    /// 执行一行输入，请求退出时返回退出状态
    fn handle_input(&mut self, line: &str) -> Result<Option<i32>, Box<dyn Error>> {
        if line.trim().is_empty() {
            return Ok(None);
        }
        self.readline.add_history(line)?;

        let trees = match parse_line(line) {
            Ok(trees) => trees,
            Err(err) => {
                warn!("解析失败 `{}`: {}", line, err);
                eprintln!("{}", self.theme.error(&err));
                let status = match err {
                    ShellError::NotFound(_) => 127,
                    _ => 2,
                };
                self.executor.set_last_status(status);
                return Ok(None);
            }
        };

        for tree in &trees {
            self.executor.execute(tree)?;
            if let Some(code) = self.executor.exit_requested() {
                return Ok(Some(code));
            }
        }
        Ok(None)
    }
}
