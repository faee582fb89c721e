use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::PathBuf;

use log::{debug, warn};
use nix::fcntl::{self, FcntlArg, FdFlag};
use nix::unistd;

use super::builtins;
use super::job_manager::{Job, JobManager};
use super::process::{self, Program, Redirect, RedirectMode, SpawnRequest};
use crate::shell::error::ShellError;
use crate::shell::parser::ast::Expression;
use crate::shell::parser::lexer::TokenKind;
use crate::shell::parser::parse_line;

/// shell 进程的全部可变状态
pub struct Executor {
    pub(super) jobs: JobManager,
    pub(super) prev_dir: Option<PathBuf>,
    pub(super) last_status: i32,
    pub(super) last_bg_status: i32,
    pub(super) exit_requested: Option<i32>,
    eval_depth: usize,
    max_eval_depth: usize,
}

/// 内建命令在父进程中执行时的临时重定向，离开作用域时恢复
struct RedirectGuard {
    saved: Vec<(RawFd, RawFd)>,
}

impl RedirectGuard {
    fn apply(redirects: &[Redirect]) -> Result<Self, ShellError> {
        let mut guard = RedirectGuard { saved: Vec::new() };
        for redirect in redirects {
            let failed =
                |e: nix::Error| ShellError::Runtime(format!("{}: {}", redirect.display(), e.desc()));

            let fd = redirect.open().map_err(failed)?;
            let _ = io::stdout().flush();

            let saved = match unistd::dup(redirect.fd()) {
                Ok(saved) => saved,
                Err(e) => {
                    let _ = unistd::close(fd);
                    return Err(failed(e));
                }
            };
            let _ = fcntl::fcntl(saved, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC));
            guard.saved.push((redirect.fd(), saved));

            let result = unistd::dup2(fd, redirect.fd());
            let _ = unistd::close(fd);
            result.map_err(failed)?;
        }
        Ok(guard)
    }
}

impl Drop for RedirectGuard {
    fn drop(&mut self) {
        let _ = io::stdout().flush();
        for (target, saved) in self.saved.drain(..).rev() {
            let _ = unistd::dup2(saved, target);
            let _ = unistd::close(saved);
        }
    }
}

impl Executor {
    pub fn new(max_eval_depth: usize) -> Self {
        Self {
            jobs: JobManager::new(),
            prev_dir: None,
            last_status: 0,
            last_bg_status: 0,
            exit_requested: None,
            eval_depth: 0,
            max_eval_depth,
        }
    }

    pub fn last_status(&self) -> i32 {
        self.last_status
    }

    pub fn set_last_status(&mut self, status: i32) {
        self.last_status = status;
    }

    pub fn last_bg_status(&self) -> i32 {
        self.last_bg_status
    }

    pub fn exit_requested(&self) -> Option<i32> {
        self.exit_requested
    }

    /// 每次提示符前调用，返回已结束的后台任务
    pub fn reap_jobs(&mut self) -> Vec<Job> {
        let finished = self.jobs.reconcile();
        if let Some(job) = finished.last() {
            self.last_bg_status = job.status.unwrap_or(0);
        }
        finished
    }

    /// 执行一棵语法树。非致命错误在这里报告并记为状态 1
    pub fn execute(&mut self, node: &Expression) -> Result<i32, ShellError> {
        let result = match node.kind() {
            TokenKind::Keyword => self.builtin(node),
            TokenKind::Executable => self.command(node),
            TokenKind::Pipe => self.pipeline(node),
            TokenKind::Sequential | TokenKind::SequentialIf => self.sequential(node),
            TokenKind::Background => self.background(node),
            TokenKind::Equal => self.assignment(node),
            kind => unreachable!("无法执行的节点类型: {}", kind),
        };

        let status = match result {
            Ok(status) => status,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!("执行失败 `{}`: {}", node, err);
                eprintln!("forksh: {}", err);
                1
            }
        };
        self.last_status = status;
        Ok(status)
    }

    /// 子进程中执行一组语法树，返回最终状态
    pub(super) fn run_subshell(&mut self, trees: &[Expression]) -> i32 {
        // 后台任务属于父 shell
        self.jobs = JobManager::new();
        self.exit_requested = None;

        let mut status = 0;
        for tree in trees {
            status = match self.execute(tree) {
                Ok(status) => status,
                Err(err) => {
                    eprintln!("forksh: {}", err);
                    return 1;
                }
            };
            if let Some(code) = self.exit_requested {
                return code;
            }
        }
        status
    }

    /// 命令替换：在子 shell 中执行 `source`，读取它的标准输出
    pub fn capture(&mut self, source: &str) -> Result<String, ShellError> {
        if self.eval_depth >= self.max_eval_depth {
            return Err(ShellError::Runtime(format!(
                "command substitution nested too deeply (max {})",
                self.max_eval_depth
            )));
        }

        let trees = parse_line(source)?;
        let (reader, writer) = process::pipe()?;

        let mut request = SpawnRequest::new(Program::Subshell(&trees), format!("$({})", source));
        request.stdout = Some(writer.as_raw_fd());
        request.close.push(reader.as_raw_fd());

        self.eval_depth += 1;
        let spawned = process::spawn(self, request);
        self.eval_depth -= 1;
        let pid = spawned?;

        drop(writer);
        let mut output = Vec::new();
        let read = File::from(reader).read_to_end(&mut output);
        let status = process::wait(pid)?;
        read.map_err(|e| ShellError::Runtime(format!("command substitution: {}", e)))?;
        debug!("命令替换 $({}) 退出状态 {}", source, status);

        let text = String::from_utf8_lossy(&output);
        Ok(text.trim_end_matches(char::is_control).to_string())
    }

    fn expand_word(&mut self, word: &Expression) -> Result<String, ShellError> {
        if word.kind() == TokenKind::Eval {
            return self.capture(word.content());
        }
        if word.children.is_empty() {
            return Ok(word.content().to_string());
        }

        let mut value = String::new();
        for part in &word.children {
            value.push_str(&self.expand_word(part)?);
        }
        Ok(value)
    }

    fn expand_argv(&mut self, node: &Expression) -> Result<Vec<String>, ShellError> {
        let mut argv = vec![node.content().to_string()];
        for arg in node.arguments() {
            argv.push(self.expand_word(arg)?);
        }
        Ok(argv)
    }

    fn expand_redirects(&mut self, node: &Expression) -> Result<Vec<Redirect>, ShellError> {
        let mut redirects = Vec::new();
        for redirect in node.redirects() {
            let target = redirect
                .children
                .first()
                .ok_or_else(|| ShellError::Syntax(redirect.content().to_string()))?;
            let path = self.expand_word(target)?;
            redirects.push(Redirect::new(
                &path,
                RedirectMode::from_operator(redirect.content()),
            )?);
        }
        Ok(redirects)
    }

    /// 在父进程中准备好一个命令的 fork 请求
    fn prepare<'a>(&mut self, node: &Expression) -> Result<SpawnRequest<'a>, ShellError> {
        let argv = self.expand_argv(node)?;
        let redirects = self.expand_redirects(node)?;
        let program = if node.kind() == TokenKind::Keyword {
            Program::Builtin(argv)
        } else {
            Program::Exec(process::to_cstrings(&argv)?)
        };

        let mut request = SpawnRequest::new(program, node.to_string());
        request.redirects = redirects;
        Ok(request)
    }

    fn builtin(&mut self, node: &Expression) -> Result<i32, ShellError> {
        let argv = self.expand_argv(node)?;
        let redirects = self.expand_redirects(node)?;
        let _guard = RedirectGuard::apply(&redirects)?;
        Ok(builtins::run(self, &argv))
    }

    fn command(&mut self, node: &Expression) -> Result<i32, ShellError> {
        let request = self.prepare(node)?;
        let pid = process::spawn(self, request)?;
        process::wait(pid)
    }

    fn pipeline(&mut self, node: &Expression) -> Result<i32, ShellError> {
        let mut requests = Vec::with_capacity(node.children.len());
        for stage in &node.children {
            requests.push(self.prepare(stage)?);
        }

        let count = requests.len();
        let mut pids = Vec::with_capacity(count);
        let mut prev_read: Option<OwnedFd> = None;
        for (i, mut request) in requests.into_iter().enumerate() {
            let next = if i + 1 < count {
                Some(process::pipe()?)
            } else {
                None
            };

            if let Some(reader) = &prev_read {
                request.stdin = Some(reader.as_raw_fd());
            }
            if let Some((reader, writer)) = &next {
                request.stdout = Some(writer.as_raw_fd());
                request.close.push(reader.as_raw_fd());
            }

            match process::spawn(self, request) {
                Ok(pid) => pids.push(pid),
                Err(err) => {
                    drop(prev_read);
                    drop(next);
                    for pid in pids {
                        let _ = process::wait(pid);
                    }
                    return Err(err);
                }
            }
            // 父进程立即关闭用过的读端和新的写端
            prev_read = next.map(|(reader, _writer)| reader);
        }
        drop(prev_read);

        let mut status = 0;
        for pid in pids {
            status = process::wait(pid)?;
        }
        Ok(status)
    }

    fn sequential(&mut self, node: &Expression) -> Result<i32, ShellError> {
        let mut status = 0;
        for child in &node.children {
            status = self.execute(child)?;
            if self.exit_requested.is_some() {
                break;
            }
            if node.kind() == TokenKind::SequentialIf && status != 0 {
                break;
            }
        }
        Ok(status)
    }

    fn background(&mut self, node: &Expression) -> Result<i32, ShellError> {
        let Some(child) = node.children.first() else {
            return Ok(0);
        };

        let request = match child.kind() {
            TokenKind::Executable => self.prepare(child)?,
            _ => SpawnRequest::new(
                Program::Subshell(std::slice::from_ref(child)),
                child.to_string(),
            ),
        };
        let pid = process::spawn(self, request)?;
        let index = self.jobs.add(pid, child.to_string());
        writeln!(io::stdout(), "[{}] {}", index, pid)
            .map_err(|e| ShellError::Runtime(format!("write error: {}", e)))?;

        if let Some(status) = self.jobs.poll(pid) {
            self.last_bg_status = status;
        }
        Ok(0)
    }

    fn assignment(&mut self, node: &Expression) -> Result<i32, ShellError> {
        let (Some(key), Some(value)) = (node.children.first(), node.children.get(1)) else {
            return Err(ShellError::Syntax(node.content().to_string()));
        };
        let value = self.expand_word(value)?;
        builtins::set_variable(key.content(), &value)?;
        Ok(0)
    }
}
