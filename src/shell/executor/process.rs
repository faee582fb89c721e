use std::borrow::Cow;
use std::ffi::CString;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use log::{debug, trace};
use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg, FdFlag, OFlag};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, execvp, fork, ForkResult, Pid};

use super::builtins;
use super::executor::Executor;
use crate::shell::error::ShellError;
use crate::shell::parser::ast::Expression;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    Read,
    Truncate,
    Append,
}

impl RedirectMode {
    pub fn from_operator(operator: &str) -> Self {
        match operator {
            "<" => RedirectMode::Read,
            ">>" => RedirectMode::Append,
            _ => RedirectMode::Truncate,
        }
    }

    fn flags(self) -> OFlag {
        match self {
            RedirectMode::Read => OFlag::O_RDONLY,
            RedirectMode::Truncate => OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
            RedirectMode::Append => OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_APPEND,
        }
    }
}

#[derive(Debug)]
pub struct Redirect {
    pub path: CString,
    pub mode: RedirectMode,
}

impl Redirect {
    pub fn new(path: &str, mode: RedirectMode) -> Result<Self, ShellError> {
        let path = CString::new(path)
            .map_err(|_| ShellError::Runtime(format!("{}: invalid file name", path)))?;
        Ok(Redirect { path, mode })
    }

    /// 被替换的标准描述符
    pub fn fd(&self) -> RawFd {
        match self.mode {
            RedirectMode::Read => libc::STDIN_FILENO,
            _ => libc::STDOUT_FILENO,
        }
    }

    pub fn open(&self) -> nix::Result<RawFd> {
        fcntl::open(
            self.path.as_c_str(),
            self.mode.flags() | OFlag::O_CLOEXEC,
            Mode::from_bits_truncate(0o644),
        )
    }

    pub fn display(&self) -> Cow<'_, str> {
        self.path.to_string_lossy()
    }
}

pub enum Program<'a> {
    Exec(Vec<CString>),
    Builtin(Vec<String>),
    /// 在 fork 出的 shell 副本中执行的语法树
    Subshell(&'a [Expression]),
}

/// 一次 fork 需要的全部信息，都在父进程中准备好
pub struct SpawnRequest<'a> {
    pub program: Program<'a>,
    pub stdin: Option<RawFd>,
    pub stdout: Option<RawFd>,
    pub redirects: Vec<Redirect>,
    pub close: Vec<RawFd>,
    pub name: String,
}

impl<'a> SpawnRequest<'a> {
    pub fn new(program: Program<'a>, name: String) -> Self {
        Self {
            program,
            stdin: None,
            stdout: None,
            redirects: Vec::new(),
            close: Vec::new(),
            name,
        }
    }
}

pub fn to_cstrings(argv: &[String]) -> Result<Vec<CString>, ShellError> {
    argv.iter()
        .map(|arg| {
            CString::new(arg.as_str())
                .map_err(|_| ShellError::Runtime(format!("{}: argument contains NUL byte", arg)))
        })
        .collect()
}

/// 创建带 close-on-exec 的管道
pub fn pipe() -> Result<(OwnedFd, OwnedFd), ShellError> {
    let (reader, writer) = unistd::pipe().map_err(ShellError::system("pipe"))?;
    for fd in [&reader, &writer] {
        fcntl::fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(ShellError::system("fcntl"))?;
    }
    Ok((reader, writer))
}

pub fn spawn(executor: &mut Executor, request: SpawnRequest<'_>) -> Result<Pid, ShellError> {
    // 避免缓冲区内容在子进程中重复输出
    let _ = io::stdout().flush();

    match unsafe { fork() }.map_err(ShellError::system("fork"))? {
        ForkResult::Parent { child } => {
            debug!("fork 子进程 {}: {}", child, request.name);
            Ok(child)
        }
        ForkResult::Child => {
            let status = run_child(executor, request);
            exit_child(status)
        }
    }
}

fn exit_child(status: i32) -> ! {
    let _ = io::stdout().flush();
    unsafe { libc::_exit(status) }
}

/// 子进程中直接写 stderr，不经过日志
fn report(message: &str) {
    let line = format!("forksh: {}\n", message);
    let _ = unistd::write(io::stderr(), line.as_bytes());
}

fn run_child(executor: &mut Executor, request: SpawnRequest<'_>) -> i32 {
    // 运行时忽略了 SIGPIPE，忽略状态会跨过 exec 保留下来
    if let Err(e) = unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigDfl) } {
        report(&format!("signal: {}", e.desc()));
        return 1;
    }
    if let Err(message) = wire_fds(&request) {
        report(&message);
        return 1;
    }

    match request.program {
        Program::Exec(argv) => exec(&argv),
        Program::Builtin(argv) => builtins::run(executor, &argv),
        Program::Subshell(trees) => executor.run_subshell(trees),
    }
}

/// 顺序固定：管道端 dup 到 0/1，再打开重定向，最后关闭多余的描述符
fn wire_fds(request: &SpawnRequest<'_>) -> Result<(), String> {
    let dup_onto = |fd: RawFd, target: RawFd| {
        unistd::dup2(fd, target).map_err(|e| format!("dup2: {}", e.desc()))
    };

    if let Some(fd) = request.stdin {
        dup_onto(fd, libc::STDIN_FILENO)?;
    }
    if let Some(fd) = request.stdout {
        dup_onto(fd, libc::STDOUT_FILENO)?;
    }

    for redirect in &request.redirects {
        let fd = redirect
            .open()
            .map_err(|e| format!("{}: {}", redirect.display(), e.desc()))?;
        dup_onto(fd, redirect.fd())?;
        let _ = unistd::close(fd);
    }

    let originals = request.stdin.into_iter().chain(request.stdout);
    for fd in originals.chain(request.close.iter().copied()) {
        if fd > libc::STDERR_FILENO {
            let _ = unistd::close(fd);
        }
    }
    Ok(())
}

fn exec(argv: &[CString]) -> i32 {
    let Some(program) = argv.first() else {
        return 0;
    };

    let err = match execvp(program, argv) {
        Ok(never) => match never {},
        Err(err) => err,
    };

    let name = program.to_string_lossy();
    if err == Errno::ENOENT {
        report(&format!("{}: command not found", name));
        127
    } else {
        report(&format!("{}: {}", name, err.desc()));
        126
    }
}

/// 把一次 waitpid 的结果转换为退出状态，信号终止记为 128 + 信号值
pub fn exit_code(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, signal, _) => Some(128 + signal as i32),
        _ => None,
    }
}

/// 阻塞等待指定的子进程
pub fn wait(pid: Pid) -> Result<i32, ShellError> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(code) = exit_code(status) {
                    trace!("子进程 {} 退出: {}", pid, code);
                    return Ok(code);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(ShellError::system("waitpid")(err)),
        }
    }
}

/// 非阻塞地检查一次子进程状态
pub fn try_wait(pid: Pid) -> Result<Option<i32>, Errno> {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(status) => Ok(exit_code(status)),
        Err(Errno::EINTR) => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::executor::test_lock;

    #[test]
    fn test_redirect_modes() {
        assert_eq!(RedirectMode::from_operator("<"), RedirectMode::Read);
        assert_eq!(RedirectMode::from_operator(">"), RedirectMode::Truncate);
        assert_eq!(RedirectMode::from_operator(">>"), RedirectMode::Append);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_redirect_targets() {
        let read = Redirect::new("in.txt", RedirectMode::Read).unwrap();
        assert_eq!(read.fd(), 0);
        let append = Redirect::new("out.txt", RedirectMode::Append).unwrap();
        assert_eq!(append.fd(), 1);
        assert_eq!(append.display(), "out.txt");
        assert!(Redirect::new("bad\0name", RedirectMode::Truncate).is_err());
    }

    #[test]
    fn test_to_cstrings_rejects_nul() {
        let argv = vec![String::from("echo"), String::from("a\0b")];
        assert!(to_cstrings(&argv).is_err());
        let argv = vec![String::from("echo"), String::from("ok")];
        assert!(matches!(to_cstrings(&argv), Ok(v) if v.len() == 2));
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_pipe_is_close_on_exec() {
        let (reader, writer) = pipe().unwrap();
        for fd in [&reader, &writer] {
            let flags = fcntl::fcntl(fd.as_raw_fd(), FcntlArg::F_GETFD).unwrap();
            assert!(FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC));
        }
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_child_restores_default_sigpipe() {
        let _lock = test_lock();
        let mut executor = Executor::new(4);
        let argv = ["sh", "-c", "kill -PIPE $$; exit 0"].map(String::from);
        let request = SpawnRequest::new(Program::Exec(to_cstrings(&argv).unwrap()), String::from("sh"));
        let pid = spawn(&mut executor, request).unwrap();
        assert_eq!(wait(pid).unwrap(), 128 + Signal::SIGPIPE as i32);
    }

    #[test]
    fn test_exit_code() {
        let pid = Pid::from_raw(1);
        assert_eq!(exit_code(WaitStatus::Exited(pid, 3)), Some(3));
        assert_eq!(
            exit_code(WaitStatus::Signaled(pid, nix::sys::signal::Signal::SIGKILL, false)),
            Some(137)
        );
        assert_eq!(exit_code(WaitStatus::StillAlive), None);
    }
}
