use log::debug;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

extern "C" fn on_interrupt(_: libc::c_int) {}

/// shell 本身不响应 Ctrl-C / Ctrl-\。
/// 安装空处理函数而不是 SIG_IGN，exec 之后子进程恢复默认行为。
pub fn ignore_interrupt() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGQUIT] {
        unsafe { sigaction(signal, &action) }?;
        debug!("已设置信号处理: {}", signal);
    }
    Ok(())
}
