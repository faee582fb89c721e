pub mod builtins;
#[allow(clippy::module_inception)]
pub mod executor;
pub mod job_manager;
pub mod process;

pub use executor::Executor;

/// fork 子进程、修改环境变量或工作目录的测试串行执行
#[cfg(test)]
pub(crate) fn test_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}
