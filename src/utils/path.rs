use std::borrow::Cow;
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::{error, trace};

pub fn basename(path: &str) -> Cow<'_, str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return path.into();
    }
    let mut pieces = trimmed.rsplit('/');
    match pieces.next() {
        Some(p) => p.into(),
        None => path.into(),
    }
}

/// 按 PATH 顺序查找可执行文件，第一个带执行位的普通文件胜出。
/// 含 `/` 的名字直接检查该路径。
pub fn find_executable(name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    if name.contains('/') {
        let path = Path::new(name);
        return is_executable(path).then(|| path.to_path_buf());
    }

    let env_path = match env::var("PATH") {
        Ok(x) => x,
        Err(e) => {
            error!("forksh: error with env PATH: {:?}", e);
            return None;
        }
    };
    find_in(&env_path, name)
}

fn find_in(search_path: &str, name: &str) -> Option<PathBuf> {
    for dir in search_path.split(':') {
        // 空项等同于当前目录
        let dir = if dir.is_empty() { "." } else { dir };
        let candidate = Path::new(dir).join(name);
        if is_executable(&candidate) {
            trace!("在 PATH 中找到 {}: {}", name, candidate.display());
            return Some(candidate);
        }
    }
    None
}

fn is_executable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound && e.kind() != ErrorKind::PermissionDenied {
                error!("forksh: metadata error: {}: {}", path.display(), e);
            }
            false
        }
    }
}

pub fn current_dir() -> String {
    let current_dir = match env::current_dir() {
        Ok(x) => x,
        Err(e) => {
            error!("forksh: env current_dir error: {}", e);
            return String::new();
        }
    };
    current_dir.to_string_lossy().to_string()
}
