use std::collections::HashMap;
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;

use log::{debug, warn};
use once_cell::sync::Lazy;

use super::executor::Executor;
use crate::shell::error::ShellError;

type Builtin = fn(&mut Executor, &[String]) -> Result<i32, ShellError>;

static BUILTINS: Lazy<HashMap<&'static str, Builtin>> = Lazy::new(|| {
    let mut builtins: HashMap<&'static str, Builtin> = HashMap::new();
    builtins.insert("cd", cd);
    builtins.insert("exit", exit);
    builtins.insert("export", export);
    builtins.insert("jobs", jobs);
    builtins.insert("unset", unset);
    builtins
});

/// 执行内建命令，错误在这里报告并返回状态 1
pub fn run(executor: &mut Executor, argv: &[String]) -> i32 {
    let Some((name, args)) = argv.split_first() else {
        return 0;
    };
    let Some(builtin) = BUILTINS.get(name.as_str()) else {
        eprintln!("forksh: {}: not a builtin", name);
        return 1;
    };

    debug!("执行内建命令: {:?}", argv);
    match builtin(executor, args) {
        Ok(status) => status,
        Err(err) => {
            warn!("内建命令 {} 失败: {}", name, err);
            eprintln!("forksh: {}: {}", name, err);
            1
        }
    }
}

fn output_error(err: io::Error) -> ShellError {
    ShellError::Runtime(format!("write error: {}", err))
}

fn validate_name(name: &str) -> Result<(), ShellError> {
    if name.is_empty() || name.contains('=') || name.contains('\0') {
        return Err(ShellError::Runtime(format!(
            "`{}': not a valid identifier",
            name
        )));
    }
    Ok(())
}

/// 设置 shell 进程的环境变量
pub fn set_variable(name: &str, value: &str) -> Result<(), ShellError> {
    validate_name(name)?;
    if value.contains('\0') {
        return Err(ShellError::Runtime(format!(
            "{}: value contains NUL byte",
            name
        )));
    }
    debug!("设置环境变量: {}={}", name, value);
    env::set_var(name, value);
    Ok(())
}

fn cd(executor: &mut Executor, args: &[String]) -> Result<i32, ShellError> {
    let mut print_target = false;
    let target = match args {
        [] => PathBuf::from(shellexpand::tilde("~").as_ref()),
        [dir] if dir == "-" => {
            print_target = true;
            executor
                .prev_dir
                .clone()
                .ok_or_else(|| ShellError::Runtime(String::from("OLDPWD not set")))?
        }
        [dir] => PathBuf::from(shellexpand::tilde(dir).as_ref()),
        _ => return Err(ShellError::Runtime(String::from("too many arguments"))),
    };

    let previous = env::current_dir().ok();
    env::set_current_dir(&target)
        .map_err(|e| ShellError::Runtime(format!("{}: {}", target.display(), e)))?;

    if print_target {
        writeln!(io::stdout(), "{}", target.display()).map_err(output_error)?;
    }
    if let Some(previous) = previous {
        env::set_var("OLDPWD", &previous);
        executor.prev_dir = Some(previous);
    }
    if let Ok(current) = env::current_dir() {
        env::set_var("PWD", current);
    }
    Ok(0)
}

fn export(_executor: &mut Executor, args: &[String]) -> Result<i32, ShellError> {
    if args.is_empty() {
        let mut vars: Vec<(String, String)> = env::vars_os()
            .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
            .collect();
        vars.sort();

        let mut stdout = io::stdout().lock();
        for (name, value) in vars {
            writeln!(stdout, "{}={}", name, value).map_err(output_error)?;
        }
        return Ok(0);
    }

    for arg in args {
        match arg.split_once('=') {
            Some((name, value)) => set_variable(name, value)?,
            None => {
                validate_name(arg)?;
                if env::var_os(arg).is_none() {
                    env::set_var(arg, "");
                }
            }
        }
    }
    Ok(0)
}

fn unset(_executor: &mut Executor, args: &[String]) -> Result<i32, ShellError> {
    for name in args {
        validate_name(name)?;
        debug!("删除环境变量: {}", name);
        env::remove_var(name);
    }
    Ok(0)
}

fn jobs(executor: &mut Executor, _args: &[String]) -> Result<i32, ShellError> {
    let mut stdout = io::stdout().lock();
    for job in executor.jobs.jobs() {
        writeln!(stdout, "{}", job).map_err(output_error)?;
    }
    Ok(0)
}

fn exit(executor: &mut Executor, args: &[String]) -> Result<i32, ShellError> {
    let code = match args {
        [] => executor.last_status,
        [code] => match code.parse::<i32>() {
            Ok(code) => code,
            Err(_) => {
                eprintln!("forksh: exit: {}: numeric argument required", code);
                2
            }
        },
        _ => return Err(ShellError::Runtime(String::from("too many arguments"))),
    };
    debug!("请求退出，状态 {}", code);
    executor.exit_requested = Some(code);
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::executor::test_lock;
    use crate::shell::parser::lexer::KEYWORDS;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_every_keyword_is_builtin() {
        for keyword in KEYWORDS {
            assert!(BUILTINS.contains_key(keyword), "missing builtin {}", keyword);
        }
        assert!(!BUILTINS.contains_key("ls"));
    }

    #[test]
    fn test_export_and_unset() {
        let _lock = test_lock();
        let mut executor = Executor::new(4);
        assert_eq!(
            run(&mut executor, &args(&["export", "FORKSH_BUILTIN_A=one", "FORKSH_BUILTIN_B"])),
            0
        );
        assert_eq!(env::var("FORKSH_BUILTIN_A").ok().as_deref(), Some("one"));
        assert_eq!(env::var("FORKSH_BUILTIN_B").ok().as_deref(), Some(""));

        // 已存在的变量不会被清空
        assert_eq!(run(&mut executor, &args(&["export", "FORKSH_BUILTIN_A"])), 0);
        assert_eq!(env::var("FORKSH_BUILTIN_A").ok().as_deref(), Some("one"));

        assert_eq!(
            run(&mut executor, &args(&["unset", "FORKSH_BUILTIN_A", "FORKSH_BUILTIN_B"])),
            0
        );
        assert!(env::var_os("FORKSH_BUILTIN_A").is_none());
        assert!(env::var_os("FORKSH_BUILTIN_B").is_none());
    }

    #[test]
    fn test_invalid_names() {
        let _lock = test_lock();
        let mut executor = Executor::new(4);
        assert_eq!(run(&mut executor, &args(&["export", "=value"])), 1);
        assert_eq!(run(&mut executor, &args(&["unset", ""])), 1);
        assert!(set_variable("A=B", "c").is_err());
        assert!(set_variable("FORKSH_BUILTIN_C", "bad\0value").is_err());
    }

    #[test]
    fn test_exit() {
        let mut executor = Executor::new(4);
        assert_eq!(run(&mut executor, &args(&["exit", "3"])), 3);
        assert_eq!(executor.exit_requested, Some(3));

        let mut executor = Executor::new(4);
        assert_eq!(run(&mut executor, &args(&["exit", "abc"])), 2);
        assert_eq!(executor.exit_requested, Some(2));

        let mut executor = Executor::new(4);
        assert_eq!(run(&mut executor, &args(&["exit", "1", "2"])), 1);
        assert_eq!(executor.exit_requested, None);
    }

    #[test]
    fn test_cd_argument_errors() {
        let _lock = test_lock();
        let mut executor = Executor::new(4);
        assert_eq!(run(&mut executor, &args(&["cd", "a", "b"])), 1);
        // 没有上一个目录
        assert_eq!(run(&mut executor, &args(&["cd", "-"])), 1);
        assert_eq!(
            run(&mut executor, &args(&["cd", "/definitely/not/a/dir"])),
            1
        );
        assert!(executor.prev_dir.is_none());
    }
}
