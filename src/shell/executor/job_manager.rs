use std::fmt;

use log::{debug, error, warn};
use nix::errno::Errno;
use nix::unistd::Pid;

use super::process;

#[derive(Debug, Clone)]
pub struct Job {
    pub index: usize,
    pub pid: Pid,
    pub name: String,
    /// 已回收时的退出状态
    pub status: Option<i32>,
    pub is_current: bool,
    pub is_previous: bool,
}

impl Job {
    fn new(index: usize, pid: Pid, name: String) -> Self {
        Self {
            index,
            pid,
            name,
            status: None,
            is_current: false,
            is_previous: false,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            None => String::from("running"),
            Some(0) => String::from("done"),
            Some(code) => format!("exit {}", code),
        };
        let mark = if self.is_current {
            "+"
        } else if self.is_previous {
            "-"
        } else {
            " "
        };
        write!(
            f,
            "[{}] {} {} {} {}",
            self.index, mark, self.pid, status, self.name
        )
    }
}

#[derive(Clone, Default)]
pub struct JobManager {
    jobs: Vec<Job>,
}

impl JobManager {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    fn find_available_index(&self) -> usize {
        let mut index = 1;
        while self.jobs.iter().any(|job| job.index == index) {
            index += 1;
        }
        index
    }

    /// 最近加入的任务为当前任务（+），之前一个为上一个任务（-）
    fn update_marks(&mut self) {
        let count = self.jobs.len();
        for (pos, job) in self.jobs.iter_mut().enumerate() {
            job.is_current = pos + 1 == count;
            job.is_previous = pos + 2 == count;
        }
    }

    pub fn add(&mut self, pid: Pid, name: String) -> usize {
        let index = self.find_available_index();
        debug!("添加后台任务 [{}] {}: {}", index, pid, name);
        self.jobs.push(Job::new(index, pid, name));
        self.update_marks();
        index
    }

    /// 对单个任务做一次非阻塞回收，返回已知的退出状态
    pub fn poll(&mut self, pid: Pid) -> Option<i32> {
        let job = self.jobs.iter_mut().find(|job| job.pid == pid)?;
        if job.status.is_none() {
            match process::try_wait(pid) {
                Ok(status) => job.status = status,
                Err(err) => warn!("检查后台任务 {} 失败: {}", pid, err),
            }
        }
        job.status
    }

    /// 回收所有已结束的后台任务，每个任务只报告一次
    pub fn reconcile(&mut self) -> Vec<Job> {
        let mut finished = Vec::new();
        self.jobs.retain_mut(|job| {
            if job.status.is_none() {
                match process::try_wait(job.pid) {
                    Ok(status) => job.status = status,
                    Err(Errno::ECHILD) => {
                        warn!("后台任务 {} 已不是子进程，移除记录", job.pid);
                        return false;
                    }
                    Err(err) => {
                        error!("检查后台任务 {} 失败: {}", job.pid, err);
                        return true;
                    }
                }
            }

            match job.status {
                Some(_) => {
                    finished.push(job.clone());
                    false
                }
                None => true,
            }
        });

        if !finished.is_empty() {
            self.update_marks();
        }
        finished
    }
}
