//! Worker slot driving one helper process.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::config::HelperPoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::pool::{Job, JobQueue, PoolCounters};

pub(crate) struct WorkerContext {
    pub(crate) index: usize,
    pub(crate) config: Arc<HelperPoolConfig>,
    pub(crate) counters: Arc<PoolCounters>,
    pub(crate) queue: JobQueue,
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) spawn_at_start: bool,
    pub(crate) keep_warm: bool,
}

struct Helper {
    // Held so the process is killed when the helper is dropped.
    _child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    // Bytes of a reply line read so far; survives a cancelled read.
    partial: Vec<u8>,
    answered: bool,
}

struct InFlight {
    channel: u64,
    reply: oneshot::Sender<PoolResult<String>>,
    deadline: Option<Instant>,
}

pub(crate) async fn run(ctx: WorkerContext) {
    let mut worker = Worker {
        ctx,
        helper: None,
        in_flight: VecDeque::new(),
        next_channel: 0,
    };
    if worker.ctx.spawn_at_start {
        worker.ensure_helper();
    }

    let mut shutdown = worker.ctx.shutdown.clone();
    loop {
        if *shutdown.borrow() {
            break;
        }
        let has_capacity = worker.in_flight.len() < worker.ctx.config.concurrency;
        let deadline = worker.next_deadline();
        let reading = worker.helper.is_some();

        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            line = read_line(&mut worker.helper), if reading => {
                worker.handle_output(line);
            }
            () = sleep_until_deadline(deadline), if deadline.is_some() => {
                worker.expire_requests();
            }
            job = next_job(&worker.ctx.queue), if has_capacity => {
                match job {
                    Some(job) => worker.dispatch(job).await,
                    None => break,
                }
            }
        }
    }

    worker.abandon();
}

/// Next reply line with its terminator removed. Replies need not be UTF-8;
/// invalid sequences are replaced rather than treated as a helper failure.
async fn read_line(helper: &mut Option<Helper>) -> std::io::Result<Option<String>> {
    let Some(helper) = helper else {
        return std::future::pending().await;
    };
    let read = helper.stdout.read_until(b'\n', &mut helper.partial).await?;
    if read == 0 && helper.partial.is_empty() {
        return Ok(None);
    }
    let mut raw = std::mem::take(&mut helper.partial);
    if raw.last() == Some(&b'\n') {
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_job(queue: &JobQueue) -> Option<Job> {
    queue.lock().await.recv().await
}

struct Worker {
    ctx: WorkerContext,
    helper: Option<Helper>,
    in_flight: VecDeque<InFlight>,
    next_channel: u64,
}

impl Worker {
    fn spawn_helper(&self) -> PoolResult<Helper> {
        let program = &self.ctx.config.program;
        let spawn_error = |detail: String| PoolError::Spawn {
            program: program.first().cloned().unwrap_or_default(),
            detail,
        };
        let (executable, args) = program
            .split_first()
            .ok_or_else(|| spawn_error("empty command line".to_string()))?;

        let mut child = Command::new(executable)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| spawn_error(err.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("stdin pipe unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout pipe unavailable".to_string()))?;

        debug!(
            pool = %self.ctx.config.name,
            worker = self.ctx.index,
            pid = child.id(),
            "helper started"
        );
        Ok(Helper {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout),
            partial: Vec::new(),
            answered: false,
        })
    }

    fn ensure_helper(&mut self) -> Option<PoolError> {
        if self.helper.is_some() {
            return None;
        }
        match self.spawn_helper() {
            Ok(helper) => {
                self.helper = Some(helper);
                self.ctx
                    .counters
                    .running_helpers
                    .fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                warn!(
                    pool = %self.ctx.config.name,
                    worker = self.ctx.index,
                    error = %err,
                    "failed to start helper"
                );
                Some(err)
            }
        }
    }

    /// Drop the current helper (killing it) and optionally replace it.
    fn discard_helper(&mut self, respawn: bool) {
        if self.helper.take().is_some() {
            self.ctx
                .counters
                .running_helpers
                .fetch_sub(1, Ordering::Relaxed);
        }
        if respawn {
            self.ctx
                .counters
                .restarts_total
                .fetch_add(1, Ordering::Relaxed);
            let _ = self.ensure_helper();
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.iter().filter_map(|entry| entry.deadline).min()
    }

    async fn dispatch(&mut self, job: Job) {
        if let Some(err) = self.ensure_helper() {
            self.ctx
                .counters
                .failures_total
                .fetch_add(1, Ordering::Relaxed);
            let _ = job.reply.send(Err(err));
            return;
        }

        let channel = self.next_channel;
        self.next_channel = self.next_channel.wrapping_add(1);
        let mut wire = if self.ctx.config.uses_channel_ids() {
            format!("{channel} {}", job.line)
        } else {
            job.line
        };
        wire.push('\n');

        if !self.write_line(&wire).await {
            // The helper may have exited while idle; retry once on a fresh one.
            self.discard_helper(true);
            if !self.write_line(&wire).await {
                self.discard_helper(false);
                self.ctx
                    .counters
                    .failures_total
                    .fetch_add(1, Ordering::Relaxed);
                let _ = job.reply.send(Err(PoolError::HelperExited {
                    worker: self.ctx.index,
                }));
                return;
            }
        }

        self.ctx.counters.busy.fetch_add(1, Ordering::Relaxed);
        self.in_flight.push_back(InFlight {
            channel,
            reply: job.reply,
            deadline: self.ctx.config.timeout.map(|timeout| Instant::now() + timeout),
        });
    }

    async fn write_line(&mut self, wire: &str) -> bool {
        let Some(helper) = self.helper.as_mut() else {
            return false;
        };
        let written = async {
            helper.stdin.write_all(wire.as_bytes()).await?;
            helper.stdin.flush().await
        }
        .await;
        if let Err(err) = &written {
            debug!(
                pool = %self.ctx.config.name,
                worker = self.ctx.index,
                error = %err,
                "helper write failed"
            );
        }
        written.is_ok()
    }

    fn handle_output(&mut self, line: std::io::Result<Option<String>>) {
        match line {
            Ok(Some(line)) => self.deliver(line),
            Ok(None) => self.helper_lost("helper closed its output"),
            Err(err) => {
                warn!(
                    pool = %self.ctx.config.name,
                    worker = self.ctx.index,
                    error = %err,
                    "helper read failed"
                );
                self.helper_lost("helper read failed");
            }
        }
    }

    fn deliver(&mut self, line: String) {
        let (entry, payload) = if self.ctx.config.uses_channel_ids() {
            let (channel, rest) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            let position = channel.parse::<u64>().ok().and_then(|channel| {
                self.in_flight
                    .iter()
                    .position(|entry| entry.channel == channel)
            });
            (
                position.and_then(|index| self.in_flight.remove(index)),
                rest.to_string(),
            )
        } else {
            (self.in_flight.pop_front(), line)
        };

        if let Some(helper) = self.helper.as_mut() {
            helper.answered = true;
        }
        match entry {
            Some(entry) => {
                self.ctx.counters.busy.fetch_sub(1, Ordering::Relaxed);
                self.ctx
                    .counters
                    .replies_total
                    .fetch_add(1, Ordering::Relaxed);
                let _ = entry.reply.send(Ok(payload));
            }
            None => warn!(
                pool = %self.ctx.config.name,
                worker = self.ctx.index,
                "discarding unexpected helper output"
            ),
        }
    }

    fn helper_lost(&mut self, reason: &'static str) {
        let failed = self.in_flight.len();
        warn!(
            pool = %self.ctx.config.name,
            worker = self.ctx.index,
            failed,
            reason,
            "helper exited"
        );
        self.fail_in_flight(&PoolError::HelperExited {
            worker: self.ctx.index,
        });
        // A helper that dies before answering anything is only restarted on demand.
        let answered = self.helper.as_ref().is_some_and(|helper| helper.answered);
        let respawn = self.ctx.keep_warm && answered && !*self.ctx.shutdown.borrow();
        self.discard_helper(respawn);
    }

    fn expire_requests(&mut self) {
        let Some(timeout) = self.ctx.config.timeout else {
            return;
        };
        let now = Instant::now();
        let mut expired = 0_usize;
        let mut index = 0;
        while index < self.in_flight.len() {
            if self.in_flight[index]
                .deadline
                .is_some_and(|deadline| deadline <= now)
            {
                if let Some(entry) = self.in_flight.remove(index) {
                    self.finish_failed(entry, PoolError::Timeout { timeout });
                    expired += 1;
                }
            } else {
                index += 1;
            }
        }
        if expired == 0 {
            return;
        }
        warn!(
            pool = %self.ctx.config.name,
            worker = self.ctx.index,
            expired,
            "helper requests timed out"
        );
        if !self.ctx.config.uses_channel_ids() {
            // Without channel ids a late reply would be matched to the next request.
            self.fail_in_flight(&PoolError::HelperExited {
                worker: self.ctx.index,
            });
            self.discard_helper(self.ctx.keep_warm);
        }
    }

    fn fail_in_flight(&mut self, err: &PoolError) {
        while let Some(entry) = self.in_flight.pop_front() {
            self.finish_failed(entry, err.clone());
        }
    }

    fn finish_failed(&self, entry: InFlight, err: PoolError) {
        self.ctx.counters.busy.fetch_sub(1, Ordering::Relaxed);
        self.ctx
            .counters
            .failures_total
            .fetch_add(1, Ordering::Relaxed);
        let _ = entry.reply.send(Err(err));
    }

    fn abandon(&mut self) {
        while let Some(entry) = self.in_flight.pop_front() {
            self.ctx.counters.busy.fetch_sub(1, Ordering::Relaxed);
            let _ = entry.reply.send(Err(PoolError::ShutDown));
        }
        self.discard_helper(false);
        debug!(pool = %self.ctx.config.name, worker = self.ctx.index, "helper worker stopped");
    }
}
