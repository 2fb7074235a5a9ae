//! Master/worker prefork pool with rolling reload (spec.md §4.6).
//!
//! Rather than `fork()` after the Tokio runtime is already running (which
//! does not survive cleanly across an async runtime), the master re-execs
//! this same binary as `N` child OS processes with `WORKER_PROCESS=1` set,
//! each binding the same address via `SO_REUSEPORT` (`socket2`) so the
//! kernel load-balances accepts across them. `IS_REDUCED_RAM_IP_API=1`
//! (spec.md §6) skips the fork entirely and runs one worker in this same
//! process, so the server is testable without multiple OS processes.

use crate::config::Config;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{BufRead, BufReader};
use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader as TokioBufReader};
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

const RELOAD_ACK: &str = "RELOAD_OK";
const RELOAD_ACK_TIMEOUT: Duration = Duration::from_secs(30);

pub fn write_pid_file(path: &str, pid: u32) -> std::io::Result<()> {
    std::fs::write(path, pid.to_string())
}

/// Binds a `SO_REUSEPORT` listener so every worker process can accept on
/// the same address concurrently; the kernel distributes connections.
pub fn bind_reuseport(addr: &SocketAddr) -> std::io::Result<std::net::TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&(*addr).into())?;
    socket.listen(1024)?;
    Ok(socket.into())
}

struct WorkerHandle {
    child: Child,
    acks: mpsc::Receiver<()>,
}

fn spawn_worker(binding_address: &str) -> std::io::Result<WorkerHandle> {
    let exe = std::env::current_exe()?;
    let mut child = Command::new(exe)
        .env("WORKER_PROCESS", "1")
        .env("APP__SERVER__BINDING_ADDRESS", binding_address)
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child.stdout.take().expect("piped stdout");
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut lines = TokioBufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim() == RELOAD_ACK {
                let _ = tx.send(()).await;
            } else {
                tracing::info!(worker_line = %line, "worker stdout");
            }
        }
    });

    Ok(WorkerHandle { child, acks: rx })
}

/// Sends `SIGUSR1` to a worker and waits up to [`RELOAD_ACK_TIMEOUT`] for its
/// acknowledgement line on stdout before moving on to the next worker
/// (spec.md §4.6 "Rolling reload").
async fn reload_one(handle: &mut WorkerHandle) -> bool {
    let Some(pid) = handle.child.id() else { return false };
    if nix::sys::signal::kill(Pid::from_raw(pid as i32), Signal::SIGUSR1).is_err() {
        return false;
    }
    tokio::time::timeout(RELOAD_ACK_TIMEOUT, handle.acks.recv())
        .await
        .map(|ack| ack.is_some())
        .unwrap_or(false)
}

/// Master loop: spawns `resolved_worker_count()` workers, respawns any that
/// die, and rolls a reload across all of them on `SIGUSR2`.
pub async fn run_master(config: Config) -> std::io::Result<()> {
    write_pid_file(&config.server.pid_file, std::process::id())?;
    let n = config.resolved_worker_count();
    tracing::info!(workers = n, "master: spawning worker pool");

    let mut workers = Vec::with_capacity(n);
    for _ in 0..n {
        workers.push(spawn_worker(&config.server.binding_address)?);
    }

    let mut sigusr2 = signal(SignalKind::user_defined2())?;
    let mut housekeeping = tokio::time::interval(Duration::from_secs(2));

    loop {
        tokio::select! {
            _ = sigusr2.recv() => {
                tracing::info!("master: rolling reload requested");
                for handle in workers.iter_mut() {
                    if !reload_one(handle).await {
                        tracing::warn!("master: worker did not acknowledge reload in time");
                    }
                }
            }
            _ = housekeeping.tick() => {
                for handle in workers.iter_mut() {
                    if let Ok(Some(status)) = handle.child.try_wait() {
                        tracing::warn!(?status, "master: worker exited, respawning");
                        if let Ok(fresh) = spawn_worker(&config.server.binding_address) {
                            *handle = fresh;
                        }
                    }
                }
            }
        }
    }
}

/// One worker process: owns its own loaded pipeline, serves requests, and
/// reloads in place on `SIGUSR1` without dropping connections (queries run
/// against an `ArcSwap`-published snapshot).
pub async fn install_reload_handler(
    pipeline: Arc<arc_swap::ArcSwap<crate::pipeline::Pipeline>>,
    config: Arc<arc_swap::ArcSwap<Config>>,
) -> std::io::Result<()> {
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    tokio::spawn(async move {
        loop {
            if sigusr1.recv().await.is_none() {
                break;
            }
            let cfg = config.load();
            let mut fresh = match crate::pipeline::Pipeline::empty() {
                Ok(p) => p,
                Err(err) => {
                    tracing::error!(%err, "worker: reload failed to build empty pipeline");
                    continue;
                }
            };
            if let Err(err) = fresh.load(&cfg.datasets) {
                tracing::error!(%err, "worker: reload failed");
                continue;
            }
            pipeline.store(Arc::new(fresh));
            println!("{RELOAD_ACK}");
        }
    });
    Ok(())
}

/// Reads a pid file written by [`write_pid_file`], for admin tooling and
/// tests (not used on the hot path).
pub fn read_pid_file(path: &str) -> std::io::Result<u32> {
    let contents = std::fs::read_to_string(path)?;
    let mut reader = BufReader::new(contents.as_bytes());
    let mut line = String::new();
    reader.read_line(&mut line)?;
    line.trim()
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
