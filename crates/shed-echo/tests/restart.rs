//! Restarts of the real binary.
//!
//! SIGHUP makes the running server re-execute itself with the listener at
//! fd 3. Clients keep connecting throughout and must never be refused.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const DEADLINE: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum Endpoint {
    Tcp(String),
    Unix(PathBuf),
}

impl Endpoint {
    fn free_tcp() -> Self {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        Endpoint::Tcp(probe.local_addr().unwrap().to_string())
    }

    fn arg(&self) -> String {
        match self {
            Endpoint::Tcp(addr) => addr.clone(),
            Endpoint::Unix(path) => path.display().to_string(),
        }
    }

    /// Send one line and return the pid of the process that echoed it.
    fn ask(&self, line: &str) -> io::Result<u32> {
        match self {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr)?;
                stream.set_read_timeout(Some(READ_TIMEOUT))?;
                exchange(stream, line)
            }
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path)?;
                stream.set_read_timeout(Some(READ_TIMEOUT))?;
                exchange(stream, line)
            }
        }
    }
}

fn exchange<S: Read + Write>(mut stream: S, line: &str) -> io::Result<u32> {
    stream.write_all(format!("{line}\n").as_bytes())?;

    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply)?;

    let malformed = || io::Error::new(io::ErrorKind::InvalidData, format!("reply {reply:?}"));
    let (pid, echoed) = reply.trim_end().split_once(": ").ok_or_else(malformed)?;
    if echoed != line {
        return Err(malformed());
    }
    pid.parse().map_err(|_| malformed())
}

/// The first server process. Killed if the test bails out early.
struct Server(Child);

impl Server {
    fn start(endpoint: &Endpoint) -> Self {
        let child = Command::new(env!("CARGO_BIN_EXE_shed-echo"))
            .args(["--addr", &endpoint.arg(), "--drain-timeout-secs", "1"])
            .env_remove("LISTENER")
            .env("RUST_LOG", "warn")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        Server(child)
    }

    fn pid(&self) -> u32 {
        self.0.id()
    }

    fn wait(&mut self) -> ExitStatus {
        wait_for("first server to exit", || self.0.try_wait().unwrap())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Ok(None) = self.0.try_wait() {
            let _ = self.0.kill();
            let _ = self.0.wait();
        }
    }
}

fn send_signal(pid: u32, signal: libc::c_int) {
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    assert_eq!(rc, 0, "kill({pid}, {signal}) failed");
}

fn wait_for<T>(what: &str, mut check: impl FnMut() -> Option<T>) -> T {
    let start = Instant::now();
    loop {
        if let Some(value) = check() {
            return value;
        }
        assert!(start.elapsed() < DEADLINE, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(20));
    }
}

fn hand_over(endpoint: Endpoint) {
    let mut server = Server::start(&endpoint);
    let first = wait_for("server to accept", || endpoint.ask("hello").ok());
    assert_eq!(first, server.pid());

    let stop = Arc::new(AtomicBool::new(false));
    let clients = thread::spawn({
        let endpoint = endpoint.clone();
        let stop = Arc::clone(&stop);
        move || {
            let mut answered = 0;
            let mut failures = Vec::new();
            while !stop.load(Ordering::SeqCst) {
                match endpoint.ask("ping") {
                    Ok(_) => answered += 1,
                    Err(e) => failures.push(e.to_string()),
                }
            }
            (answered, failures)
        }
    });

    thread::sleep(Duration::from_millis(100));
    send_signal(first, libc::SIGHUP);

    let successor = wait_for("replacement to answer", || {
        endpoint.ask("ping").ok().filter(|pid| *pid != first)
    });
    thread::sleep(Duration::from_millis(100));
    stop.store(true, Ordering::SeqCst);

    let (answered, failures) = clients.join().unwrap();
    assert!(failures.is_empty(), "clients failed during restart: {failures:?}");
    assert!(answered > 0);

    #[cfg(target_os = "linux")]
    {
        use std::os::unix::fs::FileTypeExt;
        let slot = std::fs::metadata(format!("/proc/{successor}/fd/3")).unwrap();
        assert!(slot.file_type().is_socket());
    }

    // The retired process no longer accepts.
    for _ in 0..20 {
        assert_eq!(endpoint.ask("after").unwrap(), successor);
    }

    send_signal(successor, libc::SIGINT);
    wait_for("replacement to stop", || endpoint.ask("bye").is_err().then_some(()));

    send_signal(first, libc::SIGINT);
    assert!(server.wait().success());
}

#[test]
fn tcp_restart_never_refuses_clients() {
    hand_over(Endpoint::free_tcp());
}

#[test]
fn unix_restart_never_refuses_clients() {
    let dir = tempfile::tempdir().unwrap();
    hand_over(Endpoint::Unix(dir.path().join("echo.sock")));
}
