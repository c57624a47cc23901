//! Runs the real binary: supervisor, forked workers and signals.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

const BIN: &str = env!("CARGO_BIN_EXE_hearth");

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn write_config(path: &Path, port: u16, body: &str) {
    let yaml = format!(
        "listen: 127.0.0.1:{port}\nprocesses: 2\ngraceful_timeout: 2\nerror_log:\n  level: warn\nhandler:\n  kind: respond\n  body: {body}\n"
    );
    std::fs::write(path, yaml).unwrap();
}

struct Server {
    child: Child,
    port: u16,
}

impl Server {
    fn start(config: &Path, port: u16) -> Self {
        let child = Command::new(BIN)
            .arg("-c")
            .arg(config)
            .env_remove("HEARTH_LISTEN")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let server = Self { child, port };
        server.wait_ready();
        server
    }

    fn wait_ready(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if TcpStream::connect(("127.0.0.1", self.port)).is_ok() {
                return;
            }
            thread::sleep(Duration::from_millis(50));
        }
        panic!("server did not start listening");
    }

    fn get(&self, target: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", self.port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        write!(stream, "GET {target} HTTP/1.0\r\n\r\n").unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        out
    }

    fn signal(&self, sig: Signal) {
        kill(Pid::from_raw(self.child.id() as i32), sig).unwrap();
    }

    fn wait_exit(&mut self) -> ExitStatus {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if let Some(status) = self.child.try_wait().unwrap() {
                return status;
            }
            thread::sleep(Duration::from_millis(50));
        }
        panic!("server did not exit");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.child.try_wait().ok().flatten().is_none() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[test]
fn test_serves_and_terminates() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("hearth.yaml");
    let port = free_port();
    write_config(&config, port, "first");

    let mut server = Server::start(&config, port);
    for _ in 0..4 {
        let text = server.get("/");
        assert!(text.starts_with("HTTP/1.0 200 OK\r\n"), "{text}");
        assert!(text.ends_with("first"));
    }

    server.signal(Signal::SIGTERM);
    assert!(server.wait_exit().success());
}

#[test]
fn test_reload_picks_up_new_handler() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("hearth.yaml");
    let port = free_port();
    write_config(&config, port, "before");

    let mut server = Server::start(&config, port);
    assert!(server.get("/").ends_with("before"));

    write_config(&config, port, "after");
    server.signal(Signal::SIGHUP);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if server.get("/").ends_with("after") {
            break;
        }
        assert!(Instant::now() < deadline, "reload never took effect");
        thread::sleep(Duration::from_millis(100));
    }

    server.signal(Signal::SIGQUIT);
    assert!(server.wait_exit().success());
}

#[test]
fn test_config_check_flag() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.yaml");
    write_config(&good, free_port(), "x");
    let bad = dir.path().join("bad.yaml");
    std::fs::write(&bad, "processes: 0\n").unwrap();

    let output = Command::new(BIN)
        .arg("-t")
        .arg(&good)
        .env_remove("HEARTH_LISTEN")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("is ok"));

    let output = Command::new(BIN)
        .arg("-t")
        .arg(&bad)
        .env_remove("HEARTH_LISTEN")
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_config_check_builds_handlers() {
    let dir = tempfile::tempdir().unwrap();
    let check = |yaml: &str| {
        let path = dir.path().join("hearth.yaml");
        std::fs::write(&path, yaml).unwrap();
        Command::new(BIN)
            .arg("-t")
            .arg(&path)
            .env_remove("HEARTH_LISTEN")
            .output()
            .unwrap()
            .status
            .success()
    };

    assert!(check("handler:\n  kind: app\n  name: hello\n"));
    assert!(!check("handler:\n  kind: app\n  name: missing\n"));
    assert!(!check(
        "handler:\n  kind: rewrite\n  rules:\n    - pattern: \"(unclosed\"\n      replacement: /x\n"
    ));
}
