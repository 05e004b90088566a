use assert_cmd::Command;
use predicates::prelude::*;
use std::io::{BufRead, BufReader, Write};

/// Manager stand-in: acknowledges every line and hangs up after `shutdown`.
fn fake_manager() -> (u16, std::thread::JoinHandle<Vec<String>>) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut received = Vec::new();
        for line in BufReader::new(stream).lines() {
            let line = line.unwrap();
            writeln!(writer, "[2024-01-01 00:00:00] ack {line}").unwrap();
            let done = line == "shutdown";
            received.push(line);
            if done {
                break;
            }
        }
        received
    });
    (port, handle)
}

#[test]
fn check_console_help() {
    let mut cmd = Command::cargo_bin("dsync-console").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--host"));
}

#[test]
fn test_unreachable_manager_fails() {
    let dir = tempfile::tempdir().unwrap();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    Command::cargo_bin("dsync-console")
        .unwrap()
        .args(["-h", "127.0.0.1", "-p", &port.to_string(), "-l"])
        .arg(dir.path().join("console.log"))
        .write_stdin("shutdown\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot reach manager"));
}

#[test]
fn test_commands_are_forwarded_and_logged() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("console.log");
    let (port, manager) = fake_manager();
    Command::cargo_bin("dsync-console")
        .unwrap()
        .args(["-h", "127.0.0.1", "-p", &port.to_string(), "-l"])
        .arg(&log)
        .write_stdin("add docs@h:1 backup@h:2\nbogus\n\ncancel docs@h:1\nshutdown\nadd late@h:1 x@h:2\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrong command given: <bogus>"))
        .stdout(predicate::str::contains("ack cancel docs@h:1"))
        .stdout(predicate::str::contains("ack shutdown"));
    assert_eq!(
        manager.join().unwrap(),
        ["add docs@h:1 backup@h:2", "cancel docs@h:1", "shutdown"]
    );
    let logged = std::fs::read_to_string(&log).unwrap();
    let commands: Vec<&str> = logged
        .lines()
        .map(|line| line.split_once("] ").unwrap().1)
        .collect();
    assert_eq!(
        commands,
        [
            "Command add docs@h:1 backup@h:2",
            "Command cancel docs@h:1",
            "Command shutdown"
        ]
    );
}
