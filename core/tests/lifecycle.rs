//! Stall detection, caller-initiated disconnects and re-entrancy, driven
//! against the mock server's `/slow` route.

mod common;

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{spawn_server, Event, Recorder};
use urlnet_core::{NetworkError, NetworkRequest};

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn stall_times_out_once() {
    let base = spawn_server();
    let request = NetworkRequest::get(&format!("{base}/slow/5000")).unwrap();
    let recorder = Recorder::new();
    request.set_listener(Some(recorder.clone())).unwrap();
    request.set_timeout(Duration::from_millis(400)).unwrap();

    let started = Instant::now();
    let result = request.open();
    assert!(matches!(result, Err(NetworkError::Timeout)), "{result:?}");
    assert!(started.elapsed() < Duration::from_secs(4));

    assert_eq!(recorder.failures(), vec![("Timeout".to_string(), false)]);
    let events = recorder.events();
    assert_eq!(events.first(), Some(&Event::Started));
    assert_eq!(
        events.last(),
        Some(&Event::Finished {
            headers: None,
            result: None
        })
    );
    assert_eq!(recorder.count(|e| matches!(e, Event::Finished { .. })), 1);
    let failed_at = events.iter().position(|e| matches!(e, Event::Failed { .. })).unwrap();
    assert!(!events[failed_at..].iter().any(|e| matches!(e, Event::Running { .. })));

    assert!(!request.is_opening());
    assert!(request.result().is_none());
}

/// Answers with `Content-Length: 10000`, sends 3000 bytes of it, then
/// goes quiet for three seconds.
fn stalling_mid_body() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
            line.clear();
        }
        let mut stream = stream;
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10000\r\n\r\n")
            .unwrap();
        stream.write_all(&[b'x'; 3000]).unwrap();
        stream.flush().unwrap();
        thread::sleep(Duration::from_secs(3));
    });
    format!("http://{addr}/partial")
}

#[test]
fn stall_in_the_middle_of_the_body_times_out_once() {
    let request = NetworkRequest::get(&stalling_mid_body()).unwrap();
    let recorder = Recorder::new();
    request.set_listener(Some(recorder.clone())).unwrap();
    request.set_timeout(Duration::from_millis(400)).unwrap();

    let started = Instant::now();
    let result = request.open();
    assert!(matches!(result, Err(NetworkError::Timeout)), "{result:?}");
    assert!(started.elapsed() < Duration::from_millis(2500));

    assert_eq!(recorder.failures(), vec![("Timeout".to_string(), false)]);
    let running = recorder.running();
    assert!(running.iter().any(|(receiving, current, total)| *receiving && *current > 0 && *total == 10000));
    assert!(running.iter().all(|(_, current, _)| *current <= 3000));

    let events = recorder.events();
    let failed_at = events.iter().position(|e| matches!(e, Event::Failed { .. })).unwrap();
    assert!(!events[failed_at..].iter().any(|e| matches!(e, Event::Running { .. })));
    assert_eq!(
        events.last(),
        Some(&Event::Finished {
            headers: None,
            result: None
        })
    );
    assert_eq!(recorder.count(|e| matches!(e, Event::Finished { .. })), 1);
    assert!(request.result().is_none());
}

#[test]
fn attempt_disconnect_aborts_a_blocked_request() {
    let base = spawn_server();
    let request = Arc::new(NetworkRequest::get(&format!("{base}/slow/5000")).unwrap());
    let recorder = Recorder::new();
    request.set_listener(Some(recorder.clone())).unwrap();

    let runner = {
        let request = request.clone();
        thread::spawn(move || request.open())
    };
    wait_until(|| request.is_opening());
    thread::sleep(Duration::from_millis(200));
    request.attempt_disconnect();

    let result = runner.join().unwrap();
    assert!(matches!(result, Err(NetworkError::Disconnected)), "{result:?}");
    assert_eq!(
        recorder.failures(),
        vec![(NetworkError::Disconnected.to_string(), true)]
    );
    assert!(matches!(
        recorder.events().last(),
        Some(Event::Finished { headers: None, result: None })
    ));
}

#[test]
fn second_open_while_opening_is_rejected() {
    let base = spawn_server();
    let request = Arc::new(NetworkRequest::get(&format!("{base}/slow/500")).unwrap());
    let recorder = Recorder::new();
    request.set_listener(Some(recorder.clone())).unwrap();

    let runner = {
        let request = request.clone();
        thread::spawn(move || request.open())
    };
    wait_until(|| request.is_opening());

    let started = Instant::now();
    let second = request.open();
    assert!(matches!(second, Err(NetworkError::Opening(_))), "{second:?}");
    assert!(started.elapsed() < Duration::from_millis(200));
    assert!(matches!(
        request.set_string_parameter("late", Some("x")),
        Err(NetworkError::Opening(_))
    ));

    runner.join().unwrap().unwrap();
    assert_eq!(request.result_as_string().as_deref(), Some("late"));
    assert_eq!(recorder.count(|e| *e == Event::Started), 1);
    assert_eq!(recorder.count(|e| matches!(e, Event::Finished { .. })), 1);
}

#[test]
fn disconnect_without_open_is_a_no_op() {
    let base = spawn_server();
    let request = NetworkRequest::get(&format!("{base}/hello")).unwrap();
    request.attempt_disconnect();
    request.open().unwrap();
    assert_eq!(request.result_as_string().as_deref(), Some("hello"));
}
