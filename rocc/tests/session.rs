mod common;

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use common::{SimPort, WAIT, hmac_upper_hex, rocc_device};
use rocc::{Error, Session, SessionConfig};

fn quick() -> SessionConfig {
    SessionConfig::default()
        .with_response_timeout(Duration::from_millis(500))
        .with_stop_timeout(WAIT)
}

#[test]
fn test_authenticate_sends_uppercase_hmac_and_accepts_ok() {
    let (port, handle, _) = rocc_device("00010203", "s3cret", HashMap::new());
    let session = Session::connect_with_config(port, quick()).unwrap();

    assert!(session.authenticate("s3cret"));

    let expected = hmac_upper_hex(b"s3cret", &[0x00, 0x01, 0x02, 0x03]);
    assert_eq!(handle.commands(), vec!["chlng".to_string(), format!("auth{expected}")]);
    session.disconnect().unwrap();
}

#[test]
fn test_authenticate_with_wrong_secret_fails() {
    let (port, _handle, _) = rocc_device("00010203", "s3cret", HashMap::new());
    let session = Session::connect_with_config(port, quick()).unwrap();

    assert!(!session.authenticate("guess"));
    assert!(matches!(
        session.try_authenticate("guess"),
        Err(Error::AuthRejected(r)) if r == "FAIL"
    ));
    // A refused handshake leaves the session usable
    assert_eq!(session.send_raw("ping").unwrap(), "pong");
}

#[test]
fn test_malformed_challenge_never_sends_auth() {
    for challenge in ["", "XYZ", "ABC"] {
        let (port, handle, _) = rocc_device(challenge, "s3cret", HashMap::new());
        let session = Session::connect_with_config(port, quick()).unwrap();

        assert!(matches!(
            session.try_authenticate("s3cret"),
            Err(Error::InvalidChallenge(_))
        ));
        assert!(!session.authenticate("s3cret"));
        assert!(
            handle.commands().iter().all(|c| !c.starts_with("auth")),
            "{challenge:?}"
        );
    }
}

#[test]
fn test_delayed_challenge_still_pairs_with_its_command() {
    let expected = hmac_upper_hex(b"s3cret", &[0xA1, 0xB2, 0xC3]);
    let reply = expected.clone();
    let (port, handle) = SimPort::new(Box::new(move |command, handle| {
        if command == "chlng" {
            handle.push_line_later("A1B2C3", Duration::from_millis(150));
        } else if command == format!("auth{reply}") {
            handle.push_line("OK");
        }
    }));
    let session = Session::connect_with_config(port, quick()).unwrap();

    assert!(session.authenticate("s3cret"));
    assert_eq!(handle.commands()[1], format!("auth{expected}"));
}

#[test]
fn test_set_time_sends_device_format() {
    let (port, handle, log) = rocc_device("00", "k", HashMap::new());
    let session = Session::connect_with_config(port, quick()).unwrap();

    let at = NaiveDate::from_ymd_opt(2024, 3, 5)
        .unwrap()
        .and_hms_opt(8, 7, 9)
        .unwrap();
    assert!(session.set_time_at(&at));
    assert_eq!(handle.commands(), vec!["time03/05/24-08:07:09"]);
    assert_eq!(log.lock().unwrap().times, vec!["03/05/24-08:07:09"]);

    assert!(session.set_time());
    assert_eq!(handle.commands()[1].len(), "time".len() + 17);

    let sent = session.try_set_time().unwrap();
    assert!(rocc::protocol::parse_device_time(&sent).is_ok());
    assert_eq!(log.lock().unwrap().times[2], sent);
}

#[test]
fn test_get_time_returns_trimmed_response() {
    let (port, _handle, _) = rocc_device("00", "k", HashMap::new());
    let session = Session::connect_with_config(port, quick()).unwrap();
    assert_eq!(session.get_time().unwrap(), "03/05/24-08:07:09");
}

#[test]
fn test_clear_file() {
    let mut files = HashMap::new();
    files.insert("log.txt".to_string(), common::SimFile::whole(b"x", &[]));
    let (port, _handle, log) = rocc_device("00", "k", files);
    let session = Session::connect_with_config(port, quick()).unwrap();

    assert!(session.clear_file("log.txt"));
    assert!(!session.clear_file("missing.txt"));
    assert_eq!(log.lock().unwrap().cleared, vec!["log.txt", "missing.txt"]);
}

#[test]
fn test_command_without_reply_times_out_and_session_survives() {
    let (port, handle) = SimPort::new(Box::new(|command, handle| {
        if command == "ping" {
            handle.push_line("pong");
        }
    }));
    let session = Session::connect_with_config(port, quick()).unwrap();

    assert!(matches!(session.send_raw("nothing"), Err(Error::Timeout(_))));
    assert_eq!(session.send_raw("ping").unwrap(), "pong");
    assert_eq!(handle.commands(), vec!["nothing", "ping"]);
}

#[test]
fn test_late_reply_does_not_answer_the_next_command() {
    let (port, handle) = SimPort::new(Box::new(|command, handle| match command {
        "slow" => handle.push_line_later("slow-ack", Duration::from_millis(700)),
        "ping" => handle.push_line("pong"),
        _ => {},
    }));
    let session = Session::connect_with_config(port, quick()).unwrap();

    assert!(matches!(session.send_raw("slow"), Err(Error::Timeout(_))));
    assert_eq!(session.send_raw("ping").unwrap(), "pong");
    assert_eq!(session.send_raw("ping").unwrap(), "pong");
    assert_eq!(handle.commands(), vec!["slow", "ping", "ping"]);
}

#[test]
fn test_send_command_no_resp_consumes_nothing() {
    let (port, handle) = SimPort::silent();
    let session = Session::connect_with_config(port, quick()).unwrap();

    session.send_command_no_resp("fread", "a.txt").unwrap();
    let line = thread::scope(|scope| {
        let reader = scope.spawn(|| session.read_line());
        thread::sleep(Duration::from_millis(50));
        handle.push_line("late");
        reader.join().unwrap()
    });
    assert_eq!(line.unwrap(), "late\n");
    assert_eq!(handle.commands(), vec!["freada.txt"]);
}

#[test]
fn test_lines_split_across_reads_resolve_in_order() {
    let (port, handle) = SimPort::silent();
    let session = Session::connect_with_config(port, quick()).unwrap();

    let reader = thread::scope(|scope| {
        let first = scope.spawn(|| session.read_line());
        thread::sleep(Duration::from_millis(50));
        let second = scope.spawn(|| session.read_line());
        thread::sleep(Duration::from_millis(50));

        handle.push(b"A1B2");
        handle.push(b"C3\r\nO");
        handle.push(b"K\r\n");
        (first.join().unwrap(), second.join().unwrap())
    });

    assert_eq!(reader.0.unwrap(), "A1B2C3\r\n");
    assert_eq!(reader.1.unwrap(), "OK\r\n");
}

#[test]
fn test_concurrent_commands_are_serialized() {
    let (port, handle, _) = rocc_device("00", "k", HashMap::new());
    let session = Session::connect_with_config(port, quick()).unwrap();

    thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| session.get_time()))
            .chain((0..4).map(|_| scope.spawn(|| session.send_raw("ping"))))
            .collect();
        let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        for (i, result) in results.iter().enumerate() {
            let expected = if i < 4 { "03/05/24-08:07:09" } else { "pong" };
            assert_eq!(result.as_deref().unwrap(), expected);
        }
    });
    assert_eq!(handle.commands().len(), 8);
    assert_eq!(handle.max_concurrent_reads(), 1);
}

#[test]
fn test_channel_end_fails_pending_request() {
    let (port, handle) = SimPort::silent();
    let session = Session::connect_with_config(port, quick()).unwrap();

    handle.end();
    thread::sleep(Duration::from_millis(100));
    assert!(matches!(session.read_line(), Err(Error::ChannelClosed)));
    assert!(!session.is_connected());
}

#[test]
fn test_disconnect_closes_port() {
    let (port, handle) = SimPort::silent();
    let session = Session::connect_with_config(port, quick()).unwrap();
    assert!(session.is_connected());
    assert!(session.is_line_mode());
    assert_eq!(session.name(), "sim");

    session.disconnect().unwrap();
    assert!(handle.commands().is_empty());
}
