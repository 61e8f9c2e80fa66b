//! Session unit tests.
//! - token correlation with interleaved notifications
//! - busy / terminated / desync / timeout failure paths

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::*;
use crate::protocol::{ResultClass, StreamKind, StreamRecord};
use crate::test_support::fake_session;

fn collect_events(session: &MiSession) -> Arc<Mutex<Vec<SessionEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    session.subscribe(move |event| sink.lock().push(event.clone()));
    events
}

fn out_of_band_classes(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::OutOfBand(record) => Some(record.class().to_string()),
            _ => None,
        })
        .collect()
}

#[test]
fn send_resolves_matching_reply_across_interleaved_notifications() {
    let (session, mut debugger) = fake_session(None);
    let session = Arc::new(session);
    let events = collect_events(&session);

    let caller = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.send("-data-evaluate-expression x"))
    };
    let (token, command) = debugger.next_command();
    assert_eq!(token, 1);
    assert_eq!(command, "-data-evaluate-expression x");

    debugger.emit(r#"=thread-group-added,id="i1""#);
    debugger.emit(r#"~"console text\n""#);
    debugger.emit(r#"*running,thread-id="all""#);
    debugger.emit("(gdb) ");
    debugger.emit(r#"1^done,value="42""#);

    let reply = caller.join().unwrap().unwrap();
    assert_eq!(reply.token, Some(1));
    assert_eq!(reply.class, ResultClass::Done);
    assert_eq!(reply.get_str("value"), Some("42"));

    let events = events.lock();
    assert_eq!(
        out_of_band_classes(&events),
        vec!["thread-group-added", "console", "running"]
    );
    assert!(events.contains(&SessionEvent::OutOfBand(OutOfBandRecord::Stream(
        StreamRecord {
            kind: StreamKind::Console,
            text: "console text\n".to_string(),
        }
    ))));
    assert_eq!(events.len(), 3);
}

#[test]
fn tokens_increase_monotonically() {
    let (session, mut debugger) = fake_session(None);
    let session = Arc::new(session);
    for expected in 1..=3 {
        let caller = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.send("-gdb-version"))
        };
        let (token, _) = debugger.next_command();
        assert_eq!(token, expected);
        debugger.emit(&format!("{token}^done"));
        assert_eq!(caller.join().unwrap().unwrap().token, Some(expected));
    }
}

#[test]
fn second_send_while_in_flight_is_busy() {
    let (session, mut debugger) = fake_session(None);
    let session = Arc::new(session);
    let caller = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.send("-exec-continue"))
    };
    let (token, _) = debugger.next_command();

    assert_eq!(session.send("-gdb-version"), Err(MiError::ProtocolBusy));

    debugger.emit(&format!("{token}^running"));
    let reply = caller.join().unwrap().unwrap();
    assert_eq!(reply.class, ResultClass::Running);
}

#[test]
fn transport_close_fails_outstanding_and_future_sends() {
    let (session, mut debugger) = fake_session(None);
    let session = Arc::new(session);
    let events = collect_events(&session);
    let caller = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.send("-exec-run"))
    };
    debugger.next_command();
    debugger.hang_up();

    assert_eq!(caller.join().unwrap(), Err(MiError::SessionTerminated));
    assert!(session.is_terminated());
    assert_eq!(session.send("-gdb-version"), Err(MiError::SessionTerminated));
    session.close();
    assert_eq!(
        events
            .lock()
            .iter()
            .filter(|event| **event == SessionEvent::Terminated)
            .count(),
        1
    );
}

#[test]
fn malformed_line_is_reported_without_breaking_correlation() {
    let (session, mut debugger) = fake_session(None);
    let session = Arc::new(session);
    let events = collect_events(&session);
    let caller = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.send("-stack-info-depth"))
    };
    let (token, _) = debugger.next_command();
    debugger.emit(r#"=broken,value={"#);
    debugger.emit(&format!(r#"{token}^done,depth="3""#));

    let reply = caller.join().unwrap().unwrap();
    assert_eq!(reply.get_str("depth"), Some("3"));
    let events = events.lock();
    assert!(matches!(
        events.as_slice(),
        [SessionEvent::Diagnostic {
            error: MiError::MalformedProtocol { .. },
            ..
        }]
    ));
}

#[test]
fn unparseable_reply_for_in_flight_token_is_desync() {
    let (session, mut debugger) = fake_session(None);
    let session = Arc::new(session);
    let caller = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.send("-var-create - * x"))
    };
    let (token, _) = debugger.next_command();
    debugger.emit(&format!(r#"{token}^done,name="var1"#));

    assert_eq!(
        caller.join().unwrap(),
        Err(MiError::ProtocolDesync { token })
    );

    let caller = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.send("-gdb-version"))
    };
    let (next, _) = debugger.next_command();
    assert_eq!(next, token + 1);
    debugger.emit(&format!("{next}^done"));
    assert!(caller.join().unwrap().is_ok());
}

#[test]
fn timed_out_reply_is_discarded_not_misrouted() {
    let (session, mut debugger) = fake_session(Some(Duration::from_millis(50)));
    let session = Arc::new(session);
    let events = collect_events(&session);

    let caller = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.send("-target-select remote :5039"))
    };
    let (late, _) = debugger.next_command();
    assert_eq!(
        caller.join().unwrap(),
        Err(MiError::Timeout(Duration::from_millis(50)))
    );

    let caller = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.send("-gdb-version"))
    };
    let (token, _) = debugger.next_command();
    debugger.emit(&format!(r#"{late}^connected,addr="0x1""#));
    debugger.emit(&format!("{token}^done"));

    let reply = caller.join().unwrap().unwrap();
    assert_eq!(reply.token, Some(token));
    assert_eq!(reply.class, ResultClass::Done);
    assert!(events.lock().is_empty());
}

#[test]
fn unmatched_results_go_to_subscribers() {
    let (session, mut debugger) = fake_session(None);
    let session = Arc::new(session);
    let events = collect_events(&session);
    let caller = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.send("-gdb-version"))
    };
    let (token, _) = debugger.next_command();
    debugger.emit("^done,untokened=\"1\"");
    debugger.emit("999^done");
    debugger.emit(&format!("{token}^done"));
    caller.join().unwrap().unwrap();

    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|event| matches!(event, SessionEvent::UnmatchedResult(_))));
}

#[test]
fn subscribers_receive_in_registration_order_until_unsubscribed() {
    let (session, mut debugger) = fake_session(None);
    let session = Arc::new(session);
    let order = Arc::new(Mutex::new(Vec::new()));
    let first = {
        let order = Arc::clone(&order);
        session.subscribe(move |_| order.lock().push("first"))
    };
    {
        let order = Arc::clone(&order);
        session.subscribe(move |_| order.lock().push("second"));
    }

    let run = |debugger: &mut crate::test_support::FakeDebugger| {
        let caller = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.send("-gdb-version"))
        };
        let (token, _) = debugger.next_command();
        debugger.emit(r#"=library-loaded,id="libc.so""#);
        debugger.emit(&format!("{token}^done"));
        caller.join().unwrap().unwrap();
    };

    run(&mut debugger);
    assert_eq!(*order.lock(), vec!["first", "second"]);

    assert!(session.unsubscribe(first));
    assert!(!session.unsubscribe(first));
    run(&mut debugger);
    assert_eq!(*order.lock(), vec!["first", "second", "second"]);
}

#[test]
fn error_reply_is_returned_as_record() {
    let (session, mut debugger) = fake_session(None);
    let session = Arc::new(session);
    let caller = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.send_raw("-bogus"))
    };
    let (token, _) = debugger.next_command();
    debugger.emit(&format!(
        r#"{token}^error,msg="Undefined MI command: bogus",code="undefined-command""#
    ));
    let reply = caller.join().unwrap().unwrap();
    assert!(reply.is_error());
    assert_eq!(reply.error_message(), Some("Undefined MI command: bogus"));
}

#[test]
fn close_terminates_and_joins_reader() {
    let (session, debugger) = fake_session(None);
    let events = collect_events(&session);
    drop(debugger);
    session.close();
    assert!(session.is_terminated());
    assert_eq!(session.send("-gdb-version"), Err(MiError::SessionTerminated));
    assert_eq!(*events.lock(), vec![SessionEvent::Terminated]);
}

#[test]
fn subscriber_may_close_the_session() {
    let (session, mut debugger) = fake_session(None);
    let session = Arc::new(session);
    let events = collect_events(&session);
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let weak = Arc::downgrade(&session);
    session.subscribe(move |event| {
        let SessionEvent::OutOfBand(record) = event else {
            return;
        };
        if record.exec("stopped").is_some() {
            if let Some(session) = weak.upgrade() {
                session.close();
            }
            let _ = done_tx.send(());
        }
    });

    debugger.emit(r#"*stopped,reason="exited-normally""#);
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(session.is_terminated());
    assert_eq!(session.send("-gdb-version"), Err(MiError::SessionTerminated));

    debugger.hang_up();
    session.close();
    let events = events.lock();
    assert_eq!(out_of_band_classes(&events), vec!["stopped"]);
    assert_eq!(events.last(), Some(&SessionEvent::Terminated));
    assert_eq!(events.len(), 2);
}
