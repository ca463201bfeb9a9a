use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Barrier, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use http::header::{HeaderValue, USER_AGENT};
use http::{Method, StatusCode};

use crate::blocking_client::HostClient;
use crate::error::{HostCopyError, IoPhase};
use crate::pool::{ConnectionPool, PooledConnection, Transport};
use crate::request::Request;
use crate::response::Response;
use crate::util::lock_unpoisoned;

enum Script {
    Respond(Vec<u8>),
    FailWrite(io::ErrorKind),
    FailRead(io::ErrorKind),
    FailReadDeadline,
    FailAcquire,
}

struct ScriptedTransport {
    input: Cursor<Vec<u8>>,
    written: Vec<u8>,
    fail_write: Option<io::ErrorKind>,
    fail_read: Option<io::ErrorKind>,
    fail_read_deadline: bool,
}

impl ScriptedTransport {
    fn new(input: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(input),
            written: Vec::new(),
            fail_write: None,
            fail_read: None,
            fail_read_deadline: false,
        }
    }
}

impl Read for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(kind) = self.fail_read {
            return Err(io::Error::from(kind));
        }
        self.input.read(buf)
    }
}

impl Write for ScriptedTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(kind) = self.fail_write {
            return Err(io::Error::from(kind));
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for ScriptedTransport {
    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        if self.fail_read_deadline {
            return Err(io::Error::other("deadline not supported"));
        }
        Ok(())
    }

    fn set_write_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

/// Parks every `acquire` until the test has looked at the client.
struct Gate {
    entered: Barrier,
    proceed: Barrier,
}

impl Gate {
    fn new(parties: usize) -> Self {
        Self {
            entered: Barrier::new(parties),
            proceed: Barrier::new(parties),
        }
    }
}

#[derive(Default)]
struct ScriptedPool {
    script: Mutex<VecDeque<Script>>,
    gate: Option<Gate>,
    connection_created_at: Option<Instant>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    closed: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

impl ScriptedPool {
    fn new(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<String> {
        lock_unpoisoned(&self.requests).clone()
    }

    fn record(&self, connection: PooledConnection<ScriptedTransport>) {
        let written = connection.into_transport().written;
        lock_unpoisoned(&self.requests).push(String::from_utf8_lossy(&written).into_owned());
    }
}

impl ConnectionPool for ScriptedPool {
    type Transport = ScriptedTransport;

    fn acquire(
        &self,
        _timeout: Option<Duration>,
    ) -> io::Result<PooledConnection<ScriptedTransport>> {
        if let Some(gate) = &self.gate {
            gate.entered.wait();
            gate.proceed.wait();
        }
        let step = lock_unpoisoned(&self.script)
            .pop_front()
            .ok_or_else(|| io::Error::other("script exhausted"))?;
        let transport = match step {
            Script::FailAcquire => return Err(io::Error::from(io::ErrorKind::TimedOut)),
            Script::Respond(input) => ScriptedTransport::new(input),
            Script::FailWrite(kind) => ScriptedTransport {
                fail_write: Some(kind),
                ..ScriptedTransport::new(Vec::new())
            },
            Script::FailRead(kind) => ScriptedTransport {
                fail_read: Some(kind),
                ..ScriptedTransport::new(Vec::new())
            },
            Script::FailReadDeadline => ScriptedTransport {
                fail_read_deadline: true,
                ..ScriptedTransport::new(Vec::new())
            },
        };
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let created_at = self.connection_created_at.unwrap_or_else(Instant::now);
        Ok(PooledConnection::with_created_at(transport, created_at))
    }

    fn release(&self, connection: PooledConnection<ScriptedTransport>) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.record(connection);
    }

    fn close(&self, connection: PooledConnection<ScriptedTransport>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.record(connection);
    }
}

fn respond(head: &str, body: &str) -> Script {
    Script::Respond(format!("{head}\r\n\r\n{body}").into_bytes())
}

fn ok(body: &str) -> Script {
    respond(
        &format!("HTTP/1.1 200 OK\r\nContent-Length: {}", body.len()),
        body,
    )
}

fn peer_closed() -> Script {
    Script::Respond(Vec::new())
}

fn client(script: Vec<Script>) -> HostClient<ScriptedPool> {
    HostClient::builder(ScriptedPool::new(script))
        .max_attempts(3)
        .read_timeout(Duration::from_secs(1))
        .write_timeout(Duration::from_secs(1))
        .build()
}

fn request(method: Method) -> Request {
    Request::new(method, "http://example.com/items".parse().expect("uri"))
}

#[test]
fn fixed_length_body_streams_into_sink_and_connection_is_reused() {
    let client = client(vec![ok("hello")]);
    let mut response = Response::new();
    let mut sink = Vec::new();

    client
        .do_copy(&mut request(Method::GET), Some(&mut response), &mut sink)
        .expect("call should succeed");

    assert_eq!(sink, b"hello");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body_length(), 5);
    assert_eq!(client.pool().released(), 1);
    assert_eq!(client.pool().closed(), 0);
}

#[test]
fn chunked_body_reports_payload_length() {
    let client = client(vec![respond(
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked",
        "3\r\nfoo\r\n0\r\n\r\n",
    )]);
    let mut sink = Vec::new();

    let response = client
        .copy(request(Method::GET), &mut sink)
        .expect("call should succeed");

    assert_eq!(sink, b"foo");
    assert_eq!(response.body_length(), 3);
    assert_eq!(client.pool().released(), 1);
}

#[test]
fn protocol_errors_are_retried_and_partial_bytes_are_not_rewound() {
    let broken = || {
        respond(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked",
            "3\r\nfooX 0\r\n\r\n",
        )
    };
    let client = client(vec![broken(), broken(), broken()]);
    let mut response = Response::new();
    let mut sink = Vec::new();

    let error = client
        .do_copy(&mut request(Method::GET), Some(&mut response), &mut sink)
        .expect_err("every attempt is malformed");

    assert!(matches!(error, HostCopyError::ChunkTerminator));
    assert_eq!(client.pool().acquired(), 3);
    assert_eq!(client.pool().closed(), 3);
    assert_eq!(sink, b"foofoofoo");
    assert_eq!(response.body_length(), 3);
}

#[test]
fn head_request_skips_body_transport() {
    let client = client(vec![respond(
        "HTTP/1.1 200 OK\r\nContent-Length: 5",
        "",
    )]);
    let mut response = Response::new();
    let mut sink = Vec::new();

    client
        .do_copy(&mut request(Method::HEAD), Some(&mut response), &mut sink)
        .expect("call should succeed");

    assert!(sink.is_empty());
    assert_eq!(response.body_length(), 0);
    assert!(!response.skip_body());
    assert_eq!(client.pool().released(), 1);
}

#[test]
fn response_reused_after_head_still_receives_the_body() {
    let client = client(vec![
        respond("HTTP/1.1 200 OK\r\nContent-Length: 5", ""),
        ok("hello"),
    ]);
    let mut response = Response::new();

    client
        .do_copy(&mut request(Method::HEAD), Some(&mut response), &mut Vec::new())
        .expect("head call");
    let mut sink = Vec::new();
    client
        .do_copy(&mut request(Method::GET), Some(&mut response), &mut sink)
        .expect("get call");

    assert_eq!(sink, b"hello");
    assert_eq!(response.body_length(), 5);
    assert!(!response.skip_body());
    assert_eq!(client.pool().released(), 2);
    assert_eq!(client.pool().closed(), 0);
}

#[test]
fn headers_only_response_skips_body_and_discards_connection() {
    let client = client(vec![ok("hello")]);
    let mut response = Response::headers_only();
    let mut sink = Vec::new();

    client
        .do_copy(&mut request(Method::GET), Some(&mut response), &mut sink)
        .expect("call should succeed");

    assert!(sink.is_empty());
    assert_eq!(response.body_length(), 0);
    assert_eq!(response.headers()["content-length"], "5");
    assert!(response.skip_body());
    assert_eq!(client.pool().released(), 0);
    assert_eq!(client.pool().closed(), 1);
}

#[test]
fn no_content_status_never_reads_a_body() {
    let client = client(vec![respond("HTTP/1.1 204 No Content", "")]);
    let mut response = Response::new();

    client
        .do_copy(&mut request(Method::DELETE), Some(&mut response), &mut Vec::new())
        .expect("call should succeed");

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(client.pool().released(), 1);
}

#[test]
fn idempotent_write_failures_are_retried_up_to_max_attempts() {
    let client = client(vec![
        Script::FailWrite(io::ErrorKind::BrokenPipe),
        Script::FailWrite(io::ErrorKind::BrokenPipe),
        Script::FailWrite(io::ErrorKind::BrokenPipe),
        ok("never reached"),
    ]);

    let error = client
        .do_copy(&mut request(Method::GET), None, &mut Vec::new())
        .expect_err("all attempts fail");

    assert!(matches!(error, HostCopyError::WriteRequest { .. }));
    assert_eq!(client.pool().acquired(), 3);
    assert_eq!(client.pool().closed(), 3);
    assert_eq!(client.metrics_snapshot().retries, 2);
}

#[test]
fn idempotent_write_failure_then_success() {
    let client = client(vec![
        Script::FailWrite(io::ErrorKind::ConnectionReset),
        ok("done"),
    ]);
    let mut sink = Vec::new();

    client
        .do_copy(&mut request(Method::PUT), None, &mut sink)
        .expect("second attempt succeeds");

    assert_eq!(sink, b"done");
    assert_eq!(client.pool().acquired(), 2);
}

#[test]
fn non_idempotent_write_failure_is_final() {
    let client = client(vec![
        Script::FailWrite(io::ErrorKind::BrokenPipe),
        ok("never reached"),
    ]);

    let error = client
        .do_copy(&mut request(Method::POST), None, &mut Vec::new())
        .expect_err("post is not retried");

    assert!(matches!(error, HostCopyError::WriteRequest { .. }));
    assert_eq!(client.pool().acquired(), 1);
}

#[test]
fn non_idempotent_reset_during_header_read_is_final() {
    let client = client(vec![
        Script::FailRead(io::ErrorKind::ConnectionReset),
        ok("never reached"),
    ]);

    let error = client
        .do_copy(&mut request(Method::POST), None, &mut Vec::new())
        .expect_err("post is not retried");

    assert!(matches!(error, HostCopyError::ReadHeader { .. }));
    assert!(!error.is_peer_closed());
    assert_eq!(client.pool().acquired(), 1);
}

#[test]
fn transport_eof_during_header_read_is_not_a_peer_close() {
    let client = client(vec![
        Script::FailRead(io::ErrorKind::UnexpectedEof),
        ok("never reached"),
    ]);

    let error = client
        .do_copy(&mut request(Method::POST), None, &mut Vec::new())
        .expect_err("post is not retried");

    assert!(matches!(error, HostCopyError::ReadHeader { .. }));
    assert!(!error.is_peer_closed());
    assert_eq!(client.pool().acquired(), 1);
}

#[test]
fn non_idempotent_request_is_retried_when_peer_closed_without_response() {
    let client = client(vec![peer_closed(), ok("created")]);
    let mut sink = Vec::new();

    client
        .do_copy(&mut request(Method::POST), None, &mut sink)
        .expect("second attempt succeeds");

    assert_eq!(sink, b"created");
    assert_eq!(client.pool().acquired(), 2);
    assert_eq!(client.pool().closed(), 1);
    assert_eq!(client.pool().released(), 1);
}

#[test]
fn exhausted_peer_closed_attempts_become_connection_closed() {
    let client = client(vec![peer_closed(), peer_closed(), peer_closed()]);

    let error = client
        .do_copy(&mut request(Method::POST), None, &mut Vec::new())
        .expect_err("server keeps hanging up");

    assert!(matches!(error, HostCopyError::ConnectionClosed));
    assert_eq!(client.pool().acquired(), 3);
}

#[test]
fn streamed_body_is_never_retried() {
    let client = client(vec![peer_closed(), ok("never reached")]);
    let mut upload = Request::new(Method::PUT, "http://example.com/upload".parse().expect("uri"))
        .body_stream(Cursor::new(b"payload".to_vec()));

    let error = client
        .do_copy(&mut upload, None, &mut Vec::new())
        .expect_err("stream cannot be replayed");

    assert!(matches!(error, HostCopyError::ConnectionClosed));
    assert_eq!(client.pool().acquired(), 1);
    assert!(client.pool().requests()[0].contains("Transfer-Encoding: chunked\r\n"));
}

#[test]
fn body_too_large_is_never_retried() {
    let client = HostClient::builder(ScriptedPool::new(vec![
        ok("hello"),
        ok("hello"),
    ]))
    .max_attempts(3)
    .max_response_body_bytes(3)
    .build();

    let error = client
        .do_copy(&mut request(Method::GET), None, &mut Vec::new())
        .expect_err("body exceeds limit");

    assert!(matches!(error, HostCopyError::BodyTooLarge { limit_bytes: 3 }));
    assert_eq!(client.pool().acquired(), 1);
    assert_eq!(client.pool().closed(), 1);
}

#[test]
fn scheme_mismatch_fails_before_acquiring_a_connection() {
    let client = HostClient::builder(ScriptedPool::new(vec![ok("never reached")]))
        .tls(true)
        .build();

    let error = client
        .do_copy(&mut request(Method::GET), None, &mut Vec::new())
        .expect_err("http request on tls client");

    assert!(matches!(error, HostCopyError::SchemeMismatch { .. }));
    assert_eq!(client.pool().acquired(), 0);
    assert_eq!(client.pending_requests(), 0);
}

#[test]
fn acquire_failure_is_retried_for_idempotent_requests() {
    let client = client(vec![Script::FailAcquire, ok("ok")]);

    client
        .do_copy(&mut request(Method::GET), None, &mut Vec::new())
        .expect("second attempt succeeds");

    assert_eq!(client.pool().acquired(), 1);
    assert_eq!(client.metrics_snapshot().retries, 1);
}

#[test]
fn read_deadline_failure_closes_connection_and_retries() {
    let client = client(vec![Script::FailReadDeadline, ok("ok")]);

    client
        .do_copy(&mut request(Method::GET), None, &mut Vec::new())
        .expect("second attempt succeeds");

    assert_eq!(client.pool().closed(), 1);
    assert_eq!(client.pool().released(), 1);
}

#[test]
fn read_deadline_failure_reports_read_phase() {
    let client = HostClient::builder(ScriptedPool::new(vec![Script::FailReadDeadline]))
        .max_attempts(1)
        .read_timeout(Duration::from_secs(1))
        .build();

    let error = client
        .do_copy(&mut request(Method::GET), None, &mut Vec::new())
        .expect_err("deadline cannot be set");

    assert!(matches!(
        error,
        HostCopyError::Deadline {
            phase: IoPhase::Read,
            ..
        }
    ));
}

#[test]
fn custom_retry_predicate_overrides_idempotency() {
    let client = HostClient::builder(ScriptedPool::new(vec![
        Script::FailWrite(io::ErrorKind::BrokenPipe),
        ok("ok"),
    ]))
    .retry_if(|request: &Request| request.method() == Method::POST)
    .build();

    client
        .do_copy(&mut request(Method::POST), None, &mut Vec::new())
        .expect("post retried by custom predicate");
    assert_eq!(client.pool().acquired(), 2);
}

#[test]
fn old_connections_are_rotated_without_mutating_the_request() {
    let pool = ScriptedPool {
        connection_created_at: Instant::now().checked_sub(Duration::from_secs(60)),
        ..ScriptedPool::new(vec![ok("ok")])
    };
    let client = HostClient::builder(pool)
        .max_conn_duration(Duration::from_secs(1))
        .build();
    let mut get = request(Method::GET);

    client
        .do_copy(&mut get, None, &mut Vec::new())
        .expect("call should succeed");

    assert!(!get.connection_close());
    assert!(client.pool().requests()[0].contains("Connection: close\r\n"));
    assert_eq!(client.pool().closed(), 1);
    assert_eq!(client.pool().released(), 0);
}

#[test]
fn forced_close_is_reverted_when_the_write_fails() {
    let pool = ScriptedPool {
        connection_created_at: Instant::now().checked_sub(Duration::from_secs(60)),
        ..ScriptedPool::new(vec![Script::FailWrite(io::ErrorKind::BrokenPipe)])
    };
    let client = HostClient::builder(pool)
        .max_conn_duration(Duration::from_secs(1))
        .max_attempts(1)
        .build();
    let mut get = request(Method::GET);

    client
        .do_copy(&mut get, None, &mut Vec::new())
        .expect_err("write fails");
    assert!(!get.connection_close());
}

#[test]
fn default_user_agent_is_injected_only_when_missing() {
    let client = HostClient::builder(ScriptedPool::new(vec![ok("a"), ok("b")]))
        .client_name("probe/2.0")
        .build();

    client
        .do_copy(&mut request(Method::GET), None, &mut Vec::new())
        .expect("first call");
    let mut custom = request(Method::GET).header(USER_AGENT, HeaderValue::from_static("mine/1.0"));
    client
        .do_copy(&mut custom, None, &mut Vec::new())
        .expect("second call");

    let requests = client.pool().requests();
    assert!(requests[0].contains("User-Agent: probe/2.0\r\n"));
    assert!(requests[1].contains("User-Agent: mine/1.0\r\n"));
    assert!(!requests[1].contains("probe/2.0"));
}

#[test]
fn continue_response_is_followed_by_the_real_header() {
    let client = client(vec![Script::Respond(
        b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok"
            .to_vec(),
    )]);
    let mut response = Response::new();
    let mut sink = Vec::new();

    client
        .do_copy(&mut request(Method::POST), Some(&mut response), &mut sink)
        .expect("call should succeed");

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(sink, b"ok");
}

#[test]
fn server_connection_close_discards_connection() {
    let client = client(vec![respond(
        "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close",
        "ok",
    )]);

    client
        .do_copy(&mut request(Method::GET), None, &mut Vec::new())
        .expect("call should succeed");

    assert_eq!(client.pool().closed(), 1);
    assert_eq!(client.pool().released(), 0);
}

#[test]
fn close_delimited_body_reads_to_eof_and_discards_connection() {
    let client = client(vec![respond("HTTP/1.1 200 OK", "all of it")]);
    let mut response = Response::new();
    let mut sink = Vec::new();

    client
        .do_copy(&mut request(Method::GET), Some(&mut response), &mut sink)
        .expect("call should succeed");

    assert_eq!(sink, b"all of it");
    assert_eq!(response.body_length(), 9);
    assert_eq!(client.pool().closed(), 1);
}

#[test]
fn response_is_reset_between_attempts() {
    let client = client(vec![
        respond("HTTP/1.1 200 OK\r\nContent-Length: 10\r\nX-First: 1", "short"),
        respond("HTTP/1.1 202 Accepted\r\nContent-Length: 2", "ok"),
    ]);
    let mut response = Response::new();

    client
        .do_copy(&mut request(Method::GET), Some(&mut response), &mut Vec::new())
        .expect("second attempt succeeds");

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(response.headers().get("x-first").is_none());
    assert_eq!(response.body_length(), 2);
}

#[test]
fn metrics_track_pending_and_outcomes() {
    let client = client(vec![ok("a"), Script::FailWrite(io::ErrorKind::BrokenPipe)]);

    client
        .do_copy(&mut request(Method::GET), None, &mut Vec::new())
        .expect("first call");
    client
        .do_copy(&mut request(Method::POST), None, &mut Vec::new())
        .expect_err("second call");

    let snapshot = client.metrics_snapshot();
    assert_eq!(snapshot.pending, 0);
    assert_eq!(snapshot.requests_started, 2);
    assert_eq!(snapshot.requests_succeeded, 1);
    assert_eq!(snapshot.requests_failed, 1);
    assert_eq!(snapshot.connections_released, 1);
    assert_eq!(snapshot.connections_closed, 1);
}

#[test]
fn last_use_time_advances_with_calls() {
    let client = client(vec![ok("a")]);
    let before = client.last_use_time();
    std::thread::sleep(Duration::from_millis(5));

    client
        .do_copy(&mut request(Method::GET), None, &mut Vec::new())
        .expect("call should succeed");

    assert!(client.last_use_time() > before);
}

#[test]
fn pending_requests_counts_calls_in_flight() {
    const CALLERS: usize = 2;
    let pool = ScriptedPool {
        gate: Some(Gate::new(CALLERS + 1)),
        ..ScriptedPool::new(vec![ok("a"), ok("b")])
    };
    let client = HostClient::builder(pool).build();
    let gate = client.pool().gate.as_ref().expect("gate");
    let shared = &client;

    std::thread::scope(|scope| {
        let callers: Vec<_> = (0..CALLERS)
            .map(|_| {
                scope.spawn(move || {
                    shared.do_copy(&mut request(Method::GET), None, &mut Vec::new())
                })
            })
            .collect();

        gate.entered.wait();
        assert_eq!(client.pending_requests(), CALLERS as u64);
        gate.proceed.wait();

        for caller in callers {
            caller
                .join()
                .expect("caller thread")
                .expect("call should succeed");
        }
    });

    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.metrics_snapshot().requests_succeeded, CALLERS as u64);
}

#[test]
fn pending_requests_drops_when_a_call_fails() {
    let pool = ScriptedPool {
        gate: Some(Gate::new(2)),
        ..ScriptedPool::new(vec![Script::FailAcquire])
    };
    let client = HostClient::builder(pool).max_attempts(1).build();
    let gate = client.pool().gate.as_ref().expect("gate");
    let shared = &client;

    std::thread::scope(|scope| {
        let caller = scope
            .spawn(move || shared.do_copy(&mut request(Method::GET), None, &mut Vec::new()));

        gate.entered.wait();
        assert_eq!(client.pending_requests(), 1);
        gate.proceed.wait();

        let error = caller
            .join()
            .expect("caller thread")
            .expect_err("acquire fails");
        assert!(matches!(error, HostCopyError::Acquire { .. }));
    });

    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.metrics_snapshot().requests_failed, 1);
}
