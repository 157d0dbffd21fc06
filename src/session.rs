//! Transfer session: one connection, one archive, one response
//!
//! Steps must run in order:
//! connect -> send_header -> send_body -> signal_end_of_output -> receive_response -> close.
//! Any failure moves the session to `Failed` and drops the connection on the spot.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::{Error, Stage};
use crate::progress::ProgressObserver;
use crate::protocol::{TransferRequest, CHUNK_SIZE, RESPONSE_LIMIT};

/// Byte stream the session talks over.
pub trait Transport: Read + Write {
    /// Close the outbound direction only; reads keep working.
    fn shutdown_write(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn shutdown_write(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    HeaderSent,
    BodySent,
    ShutdownSent,
    ResponseReceived,
    Closed,
    Failed,
}

/// Optional socket timeouts. `None` blocks indefinitely.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectOptions {
    pub connect_timeout: Option<Duration>,
    pub io_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct BodyReport {
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub text: String,
    /// The read filled the whole buffer, so the server may have sent more
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub body: BodyReport,
    pub response: Response,
}

pub struct TransferSession<T: Transport = TcpStream> {
    stream: Option<T>,
    state: SessionState,
}

impl<T: Transport> TransferSession<T> {
    pub fn new() -> Self {
        Self {
            stream: None,
            state: SessionState::Disconnected,
        }
    }

    /// Use an already connected transport.
    pub fn attach(&mut self, stream: T) -> Result<(), Error> {
        self.require(SessionState::Disconnected, "attach a transport")?;
        self.stream = Some(stream);
        self.state = SessionState::Connected;
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn send_header(&mut self, request: &TransferRequest) -> Result<(), Error> {
        let header = request.encode_header();
        self.step("send header", SessionState::HeaderSent, |s| {
            s.write_all(&header)
                .map_err(|e| Error::transfer(Stage::Header, e))
        })
    }

    /// Stream exactly `expected_size` bytes of `artifact`, `CHUNK_SIZE` at a time.
    pub fn send_body(
        &mut self,
        artifact: &Path,
        expected_size: u64,
        progress: &mut dyn ProgressObserver,
    ) -> Result<BodyReport, Error> {
        self.step("send body", SessionState::BodySent, |s| {
            let report = pump_body(s, artifact, expected_size, progress)?;
            progress.finish();
            Ok(report)
        })
    }

    /// Half-close: tells the receiver no more bytes follow.
    pub fn signal_end_of_output(&mut self) -> Result<(), Error> {
        self.step("half-close", SessionState::ShutdownSent, |s| {
            s.flush()
                .and_then(|_| s.shutdown_write())
                .map_err(|e| Error::transfer(Stage::Shutdown, e))
        })
    }

    /// One bounded read of the server's status text.
    pub fn receive_response(&mut self) -> Result<Response, Error> {
        self.step("read response", SessionState::ResponseReceived, |s| {
            let mut buf = [0u8; RESPONSE_LIMIT];
            let n = loop {
                match s.read(&mut buf) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(Error::transfer(Stage::Response, e)),
                }
            };
            if n == 0 {
                return Err(Error::NoResponse);
            }
            Ok(Response {
                text: String::from_utf8_lossy(&buf[..n]).into_owned(),
                truncated: n == RESPONSE_LIMIT,
            })
        })
    }

    /// Header, body, half-close and response in one go.
    pub fn run(
        &mut self,
        request: &TransferRequest,
        artifact: &Path,
        progress: &mut dyn ProgressObserver,
    ) -> Result<SessionReport, Error> {
        self.send_header(request)?;
        let body = self.send_body(artifact, request.archive_size, progress)?;
        self.signal_end_of_output()?;
        let response = self.receive_response()?;
        Ok(SessionReport { body, response })
    }

    /// Release the connection. Safe to call in any state.
    pub fn close(&mut self) {
        self.stream = None;
        if self.state != SessionState::Failed {
            self.state = SessionState::Closed;
        }
    }

    fn require(&self, expected: SessionState, op: &'static str) -> Result<(), Error> {
        if self.state != expected {
            return Err(Error::InvalidState {
                op,
                state: self.state,
            });
        }
        Ok(())
    }

    fn step<R>(
        &mut self,
        op: &'static str,
        next: SessionState,
        f: impl FnOnce(&mut T) -> Result<R, Error>,
    ) -> Result<R, Error> {
        self.require(predecessor(next), op)?;
        let stream = self.stream.as_mut().ok_or(Error::InvalidState {
            op,
            state: self.state,
        })?;
        match f(stream) {
            Ok(r) => {
                self.state = next;
                Ok(r)
            }
            Err(e) => {
                self.state = SessionState::Failed;
                self.stream = None;
                Err(e)
            }
        }
    }
}

impl TransferSession<TcpStream> {
    /// Connect a fresh session to `endpoint`.
    pub fn open(endpoint: &Endpoint, opts: &ConnectOptions) -> Result<Self, Error> {
        let mut session = Self::new();
        session.connect(endpoint, opts)?;
        Ok(session)
    }

    pub fn connect(&mut self, endpoint: &Endpoint, opts: &ConnectOptions) -> Result<(), Error> {
        self.require(SessionState::Disconnected, "connect")?;
        match dial(endpoint, opts) {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(source) => {
                self.state = SessionState::Failed;
                Err(Error::Connection {
                    endpoint: endpoint.to_string(),
                    source,
                })
            }
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.peer_addr().ok())
    }
}

fn predecessor(next: SessionState) -> SessionState {
    match next {
        SessionState::HeaderSent => SessionState::Connected,
        SessionState::BodySent => SessionState::HeaderSent,
        SessionState::ShutdownSent => SessionState::BodySent,
        SessionState::ResponseReceived => SessionState::ShutdownSent,
        other => other,
    }
}

fn pump_body<W: Write>(
    out: &mut W,
    artifact: &Path,
    expected: u64,
    progress: &mut dyn ProgressObserver,
) -> Result<BodyReport, Error> {
    let read_err = |source| Error::Archive {
        path: artifact.to_path_buf(),
        source,
    };
    let file = File::open(artifact).map_err(read_err)?;
    // Never put more on the wire than the header announced
    let mut reader = file.take(expected);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut hasher = Sha256::new();
    let mut sent = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_err(e)),
        };
        out.write_all(&buf[..n])
            .map_err(|e| Error::transfer(Stage::Body, e))?;
        hasher.update(&buf[..n]);
        sent += n as u64;
        progress.on_progress(sent, expected);
    }
    drop(reader);

    if sent != expected {
        return Err(Error::SizeMismatch {
            declared: expected,
            sent,
        });
    }
    if sent == 0 {
        progress.on_progress(0, 0);
    }

    Ok(BodyReport {
        bytes: sent,
        sha256: format!("{:x}", hasher.finalize()),
    })
}

fn dial(endpoint: &Endpoint, opts: &ConnectOptions) -> io::Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()?
        .collect();
    let mut last_err = None;
    for addr in addrs {
        let res = match opts.connect_timeout {
            Some(t) => TcpStream::connect_timeout(&addr, t),
            None => TcpStream::connect(addr),
        };
        match res {
            Ok(stream) => {
                stream.set_read_timeout(opts.io_timeout)?;
                stream.set_write_timeout(opts.io_timeout)?;
                tune_socket(&stream);
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    }))
}

// Disable Nagle for the small header write and keep idle peers detectable
#[allow(unused_variables)]
fn tune_socket(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    #[cfg(unix)]
    {
        use std::os::fd::AsRawFd;
        let fd = stream.as_raw_fd();
        let keepalive: libc::c_int = 1;
        unsafe {
            let _ = libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_KEEPALIVE,
                &keepalive as *const _ as *const libc::c_void,
                std::mem::size_of_val(&keepalive) as libc::socklen_t,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::progress::RecordingProgress;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Write(Vec<u8>),
        ShutdownWrite,
        Dropped,
    }

    struct Recorder {
        events: Rc<RefCell<Vec<Event>>>,
        reply: Vec<u8>,
        fail_after: Option<usize>,
        written: usize,
        shut: bool,
    }

    impl Recorder {
        fn new(reply: &[u8]) -> (Self, Rc<RefCell<Vec<Event>>>) {
            let events = Rc::new(RefCell::new(Vec::new()));
            let r = Recorder {
                events: events.clone(),
                reply: reply.to_vec(),
                fail_after: None,
                written: 0,
                shut: false,
            };
            (r, events)
        }
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.shut {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            if let Some(limit) = self.fail_after {
                if self.written >= limit {
                    return Err(io::ErrorKind::ConnectionReset.into());
                }
            }
            self.written += buf.len();
            self.events.borrow_mut().push(Event::Write(buf.to_vec()));
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Read for Recorder {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.reply.len().min(buf.len());
            buf[..n].copy_from_slice(&self.reply[..n]);
            self.reply.drain(..n);
            Ok(n)
        }
    }

    impl Transport for Recorder {
        fn shutdown_write(&mut self) -> io::Result<()> {
            self.shut = true;
            self.events.borrow_mut().push(Event::ShutdownWrite);
            Ok(())
        }
    }

    impl Drop for Recorder {
        fn drop(&mut self) {
            self.events.borrow_mut().push(Event::Dropped);
        }
    }

    fn artifact(dir: &TempDir, len: usize) -> std::path::PathBuf {
        let p = dir.path().join("archive_0badf00d.tar");
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::write(&p, data).unwrap();
        p
    }

    fn attached(rec: Recorder) -> TransferSession<Recorder> {
        let mut s = TransferSession::new();
        s.attach(rec).unwrap();
        s
    }

    #[test]
    fn full_run_is_byte_exact_and_ordered() {
        let tmp = TempDir::new().unwrap();
        let path = artifact(&tmp, 10_000);
        let (rec, events) = Recorder::new(b"OK received");
        let mut session = attached(rec);
        let req = TransferRequest::new("archive_0badf00d.tar", 10_000).unwrap();
        let mut progress = RecordingProgress::default();

        let report = session.run(&req, &path, &mut progress).unwrap();
        assert_eq!(report.body.bytes, 10_000);
        assert_eq!(report.response.text, "OK received");
        assert!(!report.response.truncated);
        assert_eq!(session.state(), SessionState::ResponseReceived);
        session.close();
        assert_eq!(session.state(), SessionState::Closed);

        let events = events.borrow();
        assert_eq!(events[0], Event::Write(b"archive_0badf00d.tar\n10000\n".to_vec()));
        let shut_at = events
            .iter()
            .position(|e| *e == Event::ShutdownWrite)
            .unwrap();
        assert_eq!(
            events.iter().filter(|e| **e == Event::ShutdownWrite).count(),
            1
        );
        let body: Vec<u8> = events[1..shut_at]
            .iter()
            .flat_map(|e| match e {
                Event::Write(b) => {
                    assert!(b.len() <= CHUNK_SIZE);
                    b.clone()
                }
                other => panic!("unexpected event before half-close: {other:?}"),
            })
            .collect();
        assert_eq!(body, std::fs::read(&path).unwrap());
        // nothing written after the half-close
        assert_eq!(&events[shut_at + 1..], &[Event::Dropped]);
    }

    #[test]
    fn progress_is_monotonic_and_ends_at_total() {
        let tmp = TempDir::new().unwrap();
        let path = artifact(&tmp, 10_000);
        let (rec, _events) = Recorder::new(b"OK");
        let mut session = attached(rec);
        session
            .send_header(&TransferRequest::new("a.tar", 10_000).unwrap())
            .unwrap();
        let mut progress = RecordingProgress::default();
        session.send_body(&path, 10_000, &mut progress).unwrap();

        assert_eq!(progress.events, vec![(4096, 10_000), (8192, 10_000), (10_000, 10_000)]);
        assert!(progress.events.windows(2).all(|w| w[0].0 <= w[1].0));
        assert!(progress.finished);
    }

    #[test]
    fn out_of_order_calls_do_not_touch_transport() {
        let tmp = TempDir::new().unwrap();
        let path = artifact(&tmp, 10);
        let (rec, events) = Recorder::new(b"OK");
        let mut session = attached(rec);

        let err = session
            .send_body(&path, 10, &mut RecordingProgress::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                state: SessionState::Connected,
                ..
            }
        ));
        assert!(session.signal_end_of_output().is_err());
        assert!(session.receive_response().is_err());
        assert_eq!(session.state(), SessionState::Connected);
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn write_failure_fails_session_and_releases_connection() {
        let tmp = TempDir::new().unwrap();
        let path = artifact(&tmp, 20_000);
        let (mut rec, events) = Recorder::new(b"OK");
        rec.fail_after = Some(5000);
        let mut session = attached(rec);
        let req = TransferRequest::new("a.tar", 20_000).unwrap();

        let err = session
            .run(&req, &path, &mut RecordingProgress::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transfer {
                stage: Stage::Body,
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Transfer);
        assert_eq!(session.state(), SessionState::Failed);
        let events = events.borrow();
        assert!(!events.contains(&Event::ShutdownWrite));
        assert_eq!(events.last(), Some(&Event::Dropped));

        session.close();
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn short_artifact_is_a_size_mismatch() {
        let tmp = TempDir::new().unwrap();
        let path = artifact(&tmp, 100);
        let (rec, _events) = Recorder::new(b"OK");
        let mut session = attached(rec);
        session
            .send_header(&TransferRequest::new("a.tar", 150).unwrap())
            .unwrap();

        let err = session
            .send_body(&path, 150, &mut RecordingProgress::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SizeMismatch {
                declared: 150,
                sent: 100
            }
        ));
    }

    #[test]
    fn grown_artifact_sends_only_declared_bytes() {
        let tmp = TempDir::new().unwrap();
        let path = artifact(&tmp, 5000);
        let (rec, events) = Recorder::new(b"OK");
        let mut session = attached(rec);
        session
            .send_header(&TransferRequest::new("a.tar", 4500).unwrap())
            .unwrap();
        let report = session
            .send_body(&path, 4500, &mut RecordingProgress::default())
            .unwrap();
        assert_eq!(report.bytes, 4500);

        let body_len: usize = events.borrow()[1..]
            .iter()
            .map(|e| match e {
                Event::Write(b) => b.len(),
                _ => 0,
            })
            .sum();
        assert_eq!(body_len, 4500);
    }

    #[test]
    fn peer_close_without_reply_is_no_response() {
        let tmp = TempDir::new().unwrap();
        let path = artifact(&tmp, 10);
        let (rec, _events) = Recorder::new(b"");
        let mut session = attached(rec);
        let req = TransferRequest::new("a.tar", 10).unwrap();

        let err = session
            .run(&req, &path, &mut RecordingProgress::default())
            .unwrap_err();
        assert!(matches!(err, Error::NoResponse));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn long_reply_is_cut_at_limit_and_flagged() {
        let tmp = TempDir::new().unwrap();
        let path = artifact(&tmp, 10);
        let reply = vec![b'x'; RESPONSE_LIMIT + 200];
        let (rec, _events) = Recorder::new(&reply);
        let mut session = attached(rec);
        let req = TransferRequest::new("a.tar", 10).unwrap();

        let report = session
            .run(&req, &path, &mut RecordingProgress::default())
            .unwrap();
        assert_eq!(report.response.text.len(), RESPONSE_LIMIT);
        assert!(report.response.truncated);
    }

    #[test]
    fn body_checksum_matches_file() {
        let tmp = TempDir::new().unwrap();
        let path = artifact(&tmp, 9000);
        let (rec, _events) = Recorder::new(b"OK");
        let mut session = attached(rec);
        session
            .send_header(&TransferRequest::new("a.tar", 9000).unwrap())
            .unwrap();
        let report = session
            .send_body(&path, 9000, &mut RecordingProgress::default())
            .unwrap();
        let expected = format!("{:x}", Sha256::digest(std::fs::read(&path).unwrap()));
        assert_eq!(report.sha256, expected);
    }

    #[test]
    fn unreachable_server_is_connection_error() {
        // Bind then drop to get a port with no listener
        let port = {
            let sock = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            sock.local_addr().unwrap().port()
        };
        let ep = Endpoint::parse(&format!("127.0.0.1:{port}")).unwrap();
        let opts = ConnectOptions {
            connect_timeout: Some(Duration::from_secs(2)),
            io_timeout: None,
        };
        let mut session: TransferSession = TransferSession::new();
        let err = session.connect(&ep, &opts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.peer_addr().is_none());
    }
}
