use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use warden_core::StreamKind;

use crate::error::CaptureError;
use crate::logs::LogStore;

/// `stream` is `None` for notices from the supervisor itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
	pub server: String,
	pub stream: Option<StreamKind>,
	pub line: String,
}

impl OutputEvent {
	pub fn notice(server: &str, line: impl Into<String>) -> Self {
		Self {
			server: server.to_string(),
			stream: None,
			line: line.into(),
		}
	}
}

pub type EventSender = mpsc::UnboundedSender<OutputEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<OutputEvent>;

#[derive(Clone)]
pub struct OutputCapture {
	server: String,
	stream: StreamKind,
	logs: Arc<LogStore>,
	events: EventSender,
}

impl OutputCapture {
	pub fn new(server: &str, stream: StreamKind, logs: Arc<LogStore>, events: EventSender) -> Self {
		Self {
			server: server.to_string(),
			stream,
			logs,
			events,
		}
	}

	pub fn spawn<R>(self, reader: R) -> JoinHandle<()>
	where
		R: AsyncRead + Unpin + Send + 'static,
	{
		tokio::spawn(self.run(reader))
	}

	/// A read error ends the capture after one diagnostic line.
	pub async fn run<R: AsyncRead + Unpin>(self, reader: R) {
		if let Err(e) = self.pipe(reader).await {
			tracing::warn!("{}", e);
			let _ = self.events.send(OutputEvent::notice(&self.server, e.to_string()));
		}
	}

	async fn pipe<R: AsyncRead + Unpin>(&self, reader: R) -> Result<(), CaptureError> {
		let mut reader = BufReader::new(reader);
		let mut buf = Vec::with_capacity(256);
		loop {
			buf.clear();
			let n = reader
				.read_until(b'\n', &mut buf)
				.await
				.map_err(|source| CaptureError::StreamRead {
					server: self.server.clone(),
					stream: self.stream,
					source,
				})?;
			if n == 0 {
				return Ok(());
			}
			self.forward(decode_line(&buf)).await;
		}
	}

	async fn forward(&self, line: String) {
		self.logs.append(&self.server, self.stream, line.clone()).await;
		let _ = self.events.send(OutputEvent {
			server: self.server.clone(),
			stream: Some(self.stream),
			line,
		});
	}
}

fn decode_line(buf: &[u8]) -> String {
	let mut end = buf.len();
	while end > 0 && matches!(buf[end - 1], b'\n' | b'\r') {
		end -= 1;
	}
	String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io;
	use std::pin::Pin;
	use std::task::{Context, Poll};
	use tokio::io::ReadBuf;
	use warden_core::ServerTable;

	fn setup() -> (Arc<LogStore>, EventSender, EventReceiver) {
		let logs = Arc::new(LogStore::new(&ServerTable::new([("Map Server", "xi_map")]), None, 0));
		let (tx, rx) = mpsc::unbounded_channel();
		(logs, tx, rx)
	}

	fn drain(rx: &mut EventReceiver) -> Vec<OutputEvent> {
		let mut events = Vec::new();
		while let Ok(event) = rx.try_recv() {
			events.push(event);
		}
		events
	}

	struct FailingReader {
		served: bool,
	}

	impl AsyncRead for FailingReader {
		fn poll_read(
			mut self: Pin<&mut Self>,
			_cx: &mut Context<'_>,
			buf: &mut ReadBuf<'_>,
		) -> Poll<io::Result<()>> {
			if !self.served {
				self.served = true;
				buf.put_slice(b"partial\n");
				return Poll::Ready(Ok(()));
			}
			Poll::Ready(Err(io::Error::other("pipe broke")))
		}
	}

	#[test]
	fn decode_trims_line_endings() {
		assert_eq!(decode_line(b"hello\r\n"), "hello");
		assert_eq!(decode_line(b"hello\n"), "hello");
		assert_eq!(decode_line(b"tail"), "tail");
		assert_eq!(decode_line(b"\xffok\n"), "\u{fffd}ok");
	}

	#[tokio::test]
	async fn forwards_lines_in_order() {
		let (logs, tx, mut rx) = setup();
		let capture = OutputCapture::new("Map Server", StreamKind::Stderr, logs.clone(), tx);

		capture.run(&b"first\nsecond\r\nlast"[..]).await;

		let events = drain(&mut rx);
		let lines: Vec<_> = events.iter().map(|e| e.line.as_str()).collect();
		assert_eq!(lines, vec!["first", "second", "last"]);
		assert!(events.iter().all(|e| e.stream == Some(StreamKind::Stderr)));
		assert!(events.iter().all(|e| e.server == "Map Server"));

		let buffer = logs.snapshot("Map Server").await.unwrap();
		assert!(buffer.stdout.is_empty());
		assert_eq!(buffer.stderr, vec!["first", "second", "last"]);
	}

	#[tokio::test]
	async fn read_error_reports_once_and_stops() {
		let (logs, tx, mut rx) = setup();
		let capture = OutputCapture::new("Map Server", StreamKind::Stdout, logs.clone(), tx);

		capture.spawn(FailingReader { served: false }).await.unwrap();

		let events = drain(&mut rx);
		assert_eq!(events.len(), 2);
		assert_eq!(events[0].line, "partial");
		assert_eq!(events[1].stream, None);
		assert!(events[1].line.contains("pipe broke"), "got: {}", events[1].line);
		assert_eq!(logs.snapshot("Map Server").await.unwrap().stdout, vec!["partial"]);
	}
}
