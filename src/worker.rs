//! Delivery of released bytes to a connection's HTTP parser.
//!
//! Inline delivery parses on the dispatch thread. Threaded delivery gives each
//! connection its own parse thread fed through a bounded queue, so a slow
//! parse only stalls the dispatch loop once that connection's queue is full.
//! The queue has exactly one producer (the dispatch loop) and one consumer.

use crate::http::{Direction, HttpParser};
use std::io;
use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing::{trace, warn};

enum Message {
    Chunk(Direction, Vec<u8>),
    /// No more chunks; finish the parser and exit.
    End,
}

/// A parse thread owning one connection's [`HttpParser`].
pub(crate) struct Worker {
    tx: Option<mpsc::SyncSender<Message>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(name: String, parser: HttpParser, queue_depth: usize) -> io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<Message>(queue_depth);
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || run(parser, &rx))?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    fn send(&mut self, direction: Direction, chunk: Vec<u8>) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(Message::Chunk(direction, chunk)).is_err() {
            warn!("HTTP parse worker exited early, dropping its input");
            self.tx = None;
        }
    }

    /// Send the end sentinel and wait for the worker to drain its queue.
    /// Only the first call does anything.
    fn finish(&mut self) {
        if let Some(tx) = self.tx.take() {
            // A closed queue means the worker already exited.
            let _ = tx.send(Message::End);
        }
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("HTTP parse worker panicked");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.finish();
    }
}

fn run(mut parser: HttpParser, rx: &mpsc::Receiver<Message>) {
    // A disconnected sender counts as the end of input.
    while let Ok(Message::Chunk(direction, chunk)) = rx.recv() {
        trace!(?direction, len = chunk.len(), "Parsing released chunk");
        parser.feed(direction, chunk);
    }
    parser.finish();
}

/// How a connection's parser is driven.
pub(crate) enum Pipeline {
    Inline(HttpParser),
    Threaded(Worker),
}

impl Pipeline {
    pub(crate) fn feed(&mut self, direction: Direction, chunk: Vec<u8>) {
        match self {
            Self::Inline(parser) => parser.feed(direction, chunk),
            Self::Threaded(worker) => worker.send(direction, chunk),
        }
    }

    /// Idempotent. Returns once every queued chunk has been parsed and the
    /// sink has been told the connection finished.
    pub(crate) fn finish(&mut self) {
        match self {
            Self::Inline(parser) => parser.finish(),
            Self::Threaded(worker) => worker.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::http::{RequestHeader, ResponseHeader};
    use crate::sink::Sink;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl Sink for Log {
        fn on_http_request(&mut self, header: &RequestHeader, _body: &[u8]) {
            self.0.lock().unwrap().push(format!("{} {}", header.method, header.uri));
        }

        fn on_http_response(&mut self, header: &ResponseHeader, body: &[u8]) {
            self.0
                .lock()
                .unwrap()
                .push(format!("{} {}", header.status, String::from_utf8_lossy(body)));
        }

        fn on_connection_finished(&mut self) {
            self.0.lock().unwrap().push("finished".to_owned());
        }
    }

    fn parser(log: &Log) -> HttpParser {
        HttpParser::new(Arc::new(FilterConfig::default()), Box::new(log.clone()))
    }

    #[test]
    fn test_threaded_pipeline_drains_before_finish_returns() {
        let log = Log::default();
        let worker = Worker::spawn("test-worker".into(), parser(&log), 1).unwrap();
        let mut pipeline = Pipeline::Threaded(worker);

        pipeline.feed(Direction::Request, b"GET /a HTTP/1.1\r\n\r\n".to_vec());
        pipeline.feed(Direction::Response, b"HTTP/1.1 200 OK\r\n\r\n".to_vec());
        pipeline.feed(Direction::Response, b"body to end".to_vec());
        pipeline.finish();

        assert_eq!(
            *log.0.lock().unwrap(),
            ["GET /a", "200 body to end", "finished"]
        );

        // Finishing again neither blocks nor notifies twice.
        pipeline.finish();
        pipeline.feed(Direction::Request, b"GET /late HTTP/1.1\r\n\r\n".to_vec());
        assert_eq!(log.0.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_inline_and_threaded_agree() {
        let input: [(Direction, &[u8]); 3] = [
            (Direction::Request, b"POST /x HTTP/1.1\r\nContent-Length: 2\r\n\r\nhi"),
            (Direction::Response, b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\n"),
            (Direction::Response, b"yes"),
        ];

        let inline_log = Log::default();
        let mut inline = Pipeline::Inline(parser(&inline_log));
        let threaded_log = Log::default();
        let mut threaded =
            Pipeline::Threaded(Worker::spawn("test-worker".into(), parser(&threaded_log), 4).unwrap());

        for (direction, chunk) in input {
            inline.feed(direction, chunk.to_vec());
            threaded.feed(direction, chunk.to_vec());
        }
        inline.finish();
        threaded.finish();

        assert_eq!(*inline_log.0.lock().unwrap(), *threaded_log.0.lock().unwrap());
    }

    #[test]
    fn test_dropping_worker_finishes_parser() {
        let log = Log::default();
        let worker = Worker::spawn("test-worker".into(), parser(&log), 1).unwrap();
        drop(worker);
        assert_eq!(*log.0.lock().unwrap(), ["finished"]);
    }
}
