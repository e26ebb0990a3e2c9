//! In-process servers for link tests.

use std::time::Duration;

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    sync::mpsc,
};

/// How long a test waits for the link to send something.
const PATIENCE: Duration = Duration::from_secs(5);

/// Server side of a line protocol.
///
/// Writes `greeting` on accept, answers every received line through
/// `respond`, and lets the test push unsolicited text or hang up.
pub struct FakeServer {
    pub port: u16,
    push: mpsc::UnboundedSender<Option<String>>,
    seen: mpsc::UnboundedReceiver<String>,
}

impl FakeServer {
    pub async fn start(greeting: &'static str, respond: fn(&str) -> Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (push, mut pushes) = mpsc::unbounded_channel::<Option<String>>();
        let (seen_tx, seen) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            let _ = writer.write_all(greeting.as_bytes()).await;

            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        let Ok(Some(line)) = line else { break };
                        if let Some(reply) = respond(&line) {
                            let _ = writer.write_all(reply.as_bytes()).await;
                        }
                        let _ = seen_tx.send(line);
                    }
                    Some(text) = pushes.recv() => {
                        let Some(text) = text else { break };
                        let _ = writer.write_all(text.as_bytes()).await;
                    }
                }
            }
        });

        Self { port, push, seen }
    }

    /// Writes `text` to the client as is.
    pub fn push(&self, text: &str) {
        self.push.send(Some(text.to_owned())).unwrap();
    }

    /// Closes the connection.
    pub fn hang_up(&self) {
        self.push.send(None).unwrap();
    }

    /// Waits for the next line the client sent.
    pub async fn next_line(&mut self) -> String {
        tokio::time::timeout(PATIENCE, self.seen.recv())
            .await
            .expect("client went quiet")
            .expect("server stopped")
    }

    /// Waits for the next `count` lines the client sent.
    pub async fn lines(&mut self, count: usize) -> Vec<String> {
        let mut lines = Vec::with_capacity(count);
        for _ in 0..count {
            lines.push(self.next_line().await);
        }
        lines
    }
}

/// A port nobody listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
