//! Wire protocols spoken by the two links.
//!
//! Both the Music Player Daemon protocol and IRC are line oriented. This
//! module holds the transport plumbing they share; the submodules hold the
//! codecs:
//!
//! * [`mpd`] - greeting, responses, `status`/`currentsong` and idle parsing
//! * [`irc`] - message parsing, outbound formatting and text splitting
//!
//! Every connected socket gets one reader task spawned by [`spawn_reader`].
//! The task does nothing but frame lines and hand them to a callback, which
//! usually forwards them over an unbounded channel. Receiving from such a
//! channel is cancel-safe, so the gateway can wait on it inside
//! `tokio::select!` without losing half-read lines.

pub mod irc;
pub mod mpd;

#[cfg(test)]
pub(crate) mod testing;

use std::{io, ops::ControlFlow, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    net::TcpStream,
    task::JoinHandle,
};

use crate::error::{Error, Result};

/// Longest line accepted from a peer, terminator included.
///
/// Generous for IRC with message tags and for long MPD tag values.
pub const MAX_LINE_LENGTH: usize = 16 * 1024;

/// Opens a TCP connection, giving up after `timeout`.
///
/// # Errors
///
/// * [`ConnectionRefused`](crate::error::ErrorKind::ConnectionRefused) when the
///   address does not resolve or nobody listens
/// * [`DeadlineExceeded`](crate::error::ErrorKind::DeadlineExceeded) when the
///   attempt takes longer than `timeout`
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let address = format!("{host}:{port}");
    debug!("connecting to {address}");

    match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                trace!("could not disable nagle on {address}: {e}");
            }
            Ok(stream)
        }
        Ok(Err(e)) => Err(Error::connection_refused(format!("{address}: {e}"))),
        Err(_) => Err(Error::deadline_exceeded(format!(
            "{address}: no answer within {}s",
            timeout.as_secs()
        ))),
    }
}

/// Spawns a task that reads `reader` line by line.
///
/// Each line is passed to `forward` without its terminator (`\n` or `\r\n`).
/// Invalid UTF-8 is replaced rather than rejected. The task ends when
/// `forward` breaks, or after it passed on the first error; end of stream is
/// reported as [`io::ErrorKind::UnexpectedEof`].
pub fn spawn_reader<R, F>(reader: R, mut forward: F) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    F: FnMut(io::Result<String>) -> ControlFlow<()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(512);

        loop {
            let item = read_line(&mut reader, &mut buf).await;
            let failed = item.is_err();
            if forward(item).is_break() || failed {
                break;
            }
        }
    })
}

async fn read_line<R>(reader: &mut BufReader<R>, buf: &mut Vec<u8>) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    buf.clear();

    let limit = u64::try_from(MAX_LINE_LENGTH).unwrap_or(u64::MAX);
    let read = reader.take(limit).read_until(b'\n', buf).await?;
    if read == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        ));
    }
    if buf.last() != Some(&b'\n') {
        if read >= MAX_LINE_LENGTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {MAX_LINE_LENGTH} bytes"),
            ));
        }
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-line",
        ));
    }

    Ok(decode_line(buf))
}

/// Strips the line terminator and decodes lossily.
fn decode_line(buf: &[u8]) -> String {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{io::AsyncWriteExt, sync::mpsc};

    #[test]
    fn decodes_both_terminators() {
        assert_eq!(decode_line(b"OK\n"), "OK");
        assert_eq!(decode_line(b"PING :irc\r\n"), "PING :irc");
        assert_eq!(decode_line(b"caf\xe9\r\n"), "caf\u{fffd}");
    }

    #[tokio::test]
    async fn reader_forwards_lines_then_eof() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_reader(client, move |line| {
            if tx.send(line).is_err() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        server.write_all(b"OK MPD 0.23.5\nvolume: 50\r\n").await.unwrap();
        drop(server);

        assert_eq!(rx.recv().await.unwrap().unwrap(), "OK MPD 0.23.5");
        assert_eq!(rx.recv().await.unwrap().unwrap(), "volume: 50");
        let eof = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(eof.kind(), io::ErrorKind::UnexpectedEof);
        assert!(rx.recv().await.is_none());

        handle.await.unwrap();
    }
}
