//! One-way stop signal from the supervisor to the worker.
//!
//! The channel holds at most one [`StopToken`]. Sending never fails: a full
//! slot means a stop is already pending and a disconnected receiver means the
//! worker has exited. Both are no-ops.
//!
//! Across a process boundary the token travels as the line `STOP` on the
//! child's stdin; [`StopReceiver::from_reader`] turns that pipe back into a
//! channel on the child side.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::ChildStdin;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::thread;
use std::time::Instant;

/// Wire form of the stop token on a pipe.
pub const STOP_LINE: &str = "STOP";

/// The only message the channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopToken;

enum Transport {
    Local(SyncSender<StopToken>),
    Pipe(Option<ChildStdin>),
}

/// Supervisor side of the control channel.
pub struct StopSender {
    transport: Transport,
    sent: bool,
}

/// Worker side of the control channel.
pub struct StopReceiver {
    rx: Receiver<StopToken>,
}

/// New in-process channel with a single slot.
pub fn control_channel() -> (StopSender, StopReceiver) {
    let (tx, rx) = mpsc::sync_channel(1);
    (
        StopSender {
            transport: Transport::Local(tx),
            sent: false,
        },
        StopReceiver { rx },
    )
}

impl StopSender {
    /// Sender writing to a child's stdin.
    pub fn for_child(stdin: ChildStdin) -> Self {
        Self {
            transport: Transport::Pipe(Some(stdin)),
            sent: false,
        }
    }

    /// Deliver the stop token. Returns `true` only for the first delivery
    /// that reached a live worker.
    pub fn send(&mut self) -> bool {
        if self.sent {
            return false;
        }
        let delivered = match &mut self.transport {
            Transport::Local(tx) => match tx.try_send(StopToken) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
            },
            Transport::Pipe(stdin) => match stdin.as_mut() {
                Some(pipe) => {
                    let ok = writeln!(pipe, "{STOP_LINE}").and_then(|()| pipe.flush()).is_ok();
                    if !ok {
                        log::debug!("worker stdin closed; stop token dropped");
                    }
                    ok
                }
                None => false,
            },
        };
        self.sent = true;
        delivered
    }

    /// Close the pipe so a child blocked on stdin sees EOF.
    pub fn close(&mut self) {
        if let Transport::Pipe(stdin) = &mut self.transport {
            stdin.take();
        }
    }
}

impl StopReceiver {
    /// Wrap a line-oriented reader (the child's stdin). A `STOP` line or EOF
    /// delivers the token; a vanished parent therefore stops the worker.
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        let (tx, rx) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name("hostprobe-control".into())
            .spawn(move || {
                let mut lines = BufReader::new(reader).lines();
                loop {
                    match lines.next() {
                        Some(Ok(line)) if line.trim() == STOP_LINE => break,
                        Some(Ok(other)) => log::debug!("ignoring control line {other:?}"),
                        Some(Err(_)) | None => break,
                    }
                }
                let _ = tx.try_send(StopToken);
            })
            .map(|_| ())
            .unwrap_or_else(|e| log::warn!("cannot spawn control reader: {e}"));
        Self { rx }
    }

    /// Non-blocking check for a pending stop request.
    pub fn poll(&self) -> bool {
        match self.rx.try_recv() {
            Ok(StopToken) => true,
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => true,
        }
    }

    /// Block until `deadline` or a stop request, whichever comes first.
    /// Returns `true` if a stop was requested.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let timeout = deadline.saturating_duration_since(Instant::now());
        if timeout.is_zero() {
            return self.poll();
        }
        match self.rx.recv_timeout(timeout) {
            Ok(StopToken) => true,
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}
