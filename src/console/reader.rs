//! Console reader
//!
//! Reads JSON requests from stdin on a dedicated thread. Controller
//! commands go through the controller's queue and wait for the reply;
//! fixes go straight into the position feed.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{Request, Response, Route};
use crate::geofence::ControllerInput;
use crate::position::PositionFeed;

/// Line-oriented stdin front end
pub struct ConsoleReader {
    input_tx: mpsc::Sender<ControllerInput>,
    feed: PositionFeed,
    running: Arc<AtomicBool>,
    closed: CancellationToken,
}

impl ConsoleReader {
    pub fn new(input_tx: mpsc::Sender<ControllerInput>, feed: PositionFeed) -> Self {
        Self {
            input_tx,
            feed,
            running: Arc::new(AtomicBool::new(false)),
            closed: CancellationToken::new(),
        }
    }

    /// Start reading stdin on its own thread
    pub fn start(&self) -> Result<(), ConsoleError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ConsoleError::AlreadyRunning);
        }

        let input_tx = self.input_tx.clone();
        let feed = self.feed.clone();
        let running = Arc::clone(&self.running);
        let closed = self.closed.clone();

        thread::Builder::new()
            .name("console-reader".to_string())
            .spawn(move || {
                info!("console reader thread started");

                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            warn!(?e, "failed to read stdin");
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }

                    let response = handle_line(&line, &input_tx, &feed);
                    write_line(&response);
                }

                running.store(false, Ordering::SeqCst);
                closed.cancel();
                info!("console reader thread stopped");
            })
            .map_err(|e| ConsoleError::ThreadSpawn(e.to_string()))?;

        Ok(())
    }

    /// Ask the reader to stop after the current line
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolves once stdin is exhausted
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

/// Errors that can occur in the console reader
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("console reader is already running")]
    AlreadyRunning,

    #[error("failed to spawn reader thread: {0}")]
    ThreadSpawn(String),
}

/// Parse and dispatch one request line. Blocks until the controller answers.
fn handle_line(
    line: &str,
    input_tx: &mpsc::Sender<ControllerInput>,
    feed: &PositionFeed,
) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return Response::error("bad_request", e.to_string()),
    };
    debug!(?request, "received request");

    match request.route() {
        Err(message) => Response::error("bad_request", message),
        Ok(Route::Feed(fix)) => Response::FixQueued {
            subscribers: feed.push(fix),
        },
        Ok(Route::Controller(command)) => {
            let (reply, reply_rx) = oneshot::channel();
            if input_tx
                .blocking_send(ControllerInput::Command { command, reply })
                .is_err()
            {
                return Response::error("unavailable", "controller stopped");
            }

            match reply_rx.blocking_recv() {
                Ok(Ok(snapshot)) => Response::Status(snapshot),
                Ok(Err(e)) => Response::error(e.code(), e.to_string()),
                Err(_) => Response::error("unavailable", "controller dropped the request"),
            }
        }
    }
}

/// Write one JSON line to stdout
pub fn write_line<T: Serialize>(message: &T) {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            warn!(?e, "failed to encode output line");
            return;
        }
    };

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{json}").and_then(|_| stdout.flush()) {
        warn!(?e, "failed to write to stdout");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geofence::{ArmError, ArmState, Command, StatusSnapshot};
    use crate::position::FeedSource;

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            state: ArmState::Idle,
            destination: None,
            radius_m: 500,
            distance_m: None,
            inside: false,
            gps_status: "Not started".to_string(),
            audio: "default".to_string(),
        }
    }

    #[test]
    fn test_reader_creation() {
        let (tx, _rx) = mpsc::channel(4);
        let reader = ConsoleReader::new(tx, FeedSource::new(4).feed());
        assert!(!reader.is_running());
    }

    #[test]
    fn test_bad_json_is_rejected() {
        let (tx, _rx) = mpsc::channel(4);
        let feed = FeedSource::new(4).feed();
        match handle_line("{nope", &tx, &feed) {
            Response::Error { code, .. } => assert_eq!(code, "bad_request"),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn test_fix_goes_to_feed() {
        let (tx, mut rx) = mpsc::channel(4);
        let feed = FeedSource::new(4).feed();
        let line = r#"{"type":"fix","latitude":1.0,"longitude":2.0,"accuracy":4.0}"#;
        match handle_line(line, &tx, &feed) {
            Response::FixQueued { subscribers } => assert_eq!(subscribers, 0),
            other => panic!("unexpected response {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_command_round_trip() {
        let (tx, mut rx) = mpsc::channel(4);
        let feed = FeedSource::new(4).feed();

        let responder = thread::spawn(move || {
            for expected in [Command::Status, Command::Arm] {
                match rx.blocking_recv() {
                    Some(ControllerInput::Command { command, reply }) => {
                        assert_eq!(command, expected);
                        let result = match command {
                            Command::Arm => Err(ArmError::NoDestination),
                            _ => Ok(snapshot()),
                        };
                        reply.send(result).unwrap();
                    }
                    other => panic!("unexpected input {other:?}"),
                }
            }
        });

        match handle_line(r#"{"type":"status"}"#, &tx, &feed) {
            Response::Status(status) => assert_eq!(status.radius_m, 500),
            other => panic!("unexpected response {other:?}"),
        }
        match handle_line(r#"{"type":"arm"}"#, &tx, &feed) {
            Response::Error { code, .. } => assert_eq!(code, "no_destination"),
            other => panic!("unexpected response {other:?}"),
        }

        responder.join().unwrap();
    }
}
