//! Session actor: an isolated Tokio task that owns one open device.
//!
//! Callers never touch the device. They queue a [`Request`] on a bounded
//! channel and wait on its oneshot reply; the actor writes one report,
//! waits for the reply that echoes the same command id, answers, and only
//! then takes the next request. That gives every device exactly one
//! command in flight.
//!
//! Closing is signalled on a `watch` channel shared with every handle. The
//! actor watches it while idle and while waiting for a reply, so a close
//! or unplug fails the in-flight command and everything queued behind it
//! straight away.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use viakit_protocol::{Command, Reply, ReportCodec};
use viakit_transport::{DeviceId, HidDevice, TransportError};

use crate::{ClientConfig, ClientError};

/// A command waiting for the actor, with its reply channel.
pub(crate) struct Request {
    pub(crate) command: Command,
    pub(crate) reply: oneshot::Sender<Result<Reply, ClientError>>,
}

/// The internal actor state. Runs inside a Tokio task.
struct SessionActor<D: HidDevice> {
    device: D,
    device_id: DeviceId,
    codec: ReportCodec,
    command_timeout: Duration,
    lighting_settle: Duration,
    receiver: mpsc::Receiver<Request>,
    closed: Arc<watch::Sender<bool>>,
    /// Set after a timeout: a late reply may still be queued.
    needs_drain: bool,
    last_lighting_write: Option<Instant>,
}

impl<D: HidDevice> SessionActor<D> {
    /// Runs the actor loop until the session closes or the device goes away.
    async fn run(mut self) {
        tracing::info!(device = %self.device_id, "session actor started");
        let mut closed = self.closed.subscribe();

        loop {
            let request = tokio::select! {
                biased;
                _ = wait_closed(&mut closed) => break,
                request = self.receiver.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let result = tokio::select! {
                biased;
                _ = wait_closed(&mut closed) => Err(ClientError::ConnectionLost(self.device_id)),
                result = self.exchange(&request.command) => result,
            };
            let lost = matches!(result, Err(ClientError::ConnectionLost(_)));
            let _ = request.reply.send(result);
            if lost {
                break;
            }
        }

        self.shutdown().await;
    }

    /// Sends one command and waits for its reply.
    async fn exchange(&mut self, command: &Command) -> Result<Reply, ClientError> {
        if self.needs_drain {
            self.drain().await?;
        }
        if command.is_lighting_write() {
            if let Some(last) = self.last_lighting_write {
                tokio::time::sleep_until(last + self.lighting_settle).await;
            }
        }

        let report = self.codec.encode(command)?;
        self.device
            .write_report(&report)
            .await
            .map_err(|e| self.transport_error(e))?;
        tracing::debug!(device = %self.device_id, %command, "command sent");

        let deadline = Instant::now() + self.command_timeout;
        loop {
            let raw = match tokio::time::timeout_at(deadline, self.device.read_report()).await {
                Err(_) => {
                    self.needs_drain = true;
                    tracing::warn!(
                        device = %self.device_id,
                        %command,
                        timeout = ?self.command_timeout,
                        "command timed out"
                    );
                    return Err(ClientError::Timeout {
                        command: command.name(),
                        timeout: self.command_timeout,
                    });
                }
                Ok(Err(e)) => return Err(self.transport_error(e)),
                Ok(Ok(None)) => return Err(ClientError::ConnectionLost(self.device_id)),
                Ok(Ok(Some(raw))) => raw,
            };
            tracing::trace!(device = %self.device_id, report = ?raw, "report received");

            let reply = match self.codec.decode_reply(&raw) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(
                        device = %self.device_id,
                        %command,
                        error = %e,
                        "discarding malformed report"
                    );
                    continue;
                }
            };
            if !reply.answers(command) {
                tracing::warn!(
                    device = %self.device_id,
                    %command,
                    status = ?reply.status,
                    "discarding stale report"
                );
                continue;
            }
            if command.is_lighting_write() {
                self.last_lighting_write = Some(Instant::now());
            }
            return Ok(reply);
        }
    }

    /// Discards reports that are already waiting, e.g. the late answer to a
    /// command that timed out.
    async fn drain(&mut self) -> Result<(), ClientError> {
        let mut dropped = 0usize;
        loop {
            match tokio::time::timeout(Duration::ZERO, self.device.read_report()).await {
                Ok(Ok(Some(_))) => dropped += 1,
                Ok(Ok(None)) => return Err(ClientError::ConnectionLost(self.device_id)),
                Ok(Err(e)) => return Err(self.transport_error(e)),
                Err(_) => break,
            }
        }
        if dropped > 0 {
            tracing::debug!(device = %self.device_id, dropped, "drained late reports");
        }
        self.needs_drain = false;
        Ok(())
    }

    fn transport_error(&self, error: TransportError) -> ClientError {
        match error {
            TransportError::Disconnected => ClientError::ConnectionLost(self.device_id),
            other => ClientError::Transport(other),
        }
    }

    /// Fails everything still queued, releases the device and marks the
    /// session closed for every handle.
    async fn shutdown(mut self) {
        self.closed.send_replace(true);
        self.receiver.close();
        let mut failed = 0usize;
        while let Ok(request) = self.receiver.try_recv() {
            let _ = request
                .reply
                .send(Err(ClientError::ConnectionLost(self.device_id)));
            failed += 1;
        }
        if let Err(e) = self.device.close().await {
            tracing::debug!(device = %self.device_id, error = %e, "device close failed");
        }
        tracing::info!(device = %self.device_id, failed, "session actor stopped");
    }
}

/// Resolves once the watched flag is `true` or every sender is gone.
pub(crate) async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

/// Spawns a session actor that owns `device`.
pub(crate) fn spawn_session<D: HidDevice>(
    device: D,
    config: &ClientConfig,
    closed: Arc<watch::Sender<bool>>,
) -> mpsc::Sender<Request> {
    let (tx, rx) = mpsc::channel(config.queue_size.max(1));
    let actor = SessionActor {
        device_id: device.info().id,
        codec: ReportCodec::new(device.report_size()),
        device,
        command_timeout: config.command_timeout(),
        lighting_settle: config.lighting_settle(),
        receiver: rx,
        closed,
        needs_drain: false,
        last_lighting_write: None,
    };
    tokio::spawn(actor.run());
    tx
}
