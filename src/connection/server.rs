//! Link server with one task per connected console

use crate::command::CommandExecutor;
use crate::engine::{Engine, LogHooks, LogLevel};
use crate::transport::{TransportListener, TransportStream};
use anyhow::{anyhow, Result};
use rc_shared::{
    codec::{self, FrameDecoder},
    envelope, timing, Envelope, ExecutionStatus, Heartbeat, LogRecord, MessageType, StatusReport,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

/// Configuration for the link server
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Device ID stamped on every outgoing header
    pub device_id: String,
    /// Interval between heartbeats to each console
    pub heartbeat_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_id: "rc-001".into(),
            heartbeat_interval: Duration::from_millis(timing::HEARTBEAT_INTERVAL_MS),
        }
    }
}

/// Log hooks that trace locally and forward info and above to consoles
pub fn log_forwarder(tx: broadcast::Sender<LogRecord>) -> LogHooks {
    LogHooks::from_fn(move |level, msg| {
        let wire = match level {
            LogLevel::Debug => {
                debug!("{}", msg);
                return;
            }
            LogLevel::Info => {
                info!("{}", msg);
                rc_shared::LogLevel::LogInfo
            }
            LogLevel::Warn => {
                warn!("{}", msg);
                rc_shared::LogLevel::LogWarn
            }
            LogLevel::Error => {
                error!("{}", msg);
                rc_shared::LogLevel::LogError
            }
        };
        // No console connected is not an error
        let _ = tx.send(LogRecord::new(wire, msg));
    })
}

struct Shared {
    config: LinkConfig,
    engine: Engine,
    executor: CommandExecutor,
    logs: broadcast::Sender<LogRecord>,
    sequence_id: Arc<AtomicU64>,
    start_time: Instant,
}

impl Shared {
    fn next_sequence_id(&self) -> u64 {
        self.sequence_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn envelope(&self, msg_type: MessageType, payload: envelope::Payload) -> Envelope {
        Envelope::new(&self.config.device_id, msg_type, self.next_sequence_id(), payload)
    }

    fn status_report(&self, status: ExecutionStatus) -> Envelope {
        self.envelope(
            MessageType::MsgStatus,
            envelope::Payload::Status(StatusReport {
                status: status.into(),
                run_id: self.engine.run_id(),
            }),
        )
    }

    fn heartbeat(&self) -> Envelope {
        let uptime_ms = self.start_time.elapsed().as_millis() as u64;
        self.envelope(
            MessageType::MsgHeartbeat,
            envelope::Payload::Heartbeat(Heartbeat::new(uptime_ms, self.engine.status(), true)),
        )
    }

    /// Route one received envelope; returns the reply, if any
    fn route(&self, envelope: &Envelope) -> Option<Envelope> {
        let header = match &envelope.header {
            Some(h) => h,
            None => {
                warn!("[LINK] Received envelope without header");
                return None;
            }
        };

        match &envelope.payload {
            Some(envelope::Payload::Command(cmd)) => Some(self.executor.execute(cmd, header)),
            Some(envelope::Payload::Heartbeat(hb)) => {
                debug!("[LINK] Console heartbeat: healthy={}", hb.healthy);
                None
            }
            _ => {
                debug!("[LINK] Unhandled payload type from {}", header.device_id);
                None
            }
        }
    }
}

/// Accepts consoles and serves each on its own task
pub struct LinkServer<L: TransportListener> {
    listener: L,
    shared: Arc<Shared>,
}

impl<L: TransportListener> LinkServer<L> {
    pub fn new(
        listener: L,
        config: LinkConfig,
        engine: Engine,
        logs: broadcast::Sender<LogRecord>,
    ) -> Self {
        let sequence_id = Arc::new(AtomicU64::new(0));
        let executor =
            CommandExecutor::new(config.device_id.clone(), sequence_id.clone(), engine.clone());
        Self {
            listener,
            shared: Arc::new(Shared {
                config,
                engine,
                executor,
                logs,
                sequence_id,
                start_time: Instant::now(),
            }),
        }
    }

    /// Accept loop; only returns if the listener fails
    pub async fn serve(mut self) -> Result<()> {
        info!("[LINK] Waiting for consoles over {}", self.listener.name());
        loop {
            let (stream, peer) = self.listener.accept().await?;
            info!("[LINK] Console connected: {}", peer);

            let shared = self.shared.clone();
            tokio::spawn(async move {
                match handle_client(stream, &shared).await {
                    Ok(()) => info!("[LINK] Console disconnected: {}", peer),
                    Err(e) => warn!("[LINK] Console {} dropped: {}", peer, e),
                }
            });
        }
    }
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, envelope: &Envelope) -> Result<()> {
    let encoded = codec::encode(envelope)?;
    writer.write_all(&encoded).await?;
    Ok(())
}

/// Serve one console until it disconnects
async fn handle_client<S: TransportStream>(stream: S, shared: &Shared) -> Result<()> {
    let (mut reader, mut writer) = tokio::io::split(stream);

    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];
    let mut heartbeat_interval = interval(shared.config.heartbeat_interval);
    let mut status_rx = shared.engine.subscribe();
    let mut log_rx = shared.logs.subscribe();

    // Current status first so a console never has to ask
    let current = *status_rx.borrow_and_update();
    send(&mut writer, &shared.status_report(current)).await?;

    let result = loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                send(&mut writer, &shared.heartbeat()).await?;
            }

            changed = status_rx.changed() => {
                if changed.is_err() {
                    break Err(anyhow!("Engine stopped"));
                }
                let status = *status_rx.borrow_and_update();
                send(&mut writer, &shared.status_report(status)).await?;
            }

            record = log_rx.recv() => {
                match record {
                    Ok(record) => {
                        let envelope = shared.envelope(MessageType::MsgLog, envelope::Payload::Log(record));
                        send(&mut writer, &envelope).await?;
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("[LINK] Console fell behind, {} log lines dropped", n);
                    }
                    Err(RecvError::Closed) => break Err(anyhow!("Log channel closed")),
                }
            }

            read = reader.read(&mut read_buf) => {
                match read {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        decoder.extend(&read_buf[..n]);
                        while let Some(envelope) = decoder.decode_next()? {
                            if let Some(reply) = shared.route(&envelope) {
                                send(&mut writer, &reply).await?;
                            }
                        }
                    }
                    Err(e) => break Err(anyhow!("Read error: {}", e)),
                }
            }
        }
    };

    let mut stream = reader.unsplit(writer);
    let _ = TransportStream::shutdown(&mut stream).await;
    result
}
