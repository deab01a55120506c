use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rc_shared::{
    codec::{self, FrameDecoder},
    envelope, AckStatus, Command, CommandType, Envelope, ExecutionStatus, Header, LogLevel,
    MessageType,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEVICE_ID: &str = "console";

/// Controller log lines that mean a submission never started
const REFUSALS: [&str; 2] = ["[EXEC]Unsafe command", "[EXEC]Compile Error"];

#[derive(Parser, Debug)]
#[command(name = "rc-console")]
#[command(about = "Submit scripts to an RC controller and follow their output")]
struct Cli {
    /// Controller link address
    #[arg(long, env = "RC_ADDR", default_value = "127.0.0.1:7070")]
    addr: String,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Submit a script file and follow it until the run ends
    Run { file: PathBuf },
    /// Stop the current run
    Stop,
    /// Print the controller's execution status
    Status,
    /// Print everything the controller sends
    Watch,
}

/// When a session has seen enough
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Until {
    Ack,
    RunEnds,
    Forever,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Continue,
    Success,
    Failure,
}

/// Tracks replies for the one command a console invocation sends
struct Session {
    command_id: u64,
    until: Until,
    accepted: bool,
    started: bool,
}

impl Session {
    fn new(command_id: u64, until: Until) -> Self {
        Self {
            command_id,
            until,
            accepted: false,
            started: false,
        }
    }

    /// Print one envelope and decide whether the session is over
    fn handle(&mut self, envelope: &Envelope) -> Verdict {
        let header = match &envelope.header {
            Some(h) => h,
            None => {
                warn!("Received envelope without header");
                return Verdict::Continue;
            }
        };

        match &envelope.payload {
            Some(envelope::Payload::Ack(ack)) => {
                let status = AckStatus::try_from(ack.status).unwrap_or(AckStatus::AckUnknown);
                println!(
                    "[{}] ACK cmd={} {:?} {}",
                    header.device_id, ack.command_id, status, ack.message
                );
                if ack.command_id != self.command_id {
                    return Verdict::Continue;
                }
                match status {
                    AckStatus::AckAccepted if self.until == Until::RunEnds => {
                        self.accepted = true;
                        Verdict::Continue
                    }
                    AckStatus::AckAccepted | AckStatus::AckCompleted => self.after_ack(),
                    _ => Verdict::Failure,
                }
            }
            Some(envelope::Payload::Status(report)) => {
                let status =
                    ExecutionStatus::try_from(report.status).unwrap_or(ExecutionStatus::Idle);
                println!("[{}] STATUS {} run={}", header.device_id, status, report.run_id);
                self.on_status(status)
            }
            Some(envelope::Payload::Log(record)) => {
                let level = LogLevel::try_from(record.level).unwrap_or(LogLevel::LogInfo);
                match level {
                    LogLevel::LogWarn | LogLevel::LogError => eprintln!("{}", record.message),
                    _ => println!("{}", record.message),
                }
                self.on_log(&record.message)
            }
            Some(envelope::Payload::Heartbeat(hb)) => {
                debug!(
                    "[{}] seq={} HEARTBEAT: uptime={}ms healthy={}",
                    header.device_id, header.sequence_id, hb.uptime_ms, hb.healthy
                );
                Verdict::Continue
            }
            Some(envelope::Payload::Command(_)) => {
                warn!("[{}] Unexpected command from controller", header.device_id);
                Verdict::Continue
            }
            None => Verdict::Continue,
        }
    }

    fn after_ack(&self) -> Verdict {
        match self.until {
            Until::Ack => Verdict::Success,
            _ => Verdict::Continue,
        }
    }

    fn on_status(&mut self, status: ExecutionStatus) -> Verdict {
        if self.until != Until::RunEnds || !self.accepted {
            return Verdict::Continue;
        }
        match status {
            ExecutionStatus::Running => {
                self.started = true;
                Verdict::Continue
            }
            ExecutionStatus::Done if self.started => Verdict::Success,
            s if s.is_terminal() && self.started => Verdict::Failure,
            _ => Verdict::Continue,
        }
    }

    /// A rejected or uncompilable script never reaches RUNNING; its warning is the answer
    fn on_log(&self, message: &str) -> Verdict {
        let refused = REFUSALS.iter().any(|p| message.starts_with(p));
        if self.until == Until::RunEnds && self.accepted && !self.started && refused {
            Verdict::Failure
        } else {
            Verdict::Continue
        }
    }
}

fn command_id() -> u64 {
    rc_shared::now_ms()
}

fn request(action: &Action) -> Result<(Option<Command>, Until)> {
    let id = command_id();
    Ok(match action {
        Action::Run { file } => {
            let source = std::fs::read_to_string(file)
                .with_context(|| format!("failed to read script {}", file.display()))?;
            (Some(Command::run_script(id, source)), Until::RunEnds)
        }
        Action::Stop => (Some(Command::control(id, CommandType::CmdStop)), Until::Ack),
        Action::Status => (
            Some(Command::control(id, CommandType::CmdStatusRequest)),
            Until::Ack,
        ),
        Action::Watch => (None, Until::Forever),
    })
}

async fn session(addr: &str, action: &Action) -> Result<Verdict> {
    let (command, until) = request(action)?;
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let mut session = Session::new(command.as_ref().map_or(0, |c| c.command_id), until);
    if let Some(command) = command {
        let envelope = Envelope {
            header: Some(Header::new(DEVICE_ID, MessageType::MsgCommand, 1)),
            payload: Some(envelope::Payload::Command(command)),
        };
        stream.write_all(&codec::encode(&envelope)?).await?;
    }

    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            bail!("controller closed the link");
        }
        decoder.extend(&buf[..n]);

        while let Some(envelope) = decoder.decode_next()? {
            match session.handle(&envelope) {
                Verdict::Continue => {}
                verdict => return Ok(verdict),
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let cli = Cli::parse();
    match session(&cli.addr, &cli.command).await? {
        Verdict::Failure => Ok(ExitCode::FAILURE),
        _ => Ok(ExitCode::SUCCESS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rc_shared::{Ack, LogRecord, StatusReport};

    fn wrap(payload: envelope::Payload) -> Envelope {
        Envelope::new("rc-001", MessageType::MsgUnknown, 1, payload)
    }

    fn status(status: ExecutionStatus) -> Envelope {
        wrap(envelope::Payload::Status(StatusReport {
            status: status.into(),
            run_id: 1,
        }))
    }

    fn ack(command_id: u64, status: AckStatus) -> Envelope {
        wrap(envelope::Payload::Ack(Ack::with_status(1, command_id, status, "")))
    }

    fn log(level: LogLevel, message: &str) -> Envelope {
        wrap(envelope::Payload::Log(LogRecord::new(level, message)))
    }

    #[test]
    fn test_run_waits_for_its_own_run_to_end() {
        let mut session = Session::new(5, Until::RunEnds);

        // Terminal status from an earlier run is not ours
        assert_eq!(session.handle(&status(ExecutionStatus::Done)), Verdict::Continue);
        assert_eq!(session.handle(&ack(5, AckStatus::AckAccepted)), Verdict::Continue);
        assert_eq!(session.handle(&status(ExecutionStatus::Running)), Verdict::Continue);
        assert_eq!(session.handle(&log(LogLevel::LogInfo, "[SCRIPT] hi")), Verdict::Continue);
        assert_eq!(session.handle(&status(ExecutionStatus::Done)), Verdict::Success);
    }

    #[test]
    fn test_run_fails_on_error_status() {
        let mut session = Session::new(5, Until::RunEnds);
        session.handle(&ack(5, AckStatus::AckAccepted));
        session.handle(&status(ExecutionStatus::Running));
        assert_eq!(session.handle(&log(LogLevel::LogError, "[EXEC]Execution Error: x")), Verdict::Continue);
        assert_eq!(session.handle(&status(ExecutionStatus::Error)), Verdict::Failure);
    }

    #[test]
    fn test_rejected_script_ends_session() {
        let mut session = Session::new(5, Until::RunEnds);
        session.handle(&ack(5, AckStatus::AckAccepted));
        assert_eq!(
            session.handle(&log(LogLevel::LogWarn, "[SCRIPT] leftover from the last run")),
            Verdict::Continue
        );
        assert_eq!(
            session.handle(&log(LogLevel::LogWarn, "[EXEC]Unsafe command - open('x')")),
            Verdict::Failure
        );
    }

    #[test]
    fn test_control_commands_end_on_ack() {
        let mut session = Session::new(9, Until::Ack);
        assert_eq!(session.handle(&ack(8, AckStatus::AckCompleted)), Verdict::Continue);
        assert_eq!(session.handle(&ack(9, AckStatus::AckCompleted)), Verdict::Success);

        let mut session = Session::new(9, Until::Ack);
        assert_eq!(session.handle(&ack(9, AckStatus::AckExpired)), Verdict::Failure);
    }

    #[test]
    fn test_watch_never_ends() {
        let mut session = Session::new(0, Until::Forever);
        assert_eq!(session.handle(&status(ExecutionStatus::Running)), Verdict::Continue);
        assert_eq!(session.handle(&status(ExecutionStatus::Cancelled)), Verdict::Continue);
        assert_eq!(session.handle(&log(LogLevel::LogError, "boom")), Verdict::Continue);
    }
}
