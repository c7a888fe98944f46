//! Live mailbox probe: an SMTP dialogue that stops after `RCPT TO`.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tracing::debug;

use crate::config::SmtpSettings;

/// Mail hosts tried per probe, in MX preference order.
const MAX_HOSTS: usize = 2;

const QUIT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpReply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl SmtpReply {
    pub fn is_positive_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_transient_failure(&self) -> bool {
        (400..500).contains(&self.code)
    }

    pub fn is_permanent_failure(&self) -> bool {
        (500..600).contains(&self.code)
    }

    pub fn message(&self) -> String {
        self.lines.join(" ")
    }
}

/// What the server said about the target mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// 250/251, or 552 with `mailbox_full` set.
    Accepted { code: u16, mailbox_full: bool },
    /// Permanent failure on `RCPT TO`.
    Rejected { code: u16, message: String },
    /// Permanent failure before `RCPT TO` (greeting, HELO, MAIL FROM).
    Refused { code: u16, message: String },
    /// Transient failure anywhere in the dialogue.
    Deferred { code: u16, message: String },
    Timeout,
    NoConnect,
}

impl ProbeOutcome {
    /// The server answered the dialogue, whatever the answer was.
    pub fn is_completed_handshake(&self) -> bool {
        !matches!(self, Self::Timeout | Self::NoConnect)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub outcome: ProbeOutcome,
    /// Whether the throwaway address was accepted too. `None` when it was not
    /// asked or the answer was inconclusive.
    pub catch_all: Option<bool>,
    pub host: Option<String>,
}

impl ProbeReport {
    fn without_host(outcome: ProbeOutcome) -> Self {
        Self {
            outcome,
            catch_all: None,
            host: None,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailboxProber: Send + Sync {
    /// Asks the first reachable host whether it accepts `email`. When
    /// `catch_all_address` is given it is tried as a second recipient in the
    /// same transaction. Never fails: network trouble is part of the report.
    async fn probe(
        &self,
        hosts: &[String],
        email: &str,
        catch_all_address: Option<String>,
    ) -> ProbeReport;
}

#[derive(Debug)]
enum SessionError {
    Timeout,
    Io(io::Error),
    Protocol(String),
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

struct SmtpSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    command_timeout: Duration,
}

impl SmtpSession {
    fn new(stream: TcpStream, command_timeout: Duration) -> Self {
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
            command_timeout,
        }
    }

    async fn read_line(&mut self) -> Result<String, SessionError> {
        let mut line = String::new();
        let read = timeout(self.command_timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| SessionError::Timeout)??;
        if read == 0 {
            return Err(SessionError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed",
            )));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Reads one possibly multi-line reply (`250-...` continued, `250 ...` last).
    async fn read_reply(&mut self) -> Result<SmtpReply, SessionError> {
        let mut lines = Vec::new();
        let mut code: Option<u16> = None;
        loop {
            let line = self.read_line().await?;
            let parsed = line
                .get(..3)
                .and_then(|digits| digits.parse::<u16>().ok())
                .ok_or_else(|| SessionError::Protocol(format!("invalid reply: {line}")))?;
            match code {
                Some(existing) if existing != parsed => {
                    return Err(SessionError::Protocol(format!(
                        "inconsistent reply codes: {existing} vs {parsed}"
                    )));
                }
                _ => code = Some(parsed),
            }
            let is_last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line.get(4..).unwrap_or_default().to_string());
            if is_last {
                break;
            }
        }
        Ok(SmtpReply {
            code: code.unwrap_or_default(),
            lines,
        })
    }

    async fn command(&mut self, command: &str) -> Result<SmtpReply, SessionError> {
        let data = format!("{command}\r\n");
        timeout(self.command_timeout, self.writer.write_all(data.as_bytes()))
            .await
            .map_err(|_| SessionError::Timeout)??;
        self.read_reply().await
    }

    async fn quit(mut self) {
        let _ = timeout(QUIT_TIMEOUT, async {
            self.writer.write_all(b"QUIT\r\n").await?;
            self.writer.shutdown().await
        })
        .await;
    }
}

/// [`MailboxProber`] speaking plain SMTP over TCP.
pub struct SmtpProber {
    settings: SmtpSettings,
}

impl SmtpProber {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    /// Connects to `host`, trying the configured ports in order. Only a failed
    /// connection moves on to the next port.
    async fn connect(&self, host: &str) -> Result<(TcpStream, u16), SessionError> {
        let mut saw_timeout = false;
        let mut last_error = None;

        for &port in &self.settings.ports {
            match timeout(self.settings.connect_timeout, TcpStream::connect((host, port))).await {
                Ok(Ok(stream)) => return Ok((stream, port)),
                Ok(Err(err)) => {
                    debug!(host, port, error = %err, "smtp connect failed");
                    last_error = Some(err);
                }
                Err(_) => {
                    debug!(host, port, "smtp connect timed out");
                    saw_timeout = true;
                }
            }
        }

        match last_error {
            Some(err) if !saw_timeout => Err(SessionError::Io(err)),
            _ => Err(SessionError::Timeout),
        }
    }

    async fn dialogue(
        &self,
        session: &mut SmtpSession,
        email: &str,
        catch_all_address: Option<&str>,
    ) -> Result<(ProbeOutcome, Option<bool>), SessionError> {
        let banner = session.read_reply().await?;
        if let Some(outcome) = Self::early_failure(&banner) {
            return Ok((outcome, None));
        }

        let mut greeting = session
            .command(&format!("EHLO {}", self.settings.helo_domain))
            .await?;
        if greeting.is_permanent_failure() {
            greeting = session
                .command(&format!("HELO {}", self.settings.helo_domain))
                .await?;
        }
        if let Some(outcome) = Self::early_failure(&greeting) {
            return Ok((outcome, None));
        }

        let mail = session
            .command(&format!("MAIL FROM:<{}>", self.settings.mail_from))
            .await?;
        if let Some(outcome) = Self::early_failure(&mail) {
            return Ok((outcome, None));
        }

        let rcpt = session.command(&format!("RCPT TO:<{email}>")).await?;
        let outcome = match rcpt.code {
            250 | 251 => ProbeOutcome::Accepted {
                code: rcpt.code,
                mailbox_full: false,
            },
            552 => ProbeOutcome::Accepted {
                code: rcpt.code,
                mailbox_full: true,
            },
            code if rcpt.is_transient_failure() => ProbeOutcome::Deferred {
                code,
                message: rcpt.message(),
            },
            code => ProbeOutcome::Rejected {
                code,
                message: rcpt.message(),
            },
        };

        let catch_all = match (&outcome, catch_all_address) {
            (ProbeOutcome::Accepted { .. }, Some(address)) => {
                let reply = session.command(&format!("RCPT TO:<{address}>")).await?;
                if reply.is_positive_completion() {
                    Some(true)
                } else if reply.is_permanent_failure() {
                    Some(false)
                } else {
                    None
                }
            }
            _ => None,
        };

        Ok((outcome, catch_all))
    }

    fn early_failure(reply: &SmtpReply) -> Option<ProbeOutcome> {
        if reply.is_positive_completion() {
            None
        } else if reply.is_transient_failure() {
            Some(ProbeOutcome::Deferred {
                code: reply.code,
                message: reply.message(),
            })
        } else {
            Some(ProbeOutcome::Refused {
                code: reply.code,
                message: reply.message(),
            })
        }
    }

    async fn probe_host(
        &self,
        host: &str,
        email: &str,
        catch_all_address: Option<&str>,
    ) -> ProbeReport {
        let (stream, port) = match self.connect(host).await {
            Ok(connected) => connected,
            Err(SessionError::Timeout) => return ProbeReport::without_host(ProbeOutcome::Timeout),
            Err(_) => return ProbeReport::without_host(ProbeOutcome::NoConnect),
        };

        let mut session = SmtpSession::new(stream, self.settings.command_timeout);
        let result = self.dialogue(&mut session, email, catch_all_address).await;
        session.quit().await;

        let (outcome, catch_all) = match result {
            Ok(done) => done,
            Err(SessionError::Timeout) => (ProbeOutcome::Timeout, None),
            Err(err) => {
                debug!(host, port, error = ?err, "smtp session aborted");
                (ProbeOutcome::NoConnect, None)
            }
        };
        debug!(host, port, email, ?outcome, ?catch_all, "smtp probe finished");

        ProbeReport {
            outcome,
            catch_all,
            host: Some(host.to_string()),
        }
    }
}

#[async_trait]
impl MailboxProber for SmtpProber {
    async fn probe(
        &self,
        hosts: &[String],
        email: &str,
        catch_all_address: Option<String>,
    ) -> ProbeReport {
        let mut last = ProbeReport::without_host(ProbeOutcome::NoConnect);
        for host in hosts.iter().take(MAX_HOSTS) {
            let report = self
                .probe_host(host, email, catch_all_address.as_deref())
                .await;
            if report.outcome.is_completed_handshake() {
                return report;
            }
            last = report;
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// One-connection SMTP server answering `RCPT TO` through `rcpt`.
    async fn fake_server(
        rcpt: fn(&str) -> &'static str,
    ) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut reader = BufReader::new(read);
            let mut seen = Vec::new();
            write.write_all(b"220 fake.test ESMTP\r\n").await.unwrap();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                seen.push(line.clone());
                let reply = if line.starts_with("EHLO") {
                    "250-fake.test\r\n250 SIZE 1000000\r\n".to_string()
                } else if line.starts_with("MAIL FROM") {
                    "250 OK\r\n".to_string()
                } else if let Some(address) = line.strip_prefix("RCPT TO:") {
                    format!("{}\r\n", rcpt(address))
                } else if line == "QUIT" {
                    write.write_all(b"221 bye\r\n").await.ok();
                    break;
                } else {
                    "502 unknown\r\n".to_string()
                };
                write.write_all(reply.as_bytes()).await.unwrap();
            }
            seen
        });
        (port, handle)
    }

    fn settings(ports: Vec<u16>) -> SmtpSettings {
        SmtpSettings {
            ports,
            helo_domain: "probe.test".into(),
            mail_from: "postmaster@probe.test".into(),
            connect_timeout: Duration::from_millis(500),
            command_timeout: Duration::from_millis(500),
        }
    }

    fn hosts() -> Vec<String> {
        vec!["127.0.0.1".to_string()]
    }

    #[tokio::test]
    async fn test_accepted_mailbox_and_catch_all_probe() {
        let (port, server) = fake_server(|_| "250 2.1.5 OK").await;
        let prober = SmtpProber::new(settings(vec![port]));

        let report = prober
            .probe(&hosts(), "a@fake.test", Some("nonexistent1@fake.test".into()))
            .await;

        assert_eq!(
            report.outcome,
            ProbeOutcome::Accepted {
                code: 250,
                mailbox_full: false
            }
        );
        assert_eq!(report.catch_all, Some(true));
        let seen = server.await.unwrap();
        assert_eq!(seen[0], "EHLO probe.test");
        assert_eq!(seen[1], "MAIL FROM:<postmaster@probe.test>");
        assert_eq!(seen[2], "RCPT TO:<a@fake.test>");
        assert_eq!(seen[3], "RCPT TO:<nonexistent1@fake.test>");
    }

    #[tokio::test]
    async fn test_rejected_mailbox_skips_catch_all_probe() {
        let (port, server) = fake_server(|_| "550 5.1.1 user unknown").await;
        let prober = SmtpProber::new(settings(vec![port]));

        let report = prober
            .probe(&hosts(), "gone@fake.test", Some("probe@fake.test".into()))
            .await;

        assert_eq!(
            report.outcome,
            ProbeOutcome::Rejected {
                code: 550,
                message: "5.1.1 user unknown".into()
            }
        );
        assert_eq!(report.catch_all, None);
        let seen = server.await.unwrap();
        assert!(!seen.iter().any(|l| l.contains("probe@fake.test")));
    }

    #[tokio::test]
    async fn test_mailbox_full_and_not_catch_all() {
        let (port, _server) = fake_server(|address| {
            if address.contains("real") {
                "552 mailbox full"
            } else {
                "550 no such user"
            }
        })
        .await;
        let prober = SmtpProber::new(settings(vec![port]));

        let report = prober
            .probe(&hosts(), "real@fake.test", Some("random@fake.test".into()))
            .await;
        assert_eq!(
            report.outcome,
            ProbeOutcome::Accepted {
                code: 552,
                mailbox_full: true
            }
        );
        assert_eq!(report.catch_all, Some(false));
    }

    #[tokio::test]
    async fn test_greylisting_is_deferred() {
        let (port, _server) = fake_server(|_| "451 4.7.1 try again later").await;
        let prober = SmtpProber::new(settings(vec![port]));

        let report = prober.probe(&hosts(), "a@fake.test", None).await;
        assert!(matches!(report.outcome, ProbeOutcome::Deferred { code: 451, .. }));
        assert!(report.outcome.is_completed_handshake());
    }

    #[tokio::test]
    async fn test_falls_back_to_next_port_when_connect_fails() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);

        let (port, _server) = fake_server(|_| "250 OK").await;
        let prober = SmtpProber::new(settings(vec![closed_port, port]));

        let report = prober.probe(&hosts(), "a@fake.test", None).await;
        assert!(matches!(report.outcome, ProbeOutcome::Accepted { .. }));
    }

    #[tokio::test]
    async fn test_no_listener_is_no_connect() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);

        let prober = SmtpProber::new(settings(vec![closed_port]));
        let report = prober.probe(&hosts(), "a@fake.test", None).await;
        assert_eq!(report.outcome, ProbeOutcome::NoConnect);
        assert!(!report.outcome.is_completed_handshake());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            // Hold the connection open without ever greeting.
            let _ = stream.read(&mut buf).await;
        });

        let mut config = settings(vec![port]);
        config.command_timeout = Duration::from_millis(100);
        let prober = SmtpProber::new(config);

        let report = prober.probe(&hosts(), "a@fake.test", None).await;
        assert_eq!(report.outcome, ProbeOutcome::Timeout);
    }

    #[test]
    fn test_reply_classes() {
        let reply = SmtpReply {
            code: 421,
            lines: vec!["service".into(), "unavailable".into()],
        };
        assert!(reply.is_transient_failure());
        assert_eq!(reply.message(), "service unavailable");
        assert_eq!(
            SmtpProber::early_failure(&reply),
            Some(ProbeOutcome::Deferred {
                code: 421,
                message: "service unavailable".into()
            })
        );
    }
}
