//! SSH shell transport for CLI devices.
//!
//! Drives an interactive shell over async-ssh2-tokio/russh: a background
//! task bridges the SSH channel to mpsc pipes, and command completion is
//! detected by matching the device prompt at the tail of the output stream.
//! Pagination is disabled right after connect so command output arrives in
//! one piece.

use std::borrow::Cow;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use async_trait::async_trait;
use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use russh::{ChannelMsg, Preferred};
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::config;
use crate::error::ProbeError;
use crate::model::Credentials;
use crate::session::{CliConnector, CliTransport};

/// Matches a device prompt at the end of a chunk, e.g. `router#` or `sw1>`.
static PROMPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w\-.:/()]+[>#]\s*$").expect("prompt regex"));

const SSH_PORT: u16 = 22;

/// Connector producing [`SshTransport`] shells.
pub struct SshConnector;

#[async_trait]
impl CliConnector for SshConnector {
    async fn connect(
        &self,
        addr: Ipv4Addr,
        credentials: &Credentials,
    ) -> Result<Box<dyn CliTransport>, ProbeError> {
        let transport = SshTransport::connect(addr, credentials).await?;
        Ok(Box::new(transport))
    }
}

/// An interactive SSH shell session to one device.
pub struct SshTransport {
    client: Client,
    sender: Sender<String>,
    recv: Receiver<String>,
    prompt: String,
}

impl SshTransport {
    /// Opens the connection, requests a PTY + shell, waits for the first
    /// prompt and disables output pagination.
    pub async fn connect(addr: Ipv4Addr, credentials: &Credentials) -> Result<Self, ProbeError> {
        let ssh_config = Config {
            preferred: Preferred {
                kex: Cow::Borrowed(config::KEX_ORDER),
                key: Cow::Borrowed(config::KEY_TYPES),
                cipher: Cow::Borrowed(config::CIPHERS),
                mac: Cow::Borrowed(config::MAC_ALGORITHMS),
                compression: Cow::Borrowed(config::COMPRESSION_ALGORITHMS),
            },
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let client = tokio::time::timeout(
            config::CONNECT_TIMEOUT,
            Client::connect_with_config(
                (addr.to_string(), SSH_PORT),
                &credentials.username,
                AuthMethod::with_password(&credentials.password),
                ServerCheckMethod::NoCheck,
                ssh_config,
            ),
        )
        .await
        .map_err(|_| ProbeError::Connection(format!("{addr}: connect timed out")))??;
        debug!("{addr}: TCP connection successful");

        let mut channel = client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{addr}: shell request successful");

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(data) = receiver_from_user.recv() => {
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{addr}: failed to send data to shell: {e:?}");
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                if let Ok(s) = std::str::from_utf8(data)
                                    && sender_to_user.send(s.to_string()).await.is_err() {
                                        debug!("{addr}: shell output receiver dropped, closing task");
                                        break;
                                    }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{addr}: shell exited with status {exit_status}");
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{addr}: shell sent EOF");
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
            debug!("{addr}: SSH I/O task ended");
        });

        let mut transport = Self {
            client,
            sender: sender_to_shell,
            recv: receiver_from_shell,
            prompt: String::new(),
        };

        // Banner and login output end with the first prompt.
        transport.prompt = transport.wait_for_prompt(config::CONNECT_TIMEOUT).await?;
        debug!("{addr}: detected prompt {:?}", transport.prompt);

        // Keep multi-page output from stalling on a pagination prompt.
        transport.issue("terminal length 0").await?;

        Ok(transport)
    }

    /// Reads from the shell until the trailing line looks like a prompt.
    async fn wait_for_prompt(&mut self, deadline: Duration) -> Result<String, ProbeError> {
        let mut buffer = String::new();
        let recv = &mut self.recv;
        let result = tokio::time::timeout(deadline, async {
            loop {
                match recv.recv().await {
                    Some(data) => {
                        trace!("{data:?}");
                        buffer.push_str(&data);
                        let tail = buffer.rsplit(['\n', '\r']).next().unwrap_or("");
                        if !tail.is_empty() && PROMPT_RE.is_match(tail) {
                            return Ok(tail.trim().to_string());
                        }
                    }
                    None => return Err(ProbeError::ChannelClosed),
                }
            }
        })
        .await;
        match result {
            Ok(prompt) => prompt,
            Err(_) => Err(ProbeError::Timeout(buffer)),
        }
    }

    /// Sends one command line and collects output up to the next prompt.
    async fn issue(&mut self, command: &str) -> Result<String, ProbeError> {
        // Discard residual data from earlier interactions.
        while self.recv.try_recv().is_ok() {}

        self.sender
            .send(format!("{command}\n"))
            .await
            .map_err(|_| ProbeError::ChannelClosed)?;

        let mut output = String::new();
        let recv = &mut self.recv;
        let prompt = &mut self.prompt;
        let result = tokio::time::timeout(config::COMMAND_TIMEOUT, async {
            loop {
                match recv.recv().await {
                    Some(data) => {
                        output.push_str(&data);
                        let tail = output.rsplit(['\n', '\r']).next().unwrap_or("");
                        if !tail.is_empty() && PROMPT_RE.is_match(tail) {
                            *prompt = tail.trim().to_string();
                            return Ok(());
                        }
                    }
                    None => return Err(ProbeError::ChannelClosed),
                }
            }
        })
        .await;
        match result {
            Ok(done) => done?,
            Err(_) => return Err(ProbeError::Timeout(output)),
        }

        Ok(strip_echo_and_prompt(&output, command))
    }
}

/// Removes the echoed command from the head of the output and the trailing
/// prompt line from its tail.
fn strip_echo_and_prompt(output: &str, command: &str) -> String {
    let mut content = output;
    if !command.is_empty() {
        if let Some(stripped) = content.trim_start_matches(['\r', '\n']).strip_prefix(command) {
            content = stripped.trim_start_matches(['\r', '\n']);
        }
    }
    match content.rfind('\n') {
        Some(pos) => content[..pos].trim_end_matches('\r').to_string(),
        None => String::new(),
    }
}

#[async_trait]
impl CliTransport for SshTransport {
    async fn find_prompt(&mut self) -> Result<String, ProbeError> {
        if self.client.is_closed() {
            return Err(ProbeError::ChannelClosed);
        }
        while self.recv.try_recv().is_ok() {}
        self.sender
            .send("\n".to_string())
            .await
            .map_err(|_| ProbeError::ChannelClosed)?;
        let prompt = self.wait_for_prompt(config::LIVENESS_TIMEOUT).await?;
        self.prompt = prompt.clone();
        Ok(prompt)
    }

    async fn send_command(&mut self, command: &str) -> Result<String, ProbeError> {
        self.issue(command).await
    }

    async fn disconnect(&mut self) {
        self.recv.close();
        // Best-effort graceful exit; the channel task tears down on EOF.
        let _ = self.sender.send("exit\n".to_string()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_regex_matches_common_device_prompts() {
        assert!(PROMPT_RE.is_match("router#"));
        assert!(PROMPT_RE.is_match("sw-core-1> "));
        assert!(PROMPT_RE.is_match("edge(config)#"));
        assert!(!PROMPT_RE.is_match("CPU utilization for five seconds"));
        assert!(!PROMPT_RE.is_match(""));
    }

    #[test]
    fn echo_and_prompt_are_stripped_from_output() {
        let raw = "show clock\r\n10:41:02.663 UTC\r\nrouter#";
        assert_eq!(strip_echo_and_prompt(raw, "show clock"), "10:41:02.663 UTC");
    }

    #[test]
    fn output_without_newline_collapses_to_empty() {
        assert_eq!(strip_echo_and_prompt("router#", ""), "");
    }
}
