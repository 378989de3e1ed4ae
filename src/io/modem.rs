//! GSM modem SMS channel over a serial line
//!
//! Protocol (3GPP TS 27.005, text mode):
//! - `AT+CMGF=1\r` → `OK`
//! - `AT+CMGS="<number>"\r` → `> ` prompt
//! - `<body>` followed by Ctrl-Z (0x1A) → `+CMGS: <ref>` ... `OK`
//! - Failures answer `ERROR` or `+CMS ERROR: <code>`
//!
//! The port is opened lazily and kept; an I/O error drops it so the next
//! send reopens. One AT session runs at a time on the line.

use crate::io::gateway::{DispatchError, MessagingChannel};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

const CTRL_Z: u8 = 0x1A;
const ESC: u8 = 0x1B;

/// Maximum bytes buffered while waiting for one reply
const MAX_REPLY_LEN: usize = 1024;

/// GSM 7-bit text mode allows 160 characters per single message
pub const MAX_SMS_LEN: usize = 160;

/// Classified modem output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemReply {
    /// Final `OK`
    Ok,
    /// `> ` prompt waiting for message text
    Prompt,
    /// `ERROR` or `+CMS ERROR: ...`
    Error(String),
    /// Need more bytes
    Pending,
}

/// Classify accumulated modem output
pub fn parse_modem_reply(buf: &[u8]) -> ModemReply {
    let text = String::from_utf8_lossy(buf);

    for line in text.split(&['\r', '\n'][..]).map(str::trim) {
        if line == "OK" {
            return ModemReply::Ok;
        }
        if line == "ERROR" || line.starts_with("+CMS ERROR") || line.starts_with("+CME ERROR") {
            return ModemReply::Error(line.to_string());
        }
    }

    if text.trim_end_matches(' ').ends_with('>') {
        return ModemReply::Prompt;
    }

    ModemReply::Pending
}

/// Numbers are quoted in the AT command, so only dialable characters pass
fn validate_number(to: &str) -> Result<(), DispatchError> {
    let digits = to.strip_prefix('+').unwrap_or(to);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(DispatchError::MalformedTarget(format!("not a dialable number: {to}")));
    }
    Ok(())
}

pub struct ModemSmsChannel {
    device: String,
    baud: u32,
    reply_timeout: Duration,
    port: Mutex<Option<SerialStream>>,
}

impl ModemSmsChannel {
    pub fn new(device: &str, baud: u32, reply_timeout: Duration) -> Self {
        info!(device = %device, baud = %baud, "modem_sms_channel_initialized");
        Self { device: device.to_string(), baud, reply_timeout, port: Mutex::new(None) }
    }

    fn open(&self) -> Result<SerialStream, DispatchError> {
        tokio_serial::new(&self.device, self.baud).open_native_async().map_err(|e| {
            if e.kind() == tokio_serial::ErrorKind::NoDevice {
                DispatchError::Unavailable(format!("{}: {}", self.device, e))
            } else if let tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) =
                e.kind()
            {
                DispatchError::PermissionDenied(format!("{}: {}", self.device, e))
            } else {
                DispatchError::Unavailable(format!("{}: {}", self.device, e))
            }
        })
    }

    /// Write a command and wait for the expected reply
    async fn exchange(
        &self,
        port: &mut SerialStream,
        command: &[u8],
        expect: ModemReply,
    ) -> Result<(), DispatchError> {
        port.write_all(command).await.map_err(|e| DispatchError::Transport(e.to_string()))?;

        let mut buf = Vec::with_capacity(64);
        let mut chunk = [0u8; 64];
        let deadline = tokio::time::Instant::now() + self.reply_timeout;

        loop {
            let read = tokio::time::timeout_at(deadline, port.read(&mut chunk))
                .await
                .map_err(|_| DispatchError::Transport("modem reply timeout".to_string()))?
                .map_err(|e| DispatchError::Transport(e.to_string()))?;
            if read == 0 {
                return Err(DispatchError::Transport("modem closed the line".to_string()));
            }
            buf.extend_from_slice(&chunk[..read]);

            match parse_modem_reply(&buf) {
                ModemReply::Pending if buf.len() < MAX_REPLY_LEN => continue,
                ModemReply::Pending => {
                    return Err(DispatchError::Transport("modem reply too long".to_string()))
                }
                ModemReply::Error(e) => return Err(DispatchError::Transport(e)),
                reply if reply == expect => {
                    debug!(reply = ?reply, "modem_reply");
                    return Ok(());
                }
                // e.g. a stray OK while waiting for the prompt
                _ => continue,
            }
        }
    }

    async fn session(
        &self,
        port: &mut SerialStream,
        to: &str,
        body: &str,
    ) -> Result<(), DispatchError> {
        self.exchange(port, b"AT+CMGF=1\r", ModemReply::Ok).await?;
        self.exchange(port, format!("AT+CMGS=\"{}\"\r", to).as_bytes(), ModemReply::Prompt).await?;

        let mut text = body.as_bytes().to_vec();
        text.push(CTRL_Z);
        if let Err(e) = self.exchange(port, &text, ModemReply::Ok).await {
            // Leave the modem out of text-entry mode
            let _ = port.write_all(&[ESC]).await;
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingChannel for ModemSmsChannel {
    fn name(&self) -> &'static str {
        "modem"
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<(), DispatchError> {
        validate_number(to)?;
        if body.len() > MAX_SMS_LEN {
            warn!(len = %body.len(), max = %MAX_SMS_LEN, "modem_body_exceeds_single_sms");
        }

        let mut guard = self.port.lock().await;
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        let Some(port) = guard.as_mut() else {
            return Err(DispatchError::Unavailable(self.device.clone()));
        };

        let result = self.session(port, to, body).await;
        if let Err(DispatchError::Transport(ref e)) = result {
            warn!(device = %self.device, error = %e, "modem_session_failed_reopening");
            *guard = None;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ok_and_prompt() {
        assert_eq!(parse_modem_reply(b"AT+CMGF=1\r\r\nOK\r\n"), ModemReply::Ok);
        assert_eq!(parse_modem_reply(b"\r\n> "), ModemReply::Prompt);
        assert_eq!(parse_modem_reply(b"\r\n+CMGS: 12\r\n\r\nOK\r\n"), ModemReply::Ok);
    }

    #[test]
    fn test_parse_errors_and_pending() {
        assert_eq!(
            parse_modem_reply(b"\r\n+CMS ERROR: 330\r\n"),
            ModemReply::Error("+CMS ERROR: 330".to_string())
        );
        assert_eq!(parse_modem_reply(b"\r\nERROR\r\n"), ModemReply::Error("ERROR".to_string()));
        assert_eq!(parse_modem_reply(b"\r\n+CMGS: 1"), ModemReply::Pending);
        assert_eq!(parse_modem_reply(b""), ModemReply::Pending);
    }

    #[test]
    fn test_validate_number() {
        assert!(validate_number("+15551234").is_ok());
        assert!(validate_number("0711").is_ok());
        assert!(validate_number("+").is_err());
        assert!(validate_number("555\"\rATD").is_err());
    }

    #[tokio::test]
    async fn test_missing_device_is_unavailable() {
        let channel =
            ModemSmsChannel::new("/dev/does-not-exist-modem", 115200, Duration::from_millis(100));
        let err = channel.send_text("+15551234", ".-").await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Unavailable(_) | DispatchError::PermissionDenied(_)
        ));
    }
}
