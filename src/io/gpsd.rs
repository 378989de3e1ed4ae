//! gpsd client location provider
//!
//! Protocol:
//! - Connect to gpsd (default 127.0.0.1:2947) over TCP
//! - Send `?WATCH={"enable":true,"json":true};`
//! - gpsd streams one JSON object per line; `TPV` objects with
//!   `mode >= 2` carry a 2D/3D fix in `lat`/`lon`
//!
//! Each subscription owns its own connection and reconnects with a fixed
//! backoff until the receiver is dropped.

use crate::domain::types::{Coordinate, LocationFix};
use crate::io::location::{LocationError, LocationProvider, LocationRequest, SUBSCRIPTION_BUFFER};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
struct GpsdReport {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Extract a coordinate from a gpsd line, if it is a TPV report with a fix
pub fn parse_tpv(line: &str) -> Option<Coordinate> {
    let report: GpsdReport = serde_json::from_str(line).ok()?;
    if report.class != "TPV" || report.mode < 2 {
        return None;
    }
    Coordinate::new(report.lat?, report.lon?).ok()
}

pub struct GpsdLocationProvider {
    addr: String,
    /// Most recent fix seen by any subscription
    last_fix: Arc<Mutex<Option<LocationFix>>>,
}

impl GpsdLocationProvider {
    pub fn new(addr: &str) -> Self {
        info!(addr = %addr, "gpsd_provider_initialized");
        Self { addr: addr.to_string(), last_fix: Arc::new(Mutex::new(None)) }
    }

    async fn connect(addr: &str) -> Result<BufReader<TcpStream>, LocationError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| LocationError::Unavailable(format!("gpsd connect timeout {addr}")))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => LocationError::PermissionDenied,
                _ => LocationError::Unavailable(format!("gpsd {addr}: {e}")),
            })?;
        let mut reader = BufReader::new(stream);
        reader
            .get_mut()
            .write_all(WATCH_COMMAND)
            .await
            .map_err(|e| LocationError::Unavailable(e.to_string()))?;
        Ok(reader)
    }

    /// Read lines until the first TPV fix
    async fn next_fix(reader: &mut BufReader<TcpStream>) -> Result<Coordinate, LocationError> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .await
                .map_err(|e| LocationError::Unavailable(e.to_string()))?;
            if n == 0 {
                return Err(LocationError::Unavailable("gpsd closed the connection".to_string()));
            }
            if let Some(coordinate) = parse_tpv(&line) {
                return Ok(coordinate);
            }
        }
    }

    async fn stream_fixes(
        addr: String,
        request: LocationRequest,
        tx: mpsc::Sender<LocationFix>,
        last_fix: Arc<Mutex<Option<LocationFix>>>,
    ) {
        let mut last_sent: Option<tokio::time::Instant> = None;

        'reconnect: while !tx.is_closed() {
            let mut reader = match Self::connect(&addr).await {
                Ok(reader) => reader,
                Err(e) => {
                    warn!(addr = %addr, error = %e, "gpsd_connect_failed");
                    tokio::select! {
                        _ = tx.closed() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                    }
                }
            };
            info!(addr = %addr, "gpsd_connected");

            loop {
                let coordinate = tokio::select! {
                    _ = tx.closed() => break 'reconnect,
                    result = Self::next_fix(&mut reader) => match result {
                        Ok(c) => c,
                        Err(e) => {
                            error!(error = %e, "gpsd_read_failed");
                            continue 'reconnect;
                        }
                    },
                };

                let fix = LocationFix::new(coordinate);
                *last_fix.lock() = Some(fix.clone());

                // gpsd reports every second; pace delivery to the requested interval
                let now = tokio::time::Instant::now();
                if last_sent.is_some_and(|t| now.duration_since(t) < request.interval) {
                    continue;
                }
                last_sent = Some(now);

                if tx.send(fix).await.is_err() {
                    break 'reconnect;
                }
            }
        }
        debug!(addr = %addr, "gpsd_subscription_closed");
    }
}

#[async_trait]
impl LocationProvider for GpsdLocationProvider {
    async fn subscribe(
        &self,
        request: LocationRequest,
    ) -> Result<mpsc::Receiver<LocationFix>, LocationError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(Self::stream_fixes(self.addr.clone(), request, tx, self.last_fix.clone()));
        Ok(rx)
    }

    /// Cached fix if any subscription has seen one, otherwise one fresh fix
    async fn last_known(&self) -> Result<Option<LocationFix>, LocationError> {
        if let Some(fix) = self.last_fix.lock().clone() {
            return Ok(Some(fix));
        }

        let mut reader = Self::connect(&self.addr).await?;
        let coordinate = Self::next_fix(&mut reader).await?;
        let fix = LocationFix::new(coordinate);
        *self.last_fix.lock() = Some(fix.clone());
        Ok(Some(fix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_tpv_with_fix() {
        let line = r#"{"class":"TPV","device":"/dev/ttyACM0","mode":3,"lat":37.422,"lon":-122.084,"alt":12.0}"#;
        assert_eq!(parse_tpv(line), Some(Coordinate::new(37.422, -122.084).unwrap()));
    }

    #[test]
    fn test_parse_tpv_ignores_other_reports() {
        assert_eq!(parse_tpv(r#"{"class":"VERSION","release":"3.25"}"#), None);
        assert_eq!(parse_tpv(r#"{"class":"TPV","mode":1}"#), None);
        assert_eq!(parse_tpv(r#"{"class":"TPV","mode":2,"lat":37.0}"#), None);
        assert_eq!(parse_tpv("not json"), None);
    }

    #[tokio::test]
    async fn test_last_known_reads_first_fix_from_gpsd() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
            socket
                .write_all(
                    b"{\"class\":\"VERSION\"}\n{\"class\":\"TPV\",\"mode\":2,\"lat\":1.5,\"lon\":2.5}\n",
                )
                .await
                .unwrap();
        });

        let provider = GpsdLocationProvider::new(&addr);
        let fix = provider.last_known().await.unwrap().unwrap();
        assert_eq!(fix.coordinate, Coordinate::new(1.5, 2.5).unwrap());
    }

    #[tokio::test]
    async fn test_last_known_unreachable_is_unavailable() {
        let provider = GpsdLocationProvider::new("127.0.0.1:9");
        assert!(matches!(provider.last_known().await, Err(LocationError::Unavailable(_))));
    }
}
