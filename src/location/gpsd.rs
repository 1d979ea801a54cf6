//! A gpsd client speaking the JSON watch protocol over TCP.

use super::{FixMailbox, LocationError, LocationProvider, LocationRequest};
use crate::core::LocationFix;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, instrument, trace};

const PROVIDER: &str = "gps";
const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";
const POLL_COMMAND: &[u8] = b"?WATCH={\"enable\":true};?POLL;\n";
const LAST_KNOWN_TIMEOUT: Duration = Duration::from_secs(3);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Reports gpsd emits that we care about.
#[derive(Debug, Deserialize)]
#[serde(tag = "class")]
enum Report {
    #[serde(rename = "TPV")]
    Tpv(Tpv),
    #[serde(rename = "POLL")]
    Poll {
        #[serde(default)]
        tpv: Vec<Tpv>,
    },
    #[serde(other)]
    Other,
}

/// Time-position-velocity report.
#[derive(Debug, Default, Deserialize)]
struct Tpv {
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    epx: Option<f64>,
    epy: Option<f64>,
    eph: Option<f64>,
}

impl Tpv {
    /// Converts a report with at least a 2D fix.
    fn to_fix(&self) -> Option<LocationFix> {
        if self.mode < 2 {
            return None;
        }
        let mut fix = LocationFix::at(self.lat?, self.lon?).with_provider(PROVIDER);
        let accuracy = match (self.epx, self.epy) {
            (Some(x), Some(y)) => Some(x.max(y)),
            _ => self.eph,
        };
        fix.accuracy = accuracy.map(|a| a as f32);
        Some(fix)
    }
}

/// Parses one line from gpsd into the fixes it carries.
fn parse_line(line: &str) -> Vec<LocationFix> {
    match serde_json::from_str::<Report>(line) {
        Ok(Report::Tpv(tpv)) => tpv.to_fix().into_iter().collect(),
        Ok(Report::Poll { tpv }) => tpv.iter().filter_map(Tpv::to_fix).collect(),
        Ok(Report::Other) => Vec::new(),
        Err(e) => {
            trace!(error = %e, "Ignoring unparsable gpsd line");
            Vec::new()
        }
    }
}

/// Location from a local gpsd daemon.
#[derive(Debug, Clone)]
pub struct GpsdProvider {
    addr: String,
    connect_timeout: Duration,
}

impl GpsdProvider {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Bounds connecting and sending the opening command.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    async fn connect(&self, command: &[u8]) -> Result<TcpStream, LocationError> {
        let open = async {
            let mut stream = TcpStream::connect(&self.addr).await?;
            stream.write_all(command).await?;
            Ok::<_, std::io::Error>(stream)
        };
        timeout(self.connect_timeout, open)
            .await
            .map_err(|_| LocationError::unavailable(PROVIDER, "timed out connecting to gpsd"))?
            .map_err(|e| LocationError::unavailable(PROVIDER, e))
    }
}

async fn stream_fixes(stream: TcpStream, request: LocationRequest, mailbox: FixMailbox) {
    let mut lines = BufReader::new(stream).lines();
    let mut last_post: Option<Instant> = None;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("gpsd closed the connection");
                break;
            }
            Err(e) => {
                debug!(error = %e, "gpsd read failed");
                break;
            }
        };
        for fix in parse_line(&line) {
            let now = Instant::now();
            if last_post.is_some_and(|last| now.duration_since(last) < request.min_interval) {
                continue;
            }
            last_post = Some(now);
            mailbox.post(fix);
        }
    }
}

#[async_trait]
impl LocationProvider for GpsdProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    #[instrument(skip(self, mailbox), fields(addr = %self.addr))]
    async fn request_updates(
        &self,
        request: LocationRequest,
        mailbox: FixMailbox,
    ) -> Result<JoinHandle<()>, LocationError> {
        let stream = self.connect(WATCH_COMMAND).await?;
        Ok(tokio::spawn(stream_fixes(stream, request, mailbox)))
    }

    async fn last_known(&self) -> Result<Option<LocationFix>, LocationError> {
        let query = async {
            let stream = self.connect(POLL_COMMAND).await?;
            let mut lines = BufReader::new(stream).lines();
            while let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| LocationError::unavailable(PROVIDER, e))?
            {
                if let Ok(Report::Poll { tpv }) = serde_json::from_str::<Report>(&line) {
                    return Ok(tpv.iter().find_map(Tpv::to_fix));
                }
            }
            Ok::<_, LocationError>(None)
        };
        timeout(LAST_KNOWN_TIMEOUT, query)
            .await
            .map_err(|_| LocationError::unavailable(PROVIDER, "timed out waiting for POLL"))?
    }
}
