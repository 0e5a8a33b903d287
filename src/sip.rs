//! Minimal single-dialog SIP UAS: handles INVITE (answers with a fixed
//! PCMU/8000 SDP body) and BYE, nothing else.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const RECV_POLL: std::time::Duration = std::time::Duration::from_millis(200);
const MAX_SIP_DATAGRAM: usize = 4096;

/// Callbacks the SIP server drives as a call starts and ends. Replaces the
/// original closure-list registration with a single typed capability so
/// call lifecycle ordering (RTP RX, then TX, then conversation; reverse
/// order on teardown) lives in one place.
#[async_trait::async_trait]
pub trait CallHandler: Send + Sync {
    async fn on_incoming_call(&self, peer_addr: SocketAddr, peer_rtp_port: u16);
    async fn on_call_ended(&self);
}

pub struct SIPServer {
    socket: UdpSocket,
    bind_addr: SocketAddr,
    in_call: AtomicBool,
}

impl SIPServer {
    pub async fn bind(addr: &str) -> anyhow::Result<Self> {
        let bind_addr: SocketAddr = addr.parse()?;
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(Self { socket, bind_addr, in_call: AtomicBool::new(false) })
    }

    pub async fn run(
        self: Arc<Self>,
        handler: Arc<dyn CallHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        info!(addr = %self.bind_addr, "SIP server started");

        let mut buf = [0u8; MAX_SIP_DATAGRAM];
        loop {
            if *shutdown.borrow() {
                break;
            }

            let recv = tokio::time::timeout(RECV_POLL, self.socket.recv_from(&mut buf));
            let (len, from) = match recv.await {
                Ok(Ok(v)) => v,
                Ok(Err(e)) => {
                    warn!(error = %e, "SIP receive error");
                    continue;
                }
                Err(_) => continue,
            };

            let request = match SIPRequest::parse(&buf[..len], from) {
                Some(r) => r,
                None => {
                    debug!("dropped malformed SIP datagram");
                    continue;
                }
            };

            info!(method = %request.method, "incoming SIP request");
            self.handle_request(&request, &handler).await;
        }

        info!("SIP server stopped");
        Ok(())
    }

    async fn handle_request(&self, request: &SIPRequest, handler: &Arc<dyn CallHandler>) {
        match request.method.as_str() {
            "INVITE" => self.handle_invite(request, handler).await,
            "BYE" => self.handle_bye(request, handler).await,
            other => debug!(method = other, "ignoring unsupported SIP method"),
        }
    }

    async fn handle_invite(&self, request: &SIPRequest, handler: &Arc<dyn CallHandler>) {
        if self.in_call.load(Ordering::SeqCst) {
            debug!("INVITE received while already in a call, ignoring");
            return;
        }

        let mut response = SipResponse::new(200, "OK");
        for key in ["Via", "To", "From", "Call-ID", "CSeq"] {
            if let Some(v) = request.headers.get(key) {
                response.headers.insert(key.to_string(), v.clone());
            }
        }
        if let Some(to) = request.headers.get("To") {
            response.headers.insert("Contact".to_string(), to.clone());
        }
        response.headers.insert("Content-type".to_string(), "application/sdp".to_string());

        let to_host = request
            .headers
            .get("To")
            .and_then(|to| extract_sip_host(to))
            .unwrap_or_else(|| "0.0.0.0".to_string());

        response.body = Some(sdp_answer(&to_host));

        let _ = self.socket.send_to(&response.to_bytes(), request.from_addr).await;
        self.in_call.store(true, Ordering::SeqCst);
        info!(status = response.status_code, "SIP response sent");

        let Some(port) = request.body.as_deref().and_then(extract_rtp_port) else {
            return;
        };

        debug!(peer = %request.from_addr.ip(), port, "dispatching incoming call to handler");
        handler.on_incoming_call(request.from_addr, port).await;
    }

    async fn handle_bye(&self, request: &SIPRequest, handler: &Arc<dyn CallHandler>) {
        if !self.in_call.load(Ordering::SeqCst) {
            debug!("BYE received while not in a call, ignoring");
            return;
        }
        self.in_call.store(false, Ordering::SeqCst);

        let mut response = SipResponse::new(200, "OK");
        for key in ["Via", "To", "From", "Call-ID", "CSeq"] {
            if let Some(v) = request.headers.get(key) {
                response.headers.insert(key.to_string(), v.clone());
            }
        }
        if let Some(to) = request.headers.get("To") {
            response.headers.insert("Contact".to_string(), to.clone());
        }

        let _ = self.socket.send_to(&response.to_bytes(), request.from_addr).await;
        info!(status = response.status_code, "SIP response sent");

        handler.on_call_ended().await;
    }
}

/// Build the fixed SDP answer body advertising PCMU/8000 on port 5004.
fn sdp_answer(host: &str) -> String {
    format!(
        "v=0\r\n\
         o=RotaryGPT 1 1 IN IP4 {host}\r\n\
         s=SIP Call\r\n\
         c=IN IP4 {host}\r\n\
         t=0 0\r\n\
         m=audio 5004 RTP/AVP 0\r\n\
         a=sendrecv\r\n\
         a=rtpmap:0 PCMU/8000\r\n\
         a=ptime:20\r\n"
    )
}

fn extract_rtp_port(sdp_body: &str) -> Option<u16> {
    for line in sdp_body.lines() {
        if let Some(rest) = line.strip_prefix("m=audio ") {
            let port_str = rest.split_whitespace().next()?;
            return port_str.parse().ok();
        }
    }
    None
}

/// Extract the host portion of a `sip:host` URI from a `To`/`From` header
/// value, which may be wrapped in `<...>` and carry a display name.
fn extract_sip_host(header_value: &str) -> Option<String> {
    let trimmed = header_value.trim().trim_start_matches(|c| c != '<' && c != 's').trim();
    let candidate = trimmed.trim_matches(|c| c == '<' || c == '>' || c == ' ');
    let idx = candidate.find("sip:")?;
    let after = &candidate[idx + 4..];
    let host: String = after
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '-')
        .collect();
    if host.is_empty() { None } else { Some(host) }
}

#[derive(Debug, Clone)]
pub struct SIPRequest {
    pub from_addr: SocketAddr,
    pub method: String,
    pub uri: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl SIPRequest {
    /// Parse a SIP request from one UDP datagram. Real UAC traffic for
    /// this protocol always places the full header and body in a single
    /// datagram, so no follow-up read is attempted here.
    fn parse(data: &[u8], from_addr: SocketAddr) -> Option<Self> {
        let text = String::from_utf8_lossy(data);
        let (header_part, body_part) = match text.split_once("\r\n\r\n") {
            Some((h, b)) => (h, Some(b.to_string())),
            None => (text.as_ref(), None),
        };

        let mut lines = header_part.split("\r\n");
        let request_line = lines.next()?;
        let mut parts = request_line.splitn(3, ' ');
        let method = parts.next()?.to_string();
        let uri = parts.next()?.to_string();

        let mut headers = BTreeMap::new();
        for line in lines {
            if let Some((key, value)) = line.split_once(':') {
                headers.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        let body = body_part.filter(|b| !b.is_empty());

        Some(Self { from_addr, method, uri, headers, body })
    }
}

pub struct SipResponse {
    pub status_code: u32,
    pub status_message: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl SipResponse {
    pub fn new(status_code: u32, status_message: &str) -> Self {
        Self {
            status_code,
            status_message: status_message.to_string(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut message = format!("SIP/2.0 {} {}\r\n", self.status_code, self.status_message);

        let content_length = self.body.as_ref().map(|b| b.len()).unwrap_or(0);
        for (key, value) in &self.headers {
            message.push_str(&format!("{key}: {value}\r\n"));
        }
        message.push_str(&format!("Content-Length: {content_length}\r\n"));
        message.push_str("\r\n");
        if let Some(body) = &self.body {
            message.push_str(body);
        }

        message.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:5060".parse().unwrap()
    }

    #[test]
    fn test_parse_invite_request() {
        let raw = b"INVITE sip:agent@10.0.0.1 SIP/2.0\r\n\
Via: SIP/2.0/UDP 10.0.0.2:5060\r\n\
To: <sip:agent@10.0.0.1>\r\n\
From: <sip:caller@10.0.0.2>\r\n\
Call-ID: abc123\r\n\
CSeq: 1 INVITE\r\n\
Content-Length: 10\r\n\r\nm=audio 12";
        let req = SIPRequest::parse(raw, addr()).unwrap();
        assert_eq!(req.method, "INVITE");
        assert_eq!(req.headers.get("Call-ID").unwrap(), "abc123");
        assert_eq!(req.body.as_deref(), Some("m=audio 12"));
    }

    #[test]
    fn test_extract_rtp_port_from_sdp() {
        let sdp = "v=0\r\nm=audio 40404 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\n";
        assert_eq!(extract_rtp_port(sdp), Some(40404));
    }

    #[test]
    fn test_extract_rtp_port_missing() {
        let sdp = "v=0\r\ns=SIP Call\r\n";
        assert_eq!(extract_rtp_port(sdp), None);
    }

    #[test]
    fn test_extract_sip_host_strips_uri_scheme() {
        assert_eq!(extract_sip_host("<sip:10.0.0.1>").as_deref(), Some("10.0.0.1"));
        assert_eq!(extract_sip_host("sip:example.com").as_deref(), Some("example.com"));
    }

    #[test]
    fn test_sdp_answer_advertises_pcmu_8000() {
        let body = sdp_answer("10.0.0.1");
        assert!(body.contains("m=audio 5004 RTP/AVP 0"));
        assert!(body.contains("a=rtpmap:0 PCMU/8000"));
        assert!(body.contains("a=ptime:20"));
    }

    #[test]
    fn test_response_echoes_headers_and_sets_content_length() {
        let mut resp = SipResponse::new(200, "OK");
        resp.headers.insert("Call-ID".to_string(), "abc123".to_string());
        resp.body = Some("hello".to_string());
        let bytes = resp.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("SIP/2.0 200 OK\r\n"));
        assert!(text.contains("Call-ID: abc123\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("hello"));
    }

    #[test]
    fn test_response_with_no_body_has_zero_content_length() {
        let resp = SipResponse::new(200, "OK");
        let text = String::from_utf8(resp.to_bytes()).unwrap();
        assert!(text.contains("Content-Length: 0\r\n"));
    }
}
