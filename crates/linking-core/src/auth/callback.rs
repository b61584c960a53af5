//! ============================================================================
//! OAuth Callback Listener
//! ============================================================================
//! Serves the fixed callback route named by the configured redirect URI and
//! hands back the provider's query parameters. Requests to any other path
//! get a 404 and are ignored.
//! ============================================================================

use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tiny_http::{Header, Request, Response, Server};
use tracing::{debug, info, warn};
use url::Url;

use crate::types::CallbackParams;

const RECEIVED_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>XLink - Authorization received</title></head>
<body style="font-family: monospace; text-align: center; padding-top: 20vh;">
    <h1>Authorization received</h1>
    <p>Return to your terminal to see the linking result. You can close this window.</p>
</body>
</html>
"#;

/// Blocking listener for the provider redirect
pub struct CallbackListener {
    server: Server,
    path: String,
}

impl CallbackListener {
    /// Bind `addr` and serve the path of `redirect_uri`
    pub fn bind(addr: SocketAddr, redirect_uri: &Url) -> Result<Self> {
        let server = Server::http(addr)
            .map_err(|e| anyhow!("Failed to start callback server on {}: {}", addr, e))?;

        info!("Callback listener on {} for {}", addr, redirect_uri.path());
        Ok(Self {
            server,
            path: redirect_uri.path().to_string(),
        })
    }

    /// Actual bound address (useful when binding port 0)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Wait for the provider to hit the callback route.
    /// Blocks until a callback arrives or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Result<CallbackParams> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(anyhow!("Callback server timed out waiting for response"));
            }

            let request = self
                .server
                .recv_timeout(remaining)
                .map_err(|e| anyhow!("Callback server error: {}", e))?
                .ok_or_else(|| anyhow!("Callback server timed out waiting for response"))?;

            if let Some(params) = self.accept(request) {
                return Ok(params);
            }
        }
    }

    /// Answer one request; returns the parameters if it was the callback
    fn accept(&self, request: Request) -> Option<CallbackParams> {
        let raw = request.url().to_string();
        let (path, query) = raw.split_once('?').unwrap_or((raw.as_str(), ""));

        if path != self.path {
            debug!("Ignoring request to {}", path);
            let _ = request.respond(Response::from_string("Not Found").with_status_code(404u16));
            return None;
        }

        let params = CallbackParams::from_query(query);
        if params.error.is_some() {
            warn!("Provider returned an error to the callback: {:?}", params.error);
        } else {
            debug!("Received callback (code present: {})", params.code.is_some());
        }

        let mut response = Response::from_string(RECEIVED_PAGE);
        if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..]) {
            response = response.with_header(header);
        }
        let _ = request.respond(response);

        Some(params)
    }
}
