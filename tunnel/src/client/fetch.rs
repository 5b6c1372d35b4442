//! The `fetch`-like request surface.

use std::collections::BTreeMap;

use tokio::sync::oneshot;

use crate::{
    client::{random_id, Cmd, TunnelClient},
    error::TunnelError,
    msg::{HttpRequestMsg, HttpResponseMsg},
};

/// Request options, mirroring the standard `fetch` init object.
#[derive(Clone, Debug)]
pub struct FetchInit {
    pub method: String,
    /// Header names are sent case-preserved.
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl Default for FetchInit {
    fn default() -> Self {
        Self {
            method: "GET".to_owned(),
            headers: Vec::new(),
            body: None,
        }
    }
}

impl FetchInit {
    pub fn method(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// A tunneled HTTP response.
#[derive(Clone, Debug)]
pub struct FetchResponse {
    msg: HttpResponseMsg,
}

impl FetchResponse {
    pub fn status(&self) -> u16 {
        self.msg.status
    }

    /// Whether the status is in the 2xx family.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.msg.status)
    }

    pub fn status_text(&self) -> &str {
        &self.msg.status_text
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.msg
            .headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.msg.headers
    }

    pub fn body(&self) -> &str {
        &self.msg.body
    }

    /// The server-side error, if the app handler failed.
    pub fn error(&self) -> Option<&str> {
        self.msg.error.as_deref()
    }
}

pub(crate) async fn fetch(
    client: &TunnelClient,
    url: String,
    init: FetchInit,
) -> Result<FetchResponse, TunnelError> {
    let request_id = random_id();
    let request = HttpRequestMsg {
        request_id: request_id.clone(),
        method: init.method,
        url,
        headers: init.headers.into_iter().collect(),
        body: init.body,
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    client.send_cmd(Cmd::Fetch {
        request,
        reply: reply_tx,
    })?;

    let response = match client.request_timeout() {
        Some(timeout) => match tokio::time::timeout(timeout, reply_rx).await {
            Ok(result) => result,
            Err(_elapsed) => {
                // remove the completer so a late response is dropped
                let _ = client.send_cmd(Cmd::CancelFetch { request_id });
                return Err(TunnelError::Timeout);
            }
        },
        None => reply_rx.await,
    };

    response
        .map_err(|_| TunnelError::ChannelClosed)?
        .map(|msg| FetchResponse { msg })
}
