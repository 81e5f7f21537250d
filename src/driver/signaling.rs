use reqwest::Client;

use crate::engine::{SessionDescription, SIGNALING_PATH};

/// HTTP request/response channel to the responder.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    http: Client,
    url: String,
}

impl SignalingClient {
    /// `responder` is a `host:port` pair.
    pub fn new(responder: &str) -> Self {
        Self::with_client(Client::new(), responder)
    }

    pub fn with_client(http: Client, responder: &str) -> Self {
        Self {
            http,
            url: format!("http://{responder}{SIGNALING_PATH}"),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Post the local description and decode the remote one. Non-2xx
    /// statuses are errors.
    pub async fn exchange(&self, local: &SessionDescription) -> Result<SessionDescription, reqwest::Error> {
        self.http
            .post(&self.url)
            .json(local)
            .send()
            .await?
            .error_for_status()?
            .json::<SessionDescription>()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_points_at_signaling_route() {
        let client = SignalingClient::new("10.0.0.2:8080");
        assert_eq!(client.url(), "http://10.0.0.2:8080/doSignaling");
    }
}
