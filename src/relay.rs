//! Relay of LeafSpy updates to leaf-status.com
//!
//! The device sends `user=` and `pass=` as empty placeholders; the relay
//! fills them with the configured credentials and replays the query string
//! against the upstream update endpoint. One attempt, no retries.

use crate::config::RelayConfig;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Upstream update endpoint, the raw query is appended as-is
pub const DEFAULT_BASE_URL: &str = "https://leaf-status.com/api/vehicle/update?";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// leaf-status.com account used to fill the placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub pass: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("could not build relay client: {0}")]
    Client(reqwest::Error),
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream answered {0}")]
    Status(reqwest::StatusCode),
}

/// Percent-encode a query value, spaces as `%20`.
///
/// Follows `application/x-www-form-urlencoded` rules: only ASCII
/// alphanumerics and `*-._` pass through, so `~` becomes `%7E` while `*`
/// stays literal. Both forms decode to the same value upstream.
fn escape(value: &str) -> String {
    // form encoding writes spaces as '+' and a literal '+' as %2B, so this swap is exact
    serde_urlencoded::to_string([("", value)].as_slice())
        .map(|s| s.trim_start_matches('=').replace('+', "%20"))
        .unwrap_or_default()
}

/// Fill the first `user=` and first `pass=` placeholder with escaped credentials
pub fn substitute_credentials(raw_query: &str, credentials: &Credentials) -> String {
    let with_user = raw_query.replacen("user=", &format!("user={}", escape(&credentials.user)), 1);
    with_user.replacen("pass=", &format!("pass={}", escape(&credentials.pass)), 1)
}

/// Full upstream URL for an inbound raw query
pub fn relay_url(base_url: &str, raw_query: &str, credentials: &Credentials) -> String {
    format!("{}{}", base_url, substitute_credentials(raw_query, credentials))
}

/// Forwards updates upstream with a bounded timeout
#[derive(Debug, Clone)]
pub struct Relay {
    client: reqwest::blocking::Client,
    base_url: String,
    credentials: Credentials,
}

impl Relay {
    pub fn new(base_url: impl Into<String>, credentials: Credentials, timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RelayError::Client)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            credentials,
        })
    }

    /// Build a relay from config. `None` when no credentials are configured.
    pub fn from_config(config: &RelayConfig) -> Result<Option<Self>, RelayError> {
        let (Some(user), Some(pass)) = (&config.user, &config.pass) else {
            return Ok(None);
        };
        let credentials = Credentials {
            user: user.clone(),
            pass: pass.clone(),
        };
        let relay = Self::new(
            config.base_url.clone(),
            credentials,
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Some(relay))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one update upstream and wait for the answer
    pub fn relay(&self, raw_query: &str) -> Result<(), RelayError> {
        let url = relay_url(&self.base_url, raw_query, &self.credentials);
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status(status));
        }
        debug!(%status, "update relayed");
        Ok(())
    }

    /// Relay on a one-shot background thread. Failures are logged, never returned.
    pub fn spawn(self: &Arc<Self>, raw_query: String) -> JoinHandle<()> {
        let relay = Arc::clone(self);
        std::thread::spawn(move || {
            if let Err(e) = relay.relay(&raw_query) {
                warn!(error = %e, "relay to upstream failed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tiny_http::{Response, Server};

    fn creds(user: &str, pass: &str) -> Credentials {
        Credentials {
            user: user.to_string(),
            pass: pass.to_string(),
        }
    }

    /// Local stand-in for leaf-status.com; answers one request with `status`
    /// and reports the URL it saw.
    fn fake_upstream(status: u16) -> (String, mpsc::Receiver<String>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            if let Ok(request) = server.recv() {
                tx.send(request.url().to_string()).ok();
                request.respond(Response::from_string("ok").with_status_code(status)).ok();
            }
        });
        (format!("http://{}/api/vehicle/update?", addr), rx)
    }

    #[test]
    fn test_substitution_escapes_and_keeps_other_fields() {
        let out = substitute_credentials("a=1&user=&pass=&b=2", &creds("a b", "p@ss"));
        assert_eq!(out, "a=1&user=a%20b&pass=p%40ss&b=2");
        assert_eq!(out.matches("user=a%20b").count(), 1);
        assert_eq!(out.matches("pass=p%40ss").count(), 1);
    }

    #[test]
    fn test_substitution_first_occurrence_only() {
        let out = substitute_credentials("user=&pass=&user=&pass=", &creds("u", "p"));
        assert_eq!(out, "user=u&pass=p&user=&pass=");
    }

    #[test]
    fn test_substitution_without_placeholders_is_identity() {
        let raw = "DevBat=12&Gids=200";
        assert_eq!(substitute_credentials(raw, &creds("u", "p")), raw);
    }

    #[test]
    fn test_escape_reserved_characters() {
        assert_eq!(escape("a+b&c=d"), "a%2Bb%26c%3Dd");
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape(""), "");
        assert_eq!(escape("a~b*c"), "a%7Eb*c");
    }

    #[test]
    fn test_relay_url() {
        let url = relay_url(DEFAULT_BASE_URL, "user=&pass=&VIN=X", &creds("me", "pw"));
        assert_eq!(url, "https://leaf-status.com/api/vehicle/update?user=me&pass=pw&VIN=X");
    }

    #[test]
    fn test_from_config_without_credentials_is_disabled() {
        let config = RelayConfig::default();
        assert!(Relay::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_relay_sends_substituted_query() {
        let (base, seen) = fake_upstream(200);
        let relay = Relay::new(base, creds("a b", "p@ss"), DEFAULT_TIMEOUT).unwrap();

        relay.relay("Gids=10&user=&pass=&Trip=3").unwrap();

        let url = seen.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(url, "/api/vehicle/update?Gids=10&user=a%20b&pass=p%40ss&Trip=3");
    }

    #[test]
    fn test_relay_non_success_status_is_error() {
        let (base, _seen) = fake_upstream(503);
        let relay = Relay::new(base, creds("u", "p"), DEFAULT_TIMEOUT).unwrap();

        match relay.relay("user=&pass=") {
            Err(RelayError::Status(status)) => assert_eq!(status.as_u16(), 503),
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[test]
    fn test_relay_unreachable_upstream_is_error() {
        let relay = Relay::new(
            "http://127.0.0.1:1/?",
            creds("u", "p"),
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(matches!(relay.relay("user=&pass="), Err(RelayError::Request(_))));
    }

    #[test]
    fn test_spawned_relay_logs_instead_of_failing() {
        let (base, seen) = fake_upstream(500);
        let relay = Arc::new(Relay::new(base, creds("u", "p"), DEFAULT_TIMEOUT).unwrap());
        relay.spawn("user=&pass=&x=1".to_string()).join().unwrap();
        assert!(seen.recv_timeout(Duration::from_secs(5)).is_ok());
    }
}
