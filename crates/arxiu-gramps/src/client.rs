//! Async HTTP client for a Gramps Web server.

use std::{fmt, future::Future, time::Duration};

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
  error::{Error, Result},
  mapper::{self, RemoteFamily, RemotePerson},
};

const PING_PATHS: [&str; 3] = ["/api/health", "/api/metadata", "/api/"];
const PEOPLE_PATHS: [&str; 3] = ["/api/people/", "/api/people", "/api/persons"];
const FAMILY_PATHS: [&str; 2] = ["/api/families/", "/api/families"];

/// Connection settings for one remote server.
#[derive(Clone)]
pub struct GrampsConfig {
  pub base_url: String,
  /// When set, requests use HTTP Basic `(username, token)`; otherwise
  /// `Bearer token`.
  pub username: Option<String>,
  /// Plaintext token, already opened from its sealed form.
  pub token:    String,
  pub timeout:  Duration,
}

impl fmt::Debug for GrampsConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GrampsConfig")
      .field("base_url", &self.base_url)
      .field("username", &self.username)
      .field("token", &"<redacted>")
      .field("timeout", &self.timeout)
      .finish()
  }
}

/// Read-only client. Cheap to clone.
#[derive(Clone, Debug)]
pub struct GrampsClient {
  http:   Client,
  config: GrampsConfig,
}

impl GrampsClient {
  pub fn new(config: GrampsConfig) -> Result<Self> {
    let base = config.base_url.trim();
    let parsed = Url::parse(base).map_err(|e| Error::InvalidUrl(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
      return Err(Error::InvalidUrl(base.to_owned()));
    }
    if config.token.is_empty() {
      return Err(Error::MissingToken);
    }
    let http = Client::builder()
      .timeout(config.timeout)
      .build()
      .map_err(|e| Error::Unreachable(e.to_string()))?;
    Ok(Self { http, config })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.base_url.trim().trim_end_matches('/'), path)
  }

  fn auth(&self, req: RequestBuilder) -> RequestBuilder {
    match self.config.username.as_deref().filter(|u| !u.is_empty()) {
      Some(user) => req.basic_auth(user, Some(&self.config.token)),
      None => req.bearer_auth(&self.config.token),
    }
  }

  async fn get(&self, path: &str, cancel: &CancellationToken) -> Result<Response> {
    let req = self.auth(self.http.get(self.url(path)));
    tracing::debug!(path, "gramps request");
    cancellable(cancel, async {
      req.send().await.map_err(|e| Error::Unreachable(e.without_url().to_string()))
    })
    .await
  }

  // ── Operations ────────────────────────────────────────────────────────────

  /// Probe the health endpoints; the first 2xx wins.
  pub async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
    let mut last = String::from("no endpoint answered");
    for path in PING_PATHS {
      let resp = self.get(path, cancel).await?;
      let status = resp.status();
      if status.is_success() {
        return Ok(());
      }
      if is_auth_failure(status) {
        return Err(Error::AuthInvalid);
      }
      last = format!("GET {path} → {status}");
    }
    Err(Error::Unreachable(last))
  }

  pub async fn fetch_people(&self, cancel: &CancellationToken) -> Result<Vec<RemotePerson>> {
    let entries = self.fetch_list(&PEOPLE_PATHS, cancel).await?;
    Ok(mapper::map_people(&entries))
  }

  pub async fn fetch_families(&self, cancel: &CancellationToken) -> Result<Vec<RemoteFamily>> {
    let entries = self.fetch_list(&FAMILY_PATHS, cancel).await?;
    Ok(mapper::map_families(&entries))
  }

  /// Try each candidate in turn. A 404 moves on; any other failure is final.
  async fn fetch_list(&self, paths: &[&str], cancel: &CancellationToken) -> Result<Vec<Value>> {
    let mut last = Error::Unreachable("no list endpoint configured".into());
    for path in paths {
      let resp = self.get(path, cancel).await?;
      let status = resp.status();
      if is_auth_failure(status) {
        return Err(Error::AuthInvalid);
      }
      if status == StatusCode::NOT_FOUND {
        last = Error::Unreachable(format!("GET {path} → {status}"));
        continue;
      }
      if !status.is_success() {
        return Err(Error::Unreachable(format!("GET {path} → {status}")));
      }
      let body: Value = cancellable(cancel, async {
        resp.json().await.map_err(|e| Error::BadFormat(e.without_url().to_string()))
      })
      .await?;
      return mapper::list_entries(body);
    }
    Err(last)
  }
}

fn is_auth_failure(status: StatusCode) -> bool {
  status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

async fn cancellable<T>(
  cancel: &CancellationToken,
  fut: impl Future<Output = Result<T>>,
) -> Result<T> {
  tokio::select! {
    biased;
    _ = cancel.cancelled() => Err(Error::Cancelled),
    r = fut => r,
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use arxiu_core::tree::Sex;
  use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode},
    routing::get,
  };
  use serde_json::json;

  use super::*;

  async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
  }

  fn client(base_url: String, username: Option<&str>) -> GrampsClient {
    GrampsClient::new(GrampsConfig {
      base_url,
      username: username.map(str::to_owned),
      token: "tok".into(),
      timeout: Duration::from_secs(5),
    })
    .unwrap()
  }

  #[tokio::test]
  async fn ping_falls_through_to_metadata() {
    let router = Router::new().route("/api/metadata", get(|| async { "{}" }));
    let c = client(spawn(router).await, None);
    c.ping(&CancellationToken::new()).await.unwrap();
  }

  #[tokio::test]
  async fn ping_unreachable_when_nothing_answers() {
    let c = client(spawn(Router::new()).await, None);
    let err = c.ping(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Unreachable(_)));
  }

  #[tokio::test]
  async fn auth_failure_surfaces() {
    let router = Router::new()
      .route("/api/health", get(|| async { StatusCode::UNAUTHORIZED }))
      .route("/api/people/", get(|| async { StatusCode::FORBIDDEN }));
    let c = client(spawn(router).await, None);
    let cancel = CancellationToken::new();
    assert!(matches!(c.ping(&cancel).await, Err(Error::AuthInvalid)));
    assert!(matches!(c.fetch_people(&cancel).await, Err(Error::AuthInvalid)));
  }

  #[tokio::test]
  async fn bearer_or_basic_auth_is_sent() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = seen.clone();
    let router = Router::new().route(
      "/api/health",
      get(move |headers: HeaderMap| {
        let sink = sink.clone();
        async move {
          let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
          sink.lock().unwrap().push(auth);
          "ok"
        }
      }),
    );
    let base = spawn(router).await;
    let cancel = CancellationToken::new();
    client(base.clone(), None).ping(&cancel).await.unwrap();
    client(base, Some("anna")).ping(&cancel).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], "Bearer tok");
    assert!(seen[1].starts_with("Basic "));
  }

  #[tokio::test]
  async fn people_from_envelope_on_second_candidate() {
    let router = Router::new().route(
      "/api/people",
      get(|| async {
        Json(json!({"items": [
          {"gramps_id": "I1", "first_name": "Joan", "surname": "Puig", "gender": "M"},
          {"first_name": "no id"}
        ]}))
      }),
    );
    let c = client(spawn(router).await, None);
    let people = c.fetch_people(&CancellationToken::new()).await.unwrap();
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].external_id, "I1");
    assert_eq!(people[0].sex, Sex::Male);
  }

  #[tokio::test]
  async fn families_bare_array() {
    let router = Router::new().route(
      "/api/families/",
      get(|| async {
        Json(json!([{
          "father_handle": "a",
          "mother_handle": "b",
          "child_ref_list": [{"ref": "c"}],
        }]))
      }),
    );
    let c = client(spawn(router).await, Some("u"));
    let fams = c.fetch_families(&CancellationToken::new()).await.unwrap();
    assert_eq!(fams[0].father_id.as_deref(), Some("a"));
    assert_eq!(fams[0].children, vec!["c".to_owned()]);
  }

  #[tokio::test]
  async fn non_list_body_is_bad_format() {
    let router =
      Router::new().route("/api/people/", get(|| async { Json(json!({"count": 3})) }));
    let c = client(spawn(router).await, None);
    let err = c.fetch_people(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::BadFormat(_)));
  }

  #[tokio::test]
  async fn server_error_is_final() {
    let router = Router::new()
      .route("/api/people/", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
      .route("/api/people", get(|| async { Json(json!([{"id": "x"}])) }));
    let c = client(spawn(router).await, None);
    let err = c.fetch_people(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Unreachable(_)));
  }

  #[tokio::test]
  async fn cancelled_token_aborts() {
    let router = Router::new().route(
      "/api/health",
      get(|| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        "late"
      }),
    );
    let c = client(spawn(router).await, None);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(50)).await;
      trigger.cancel();
    });
    assert!(matches!(c.ping(&cancel).await, Err(Error::Cancelled)));
  }

  #[test]
  fn rejects_bad_base_urls_and_empty_token() {
    let cfg = |url: &str, token: &str| GrampsConfig {
      base_url: url.into(),
      username: None,
      token:    token.into(),
      timeout:  Duration::from_secs(1),
    };
    assert!(matches!(GrampsClient::new(cfg("not a url", "t")), Err(Error::InvalidUrl(_))));
    assert!(matches!(GrampsClient::new(cfg("ftp://host", "t")), Err(Error::InvalidUrl(_))));
    assert!(matches!(GrampsClient::new(cfg("https://h", "")), Err(Error::MissingToken)));
  }

  #[test]
  fn debug_redacts_token() {
    let c = client("http://h".into(), None);
    assert!(!format!("{c:?}").contains("tok\""));
  }
}
