use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::model::{RemoteConfig, Session};
use crate::store::LocalStore;

mod error;
pub use self::error::{ErrorBody, RequestError};

pub use reqwest::Method;

/// Request body, tagged explicitly by the caller. The client never inspects a
/// value's runtime shape to pick an encoding.
#[derive(Clone, Debug)]
pub enum Body {
    /// Serialized as JSON with `Content-Type: application/json`.
    Structured(Value),
    /// Passed through untouched with the given content type.
    Raw {
        bytes: Vec<u8>,
        content_type: String,
    },
}

/// Decoded response payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// 204 or an empty body. Distinct from any valid JSON value, including
    /// `null` and `""`.
    NoContent,
    Json(Value),
    Text(String),
}

impl Payload {
    pub fn into_json(self) -> Option<Value> {
        match self {
            Payload::Json(v) => Some(v),
            Payload::NoContent | Payload::Text(_) => None,
        }
    }

    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Payload::Json(v) => serde_json::from_value(v).context("decode response payload"),
            Payload::NoContent => Err(anyhow::anyhow!("response had no content")),
            Payload::Text(_) => Err(anyhow::anyhow!("response was not structured")),
        }
    }
}

/// Authenticated request client. Attaches the stored session credential as a
/// bearer header on every call and classifies failures into [`RequestError`].
pub struct RemoteClient {
    remote: RemoteConfig,
    store: LocalStore,
    client: reqwest::blocking::Client,
}

impl RemoteClient {
    pub fn new(remote: RemoteConfig, store: LocalStore) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent("chalkline")
            .build()
            .context("build reqwest client")?;
        Ok(Self {
            remote,
            store,
            client,
        })
    }

    pub fn remote(&self) -> &RemoteConfig {
        &self.remote
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.remote.base_url, path)
    }

    /// Session consulted before every request; absent means unauthenticated.
    fn session(&self) -> Option<Session> {
        match self.store.session() {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read session state");
                None
            }
        }
    }

    pub fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Body>,
    ) -> Result<Payload, RequestError> {
        let url = self.url(path);
        let mut req = self.client.request(method, &url);
        if let Some(session) = self.session() {
            req = req.header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", session.token),
            );
        }
        req = match body {
            None => req,
            Some(Body::Structured(v)) => req.json(&v),
            Some(Body::Raw {
                bytes,
                content_type,
            }) => req
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(bytes),
        };
        let resp = req.send().map_err(|source| RequestError::Connectivity {
            url: url.clone(),
            source,
        })?;
        self.finish(url, resp)
    }

    /// Multipart upload; `bytes` is passed through untouched as the `file`
    /// part, `extra_fields` become plain text parts.
    pub fn upload(
        &self,
        path: &str,
        file_name: &str,
        bytes: Vec<u8>,
        extra_fields: &[(String, String)],
    ) -> Result<Payload, RequestError> {
        let url = self.url(path);

        let part = reqwest::blocking::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string());
        let mut form = reqwest::blocking::multipart::Form::new().part("file", part);
        for (k, v) in extra_fields {
            form = form.text(k.clone(), v.clone());
        }

        let mut req = self.client.post(&url).multipart(form);
        if let Some(session) = self.session() {
            req = req.header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", session.token),
            );
        }
        let resp = req.send().map_err(|source| RequestError::Connectivity {
            url: url.clone(),
            source,
        })?;
        self.finish(url, resp)
    }

    fn finish(
        &self,
        url: String,
        resp: reqwest::blocking::Response,
    ) -> Result<Payload, RequestError> {
        let status = resp.status();

        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                // Purge the dead credential before surfacing the failure so
                // the caller can route straight to re-authentication.
                if let Err(err) = self.store.clear_session() {
                    tracing::warn!(error = %err, "failed to purge session after 401");
                }
            }
            let raw = resp.text().unwrap_or_default();
            return Err(RequestError::classify(status, raw));
        }

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Payload::NoContent);
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let text = resp.text().map_err(|source| RequestError::Connectivity {
            url: url.clone(),
            source,
        })?;

        if text.is_empty() {
            return Ok(Payload::NoContent);
        }
        if content_type.starts_with("application/json") {
            let v = serde_json::from_str(&text)
                .map_err(|source| RequestError::Decode { url, source })?;
            return Ok(Payload::Json(v));
        }
        Ok(Payload::Text(text))
    }

    pub fn get(&self, path: &str) -> Result<Payload, RequestError> {
        self.request(Method::GET, path, None)
    }

    pub fn post_json(&self, path: &str, body: Value) -> Result<Payload, RequestError> {
        self.request(Method::POST, path, Some(Body::Structured(body)))
    }

    pub fn put_json(&self, path: &str, body: Value) -> Result<Payload, RequestError> {
        self.request(Method::PUT, path, Some(Body::Structured(body)))
    }

    pub fn delete(&self, path: &str) -> Result<Payload, RequestError> {
        self.request(Method::DELETE, path, None)
    }
}
