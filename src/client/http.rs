//! Blocking HTTP client for Confluent-compatible schema registries

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ClientResult, RegistryClient};
use crate::config::RegistryEndpoint;
use crate::error::{MigrationError, RegistryError, Result};
use crate::schema::{Compatibility, CompatibilitySetting, Mode, SchemaType, SchemaVersion};

const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

/// Registry client speaking the Confluent REST API
pub struct HttpRegistryClient {
    base_url: Url,
    context: Option<String>,
    credentials: Option<(String, String)>,
    http: Client,
}

impl HttpRegistryClient {
    /// Build a client for one endpoint. Fails before any network call when
    /// the endpoint configuration is inconsistent.
    pub fn new(endpoint: &RegistryEndpoint) -> Result<Self> {
        endpoint.validate()?;

        let base_url = Url::parse(endpoint.url.trim_end_matches('/'))
            .map_err(|e| MigrationError::Validation(format!("invalid registry URL '{}': {}", endpoint.url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(MigrationError::Validation(format!(
                "registry URL '{}' cannot carry a path",
                endpoint.url
            )));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .user_agent(concat!("schema-registry-migrator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MigrationError::Validation(format!("failed to create HTTP client: {}", e)))?;

        let credentials = match (&endpoint.username, &endpoint.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        };

        Ok(Self {
            base_url,
            context: endpoint.context.clone().filter(|c| !c.is_empty()),
            credentials,
            http,
        })
    }

    /// Build a URL from path segments, inserting the context prefix
    fn url(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| RegistryError::Transport(format!("cannot build a path on {}", self.base_url)))?;
            path.pop_if_empty();
            if let Some(context) = &self.context {
                path.push("contexts").push(context);
            }
            path.extend(segments);
        }
        Ok(url)
    }

    fn send<B: Serialize>(&self, method: Method, url: Url, body: Option<&B>) -> ClientResult<Response> {
        debug!(%method, %url, "registry request");
        let mut request = self
            .http
            .request(method, url)
            .header(reqwest::header::ACCEPT, CONTENT_TYPE);

        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
                .json(body);
        }

        let response = request
            .send()
            .map_err(|e| RegistryError::Transport(format!("request failed: {}", e)))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            Err(classify(status, &body))
        }
    }

    fn get_json<T: DeserializeOwned>(&self, url: Url) -> ClientResult<T> {
        let response = self.send::<()>(Method::GET, url, None)?;
        parse(response)
    }

    fn write_json<B: Serialize, T: DeserializeOwned>(&self, method: Method, url: Url, body: &B) -> ClientResult<T> {
        let response = self.send(method, url, Some(body))?;
        parse(response)
    }
}

impl RegistryClient for HttpRegistryClient {
    fn describe(&self) -> String {
        match &self.context {
            Some(context) => format!("{} (context {})", self.base_url, context),
            None => self.base_url.to_string(),
        }
    }

    fn list_subjects(&self) -> ClientResult<Vec<String>> {
        self.get_json(self.url(&["subjects"])?)
    }

    fn list_versions(&self, subject: &str) -> ClientResult<Vec<u32>> {
        self.get_json(self.url(&["subjects", subject, "versions"])?)
    }

    fn get_version(&self, subject: &str, version: u32) -> ClientResult<SchemaVersion> {
        let version_str = version.to_string();
        let response: VersionResponse =
            self.get_json(self.url(&["subjects", subject, "versions", &version_str])?)?;
        Ok(SchemaVersion {
            subject: subject.to_string(),
            version: response.version,
            id: response.id,
            schema_type: response.schema_type.unwrap_or_default(),
            schema: response.schema,
        })
    }

    fn register_schema(
        &self,
        subject: &str,
        schema_type: SchemaType,
        schema: &str,
        id: Option<u32>,
    ) -> ClientResult<u32> {
        let request = RegisterRequest { schema, schema_type, id };
        let response: IdResponse =
            self.write_json(Method::POST, self.url(&["subjects", subject, "versions"])?, &request)?;
        Ok(response.id)
    }

    fn check_compatibility(
        &self,
        subject: &str,
        schema_type: SchemaType,
        schema: &str,
    ) -> ClientResult<bool> {
        let request = RegisterRequest { schema, schema_type, id: None };
        let url = self.url(&["compatibility", "subjects", subject, "versions", "latest"])?;
        match self.write_json::<_, CompatibilityCheckResponse>(Method::POST, url, &request) {
            Ok(response) => Ok(response.is_compatible),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    }

    fn get_mode(&self, subject: &str) -> ClientResult<Mode> {
        let mut url = self.url(&["mode", subject])?;
        url.query_pairs_mut().append_pair("defaultToGlobal", "true");
        let response: ModeBody = self.get_json(url)?;
        Ok(response.mode)
    }

    fn set_mode(&self, subject: &str, mode: Mode) -> ClientResult<()> {
        let _: ModeBody = self.write_json(Method::PUT, self.url(&["mode", subject])?, &ModeBody { mode })?;
        Ok(())
    }

    fn get_subject_mode(&self, subject: &str) -> ClientResult<Option<Mode>> {
        match self.get_json::<ModeBody>(self.url(&["mode", subject])?) {
            Ok(response) => Ok(Some(response.mode)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn delete_mode(&self, subject: &str) -> ClientResult<()> {
        self.send::<()>(Method::DELETE, self.url(&["mode", subject])?, None)?;
        Ok(())
    }

    fn get_global_mode(&self) -> ClientResult<Mode> {
        let response: ModeBody = self.get_json(self.url(&["mode"])?)?;
        Ok(response.mode)
    }

    fn set_global_mode(&self, mode: Mode) -> ClientResult<()> {
        let _: ModeBody = self.write_json(Method::PUT, self.url(&["mode"])?, &ModeBody { mode })?;
        Ok(())
    }

    fn get_compatibility(&self, subject: &str) -> ClientResult<CompatibilitySetting> {
        match self.get_json::<CompatibilityResponse>(self.url(&["config", subject])?) {
            Ok(response) => Ok(CompatibilitySetting::Explicit(response.compatibility_level)),
            // No subject-level config: the global setting applies
            Err(e) if e.is_not_found() => Ok(CompatibilitySetting::InheritsGlobal),
            Err(e) => Err(e),
        }
    }

    fn set_compatibility(&self, subject: &str, level: Compatibility) -> ClientResult<()> {
        let request = CompatibilityRequest { compatibility: level };
        let _: serde_json::Value = self.write_json(Method::PUT, self.url(&["config", subject])?, &request)?;
        Ok(())
    }

    fn delete_compatibility(&self, subject: &str) -> ClientResult<()> {
        self.send::<()>(Method::DELETE, self.url(&["config", subject])?, None)?;
        Ok(())
    }

    fn delete_subject(&self, subject: &str, permanent: bool) -> ClientResult<Vec<u32>> {
        // A permanent delete is only accepted after a soft delete
        let soft: ClientResult<Vec<u32>> = self
            .send::<()>(Method::DELETE, self.url(&["subjects", subject])?, None)
            .and_then(parse);
        if !permanent {
            return soft;
        }
        let soft_deleted = match soft {
            Ok(versions) => versions,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut url = self.url(&["subjects", subject])?;
        url.query_pairs_mut().append_pair("permanent", "true");
        let removed: Vec<u32> = parse(self.send::<()>(Method::DELETE, url, None)?)?;
        Ok(if removed.is_empty() { soft_deleted } else { removed })
    }
}

/// Map a non-success status to the error taxonomy the engine acts on
fn classify(status: StatusCode, body: &str) -> RegistryError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().map(|b| b.error_code);
    let message = parsed
        .map(|b| b.message)
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::CONFLICT => RegistryError::Conflict { message },
        StatusCode::UNPROCESSABLE_ENTITY => RegistryError::WriteRejected { code, message },
        StatusCode::NOT_FOUND => RegistryError::NotFound(message),
        other => RegistryError::Transport(format!("HTTP {}: {}", other, message)),
    }
}

fn parse<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    response
        .json()
        .map_err(|e| RegistryError::InvalidResponse(e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionResponse {
    version: u32,
    id: u32,
    #[serde(default)]
    schema_type: Option<SchemaType>,
    schema: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    schema: &'a str,
    schema_type: SchemaType,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModeBody {
    mode: Mode,
}

#[derive(Debug, Deserialize)]
struct CompatibilityResponse {
    #[serde(rename = "compatibilityLevel", alias = "compatibility")]
    compatibility_level: Compatibility,
}

#[derive(Debug, Serialize)]
struct CompatibilityRequest {
    compatibility: Compatibility,
}

#[derive(Debug, Deserialize)]
struct CompatibilityCheckResponse {
    is_compatible: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: i64,
    message: String,
}
