//! HTTP [`RemoteDirectory`] over the CRM v3/v4 REST API.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crmsync_core::{RecordKind, RemoteId, RemoteProperties, RemoteRecord, SyncConfig};
use crmsync_sync::{
    Association, AssociationType, DirectoryError, GroupStatus, PropertyDefinition, PropertySchema,
    RemoteDirectory, SearchFilter, SearchOperator,
};

const SEARCH_LIMIT: u32 = 100;

/// Blocking client for one portal, authenticated with a bearer token.
pub struct HttpDirectory {
    agent: ureq::Agent,
    base_url: String,
    token: String,
    log_requests: bool,
}

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

impl HttpDirectory {
    pub fn new(config: &SyncConfig, token: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout())
            .build();
        Self {
            agent,
            base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            token: token.into(),
            log_requests: config.log_requests,
        }
    }

    /// Send a request. `Ok(None)` means 404.
    fn send(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Option<ureq::Response>, DirectoryError> {
        let url = format!("{}{path}", self.base_url);
        if self.log_requests {
            tracing::debug!("{method} {url}");
        }

        let mut request = self
            .agent
            .request(method, &url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/json");
        for (key, value) in query {
            request = request.query(key, value);
        }
        let result = match body {
            Some(body) => request.send_json(body.clone()),
            None => request.call(),
        };

        match result {
            Ok(response) => Ok(Some(response)),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(ureq::Error::Status(status, response)) => Err(status_error(status, response)),
            Err(ureq::Error::Transport(transport)) => Err(transport_error(&transport)),
        }
    }

    /// Like [`send`](Self::send), but a 404 is an API error.
    fn require(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ureq::Response, DirectoryError> {
        self.send(method, path, &[], body)?
            .ok_or_else(|| DirectoryError::Api {
                status: 404,
                message: format!("{method} {path}: not found"),
            })
    }
}

// ---------------------------------------------------------------------------
// RemoteDirectory
// ---------------------------------------------------------------------------

impl RemoteDirectory for HttpDirectory {
    fn get_by_id(
        &self,
        kind: RecordKind,
        id: &RemoteId,
    ) -> Result<Option<RemoteRecord>, DirectoryError> {
        let path = format!("/crm/v3/objects/{}/{}", kind.object_type(), encode_segment(&id.0));
        self.send("GET", &path, &[], None)?.map(read_json).transpose()
    }

    fn get_by_natural_key(
        &self,
        kind: RecordKind,
        property: &str,
        value: &str,
    ) -> Result<Option<RemoteRecord>, DirectoryError> {
        match kind {
            RecordKind::Contact => {
                let path = format!("/crm/v3/objects/contacts/{}", encode_segment(value));
                self.send("GET", &path, &[("idProperty", property)], None)?
                    .map(read_json)
                    .transpose()
            }
            RecordKind::Company => {
                let mut found = self.search(kind, &SearchFilter::eq(property, value))?;
                Ok(if found.is_empty() {
                    None
                } else {
                    Some(found.remove(0))
                })
            }
        }
    }

    fn create(
        &self,
        kind: RecordKind,
        properties: &RemoteProperties,
    ) -> Result<RemoteRecord, DirectoryError> {
        let path = format!("/crm/v3/objects/{}", kind.object_type());
        let body = json!({ "properties": properties });
        read_json(self.require("POST", &path, Some(&body))?)
    }

    fn update(
        &self,
        kind: RecordKind,
        id: &RemoteId,
        properties: &RemoteProperties,
    ) -> Result<Option<RemoteRecord>, DirectoryError> {
        let path = format!("/crm/v3/objects/{}/{}", kind.object_type(), encode_segment(&id.0));
        let body = json!({ "properties": properties });
        self.send("PATCH", &path, &[], Some(&body))?
            .map(read_json)
            .transpose()
    }

    fn search(
        &self,
        kind: RecordKind,
        filter: &SearchFilter,
    ) -> Result<Vec<RemoteRecord>, DirectoryError> {
        let path = format!("/crm/v3/objects/{}/search", kind.object_type());
        let body = search_body(filter);
        let page: Page<RemoteRecord> = read_json(self.require("POST", &path, Some(&body))?)?;
        Ok(page.results)
    }

    fn associate(
        &self,
        from_kind: RecordKind,
        from_id: &RemoteId,
        to_kind: RecordKind,
        to_id: &RemoteId,
        association: &AssociationType,
    ) -> Result<Association, DirectoryError> {
        let base = format!(
            "/crm/v4/objects/{}/{}/associations",
            from_kind.object_type(),
            encode_segment(&from_id.0)
        );
        let target = format!("{}/{}", to_kind.object_type(), encode_segment(&to_id.0));
        let response = match association {
            AssociationType::Default => {
                self.send("PUT", &format!("{base}/default/{target}"), &[], None)?
            }
            AssociationType::Typed { category, type_id } => {
                let body = json!([{
                    "associationCategory": category,
                    "associationTypeId": type_id,
                }]);
                self.send("PUT", &format!("{base}/{target}"), &[], Some(&body))?
            }
        };
        Ok(match response {
            Some(_) => Association::Linked,
            None => Association::TargetMissing,
        })
    }
}

// ---------------------------------------------------------------------------
// PropertySchema
// ---------------------------------------------------------------------------

impl PropertySchema for HttpDirectory {
    fn list_properties(&self, kind: RecordKind) -> Result<Vec<PropertyDefinition>, DirectoryError> {
        let path = format!("/crm/v3/properties/{}", kind.object_type());
        let page: Page<PropertyDefinition> = read_json(self.require("GET", &path, None)?)?;
        Ok(page.results)
    }

    fn create_property_group(
        &self,
        kind: RecordKind,
        name: &str,
        label: &str,
    ) -> Result<GroupStatus, DirectoryError> {
        let path = format!("/crm/v3/properties/{}/groups", kind.object_type());
        let body = json!({ "name": name, "label": label });
        self.require("POST", &path, Some(&body))?;
        Ok(GroupStatus::Created)
    }

    fn create_properties(
        &self,
        kind: RecordKind,
        properties: &[PropertyDefinition],
    ) -> Result<(), DirectoryError> {
        let path = format!("/crm/v3/properties/{}/batch/create", kind.object_type());
        let body = json!({ "inputs": properties });
        self.require("POST", &path, Some(&body))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_json<T: DeserializeOwned>(response: ureq::Response) -> Result<T, DirectoryError> {
    response
        .into_json::<T>()
        .map_err(|e| DirectoryError::Transport {
            message: format!("invalid response body: {e}"),
        })
}

fn search_body(filter: &SearchFilter) -> Value {
    let operator = match filter.operator {
        SearchOperator::Eq => "EQ",
        SearchOperator::ContainsToken => "CONTAINS_TOKEN",
    };
    json!({
        "filterGroups": [{
            "filters": [{
                "propertyName": filter.property,
                "operator": operator,
                "value": filter.value,
            }]
        }],
        "properties": [filter.property],
        "limit": SEARCH_LIMIT,
    })
}

fn status_error(status: u16, response: ureq::Response) -> DirectoryError {
    let retry_after = response
        .header("Retry-After")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.into_string().unwrap_or_default();
    let message = error_message(&body);

    match status {
        400 => DirectoryError::Validation { message },
        409 => DirectoryError::Conflict {
            existing_id: existing_id(&message),
            message,
        },
        429 => DirectoryError::RateLimited { retry_after },
        _ => DirectoryError::Api { status, message },
    }
}

fn transport_error(transport: &ureq::Transport) -> DirectoryError {
    let message = transport.to_string();
    if message.contains("timed out") {
        DirectoryError::Timeout { message }
    } else {
        DirectoryError::Transport { message }
    }
}

/// The `message` field of an error body, or the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| body.trim().to_owned())
}

/// Id named in a conflict message such as `"Contact already exists. Existing ID: 123"`.
fn existing_id(message: &str) -> Option<RemoteId> {
    const MARKER: &str = "Existing ID:";
    let start = message.find(MARKER)? + MARKER.len();
    let digits: String = message[start..]
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    (!digits.is_empty()).then(|| RemoteId(digits))
}

/// Percent-encode one URL path segment.
fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}
