use crate::domain::models::{NewReminder, Reminder, ReminderPatch, ReminderStatus};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::{
    ReminderEvent, decode_reminder, encode_new_reminder, encode_patch,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRemindersRequest {
    pub event_type: String,
    pub page_size: u32,
    pub current_page: u32,
    pub with_total_pages: bool,
    pub fragment_type: Option<String>,
    pub fragment_value: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<DateTime<Utc>>,
}

impl ListRemindersRequest {
    pub fn page(event_type: &str, page_size: u32, current_page: u32) -> Self {
        Self {
            event_type: event_type.to_string(),
            page_size,
            current_page,
            with_total_pages: current_page == 1,
            fragment_type: None,
            fragment_value: None,
            date_from: None,
            date_to: None,
        }
    }

    /// One-element page of active reminders due by `now`; `totalPages` of the reply is the count.
    pub fn due_active_count(event_type: &str, now: DateTime<Utc>) -> Self {
        Self {
            fragment_type: Some("status".to_string()),
            fragment_value: Some(ReminderStatus::Active.as_str().to_string()),
            date_from: NaiveDate::from_ymd_opt(1970, 1, 1),
            date_to: Some(now),
            ..Self::page(event_type, 1, 1)
        }
    }

    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("type", self.event_type.clone()),
            ("pageSize", self.page_size.to_string()),
            ("currentPage", self.current_page.to_string()),
            ("withTotalPages", self.with_total_pages.to_string()),
        ];
        if let Some(fragment_type) = &self.fragment_type {
            pairs.push(("fragmentType", fragment_type.clone()));
        }
        if let Some(fragment_value) = &self.fragment_value {
            pairs.push(("fragmentValue", fragment_value.clone()));
        }
        if let Some(date_from) = self.date_from {
            pairs.push(("dateFrom", date_from.format("%Y-%m-%d").to_string()));
        }
        if let Some(date_to) = self.date_to {
            pairs.push(("dateTo", date_to.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        pairs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderPage {
    pub reminders: Vec<Reminder>,
    pub total_pages: Option<u64>,
}

#[async_trait]
pub trait EventSource: Send + Sync {
    async fn list(&self, request: ListRemindersRequest) -> Result<ReminderPage, InfraError>;

    async fn create(&self, reminder: &NewReminder) -> Result<Reminder, InfraError>;

    async fn update(&self, id: &str, patch: ReminderPatch) -> Result<Reminder, InfraError>;
}

#[async_trait]
pub trait TypeCatalog: Send + Sync {
    /// Raw tenant option value, `None` when the option does not exist.
    async fn detail(&self, category: &str, key: &str) -> Result<Option<String>, InfraError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ReqwestPlatformClient {
    client: Client,
    base_url: Url,
    credentials: Option<PlatformCredentials>,
    event_type: String,
}

impl ReqwestPlatformClient {
    pub fn new(
        base_url: &str,
        credentials: Option<PlatformCredentials>,
        event_type: impl Into<String>,
    ) -> Result<Self, InfraError> {
        let mut base_url = Url::parse(base_url.trim())
            .map_err(|error| InfraError::InvalidConfig(format!("invalid platform base url: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(
                "platform base url cannot be a base".to_string(),
            ));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client: Client::new(),
            base_url,
            credentials,
            event_type: event_type.into(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("platform base url cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(credentials) => {
                request.basic_auth(&credentials.username, Some(&credentials.password))
            }
            None => request,
        }
    }

    fn remote_error(status: StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body.trim().to_string()
        };
        InfraError::Remote {
            status: status.as_u16(),
            message,
        }
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<(StatusCode, String), InfraError> {
        let response = self
            .authorize(request)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("network error while {action}: {error}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Network(format!("failed reading response while {action}: {error}")))?;
        Ok((status, body))
    }

    fn decode_event(body: &str, action: &str) -> Result<Reminder, InfraError> {
        let event: ReminderEvent = serde_json::from_str(body).map_err(|error| {
            InfraError::Validation(format!("invalid payload while {action}: {error}; body={body}"))
        })?;
        decode_reminder(event)
    }
}

#[derive(Debug, serde::Deserialize)]
struct EventCollectionResponse {
    #[serde(default)]
    events: Vec<ReminderEvent>,
    statistics: Option<PageStatistics>,
}

#[derive(Debug, serde::Deserialize)]
struct PageStatistics {
    #[serde(rename = "totalPages")]
    total_pages: Option<u64>,
}

#[derive(Debug, serde::Deserialize)]
struct TenantOptionResponse {
    value: Option<String>,
}

#[async_trait]
impl EventSource for ReqwestPlatformClient {
    async fn list(&self, request: ListRemindersRequest) -> Result<ReminderPage, InfraError> {
        let endpoint = self.endpoint(&["event", "events"])?;
        let (status, body) = self
            .send(
                self.client.get(endpoint).query(&request.query_pairs()),
                "listing reminders",
            )
            .await?;
        if !status.is_success() {
            return Err(Self::remote_error(status, &body));
        }

        let parsed: EventCollectionResponse = serde_json::from_str(&body).map_err(|error| {
            InfraError::Validation(format!("invalid reminder list payload: {error}"))
        })?;

        let mut reminders = Vec::with_capacity(parsed.events.len());
        for event in parsed.events {
            match decode_reminder(event) {
                Ok(reminder) => reminders.push(reminder),
                Err(error) => tracing::warn!(%error, "skipping undecodable reminder event"),
            }
        }

        Ok(ReminderPage {
            reminders,
            total_pages: parsed.statistics.and_then(|statistics| statistics.total_pages),
        })
    }

    async fn create(&self, reminder: &NewReminder) -> Result<Reminder, InfraError> {
        let endpoint = self.endpoint(&["event", "events"])?;
        let payload = encode_new_reminder(reminder, &self.event_type);
        let (status, body) = self
            .send(self.client.post(endpoint).json(&payload), "creating reminder")
            .await?;
        if !status.is_success() {
            return Err(Self::remote_error(status, &body));
        }
        Self::decode_event(&body, "creating reminder")
    }

    async fn update(&self, id: &str, patch: ReminderPatch) -> Result<Reminder, InfraError> {
        if id.trim().is_empty() {
            return Err(InfraError::Validation("reminder id must not be empty".to_string()));
        }
        let endpoint = self.endpoint(&["event", "events", id.trim()])?;
        let (status, body) = self
            .send(
                self.client.put(endpoint).json(&encode_patch(&patch)),
                "updating reminder",
            )
            .await?;
        if !status.is_success() {
            return Err(Self::remote_error(status, &body));
        }
        Self::decode_event(&body, "updating reminder")
    }
}

#[async_trait]
impl TypeCatalog for ReqwestPlatformClient {
    async fn detail(&self, category: &str, key: &str) -> Result<Option<String>, InfraError> {
        let endpoint = self.endpoint(&["tenant", "options", category, key])?;
        let (status, body) = self
            .send(self.client.get(endpoint), "reading tenant option")
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::remote_error(status, &body));
        }
        let parsed: TenantOptionResponse = serde_json::from_str(&body)?;
        Ok(parsed.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_keep_base_path() {
        let client = ReqwestPlatformClient::new("https://tenant.example.com/api", None, "c8y_Reminder")
            .expect("valid base url");
        assert_eq!(
            client.endpoint(&["event", "events", "12"]).expect("endpoint").as_str(),
            "https://tenant.example.com/api/event/events/12"
        );

        let client = ReqwestPlatformClient::new("https://tenant.example.com", None, "c8y_Reminder")
            .expect("valid base url");
        assert_eq!(
            client
                .endpoint(&["tenant", "options", "c8y_reminder", "types"])
                .expect("endpoint")
                .as_str(),
            "https://tenant.example.com/tenant/options/c8y_reminder/types"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(matches!(
            ReqwestPlatformClient::new("not a url", None, "c8y_Reminder"),
            Err(InfraError::InvalidConfig(_))
        ));
    }

    #[test]
    fn list_request_serializes_filters() {
        let request = ListRemindersRequest::due_active_count(
            "c8y_Reminder",
            DateTime::parse_from_rfc3339("2026-02-16T09:00:00Z")
                .expect("valid datetime")
                .with_timezone(&Utc),
        );

        let pairs = request.query_pairs();
        assert!(pairs.contains(&("pageSize", "1".to_string())));
        assert!(pairs.contains(&("withTotalPages", "true".to_string())));
        assert!(pairs.contains(&("fragmentType", "status".to_string())));
        assert!(pairs.contains(&("fragmentValue", "ACTIVE".to_string())));
        assert!(pairs.contains(&("dateFrom", "1970-01-01".to_string())));
        assert!(pairs.contains(&("dateTo", "2026-02-16T09:00:00.000Z".to_string())));
    }

    #[test]
    fn later_pages_skip_total_pages() {
        assert!(!ListRemindersRequest::page("c8y_Reminder", 100, 2).with_total_pages);
    }

    #[test]
    fn remote_error_prefers_body_text() {
        let error = ReqwestPlatformClient::remote_error(StatusCode::UNPROCESSABLE_ENTITY, " text too long ");
        assert_eq!(error.remote_text(), "text too long");
        let error = ReqwestPlatformClient::remote_error(StatusCode::FORBIDDEN, "");
        assert_eq!(error.remote_text(), "Forbidden");
    }
}
