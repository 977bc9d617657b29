use serde::Serialize;
use std::fmt;

/// Fields accepted on `POST /webhook`. Both are optional; absence is treated
/// as the empty string.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub update_callback: Option<String>,
    pub description: Option<String>,
    /// Set when one of the fields arrived as a list or nested object
    /// (`description=a&description=b`, `description[x]=a`) instead of a
    /// single string.
    pub structured_field: Option<&'static str>,
}

impl WebhookRequest {
    /// Build a request from decoded form pairs. Unknown keys are ignored.
    pub fn from_form_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut request = Self::default();
        for (key, value) in pairs {
            let (name, nested) = match key.split_once('[') {
                Some((name, _)) => (name, true),
                None => (key.as_str(), false),
            };
            let (field, label) = match name {
                "updateCallback" => (&mut request.update_callback, "updateCallback"),
                "description" => (&mut request.description, "description"),
                _ => continue,
            };
            if nested || field.is_some() {
                request.structured_field.get_or_insert(label);
            }
            *field = Some(value);
        }
        request
    }

    pub fn update_callback(&self) -> &str {
        self.update_callback.as_deref().unwrap_or("")
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pass,
    Fail,
}

impl BuildStatus {
    /// A description passes when, once trimmed, it ends with a period.
    pub fn from_description(description: &str) -> Self {
        if description.trim().ends_with('.') {
            BuildStatus::Pass
        } else {
            BuildStatus::Fail
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Pass => "pass",
            BuildStatus::Fail => "fail",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body POSTed to the caller's `updateCallback`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdatePayload {
    pub status: BuildStatus,
    pub messages: Vec<String>,
}

impl UpdatePayload {
    pub fn new(status: BuildStatus) -> Self {
        Self {
            status,
            messages: vec![format!("Build completed with status: {status}")],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub message: String,
    pub delay: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub delay: i64,
}
