use crate::error::ValidationError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

/// Recorded in the email column when the signed-in account is unknown.
pub const UNKNOWN_EMAIL: &str = "email";

/// New inventory item as entered in the add-row form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ItemForm {
    pub style: String,
    pub quantity: String,
    pub color: String,
    pub size: String,
    pub box_number: String,
}

impl ItemForm {
    fn fields(&self) -> [&str; 5] {
        [
            self.style.as_str(),
            self.quantity.as_str(),
            self.color.as_str(),
            self.size.as_str(),
            self.box_number.as_str(),
        ]
    }

    /// At least one field has to be filled in.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.fields().iter().all(|f| f.is_empty()) {
            return Err(ValidationError::EmptyRow);
        }
        Ok(())
    }

    /// Sheet row: timestamp, email, then the form fields in column order.
    pub fn into_row(self, timestamp: DateTime<Utc>, email: Option<&str>) -> Vec<String> {
        vec![
            timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            email.unwrap_or(UNKNOWN_EMAIL).to_string(),
            self.style,
            self.quantity,
            self.color,
            self.size,
            self.box_number,
        ]
    }
}
