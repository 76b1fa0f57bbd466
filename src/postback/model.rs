//! Postback request shapes

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiError;
use crate::models::{Conversion, ConversionStatus};

/// Accept strings, numbers and booleans alike; networks are inconsistent
fn lenient<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(other) => Some(other.to_string()),
    }
    .map(|s| s.trim().to_string())
    .filter(|s| !s.is_empty()))
}

/// Postback as received, from a JSON body, a form body or a query string
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct PostbackRequest {
    #[serde(default, deserialize_with = "lenient")]
    #[validate(length(max = 50))]
    pub user_offer_id: Option<String>,

    #[serde(default, alias = "aff", deserialize_with = "lenient")]
    #[validate(length(max = 100))]
    pub tracking_code: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    #[validate(length(max = 100))]
    pub sub_id: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    #[validate(length(max = 50))]
    pub click_id: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    #[validate(length(max = 200))]
    pub external_id: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    #[validate(length(max = 200))]
    pub transaction_id: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub amount: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub commission: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    #[validate(length(max = 3))]
    pub currency: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    #[validate(length(max = 50))]
    pub network_id: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    #[validate(length(max = 2))]
    pub country: Option<String>,

    #[serde(default, alias = "ts", deserialize_with = "lenient")]
    pub timestamp: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    #[validate(length(max = 128))]
    pub nonce: Option<String>,

    #[serde(default, alias = "sig", deserialize_with = "lenient")]
    pub signature: Option<String>,
}

/// Typed view of a [`PostbackRequest`] after shape validation
#[derive(Debug, Clone)]
pub struct ParsedPostback {
    pub user_offer_id: Option<Uuid>,
    pub tracking_code: Option<String>,
    pub sub_id: Option<String>,
    pub click_id: Option<Uuid>,
    /// `external_id`, else `transaction_id`
    pub external_id: Option<String>,
    pub amount: i64,
    pub commission: i64,
    pub currency: String,
    pub status: ConversionStatus,
    pub network_id: Option<Uuid>,
    pub country: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub nonce: Option<String>,
}

fn parse_uuid(field: &str, value: &Option<String>) -> Result<Option<Uuid>, ApiError> {
    value
        .as_deref()
        .map(|v| {
            Uuid::parse_str(v)
                .map_err(|_| ApiError::ValidationError(format!("{} must be a UUID", field)))
        })
        .transpose()
}

fn parse_minor_units(field: &str, value: &Option<String>) -> Result<i64, ApiError> {
    match value.as_deref() {
        None => Ok(0),
        Some(v) => match v.parse::<i64>() {
            Ok(n) if n >= 0 => Ok(n),
            _ => Err(ApiError::ValidationError(format!(
                "{} must be a non-negative integer in minor units",
                field
            ))),
        },
    }
}

/// Unix seconds or RFC 3339
fn parse_timestamp(value: &Option<String>) -> Result<Option<DateTime<Utc>>, ApiError> {
    let Some(raw) = value.as_deref() else {
        return Ok(None);
    };

    if let Ok(secs) = raw.parse::<i64>() {
        if secs <= 0 {
            return Ok(None);
        }
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .map(Some)
            .ok_or_else(|| ApiError::ValidationError("timestamp out of range".to_string()));
    }

    DateTime::parse_from_rfc3339(raw)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|_| ApiError::ValidationError("timestamp must be unix seconds or RFC 3339".to_string()))
}

impl PostbackRequest {
    /// Validate field lengths and formats
    pub fn parse(&self) -> Result<ParsedPostback, ApiError> {
        self.validate()?;

        let status = match self.status.as_deref() {
            None => ConversionStatus::Pending,
            Some(s) => ConversionStatus::parse(s).ok_or_else(|| {
                ApiError::ValidationError(format!(
                    "status must be pending, approved or rejected (got '{}')",
                    s
                ))
            })?,
        };

        Ok(ParsedPostback {
            user_offer_id: parse_uuid("user_offer_id", &self.user_offer_id)?,
            tracking_code: self.tracking_code.clone(),
            sub_id: self.sub_id.clone(),
            click_id: parse_uuid("click_id", &self.click_id)?,
            external_id: self
                .external_id
                .clone()
                .or_else(|| self.transaction_id.clone()),
            amount: parse_minor_units("amount", &self.amount)?,
            commission: parse_minor_units("commission", &self.commission)?,
            currency: self
                .currency
                .as_deref()
                .map(str::to_uppercase)
                .unwrap_or_else(|| "USD".to_string()),
            status,
            network_id: parse_uuid("network_id", &self.network_id)?,
            country: self.country.as_deref().map(str::to_uppercase),
            timestamp: parse_timestamp(&self.timestamp)?,
            nonce: self.nonce.clone(),
        })
    }
}

/// Successful postback response
#[derive(Debug, Serialize)]
pub struct PostbackResponse {
    pub success: bool,
    pub message: String,
    pub duplicate: bool,
    pub conversion: Conversion,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_numbers_and_aliases() {
        let req: PostbackRequest = serde_json::from_value(json!({
            "aff": "abc-def",
            "transaction_id": "tx-1",
            "amount": 2500,
            "commission": "500",
            "ts": 1_700_000_000,
            "sig": "deadbeef",
        }))
        .unwrap();

        assert_eq!(req.tracking_code.as_deref(), Some("abc-def"));
        assert_eq!(req.signature.as_deref(), Some("deadbeef"));

        let parsed = req.parse().unwrap();
        assert_eq!(parsed.external_id.as_deref(), Some("tx-1"));
        assert_eq!(parsed.amount, 2500);
        assert_eq!(parsed.commission, 500);
        assert_eq!(parsed.currency, "USD");
        assert_eq!(parsed.status, ConversionStatus::Pending);
        assert_eq!(parsed.timestamp.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_external_id_preferred_over_transaction_id() {
        let req = PostbackRequest {
            external_id: Some("ext".to_string()),
            transaction_id: Some("tx".to_string()),
            ..Default::default()
        };
        assert_eq!(req.parse().unwrap().external_id.as_deref(), Some("ext"));
    }

    #[test]
    fn test_oversize_fields_rejected() {
        let req = PostbackRequest {
            user_offer_id: Some("x".repeat(51)),
            ..Default::default()
        };
        assert!(matches!(req.parse(), Err(ApiError::ValidationError(_))));

        let req = PostbackRequest {
            tracking_code: Some("x".repeat(101)),
            ..Default::default()
        };
        assert!(req.parse().is_err());

        let req = PostbackRequest {
            external_id: Some("x".repeat(201)),
            ..Default::default()
        };
        assert!(req.parse().is_err());

        let req = PostbackRequest {
            external_id: Some("x".repeat(200)),
            ..Default::default()
        };
        assert!(req.parse().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_status = PostbackRequest {
            status: Some("paid".to_string()),
            ..Default::default()
        };
        assert!(bad_status.parse().is_err());

        let bad_amount = PostbackRequest {
            amount: Some("-5".to_string()),
            ..Default::default()
        };
        assert!(bad_amount.parse().is_err());

        let bad_click = PostbackRequest {
            click_id: Some("not-a-uuid".to_string()),
            ..Default::default()
        };
        assert!(bad_click.parse().is_err());
    }

    #[test]
    fn test_timestamp_formats() {
        let rfc3339 = PostbackRequest {
            timestamp: Some("2023-11-14T22:13:20Z".to_string()),
            ..Default::default()
        };
        assert_eq!(
            rfc3339.parse().unwrap().timestamp.unwrap().timestamp(),
            1_700_000_000
        );

        let garbage = PostbackRequest {
            timestamp: Some("yesterday".to_string()),
            ..Default::default()
        };
        match garbage.parse() {
            Err(ApiError::ValidationError(msg)) => {
                assert!(msg.contains("unix seconds or RFC 3339"))
            }
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_blank_values_are_absent() {
        let req: PostbackRequest = serde_json::from_value(json!({
            "nonce": "  ",
            "currency": "eur",
        }))
        .unwrap();
        let parsed = req.parse().unwrap();
        assert!(parsed.nonce.is_none());
        assert_eq!(parsed.currency, "EUR");
    }
}
