//! Vendor cloud API client
//!
//! The softener has no local API; everything goes through the vendor's
//! cloud at myjudo.eu. The interface is a single GET endpoint multiplexed
//! by query parameters: login, bulk device data, the device error log and
//! register writes. Responses are JSON with loosely typed fields (numbers
//! and strings are used interchangeably), so the deserializers here accept
//! either.

use crate::config::CloudConfig;
use crate::error::{NaiadError, Result};
use crate::logging::get_logger;
use crate::registers::RegisterSnapshot;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Accepts a JSON string or number and yields a string either way
fn flexible_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_string(&value))
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One device block of the bulk device-data response
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceData {
    #[serde(deserialize_with = "flexible_string")]
    pub serialnumber: String,
    #[serde(default)]
    pub data: Vec<DeviceDataBlock>,
}

/// Inner block carrying the device session handles and the register map
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDataBlock {
    #[serde(default)]
    pub da: Value,
    #[serde(default)]
    pub dt: Value,
    #[serde(default)]
    pub data: HashMap<String, RegisterCell>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterCell {
    #[serde(default)]
    pub data: String,
}

impl DeviceData {
    /// Flatten the register map of the first block into a snapshot.
    ///
    /// Register keys that are not valid u16 indices are skipped; the
    /// vendor mixes non-register bookkeeping keys into the same map.
    pub fn snapshot(&self) -> RegisterSnapshot {
        let mut registers = HashMap::new();
        if let Some(block) = self.data.first() {
            for (key, cell) in &block.data {
                if let Ok(index) = key.parse::<u16>() {
                    registers.insert(index, cell.data.clone());
                }
            }
        }
        RegisterSnapshot::new(registers)
    }
}

/// Outcome of a bulk device-data fetch
#[derive(Debug)]
pub enum DeviceDataOutcome {
    /// Data for all devices of the account, in account order
    Ok(Vec<DeviceData>),
    /// The session token was rejected; re-authenticate and retry
    LoginExpired,
    /// Any other vendor-side error, verbatim
    Error(String),
}

/// One row of the device error log, newest first
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorLogEntry {
    #[serde(deserialize_with = "flexible_string")]
    pub id: String,
    #[serde(default)]
    pub ts_sort: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(deserialize_with = "flexible_string", default)]
    pub error: String,
    #[serde(deserialize_with = "flexible_string", default)]
    pub serialnumber: String,
}

impl ErrorLogEntry {
    /// Human-readable timestamp prefix: the vendor pads `ts_sort` with a
    /// sub-second sort suffix that is noise in a notification
    pub fn timestamp_prefix(&self) -> String {
        // get() rather than indexing: the field is vendor-controlled and a
        // cut inside a multibyte character must not panic
        let trimmed = if self.ts_sort.len() > 7 {
            self.ts_sort
                .get(..self.ts_sort.len() - 7)
                .unwrap_or(self.ts_sort.as_str())
        } else {
            self.ts_sort.as_str()
        };
        format!("{}: ", trimmed)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorLogResponse {
    #[serde(default)]
    pub count: Value,
    #[serde(default)]
    pub data: Vec<ErrorLogEntry>,
}

impl ErrorLogResponse {
    /// Newest entry, if the log is non-empty
    pub fn newest(&self) -> Option<&ErrorLogEntry> {
        if self.count.as_u64() == Some(0) {
            return None;
        }
        self.data.first()
    }
}

/// HTTP client for the vendor cloud endpoint
pub struct CloudClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    logger: crate::logging::StructuredLogger,
}

impl CloudClient {
    pub fn new(config: &CloudConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("Mozilla")
            .build()
            .map_err(|e| NaiadError::transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            logger: get_logger("cloud"),
        })
    }

    async fn get_json(&self, query: &[(&str, &str)]) -> Result<Value> {
        let response = self.http.get(&self.base_url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NaiadError::transport(format!(
                "Cloud endpoint returned HTTP {}",
                status
            )));
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            NaiadError::transport(format!("Cloud response is not JSON: {} - {}", e, body))
        })
    }

    /// Authenticate with the account credentials and return a session
    /// token. The password is md5-hashed client-side; that is the vendor
    /// protocol, not a storage choice.
    pub async fn login(&self) -> Result<String> {
        let digest = md5::compute(self.password.as_bytes());
        let password_md5 = format!("{:x}", digest);
        let body = self
            .get_json(&[
                ("group", "register"),
                ("command", "login"),
                ("name", "login"),
                ("user", &self.username),
                ("password", &password_md5),
                ("nohash", "Service"),
                ("role", "customer"),
            ])
            .await?;
        match body.get("token") {
            Some(token) => {
                let token = value_to_string(token);
                self.logger.info(&format!("Login successful, token {}", token));
                Ok(token)
            }
            None => Err(NaiadError::auth("Login failed, check the cloud credentials")),
        }
    }

    /// Fetch data for every device of the account in one request
    pub async fn fetch_device_data(&self, token: &str) -> Result<DeviceDataOutcome> {
        let body = self
            .get_json(&[
                ("token", token),
                ("group", "register"),
                ("command", "get device data"),
            ])
            .await?;
        match body.get("status").and_then(Value::as_str) {
            Some("ok") => {
                let devices: Vec<DeviceData> =
                    serde_json::from_value(body.get("data").cloned().unwrap_or_default())?;
                Ok(DeviceDataOutcome::Ok(devices))
            }
            Some("error") => {
                let detail = body.get("data").map(value_to_string).unwrap_or_default();
                if detail == "login failed" {
                    Ok(DeviceDataOutcome::LoginExpired)
                } else {
                    Ok(DeviceDataOutcome::Error(detail))
                }
            }
            _ => Ok(DeviceDataOutcome::Error(format!(
                "Unexpected response status: {}",
                body.get("status").map(value_to_string).unwrap_or_default()
            ))),
        }
    }

    /// Fetch the account-wide device error log, newest entry first
    pub async fn fetch_error_log(&self, token: &str) -> Result<ErrorLogResponse> {
        let body = self
            .get_json(&[
                ("token", token),
                ("group", "register"),
                ("command", "get error messages"),
            ])
            .await?;
        Ok(serde_json::from_value(body)?)
    }

    /// Write one register to one device. The vendor acknowledges with
    /// `status: ok`; anything else is a failed write.
    pub async fn write_register(
        &self,
        token: &str,
        serial_number: &str,
        da: &Value,
        dt: &Value,
        index: u16,
        data: &str,
    ) -> Result<()> {
        let index = index.to_string();
        let da = value_to_string(da);
        let dt = value_to_string(dt);
        let body = self
            .get_json(&[
                ("token", token),
                ("group", "register"),
                ("command", "write data"),
                ("serial_number", serial_number),
                ("dt", &dt),
                ("index", &index),
                ("data", data),
                ("da", &da),
                ("role", "customer"),
            ])
            .await?;
        if body.get("status").and_then(Value::as_str) == Some("ok") {
            Ok(())
        } else {
            Err(NaiadError::transport(format!(
                "Register write {} rejected: {}",
                index, body
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_data_parses_mixed_types() {
        let json = r#"{
            "serialnumber": 123456,
            "data": [{
                "da": 7,
                "dt": "0x33",
                "data": {
                    "790": {"data": "AE0C1901"},
                    "8": {"data": ""},
                    "wd": {"data": "ignored"}
                }
            }]
        }"#;
        let device: DeviceData = serde_json::from_str(json).unwrap();
        assert_eq!(device.serialnumber, "123456");
        let snapshot = device.snapshot();
        assert_eq!(snapshot.raw(790), Some("AE0C1901"));
        assert_eq!(snapshot.raw(8), Some(""));
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_error_log_newest_and_count_zero() {
        let log: ErrorLogResponse = serde_json::from_str(
            r#"{"count": 2, "data": [
                {"id": 99, "ts_sort": "2024-01-02 03:04:05.123456", "type": "w", "error": "E7", "serialnumber": "123"},
                {"id": 98, "ts_sort": "2024-01-01 00:00:00.000000", "type": "e", "error": "E1", "serialnumber": "123"}
            ]}"#,
        )
        .unwrap();
        let newest = log.newest().unwrap();
        assert_eq!(newest.id, "99");
        assert_eq!(newest.timestamp_prefix(), "2024-01-02 03:04:05: ");

        let empty: ErrorLogResponse =
            serde_json::from_str(r#"{"count": 0, "data": []}"#).unwrap();
        assert!(empty.newest().is_none());
    }

    #[test]
    fn test_timestamp_prefix_survives_multibyte_suffix() {
        let entry = ErrorLogEntry {
            id: "1".to_string(),
            ts_sort: "aaaaaaaaö123456".to_string(),
            kind: "w".to_string(),
            error: "E1".to_string(),
            serialnumber: "123".to_string(),
        };
        // the cut lands inside 'ö'; the full string is kept instead
        assert_eq!(entry.timestamp_prefix(), "aaaaaaaaö123456: ");

        let short = ErrorLogEntry {
            ts_sort: "abc".to_string(),
            ..entry
        };
        assert_eq!(short.timestamp_prefix(), "abc: ");
    }
}
