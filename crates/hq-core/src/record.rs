//! # Records
//!
//! Shapes that leave the process: inventory documents returned by the
//! search backend, and audit records sent through the broker.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// An inventory host as stored in the search index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDocument {
    #[serde(rename = "Hostname")]
    pub hostname: String,
    /// Always a sequence, even when the index holds a single address.
    #[serde(rename = "Ip", default, deserialize_with = "one_or_many")]
    pub ip: Vec<String>,
}

impl HostDocument {
    pub fn new(hostname: impl Into<String>, ip: Vec<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ip,
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(ip) => vec![ip],
        OneOrMany::Many(ips) => ips,
    })
}

/// Who searched for what, and when. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    ip: String,
    username: String,
    query: String,
    /// ISO 8601 / RFC 3339, UTC.
    timestamp: String,
}

impl AuditRecord {
    /// Build a record stamped with the current wall-clock time.
    pub fn new(ip: impl Into<String>, username: impl Into<String>, query: impl Into<String>) -> Self {
        Self::at(ip, username, query, Utc::now())
    }

    pub fn at(
        ip: impl Into<String>,
        username: impl Into<String>,
        query: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            ip: ip.into(),
            username: username.into(),
            query: query.into(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_host_document_single_ip_becomes_sequence() {
        let doc: HostDocument =
            serde_json::from_value(json!({"Hostname": "octoxlabs01", "Ip": "0.0.0.0"})).unwrap();
        assert_eq!(doc.ip, vec!["0.0.0.0".to_string()]);

        let doc: HostDocument = serde_json::from_value(
            json!({"Hostname": "octoxlabs01", "Ip": ["192.168.1.101", "10.0.0.101"]}),
        )
        .unwrap();
        assert_eq!(doc.ip.len(), 2);
    }

    #[test]
    fn test_host_document_wire_names() {
        let doc = HostDocument::new("octoxlabs01", vec!["0.0.0.0".into()]);
        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            json!({"Hostname": "octoxlabs01", "Ip": ["0.0.0.0"]})
        );
    }

    #[test]
    fn test_audit_record_json() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let record = AuditRecord::at("10.1.2.3", "octoAdmin", "Hostname = octoxlabs*", at);
        assert_eq!(record.timestamp(), "2024-03-01T12:30:00.000000Z");

        let body = record.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["username"], "octoAdmin");
        assert_eq!(value["ip"], "10.1.2.3");
        assert_eq!(AuditRecord::from_json(&body).unwrap(), record);
    }

    #[test]
    fn test_audit_record_rejects_garbage() {
        assert!(AuditRecord::from_json(b"not json").is_err());
        assert!(AuditRecord::from_json(br#"{"ip": "1.1.1.1"}"#).is_err());
    }
}
