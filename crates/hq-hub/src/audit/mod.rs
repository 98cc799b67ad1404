//! # Audit Trail
//!
//! Every search request produces an [`hq_core::AuditRecord`]. The
//! [`publisher::AuditPublisher`] drops it on the broker queue; the
//! [`receiver::AuditReceiver`] drains the queue into the audit index.

pub mod publisher;
pub mod receiver;

pub use publisher::{AuditPublisher, PublishError};
pub use receiver::{AuditReceiver, ReceiverConfig, ReceiverError, ReceiverState};

use serde_json::{json, Value};

/// Field mappings for the audit index.
pub fn index_mappings() -> Value {
    json!({
        "properties": {
            "ip": { "type": "keyword" },
            "username": { "type": "keyword" },
            "query": { "type": "text" },
            "timestamp": { "type": "date" }
        }
    })
}
