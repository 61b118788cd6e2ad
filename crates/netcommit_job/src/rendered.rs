//! Frozen deployment artifacts: rendered configuration and device snapshots.

use chrono::{DateTime, Utc};
use netcommit_ids::DeviceId;
use netcommit_protocol::{Assertion, DeviceFamily};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 of configuration text, lowercase hex.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Configuration text rendered for one device.
///
/// Immutable after construction: the content hash is computed once, and
/// the executor re-checks it before apply so what was validated is exactly
/// what gets deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedConfig {
    device: DeviceId,
    family: DeviceFamily,
    template_name: String,
    template_version: String,
    intent_version: u64,
    content: String,
    content_hash: String,
    rendered_at: DateTime<Utc>,
}

impl RenderedConfig {
    pub fn new(
        device: DeviceId,
        family: DeviceFamily,
        template_name: impl Into<String>,
        template_version: impl Into<String>,
        intent_version: u64,
        content: String,
    ) -> Self {
        let content_hash = content_hash(&content);
        Self {
            device,
            family,
            template_name: template_name.into(),
            template_version: template_version.into(),
            intent_version,
            content,
            content_hash,
            rendered_at: Utc::now(),
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    pub fn template_name(&self) -> &str {
        &self.template_name
    }

    pub fn template_version(&self) -> &str {
        &self.template_version
    }

    pub fn intent_version(&self) -> u64 {
        self.intent_version
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn rendered_at(&self) -> DateTime<Utc> {
        self.rendered_at
    }

    /// Recompute the hash and compare with the recorded one.
    pub fn verify_integrity(&self) -> bool {
        content_hash(&self.content) == self.content_hash
    }
}

/// Live device configuration captured under the device lock right before
/// deployment. This, not the stored baseline, is what rollback restores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub content: String,
    pub content_hash: String,
    pub captured_at: DateTime<Utc>,
    /// Assertions that already held before the change; re-checked after rollback
    #[serde(default)]
    pub holding_assertions: Vec<Assertion>,
}

impl DeviceSnapshot {
    pub fn new(content: String, holding_assertions: Vec<Assertion>) -> Self {
        Self {
            content_hash: content_hash(&content),
            content,
            captured_at: Utc::now(),
            holding_assertions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceId {
        DeviceId::parse("sw1").unwrap()
    }

    #[test]
    fn test_hash_is_stable() {
        let a = RenderedConfig::new(device(), DeviceFamily::Cli, "base", "abc", 1, "x\n".into());
        let b = RenderedConfig::new(device(), DeviceFamily::Cli, "base", "abc", 1, "x\n".into());
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
        assert!(a.verify_integrity());
    }

    #[test]
    fn test_tampered_content_fails_integrity() {
        let rendered =
            RenderedConfig::new(device(), DeviceFamily::Cli, "base", "abc", 1, "x\n".into());
        let mut value = serde_json::to_value(&rendered).unwrap();
        value["content"] = serde_json::Value::String("y\n".into());
        let tampered: RenderedConfig = serde_json::from_value(value).unwrap();
        assert!(!tampered.verify_integrity());
    }
}
