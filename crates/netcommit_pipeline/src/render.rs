//! Template renderer.
//!
//! Templates are Jinja2-style (Tera) and keyed by `<family>/<name>`. The
//! built-in `base` template for each family is compiled into the binary; a
//! templates directory laid out as `<dir>/<family>/<name>[.<ext>].j2` can add
//! templates or override the built-ins.
//!
//! Rendering is a pure function of (intent, template): the context is built
//! from ordered data only and no clock or environment value reaches the
//! output, so the same input always hashes the same.

use crate::intent::IntentRecord;
use netcommit_job::RenderedConfig;
use netcommit_protocol::DeviceFamily;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tera::{Context, Tera};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Built-in templates: (family, name, source).
const EMBEDDED_TEMPLATES: &[(DeviceFamily, &str, &str)] = &[
    (DeviceFamily::Cli, "base", include_str!("../templates/cli/base.j2")),
    (DeviceFamily::Api, "base", include_str!("../templates/api/base.json.j2")),
    (
        DeviceFamily::Controller,
        "base",
        include_str!("../templates/controller/base.yaml.j2"),
    ),
];

/// Rendering failures. Never retried: they are data or template defects.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("required field missing: {0}")]
    MissingField(String),

    #[error("no template '{name}' for family {family}")]
    UnknownTemplate { family: DeviceFamily, name: String },

    #[error("template {key} failed: {message}")]
    Template { key: String, message: String },

    #[error("failed to load templates from {path}: {message}")]
    Load { path: String, message: String },
}

struct TemplateEntry {
    version: String,
    /// Parse error, reported when the template is used
    broken: Option<String>,
}

/// Named, versioned templates per device family.
pub struct TemplateRegistry {
    tera: Tera,
    entries: BTreeMap<String, TemplateEntry>,
}

fn template_key(family: DeviceFamily, name: &str) -> String {
    format!("{}/{}", family.as_str(), name)
}

/// Template version: first 12 hex chars of the SHA-256 of its source.
pub fn template_version(source: &str) -> String {
    let digest = hex::encode(Sha256::digest(source.as_bytes()));
    digest[..12].to_string()
}

/// Template name from a file name: `edge.cfg.j2` -> `edge`.
fn template_name_from_file(family: DeviceFamily, file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(".j2").unwrap_or(file_name);
    let ext = format!(".{}", family.config_extension());
    let stem = stem.strip_suffix(ext.as_str()).unwrap_or(stem);
    if stem.is_empty() || stem.starts_with('.') {
        None
    } else {
        Some(stem.to_string())
    }
}

/// Tera rolls the real cause into the source chain.
fn describe_tera_error(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}

impl TemplateRegistry {
    /// Registry with only the built-in templates.
    pub fn from_embedded() -> Result<Self, RenderError> {
        let mut registry = Self {
            tera: Tera::default(),
            entries: BTreeMap::new(),
        };
        for (family, name, source) in EMBEDDED_TEMPLATES {
            registry.add(*family, name, source);
            let key = template_key(*family, name);
            if let Some(message) = registry.entries.get(&key).and_then(|e| e.broken.clone()) {
                return Err(RenderError::Template { key, message });
            }
        }
        debug!("Loaded {} embedded templates", EMBEDDED_TEMPLATES.len());
        Ok(registry)
    }

    /// Built-in templates plus any found under `dir`, which take precedence.
    pub fn with_overrides(dir: &Path) -> Result<Self, RenderError> {
        let mut registry = Self::from_embedded()?;
        if !dir.is_dir() {
            debug!("Template directory {} not present; using built-ins", dir.display());
            return Ok(registry);
        }

        let mut loaded = 0;
        for family in DeviceFamily::ALL {
            let family_dir = dir.join(family.as_str());
            if !family_dir.is_dir() {
                continue;
            }
            let entries = fs::read_dir(&family_dir).map_err(|e| RenderError::Load {
                path: family_dir.display().to_string(),
                message: e.to_string(),
            })?;
            for entry in entries {
                let path = entry
                    .map_err(|e| RenderError::Load {
                        path: family_dir.display().to_string(),
                        message: e.to_string(),
                    })?
                    .path();
                if !path.is_file() {
                    continue;
                }
                let Some(name) = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| template_name_from_file(family, n))
                else {
                    continue;
                };
                let source = fs::read_to_string(&path).map_err(|e| RenderError::Load {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                registry.add(family, &name, &source);
                loaded += 1;
            }
        }
        info!("Loaded {} templates from {}", loaded, dir.display());
        Ok(registry)
    }

    /// Register a template. Malformed sources are kept as broken entries so
    /// that rendering with them fails loudly instead of falling back.
    pub fn add(&mut self, family: DeviceFamily, name: &str, source: &str) {
        let key = template_key(family, name);
        let broken = match self.tera.add_raw_template(&key, source) {
            Ok(()) => None,
            Err(e) => {
                let message = describe_tera_error(&e);
                warn!("Template {} is malformed: {}", key, message);
                Some(message)
            }
        };
        self.entries.insert(
            key,
            TemplateEntry {
                version: template_version(source),
                broken,
            },
        );
    }

    /// Version of a registered template.
    pub fn version(&self, family: DeviceFamily, name: &str) -> Option<&str> {
        self.entries
            .get(&template_key(family, name))
            .map(|e| e.version.as_str())
    }

    /// Registered template keys, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Render the named template for an intent record's family.
    pub fn render(
        &self,
        intent: &IntentRecord,
        template_name: &str,
    ) -> Result<RenderedConfig, RenderError> {
        if template_name.trim().is_empty() {
            return Err(RenderError::MissingField("template name".to_string()));
        }
        check_required_fields(intent)?;

        let key = template_key(intent.family, template_name);
        let entry = self
            .entries
            .get(&key)
            .ok_or_else(|| RenderError::UnknownTemplate {
                family: intent.family,
                name: template_name.to_string(),
            })?;
        if let Some(message) = &entry.broken {
            return Err(RenderError::Template {
                key,
                message: message.clone(),
            });
        }

        let context = Context::from_serialize(intent).map_err(|e| RenderError::Template {
            key: key.clone(),
            message: describe_tera_error(&e),
        })?;
        let output = self
            .tera
            .render(&key, &context)
            .map_err(|e| RenderError::Template {
                key: key.clone(),
                message: describe_tera_error(&e),
            })?;

        let mut content = output.trim_end().to_string();
        content.push('\n');

        debug!(
            device = %intent.device,
            template = %key,
            bytes = content.len(),
            "Rendered configuration"
        );

        Ok(RenderedConfig::new(
            intent.device.clone(),
            intent.family,
            template_name,
            entry.version.clone(),
            intent.version,
            content,
        ))
    }
}

fn check_required_fields(intent: &IntentRecord) -> Result<(), RenderError> {
    if intent.hostname.trim().is_empty() {
        return Err(RenderError::MissingField("hostname".to_string()));
    }
    if let Some(index) = intent
        .interfaces
        .iter()
        .position(|iface| iface.name.trim().is_empty())
    {
        return Err(RenderError::MissingField(format!(
            "interfaces[{}].name",
            index
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{BgpNeighbor, InterfaceIntent};
    use netcommit_ids::DeviceId;
    use tempfile::TempDir;

    fn intent(family: DeviceFamily) -> IntentRecord {
        let mut record = IntentRecord::new(DeviceId::parse("sw1").unwrap(), family, "sw1");
        record.version = 4;
        record.interfaces.push(InterfaceIntent {
            name: "eth0".into(),
            description: Some("Uplink".into()),
            address: Some("10.1.1.1/24".into()),
            vlans: Vec::new(),
            enabled: true,
        });
        record.services.ntp_servers.push("10.0.0.123".into());
        record
    }

    #[test]
    fn test_cli_interface_block() {
        let registry = TemplateRegistry::from_embedded().unwrap();
        let rendered = registry.render(&intent(DeviceFamily::Cli), "base").unwrap();
        assert!(rendered
            .content()
            .contains("interface eth0\n  description Uplink\n  ip address 10.1.1.1/24\n"));
        assert!(rendered.content().starts_with("hostname sw1\n"));
        assert!(rendered.content().ends_with("ntp server 10.0.0.123\n"));
        assert_eq!(rendered.intent_version(), 4);
        assert_eq!(rendered.template_version().len(), 12);
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let registry = TemplateRegistry::from_embedded().unwrap();
        for family in DeviceFamily::ALL {
            let mut record = intent(family);
            record.routing.asn = Some(65000);
            record.routing.neighbors.push(BgpNeighbor {
                address: "10.1.1.2".into(),
                remote_as: 65001,
                description: Some("core".into()),
            });
            let a = registry.render(&record, "base").unwrap();
            let b = registry.render(&record, "base").unwrap();
            assert_eq!(a.content_hash(), b.content_hash(), "{family}");
        }
    }

    #[test]
    fn test_api_output_is_json() {
        let registry = TemplateRegistry::from_embedded().unwrap();
        let rendered = registry.render(&intent(DeviceFamily::Api), "base").unwrap();
        let value: serde_json::Value = serde_json::from_str(rendered.content()).unwrap();
        assert_eq!(value["hostname"], "sw1");
        assert_eq!(value["ntp_servers"][0], "10.0.0.123");
        assert_eq!(value["interfaces"][0]["address"], "10.1.1.1/24");
    }

    #[test]
    fn test_controller_output_is_yaml() {
        let registry = TemplateRegistry::from_embedded().unwrap();
        let rendered = registry
            .render(&intent(DeviceFamily::Controller), "base")
            .unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(rendered.content()).unwrap();
        assert_eq!(value["hostname"].as_str(), Some("sw1"));
        assert_eq!(value["interfaces"][0]["name"].as_str(), Some("eth0"));
    }

    #[test]
    fn test_missing_fields() {
        let registry = TemplateRegistry::from_embedded().unwrap();
        let mut record = intent(DeviceFamily::Cli);
        record.hostname.clear();
        assert!(matches!(
            registry.render(&record, "base"),
            Err(RenderError::MissingField(f)) if f == "hostname"
        ));

        let mut record = intent(DeviceFamily::Cli);
        record.interfaces[0].name.clear();
        assert!(matches!(
            registry.render(&record, "base"),
            Err(RenderError::MissingField(f)) if f == "interfaces[0].name"
        ));

        assert!(matches!(
            registry.render(&intent(DeviceFamily::Cli), " "),
            Err(RenderError::MissingField(_))
        ));
        assert!(matches!(
            registry.render(&intent(DeviceFamily::Cli), "nope"),
            Err(RenderError::UnknownTemplate { .. })
        ));
    }

    #[test]
    fn test_undefined_variable_is_render_error() {
        let mut registry = TemplateRegistry::from_embedded().unwrap();
        registry.add(DeviceFamily::Cli, "broken", "hostname {{ no_such_field }}\n");
        assert!(matches!(
            registry.render(&intent(DeviceFamily::Cli), "broken"),
            Err(RenderError::Template { .. })
        ));
    }

    #[test]
    fn test_malformed_override_fails_on_use() {
        let temp = TempDir::new().unwrap();
        let cli_dir = temp.path().join("cli");
        fs::create_dir_all(&cli_dir).unwrap();
        fs::write(cli_dir.join("edge.cfg.j2"), "hostname {{ hostname \n").unwrap();
        fs::write(cli_dir.join("base.j2"), "hostname {{ hostname }}-override\n").unwrap();

        let registry = TemplateRegistry::with_overrides(temp.path()).unwrap();
        assert!(matches!(
            registry.render(&intent(DeviceFamily::Cli), "edge"),
            Err(RenderError::Template { .. })
        ));
        let rendered = registry.render(&intent(DeviceFamily::Cli), "base").unwrap();
        assert_eq!(rendered.content(), "hostname sw1-override\n");
        assert!(registry.names().contains(&"cli/edge".to_string()));
    }

    #[test]
    fn test_template_name_from_file() {
        assert_eq!(
            template_name_from_file(DeviceFamily::Api, "base.json.j2").as_deref(),
            Some("base")
        );
        assert_eq!(
            template_name_from_file(DeviceFamily::Cli, "edge.j2").as_deref(),
            Some("edge")
        );
        assert_eq!(template_name_from_file(DeviceFamily::Cli, ".j2"), None);
    }
}
