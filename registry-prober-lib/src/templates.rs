//! EPP message templates.
//!
//! Built-in templates are compiled into the binary. A template directory can
//! override any of them with a `<name>.xml` file; overrides are read once at
//! startup so no file I/O happens while probing.

use crate::error::ProberError;
use crate::message::{EppCommand, EppRequest};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const HELLO: &str = include_str!("../templates/hello.xml");
const LOGIN: &str = include_str!("../templates/login.xml");
const LOGOUT: &str = include_str!("../templates/logout.xml");
const CHECK: &str = include_str!("../templates/check.xml");
const CLAIMS_CHECK: &str = include_str!("../templates/claimscheck.xml");
const CREATE: &str = include_str!("../templates/create.xml");
const DELETE: &str = include_str!("../templates/delete.xml");

fn builtin_template(command: EppCommand) -> &'static str {
    match command {
        EppCommand::Hello => HELLO,
        EppCommand::Login => LOGIN,
        EppCommand::Logout => LOGOUT,
        EppCommand::Check => CHECK,
        EppCommand::ClaimsCheck => CLAIMS_CHECK,
        EppCommand::Create => CREATE,
        EppCommand::Delete => DELETE,
    }
}

/// Named EPP templates.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    templates: HashMap<EppCommand, Arc<str>>,
}

impl TemplateStore {
    /// Store holding only the compiled-in templates.
    pub fn builtin() -> Self {
        let templates = EppCommand::ALL
            .iter()
            .map(|command| (*command, Arc::from(builtin_template(*command))))
            .collect();
        Self { templates }
    }

    /// Built-in templates with any `<name>.xml` files in `dir` taking precedence.
    pub fn with_overrides<P: AsRef<Path>>(dir: P) -> Result<Self, ProberError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ProberError::file_error(
                dir.to_string_lossy(),
                "Template directory not found",
            ));
        }

        let mut store = Self::builtin();
        for command in EppCommand::ALL {
            let path = dir.join(format!("{}.xml", command.template_name()));
            if !path.exists() {
                continue;
            }

            let content = fs::read_to_string(&path).map_err(|e| {
                ProberError::file_error(
                    path.to_string_lossy(),
                    format!("Failed to read template: {}", e),
                )
            })?;
            roxmltree::Document::parse(&content).map_err(|e| {
                ProberError::config(format!(
                    "Template '{}' is not well-formed XML: {}",
                    path.display(),
                    e
                ))
            })?;

            debug!(template = command.template_name(), path = %path.display(), "loaded template override");
            store.templates.insert(command, Arc::from(content));
        }

        info!(dir = %dir.display(), "using EPP template directory");
        Ok(store)
    }

    /// The template text for a command.
    pub fn get(&self, command: EppCommand) -> Arc<str> {
        self.templates
            .get(&command)
            .cloned()
            .unwrap_or_else(|| Arc::from(builtin_template(command)))
    }

    /// An unrendered request for a command.
    pub fn request(&self, command: EppCommand) -> EppRequest {
        if command.writes_nothing() {
            return EppRequest::hello();
        }
        EppRequest::new(command, self.get(command))
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_templates_render() {
        let store = TemplateStore::builtin();

        for command in EppCommand::ALL {
            let mut request = store.request(command);
            if command == EppCommand::Login {
                request = request.with_credentials("id", "pw").unwrap();
            }
            let rendered = request.render("trid-1", "prober.example").unwrap();
            if command.writes_nothing() {
                assert!(rendered.document().is_none());
            } else {
                let doc = rendered.document().unwrap();
                assert!(doc.contains("<clTRID>trid-1</clTRID>"), "{}", command);
                if command.uses_domain() {
                    assert!(doc.contains("prober.example"), "{}", command);
                }
            }
        }
    }

    #[test]
    fn test_override_directory() {
        let dir = TempDir::new().unwrap();
        let custom = r#"<epp xmlns="urn:ietf:params:xml:ns:epp-1.0"><command><logout/><clTRID>x</clTRID><!-- custom --></command></epp>"#;
        fs::write(dir.path().join("logout.xml"), custom).unwrap();

        let store = TemplateStore::with_overrides(dir.path()).unwrap();
        assert!(store.get(EppCommand::Logout).contains("custom"));
        assert_eq!(&*store.get(EppCommand::Login), LOGIN);
    }

    #[test]
    fn test_override_must_be_well_formed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("check.xml"), "<epp>").unwrap();
        assert!(TemplateStore::with_overrides(dir.path()).is_err());
        assert!(TemplateStore::with_overrides(dir.path().join("missing")).is_err());
    }
}
