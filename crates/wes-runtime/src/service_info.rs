// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service-info document.
//!
//! Describes what the service accepts (workflow types and versions), which
//! executor flags it always passes, and the current per-state run counts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::state::RunState;

/// Versions accepted for one workflow type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTypeVersion {
    /// Accepted version strings.
    pub workflow_type_version: Vec<String>,
}

/// An executor flag the service passes on every run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultWorkflowEngineParameter {
    /// Flag name, e.g. `--debug`.
    pub name: String,
    /// Value type, informational only.
    #[serde(rename = "type", default)]
    pub value_type: String,
    /// Value passed after the flag.
    #[serde(default)]
    pub default_value: String,
}

/// Service-info document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceInfo {
    /// Accepted workflow types and their versions.
    pub workflow_type_versions: BTreeMap<String, WorkflowTypeVersion>,
    /// Supported WES API versions.
    pub supported_wes_versions: Vec<String>,
    /// Supported input file protocols.
    pub supported_filesystem_protocols: Vec<String>,
    /// Executor name -> version.
    pub workflow_engine_versions: BTreeMap<String, String>,
    /// Flags passed to the executor ahead of request-supplied ones.
    pub default_workflow_engine_parameters: Vec<DefaultWorkflowEngineParameter>,
    /// Number of runs per state, computed on request.
    pub system_state_counts: BTreeMap<RunState, usize>,
    /// Where clients learn how to authenticate.
    pub auth_instructions_url: String,
    /// Where clients reach the operators.
    pub contact_info_url: String,
    /// Free-form service tags.
    pub tags: BTreeMap<String, String>,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        let cwl_versions = ["v1.0", "v1.1", "v1.2"]
            .into_iter()
            .map(String::from)
            .collect();
        Self {
            workflow_type_versions: BTreeMap::from([(
                "CWL".to_string(),
                WorkflowTypeVersion {
                    workflow_type_version: cwl_versions,
                },
            )]),
            supported_wes_versions: vec!["1.0.0".to_string()],
            supported_filesystem_protocols: vec![
                "http".to_string(),
                "https".to_string(),
                "file".to_string(),
            ],
            workflow_engine_versions: BTreeMap::new(),
            default_workflow_engine_parameters: Vec::new(),
            system_state_counts: BTreeMap::new(),
            auth_instructions_url: String::new(),
            contact_info_url: String::new(),
            tags: BTreeMap::new(),
        }
    }
}

impl ServiceInfo {
    /// Load the document from a JSON file. Missing keys take default values.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Return a copy carrying the given state counts.
    pub fn with_state_counts(&self, counts: BTreeMap<RunState, usize>) -> Self {
        Self {
            system_state_counts: counts,
            ..self.clone()
        }
    }

    /// Check that a workflow type and version are accepted.
    pub fn validate_workflow_type(&self, wf_type: &str, wf_type_version: &str) -> Result<()> {
        let Some(versions) = self.workflow_type_versions.get(wf_type) else {
            let available: Vec<&str> = self
                .workflow_type_versions
                .keys()
                .map(String::as_str)
                .collect();
            return Err(Error::InvalidRequest(format!(
                "{}, the workflow_type specified in the request, is not included in {:?}, the available workflow_types",
                wf_type, available
            )));
        };
        if !versions
            .workflow_type_version
            .iter()
            .any(|v| v == wf_type_version)
        {
            return Err(Error::InvalidRequest(format!(
                "{}, the workflow_type_version specified in the request, is not included in {:?}, the available workflow_type_versions",
                wf_type_version, versions.workflow_type_version
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_accepts_cwl() {
        let info = ServiceInfo::default();
        info.validate_workflow_type("CWL", "v1.0").unwrap();
        info.validate_workflow_type("CWL", "v1.2").unwrap();
        assert!(info.validate_workflow_type("CWL", "v2.0").is_err());
        assert!(info.validate_workflow_type("cwl", "v1.0").is_err());
    }

    #[test]
    fn test_parse_partial_document() {
        let json = r#"{
            "default_workflow_engine_parameters": [
                {"name": "--debug", "type": "bool", "default_value": ""},
                {"name": "--parallel"}
            ],
            "tags": {"owner": "lab"}
        }"#;
        let info: ServiceInfo = serde_json::from_str(json).unwrap();

        assert_eq!(info.default_workflow_engine_parameters.len(), 2);
        assert_eq!(info.default_workflow_engine_parameters[0].value_type, "bool");
        assert_eq!(info.default_workflow_engine_parameters[1].default_value, "");
        assert_eq!(info.tags["owner"], "lab");
        assert!(info.workflow_type_versions.contains_key("CWL"));
    }

    #[test]
    fn test_state_counts_serialize_as_tokens() {
        let info = ServiceInfo::default()
            .with_state_counts(BTreeMap::from([(RunState::Complete, 2), (RunState::Running, 1)]));
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["system_state_counts"]["COMPLETE"], 2);
        assert_eq!(json["system_state_counts"]["RUNNING"], 1);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("service-info.json");
        std::fs::write(&path, r#"{"contact_info_url": "mailto:ops@example.org"}"#).unwrap();

        let info = ServiceInfo::load(&path).unwrap();
        assert_eq!(info.contact_info_url, "mailto:ops@example.org");
    }
}
