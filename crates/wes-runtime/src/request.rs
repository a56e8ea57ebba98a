// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Submitted run requests.
//!
//! The JSON-bearing fields (`workflow_params`, `workflow_engine_parameters`,
//! `tags`) arrive as JSON text, the way WES clients send them as form fields.
//! They are kept as text in the persisted request and validated here, once,
//! before any run directory is created.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::service_info::ServiceInfo;

/// Form fields a submission must carry.
pub const REQUIRED_FIELDS: [&str; 6] = [
    "workflow_params",
    "workflow_type",
    "workflow_type_version",
    "workflow_url",
    "workflow_engine_parameters",
    "tags",
];

/// A workflow run request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Workflow parameter document (JSON object text).
    pub workflow_params: String,
    /// Workflow language, e.g. `CWL`.
    pub workflow_type: String,
    /// Workflow language version, e.g. `v1.0`.
    pub workflow_type_version: String,
    /// Workflow location, absolute URL or a path relative to the execution directory.
    pub workflow_url: String,
    /// Executor flags as a JSON object of flag -> value. Empty means `{}`.
    #[serde(default)]
    pub workflow_engine_parameters: String,
    /// Free-form tags as a JSON object. Empty means `{}`.
    #[serde(default)]
    pub tags: String,
}

impl RunRequest {
    /// Build a request from decoded form fields.
    pub fn from_form(form: &BTreeMap<String, String>) -> Result<Self> {
        if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !form.contains_key(**f)) {
            return Err(Error::InvalidRequest(format!(
                "{} not included in the form data of the request",
                missing
            )));
        }
        let field = |name: &str| form.get(name).cloned().unwrap_or_default();
        Ok(Self {
            workflow_params: field("workflow_params"),
            workflow_type: field("workflow_type"),
            workflow_type_version: field("workflow_type_version"),
            workflow_url: field("workflow_url"),
            workflow_engine_parameters: field("workflow_engine_parameters"),
            tags: field("tags"),
        })
    }

    /// Validate the request against the service's capabilities.
    pub fn validate(&self, service_info: &ServiceInfo) -> Result<()> {
        if self.workflow_url.trim().is_empty() {
            return Err(Error::InvalidRequest("workflow_url is required".to_string()));
        }
        parse_object("workflow_params", &self.workflow_params, false)?;
        self.engine_parameters()?;
        self.tags()?;
        service_info.validate_workflow_type(&self.workflow_type, &self.workflow_type_version)
    }

    /// Parsed executor parameters.
    pub fn engine_parameters(&self) -> Result<Map<String, Value>> {
        parse_object(
            "workflow_engine_parameters",
            &self.workflow_engine_parameters,
            true,
        )
    }

    /// Parsed tags.
    pub fn tags(&self) -> Result<Map<String, Value>> {
        parse_object("tags", &self.tags, true)
    }
}

fn parse_object(name: &str, text: &str, allow_empty: bool) -> Result<Map<String, Value>> {
    if allow_empty && text.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::InvalidRequest(format!(
            "{} must be a JSON object",
            name
        ))),
        Err(e) => Err(Error::InvalidRequest(format!(
            "{} is not valid JSON: {}",
            name, e
        ))),
    }
}

/// A file uploaded with the request, materialized into the execution directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Client-supplied file name.
    pub file_name: String,
    /// File content.
    pub content: Vec<u8>,
}

impl Attachment {
    /// Create an attachment.
    pub fn new(file_name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
        }
    }
}

/// Reduce a client-supplied file name to a safe single path component.
///
/// Directory parts are dropped, whitespace becomes `_`, anything outside
/// `[A-Za-z0-9._-]` is removed and leading/trailing `.`/`_` are stripped.
/// Returns `None` when nothing usable is left.
pub fn secure_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                Some(c)
            } else {
                None
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(['.', '_']);
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
