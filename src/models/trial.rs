use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

pub const FIELD_URL: &str = "url";
pub const FIELD_PROXY_TYPE: &str = "proxy_type";
pub const FIELD_PROXY_PROTOCOL: &str = "proxy_protocol";
pub const FIELD_PROXY_PROVIDER: &str = "proxy_provider";
pub const FIELD_PROXY_DATACENTER: &str = "proxy_datacenter";
pub const FIELD_PROXY_HOST: &str = "proxy_host";
pub const FIELD_PROXY_PORT: &str = "proxy_port";
pub const FIELD_ORIGIN: &str = "origin";
pub const FIELD_ORIGIN_HOST: &str = "origin_host";
pub const FIELD_SUCCESS: &str = "success";

/// Value stored in a [`TrialContext`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ContextValue {
    Bool(bool),
    Str(String),
}

impl From<bool> for ContextValue {
    fn from(v: bool) -> Self {
        ContextValue::Bool(v)
    }
}

impl From<&str> for ContextValue {
    fn from(v: &str) -> Self {
        ContextValue::Str(v.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(v: String) -> Self {
        ContextValue::Str(v)
    }
}

/// Labels describing one trial, built up as the trial progresses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TrialContext {
    fields: BTreeMap<&'static str, ContextValue>,
}

impl TrialContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &'static str, value: impl Into<ContextValue>) -> &mut Self {
        self.fields.insert(key, value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(ContextValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.fields.get(key) {
            Some(ContextValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ContextValue)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }
}

/// A completed trial, ready for the reporter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialReport {
    pub elapsed: Duration,
    pub context: TrialContext,
}
