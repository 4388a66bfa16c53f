// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Turns command-line flags into the loose option map the core validates.
//!
//! Nothing here decides what is allowed; it only shapes input. A typo in an
//! option key is reported by the validation engine as an unknown option.

use anyhow::{bail, Result};
use gatehouse_core::domain::request::{OptionMap, OptionValue};

/// Best-effort typing of a free-form `-o key=value` value.
pub fn parse_value(raw: &str) -> OptionValue {
    match raw {
        "true" => return OptionValue::Bool(true),
        "false" => return OptionValue::Bool(false),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return OptionValue::Int(int);
    }
    if let Ok(float) = raw.parse::<f64>() {
        if float.is_finite() {
            return OptionValue::Float(float);
        }
    }
    OptionValue::Text(raw.to_string())
}

fn split_pair<'a>(raw: &'a str, separator: char, flag: &str) -> Result<(&'a str, &'a str)> {
    match raw.split_once(separator) {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => bail!("{} expects KEY{}VALUE, got '{}'", flag, separator, raw),
    }
}

/// Options of `containers create` and `containers run`.
#[derive(Debug, Default, Clone)]
pub struct CreateFlags {
    pub name: Option<String>,
    pub command: Option<String>,
    /// `KEY=VALUE`
    pub env: Vec<String>,
    /// `HOST:CONTAINER`
    pub ports: Vec<String>,
    /// `SOURCE:TARGET[:ro|rw]`
    pub mounts: Vec<String>,
    /// `KEY=VALUE`
    pub labels: Vec<String>,
    pub cpus: Option<f64>,
    pub memory: Option<String>,
    /// Any other `key=value` pair, passed through untouched
    pub extra: Vec<String>,
}

impl CreateFlags {
    pub fn into_options(self) -> Result<OptionMap> {
        let mut options = parse_extra(&self.extra)?;

        if let Some(name) = self.name {
            options.insert("name".to_string(), OptionValue::Text(name));
        }
        if let Some(command) = self.command {
            options.insert("command".to_string(), OptionValue::Text(command));
        }
        for raw in &self.env {
            let (key, value) = split_pair(raw, '=', "--env")?;
            // Environment values stay text even when they look numeric.
            options.insert(format!("env.{}", key), OptionValue::Text(value.to_string()));
        }
        for raw in &self.ports {
            let (host, container) = split_pair(raw, ':', "--publish")?;
            options.insert(format!("port.{}", container), parse_value(host));
        }
        for (index, raw) in self.mounts.iter().enumerate() {
            options.insert(format!("mount.{}", index), OptionValue::Text(raw.clone()));
        }
        for raw in &self.labels {
            let (key, value) = split_pair(raw, '=', "--label")?;
            options.insert(format!("label.{}", key), OptionValue::Text(value.to_string()));
        }
        if let Some(cpus) = self.cpus {
            options.insert("cpus".to_string(), OptionValue::Float(cpus));
        }
        if let Some(memory) = self.memory {
            options.insert("memory".to_string(), OptionValue::Text(memory));
        }

        Ok(options)
    }
}

/// Parse repeated `-o key=value` flags.
pub fn parse_extra(pairs: &[String]) -> Result<OptionMap> {
    let mut options = OptionMap::new();
    for raw in pairs {
        let (key, value) = split_pair(raw, '=', "--opt")?;
        options.insert(key.to_string(), parse_value(value));
    }
    Ok(options)
}
