//! `key=value` overrides applied to a loaded [`TrainingConfig`].
//!
//! Keys are dot-separated paths into the serialized configuration, for
//! example `runtime.epochs=3` or `model.recurrent=lstm`. Values are parsed as
//! booleans, `null`, numbers or inline JSON before falling back to strings.

use std::str::FromStr;

use serde_json::{Map, Number, Value};

use crate::{TrainingConfig, TrainingError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideArg {
    pub path: String,
    pub value: String,
}

impl FromStr for OverrideArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, value) = s
            .split_once('=')
            .ok_or_else(|| "override must be in the form key=value".to_string())?;
        if path.trim().is_empty() {
            return Err("override key must not be empty".into());
        }
        Ok(Self {
            path: path.trim().to_string(),
            value: value.trim().to_string(),
        })
    }
}

/// Applies `overrides` in order and re-validates the result.
pub fn apply_overrides(
    config: TrainingConfig,
    overrides: &[OverrideArg],
) -> Result<TrainingConfig, TrainingError> {
    if overrides.is_empty() {
        return Ok(config);
    }
    let mut value = serde_json::to_value(config).map_err(|err| {
        TrainingError::runtime(format!("failed to serialize config for overrides: {err}"))
    })?;

    for override_arg in overrides {
        let new_value = parse_override_value(&override_arg.value);
        set_value_at_path(&mut value, &override_arg.path, new_value)?;
        log::debug!("config override {}={}", override_arg.path, override_arg.value);
    }

    let config: TrainingConfig = serde_json::from_value(value).map_err(|err| {
        TrainingError::ConfigFormat(format!(
            "failed to deserialize config after overrides: {err}"
        ))
    })?;
    config.validate()?;
    Ok(config)
}

fn parse_override_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if trimmed.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(int_val) = trimmed.parse::<u64>() {
        return Value::Number(Number::from(int_val));
    }
    if let Ok(int_val) = trimmed.parse::<i64>() {
        return Value::Number(Number::from(int_val));
    }
    if let Ok(float_val) = trimmed.parse::<f64>() {
        if let Some(number) = Number::from_f64(float_val) {
            return Value::Number(number);
        }
    }
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(json_val) = serde_json::from_str::<Value>(trimmed) {
            return json_val;
        }
    }
    Value::String(trimmed.to_string())
}

fn set_value_at_path(target: &mut Value, path: &str, new_value: Value) -> Result<(), TrainingError> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(TrainingError::runtime(format!(
            "override path '{path}' contains an empty segment"
        )));
    }

    let mut current = target;
    for (idx, segment) in segments.iter().enumerate() {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        let map = current.as_object_mut().ok_or_else(|| {
            TrainingError::runtime(format!(
                "override path segment '{segment}' points into a non-object value"
            ))
        })?;
        if idx + 1 == segments.len() {
            map.insert(segment.to_string(), new_value);
            return Ok(());
        }
        current = map.entry(segment.to_string()).or_insert(Value::Null);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> TrainingConfig {
        toml::from_str(
            r#"
[model]
max_seq = 5
vocab_size = 20
embedding_size = 8

[data]
train_path = "/tmp/train.jsonl"
"#,
        )
        .expect("parse")
    }

    fn arg(raw: &str) -> OverrideArg {
        raw.parse().expect("override")
    }

    #[test]
    fn parses_key_value_pairs() {
        assert_eq!(
            arg(" runtime.epochs = 3 "),
            OverrideArg {
                path: "runtime.epochs".into(),
                value: "3".into()
            }
        );
        assert!("runtime.epochs".parse::<OverrideArg>().is_err());
        assert!("=3".parse::<OverrideArg>().is_err());
    }

    #[test]
    fn overrides_reach_nested_fields() {
        let config = apply_overrides(
            base_config(),
            &[
                arg("runtime.epochs=3"),
                arg("model.recurrent=lstm"),
                arg("optimizer.learning_rate=0.01"),
                arg("data.shuffle=false"),
                arg("runtime.checkpoint_dir=/tmp/ckpt"),
            ],
        )
        .expect("overrides");
        assert_eq!(config.runtime.epochs, 3);
        assert_eq!(config.model.recurrent, layers::RecurrentKind::Lstm);
        assert_eq!(config.optimizer.learning_rate, 0.01);
        assert!(!config.data.shuffle);
        assert_eq!(
            config.runtime.checkpoint_dir.as_deref(),
            Some(std::path::Path::new("/tmp/ckpt"))
        );
    }

    #[test]
    fn invalid_results_are_rejected() {
        assert!(apply_overrides(base_config(), &[arg("data.batch_size=0")]).is_err());
        assert!(apply_overrides(base_config(), &[arg("model.max_seq.inner=1")]).is_err());
        assert!(apply_overrides(base_config(), &[arg("model..max_seq=1")]).is_err());
    }
}
