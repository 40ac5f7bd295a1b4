//! Parameter file loading and merging

use crate::config::{bracketed_list, ArgValue};
use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

/// Section key holding node parameters in ROS-style parameter files
const PARAMETERS_KEY: &str = "ros__parameters";
/// Section applying to every node
const WILDCARD_SECTION: &str = "/**";

/// Flattened parameter set, in insertion order
pub type Parameters = IndexMap<String, ArgValue>;

/// Load a parameter file as a flat key/value mapping.
///
/// Files laid out as `<node>: { ros__parameters: {...} }` contribute the
/// wildcard section first and the section named after `node_name` second.
/// Any other layout contributes its whole top-level mapping.
pub fn load_param_file(path: &Path, node_name: Option<&str>) -> Result<Parameters, ParamFileError> {
    let content = std::fs::read_to_string(path).map_err(|e| ParamFileError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let value: Value = serde_yaml::from_str(&content).map_err(|e| ParamFileError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;

    let root = match value {
        Value::Mapping(map) => map,
        Value::Null => Mapping::new(),
        _ => {
            return Err(ParamFileError::NotAMapping(path.to_path_buf()));
        }
    };

    let mut params = Parameters::new();
    let sections = node_sections(&root, node_name);
    if sections.is_empty() {
        flatten_into(&mut params, "", &root);
    } else {
        for section in sections {
            flatten_into(&mut params, "", section);
        }
    }
    Ok(params)
}

/// Merge parameter sources. Later files override earlier ones; inline values
/// override every file.
pub fn merge_parameters(files: Vec<Parameters>, inline: &Parameters) -> Parameters {
    let mut merged = Parameters::new();
    for file in files {
        merged.extend(file);
    }
    for (key, value) in inline {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Pick the `ros__parameters` sections that apply to a node
fn node_sections<'a>(root: &'a Mapping, node_name: Option<&str>) -> Vec<&'a Mapping> {
    let mut keys = vec![WILDCARD_SECTION.to_string()];
    if let Some(name) = node_name {
        keys.push(name.to_string());
        keys.push(format!("/{}", name));
    }

    keys.iter()
        .filter_map(|key| root.get(key.as_str()))
        .filter_map(|section| section.get(PARAMETERS_KEY))
        .filter_map(Value::as_mapping)
        .collect()
}

fn flatten_into(params: &mut Parameters, prefix: &str, map: &Mapping) {
    for (key, value) in map {
        let Some(key) = scalar_string(key) else {
            continue;
        };
        let key = if prefix.is_empty() {
            key
        } else {
            format!("{}.{}", prefix, key)
        };

        match value {
            Value::Mapping(nested) => flatten_into(params, &key, nested),
            other => {
                if let Some(value) = to_arg_value(other) {
                    params.insert(key, value);
                }
            }
        }
    }
}

fn to_arg_value(value: &Value) -> Option<ArgValue> {
    match value {
        Value::Bool(b) => Some(ArgValue::Bool(*b)),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => ArgValue::Int(i),
            None => ArgValue::Float(n.as_f64().unwrap_or_default()),
        }),
        Value::String(s) => Some(ArgValue::String(s.clone())),
        Value::Null => Some(ArgValue::String(String::new())),
        Value::Sequence(items) => {
            let rendered: Vec<String> = items
                .iter()
                .filter_map(to_arg_value)
                .map(|v| v.render())
                .collect();
            Some(ArgValue::String(bracketed_list(&rendered)))
        }
        Value::Tagged(tagged) => to_arg_value(&tagged.value),
        Value::Mapping(_) => None,
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Errors that can occur when loading parameter files
#[derive(Debug, thiserror::Error)]
pub enum ParamFileError {
    #[error("Failed to read parameter file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse parameter file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Parameter file '{}' is not a mapping", .0.display())]
    NotAMapping(PathBuf),
}
