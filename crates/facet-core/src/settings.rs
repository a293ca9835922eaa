//! Typed key/value settings grouped by named sections, stored as TOML.
//!
//! ```toml
//! [index]
//! m = 16
//! ef_search = 64
//!
//! [tracker]
//! iou_threshold = 0.3
//! roi = { x = 0, y = 0, width = 640, height = 360 }
//! ```
//!
//! Inline tables with `x`/`y` keys are points; with `x`/`y`/`width`/`height`
//! they are rectangles.

use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings file not found: {0}")]
    NotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("[{section}] {key}: unsupported value ({reason})")]
    Unsupported {
        section: String,
        key: String,
        reason: String,
    },
    #[error("[{section}] {key}: expected {expected}")]
    TypeMismatch {
        section: String,
        key: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Point(Point),
    Rect(Rect),
}

impl SettingValue {
    fn from_toml(section: &str, key: &str, value: &toml::Value) -> Result<Self, SettingsError> {
        let unsupported = |reason: &str| SettingsError::Unsupported {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        };
        match value {
            toml::Value::Integer(i) => Ok(SettingValue::Int(*i)),
            toml::Value::Float(f) => Ok(SettingValue::Float(*f)),
            toml::Value::Boolean(b) => Ok(SettingValue::Bool(*b)),
            toml::Value::String(s) => Ok(SettingValue::String(s.clone())),
            toml::Value::Table(table) => {
                let num = |name: &str| -> Result<f64, SettingsError> {
                    match table.get(name) {
                        Some(toml::Value::Integer(i)) => Ok(*i as f64),
                        Some(toml::Value::Float(f)) => Ok(*f),
                        _ => Err(unsupported(&format!("missing numeric `{name}`"))),
                    }
                };
                match table.len() {
                    2 => Ok(SettingValue::Point(Point {
                        x: num("x")?,
                        y: num("y")?,
                    })),
                    4 => Ok(SettingValue::Rect(Rect {
                        x: num("x")?,
                        y: num("y")?,
                        width: num("width")?,
                        height: num("height")?,
                    })),
                    _ => Err(unsupported("tables must be a point or a rect")),
                }
            }
            _ => Err(unsupported("arrays and datetimes are not settings")),
        }
    }

    fn to_toml(&self) -> toml::Value {
        let table = |pairs: &[(&str, f64)]| {
            toml::Value::Table(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), toml::Value::Float(*v)))
                    .collect(),
            )
        };
        match self {
            SettingValue::Int(i) => toml::Value::Integer(*i),
            SettingValue::Float(f) => toml::Value::Float(*f),
            SettingValue::Bool(b) => toml::Value::Boolean(*b),
            SettingValue::String(s) => toml::Value::String(s.clone()),
            SettingValue::Point(p) => table(&[("x", p.x), ("y", p.y)]),
            SettingValue::Rect(r) => table(&[
                ("x", r.x),
                ("y", r.y),
                ("width", r.width),
                ("height", r.height),
            ]),
        }
    }
}

/// Sectioned settings store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    sections: BTreeMap<String, BTreeMap<String, SettingValue>>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Err(SettingsError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&text)?;
        tracing::info!(
            path = %path.display(),
            sections = settings.sections.len(),
            "loaded settings"
        );
        Ok(settings)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        let root: toml::Table = toml::from_str(text)?;
        let mut settings = Self::new();
        for (section, body) in &root {
            let toml::Value::Table(entries) = body else {
                return Err(SettingsError::Unsupported {
                    section: section.clone(),
                    key: String::new(),
                    reason: "top-level keys must be sections".into(),
                });
            };
            for (key, value) in entries {
                let parsed = SettingValue::from_toml(section, key, value)?;
                settings.set(section, key, parsed);
            }
        }
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> Result<String, SettingsError> {
        let root: toml::Table = self
            .sections
            .iter()
            .map(|(section, entries)| {
                let body: toml::Table = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_toml()))
                    .collect();
                (section.clone(), toml::Value::Table(body))
            })
            .collect();
        Ok(toml::to_string(&root)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn set(&mut self, section: &str, key: &str, value: SettingValue) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&SettingValue> {
        self.sections.get(section)?.get(key)
    }

    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    fn mismatch(section: &str, key: &str, expected: &'static str) -> SettingsError {
        SettingsError::TypeMismatch {
            section: section.to_string(),
            key: key.to_string(),
            expected,
        }
    }

    /// Integer value; `Ok(None)` when the key is absent.
    pub fn get_int(&self, section: &str, key: &str) -> Result<Option<i64>, SettingsError> {
        match self.get(section, key) {
            None => Ok(None),
            Some(SettingValue::Int(i)) => Ok(Some(*i)),
            Some(_) => Err(Self::mismatch(section, key, "an integer")),
        }
    }

    /// Non-negative integer as `usize`.
    pub fn get_usize(&self, section: &str, key: &str) -> Result<Option<usize>, SettingsError> {
        match self.get_int(section, key)? {
            None => Ok(None),
            Some(i) => usize::try_from(i)
                .map(Some)
                .map_err(|_| Self::mismatch(section, key, "a non-negative integer")),
        }
    }

    /// Float value; integers are widened.
    pub fn get_float(&self, section: &str, key: &str) -> Result<Option<f64>, SettingsError> {
        match self.get(section, key) {
            None => Ok(None),
            Some(SettingValue::Float(f)) => Ok(Some(*f)),
            Some(SettingValue::Int(i)) => Ok(Some(*i as f64)),
            Some(_) => Err(Self::mismatch(section, key, "a number")),
        }
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>, SettingsError> {
        match self.get(section, key) {
            None => Ok(None),
            Some(SettingValue::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(Self::mismatch(section, key, "a boolean")),
        }
    }

    pub fn get_str(&self, section: &str, key: &str) -> Result<Option<&str>, SettingsError> {
        match self.get(section, key) {
            None => Ok(None),
            Some(SettingValue::String(s)) => Ok(Some(s)),
            Some(_) => Err(Self::mismatch(section, key, "a string")),
        }
    }

    pub fn get_point(&self, section: &str, key: &str) -> Result<Option<Point>, SettingsError> {
        match self.get(section, key) {
            None => Ok(None),
            Some(SettingValue::Point(p)) => Ok(Some(*p)),
            Some(_) => Err(Self::mismatch(section, key, "a point {x, y}")),
        }
    }

    pub fn get_rect(&self, section: &str, key: &str) -> Result<Option<Rect>, SettingsError> {
        match self.get(section, key) {
            None => Ok(None),
            Some(SettingValue::Rect(r)) => Ok(Some(*r)),
            Some(_) => Err(Self::mismatch(section, key, "a rect {x, y, width, height}")),
        }
    }
}
