use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{Datelike, NaiveDateTime, Timelike};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Names of the clock-derived variables refreshed before every `If`.
pub const TIME_VARIABLES: [&str; 7] = [
    "time_hour",
    "time_minute",
    "time_second",
    "time_weekday",
    "time_day",
    "time_month",
    "time_year",
];

/// A variable's value: text from a vision answer, or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum VarValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarValue::Int(n) => write!(f, "{n}"),
            VarValue::Float(x) => f.write_str(&crate::events::fmt_float(*x)),
            VarValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for VarValue {
    fn from(s: &str) -> Self {
        VarValue::Text(s.to_string())
    }
}

impl From<String> for VarValue {
    fn from(s: String) -> Self {
        VarValue::Text(s)
    }
}

impl From<i64> for VarValue {
    fn from(n: i64) -> Self {
        VarValue::Int(n)
    }
}

impl From<f64> for VarValue {
    fn from(x: f64) -> Self {
        VarValue::Float(x)
    }
}

/// Name → value map shared between a run and whoever else edits variables.
///
/// Cloning is cheap and yields a handle to the same store.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    inner: Arc<RwLock<BTreeMap<String, VarValue>>>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: BTreeMap<String, VarValue>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    pub fn get(&self, name: &str) -> Option<VarValue> {
        self.read().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<VarValue>) {
        self.write().insert(name.into(), value.into());
    }

    /// Overwrite the time variables from `now` in one write.
    pub fn refresh_time(&self, now: NaiveDateTime) {
        let values = [
            i64::from(now.hour()),
            i64::from(now.minute()),
            i64::from(now.second()),
            i64::from(now.weekday().num_days_from_monday()),
            i64::from(now.day()),
            i64::from(now.month()),
            i64::from(now.year()),
        ];
        let mut vars = self.write();
        for (name, value) in TIME_VARIABLES.iter().zip(values) {
            vars.insert((*name).to_string(), VarValue::Int(value));
        }
    }

    /// Copy of every variable.
    pub fn snapshot(&self) -> BTreeMap<String, VarValue> {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, VarValue>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, VarValue>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn refresh_time_sets_all_components() {
        let store = VariableStore::new();
        // 2024-03-10 was a Sunday.
        let now = NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(7, 5, 9)
            .unwrap();
        store.refresh_time(now);
        let snap = store.snapshot();
        assert_eq!(snap["time_hour"], VarValue::Int(7));
        assert_eq!(snap["time_minute"], VarValue::Int(5));
        assert_eq!(snap["time_second"], VarValue::Int(9));
        assert_eq!(snap["time_weekday"], VarValue::Int(6));
        assert_eq!(snap["time_day"], VarValue::Int(10));
        assert_eq!(snap["time_month"], VarValue::Int(3));
        assert_eq!(snap["time_year"], VarValue::Int(2024));
    }

    #[test]
    fn clones_share_the_same_store() {
        let store = VariableStore::new();
        let other = store.clone();
        other.set("score", 12_i64);
        assert_eq!(store.get("score"), Some(VarValue::Int(12)));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn values_deserialize_from_document_json() {
        let map: BTreeMap<String, VarValue> =
            serde_json::from_str(r#"{"a": 3, "b": 2.5, "c": "hello"}"#).unwrap();
        assert_eq!(map["a"], VarValue::Int(3));
        assert_eq!(map["b"], VarValue::Float(2.5));
        assert_eq!(map["c"], VarValue::Text("hello".into()));
        assert_eq!(VarValue::Float(4.0).to_string(), "4.0");
    }
}
