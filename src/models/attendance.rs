use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::convert::TryFrom;

use crate::error::ExportError;

/// Display name used when a student arrives without one.
pub const UNNAMED_STUDENT: &str = "(sin nombre)";

/// A/R/F mark counts for one day, one student or the whole month.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct MarkCounts {
    #[serde(rename = "A", default, deserialize_with = "lenient_count")]
    pub a: f64,
    #[serde(rename = "R", default, deserialize_with = "lenient_count")]
    pub r: f64,
    #[serde(rename = "F", default, deserialize_with = "lenient_count")]
    pub f: f64,
}

impl MarkCounts {
    pub fn new(a: f64, r: f64, f: f64) -> Self {
        Self { a, r, f }
    }

    /// Decode an entry that may be missing or of the wrong shape; anything
    /// that is not an object counts as zero marks.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(v) if v.is_object() => Self::deserialize(v).unwrap_or_default(),
            _ => Self::default(),
        }
    }

    pub fn total(&self) -> f64 {
        self.a + self.r + self.f
    }

    pub fn pct_present(&self) -> f64 {
        ratio(self.a, self.total())
    }
}

/// `part / whole`, or 0 when there is nothing to divide by.
pub fn ratio(part: f64, whole: f64) -> f64 {
    if whole > 0.0 { part / whole } else { 0.0 }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Student {
    #[serde(default, deserialize_with = "lenient_text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: Option<String>,
}

impl Student {
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => UNNAMED_STUDENT,
        }
    }
}

/// Month-level figures for the summary sheet.
///
/// Shares are computed over the marks actually registered (`A+R+F`). The
/// expected mark count (`days × students`) is kept alongside as context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthlySummary {
    pub counts: MarkCounts,
    pub registered_marks: f64,
    pub expected_marks: usize,
}

impl MonthlySummary {
    /// `(A, R, F)` shares over registered marks.
    pub fn shares(&self) -> [f64; 3] {
        let c = self.counts;
        [c.a, c.r, c.f].map(|n| ratio(n, self.registered_marks))
    }

    /// `(A, R, F)` shares over expected marks.
    pub fn expected_shares(&self) -> [f64; 3] {
        let c = self.counts;
        [c.a, c.r, c.f].map(|n| ratio(n, self.expected_marks as f64))
    }
}

/// Pre-aggregated attendance for one school/group/month.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRequest {
    pub school_id: String,
    pub group_id: String,
    pub year_month: String,
    pub students: Vec<Student>,
    pub all_days: Vec<String>,
    pub by_day: HashMap<String, MarkCounts>,
    pub monthly_totals: MarkCounts,
    pub per_student: HashMap<String, MarkCounts>,
}

impl AttendanceRequest {
    /// Days in chronological order (ISO dates sort lexicographically).
    pub fn sorted_days(&self) -> Vec<&str> {
        let mut days: Vec<&str> = self.all_days.iter().map(String::as_str).collect();
        days.sort_unstable();
        days
    }

    pub fn day_counts(&self, day: &str) -> MarkCounts {
        self.by_day.get(day).copied().unwrap_or_default()
    }

    pub fn student_counts(&self, student: &Student) -> MarkCounts {
        student
            .id
            .as_ref()
            .and_then(|id| self.per_student.get(id))
            .copied()
            .unwrap_or_default()
    }

    pub fn expected_marks(&self) -> usize {
        self.all_days.len() * self.students.len()
    }

    pub fn summary(&self) -> MonthlySummary {
        MonthlySummary {
            counts: self.monthly_totals,
            registered_marks: self.monthly_totals.total(),
            expected_marks: self.expected_marks(),
        }
    }
}

impl TryFrom<Value> for AttendanceRequest {
    type Error = ExportError;

    fn try_from(payload: Value) -> Result<Self, Self::Error> {
        let empty = Map::new();
        let body = payload.as_object().unwrap_or(&empty);

        let (Some(school_id), Some(group_id), Some(year_month)) = (
            required_scalar(body, &["sid", "schoolId"]),
            required_scalar(body, &["gid", "groupId"]),
            required_scalar(body, &["ym", "yearMonth"]),
        ) else {
            return Err(ExportError::BadRequest("missing sid/gid/ym".to_string()));
        };

        let students = array_field(body, &["alumnos", "students"])?
            .iter()
            .map(|entry| match entry {
                Value::Object(_) => Student::deserialize(entry).unwrap_or_default(),
                _ => Student::default(),
            })
            .collect();

        let all_days = array_field(body, &["allDays"])?
            .iter()
            .map(|day| match day {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();

        let by_day = counts_map(object_field(body, &["byDay"])?);
        let monthly_totals = MarkCounts::from_value(Some(object_field(body, &["monthlyTotals"])?));
        let per_student = counts_map(object_field(body, &["perAlumno", "perStudent"])?);

        Ok(AttendanceRequest {
            school_id,
            group_id,
            year_month,
            students,
            all_days,
            by_day,
            monthly_totals,
            per_student,
        })
    }
}

fn field<'a>(body: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| body.get(*key))
        .find(|value| !value.is_null())
}

fn required_scalar(body: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match field(body, keys)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

fn array_field<'a>(
    body: &'a Map<String, Value>,
    keys: &[&str],
) -> Result<&'a Vec<Value>, ExportError> {
    field(body, keys).and_then(Value::as_array).ok_or_else(|| {
        ExportError::BadRequest(format!(
            "invalid data structure: {} must be an array",
            keys[0]
        ))
    })
}

fn object_field<'a>(
    body: &'a Map<String, Value>,
    keys: &[&str],
) -> Result<&'a Value, ExportError> {
    field(body, keys).filter(|v| v.is_object()).ok_or_else(|| {
        ExportError::BadRequest(format!(
            "invalid data structure: {} must be an object",
            keys[0]
        ))
    })
}

fn counts_map(entries: &Value) -> HashMap<String, MarkCounts> {
    entries
        .as_object()
        .into_iter()
        .flatten()
        .map(|(key, value)| (key.clone(), MarkCounts::from_value(Some(value))))
        .collect()
}

/// Numbers pass through, numeric strings are parsed, everything else is 0.
/// Negative and non-finite values are clamped to 0.
pub fn coerce_count(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if n.is_finite() && n > 0.0 { n } else { 0.0 }
}

fn lenient_count<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_count(&value))
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
