use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AppError;

const KEY_SEPARATOR: &str = "__";

/// One lesson record, identified by its course, date and hour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    #[serde(default)]
    pub course: String,
    #[serde(default)]
    pub date: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub hour: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub teacher: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub absences: Vec<String>,
    #[serde(default)]
    pub locked: bool,
    /// Set by the backend when the entry is first created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Fields an update may change. `locked` is deliberately absent: only the
/// lock toggle flips it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPatch {
    pub course: Option<String>,
    pub date: Option<String>,
    pub hour: Option<String>,
    pub subject: Option<String>,
    pub teacher: Option<String>,
    pub content: Option<String>,
    pub absences: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalKey<'a> {
    pub course: &'a str,
    pub date: &'a str,
    pub hour: &'a str,
}

impl Entry {
    pub fn natural_key(&self) -> NaturalKey<'_> {
        NaturalKey {
            course: &self.course,
            date: &self.date,
            hour: &self.hour,
        }
    }

    pub fn id(&self) -> Result<String, AppError> {
        entry_id(&self.course, &self.date, &self.hour)
    }

    /// Returns a copy of this entry with the patch applied on top.
    pub fn merged(&self, patch: &EntryPatch) -> Entry {
        let mut next = self.clone();
        if let Some(course) = &patch.course {
            next.course = course.clone();
        }
        if let Some(date) = &patch.date {
            next.date = date.clone();
        }
        if let Some(hour) = &patch.hour {
            next.hour = hour.clone();
        }
        if let Some(subject) = &patch.subject {
            next.subject = subject.clone();
        }
        if let Some(teacher) = &patch.teacher {
            next.teacher = teacher.clone();
        }
        if let Some(content) = &patch.content {
            next.content = content.clone();
        }
        if let Some(absences) = &patch.absences {
            next.absences = absences.clone();
        }
        next
    }
}

/// Deterministic document id for a `(course, date, hour)` triple.
pub fn entry_id(course: &str, date: &str, hour: &str) -> Result<String, AppError> {
    let parts = [
        ("course", course),
        ("date", date),
        ("hour", hour),
    ];
    let mut sanitized = Vec::with_capacity(parts.len());
    for (field, value) in parts {
        let value = sanitize_key_part(value);
        if value.is_empty() {
            return Err(AppError::MissingArgument(field));
        }
        sanitized.push(value);
    }
    Ok(sanitized.join(KEY_SEPARATOR))
}

/// Whether `id` could have come from `entry_id`. Anything else names no
/// entry and must not reach a backend path.
pub fn is_entry_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| is_key_char(c) || c == '_')
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '.'
}

// '_' is replaced as well so a component can never forge the separator.
fn sanitize_key_part(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| {
            if is_key_char(c) {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
        Null,
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(f) => f.to_string(),
        Raw::Null => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_joins_components() {
        assert_eq!(
            entry_id("RSA261", "2024-05-01", "1").unwrap(),
            "RSA261__2024-05-01__1"
        );
    }

    #[test]
    fn test_entry_id_sanitizes() {
        assert_eq!(
            entry_id(" RSA 261 ", "2024/05/01", "1_2").unwrap(),
            "RSA-261__2024-05-01__1-2"
        );
    }

    #[test]
    fn test_is_entry_id() {
        assert!(is_entry_id("RSA261__2024-05-01__1"));
        assert!(is_entry_id(&entry_id("3 A", "2024/05/01", "1").unwrap()));
        assert!(!is_entry_id("3A/../metadata"));
        assert!(!is_entry_id("3A__2024-05-01__1?x=1"));
        assert!(!is_entry_id(""));
    }

    #[test]
    fn test_entry_id_rejects_empty_component() {
        assert!(matches!(
            entry_id("RSA261", "  ", "1"),
            Err(AppError::MissingArgument("date"))
        ));
    }

    #[test]
    fn test_hour_accepts_numbers() {
        let entry: Entry =
            serde_json::from_str(r#"{"course":"3A","date":"2024-05-01","hour":2}"#).unwrap();
        assert_eq!(entry.hour, "2");
        assert!(!entry.locked);
        assert!(entry.absences.is_empty());
    }

    #[test]
    fn test_merged_keeps_lock_and_untouched_fields() {
        let entry = Entry {
            course: "3A".to_string(),
            date: "2024-05-01".to_string(),
            hour: "1".to_string(),
            content: "Intro".to_string(),
            locked: true,
            ..Default::default()
        };
        let next = entry.merged(&EntryPatch {
            hour: Some("2".to_string()),
            ..Default::default()
        });
        assert_eq!(next.hour, "2");
        assert_eq!(next.content, "Intro");
        assert!(next.locked);
    }
}
