use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const SLOTS_PER_DAY: usize = 6;

/// The singleton catalog document: courses, subjects and teachers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub teachers: Vec<String>,
}

/// Metadata with every field optional.
///
/// Used both for partial saves (only the given fields are written) and for
/// reading a stored document that may be missing some of its fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub courses: Option<Vec<Course>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subjects: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teachers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub students: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timetable: Option<Timetable>,
}

/// Lesson-slot labels per weekday.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timetable {
    #[serde(default)]
    pub mon: Vec<String>,
    #[serde(default)]
    pub tue: Vec<String>,
    #[serde(default)]
    pub wed: Vec<String>,
    #[serde(default)]
    pub thu: Vec<String>,
    #[serde(default)]
    pub fri: Vec<String>,
}

impl Metadata {
    pub fn find_course(&self, id: &str) -> Option<&Course> {
        self.courses.iter().find(|c| c.id == id)
    }

    pub fn find_course_mut(&mut self, id: &str) -> Option<&mut Course> {
        self.courses.iter_mut().find(|c| c.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty() && self.subjects.is_empty() && self.teachers.is_empty()
    }

    /// Pads or truncates every course timetable to the fixed weekday grid.
    /// Returns whether anything changed.
    pub fn normalize_timetables(&mut self) -> bool {
        let mut changed = false;
        for course in &mut self.courses {
            changed |= course.normalize_timetable();
        }
        changed
    }
}

impl MetadataPatch {
    pub fn is_complete(&self) -> bool {
        self.courses.is_some() && self.subjects.is_some() && self.teachers.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_none() && self.subjects.is_none() && self.teachers.is_none()
    }
}

impl From<MetadataPatch> for Metadata {
    fn from(patch: MetadataPatch) -> Self {
        Metadata {
            courses: patch.courses.unwrap_or_default(),
            subjects: patch.subjects.unwrap_or_default(),
            teachers: patch.teachers.unwrap_or_default(),
        }
    }
}

impl From<Metadata> for MetadataPatch {
    fn from(meta: Metadata) -> Self {
        MetadataPatch {
            courses: Some(meta.courses),
            subjects: Some(meta.subjects),
            teachers: Some(meta.teachers),
        }
    }
}

impl Course {
    pub fn new(id: String, name: String, students: Vec<String>) -> Self {
        Self {
            id,
            name,
            students,
            timetable: Some(Timetable::empty()),
        }
    }

    pub fn normalize_timetable(&mut self) -> bool {
        match &mut self.timetable {
            Some(timetable) => timetable.normalize(),
            None => {
                self.timetable = Some(Timetable::empty());
                true
            }
        }
    }
}

impl Timetable {
    pub fn empty() -> Self {
        let day = || vec![String::new(); SLOTS_PER_DAY];
        Self {
            mon: day(),
            tue: day(),
            wed: day(),
            thu: day(),
            fri: day(),
        }
    }

    fn normalize(&mut self) -> bool {
        let mut changed = false;
        for day in [&mut self.mon, &mut self.tue, &mut self.wed, &mut self.thu, &mut self.fri] {
            if day.len() != SLOTS_PER_DAY {
                day.resize(SLOTS_PER_DAY, String::new());
                changed = true;
            }
        }
        changed
    }
}

/// Derives a course id from its display name: whitespace removed, uppercased.
pub fn course_id(name: &str) -> Result<String, AppError> {
    let id: String = name
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();
    if id.is_empty() {
        return Err(AppError::MissingArgument("name"));
    }
    Ok(id)
}
