//! Demo content written by `ensure_defaults` when seeding is enabled.

use super::{Course, Entry, Metadata, Timetable};

pub const EXAMPLE_COURSE: &str = "3A";

pub fn example_metadata() -> Metadata {
    let mut timetable = Timetable::empty();
    timetable.mon[0] = "Matematica".to_string();
    timetable.mon[1] = "Italiano".to_string();
    timetable.tue[0] = "Storia".to_string();
    timetable.wed[0] = "Inglese".to_string();

    Metadata {
        courses: vec![Course {
            id: EXAMPLE_COURSE.to_string(),
            name: EXAMPLE_COURSE.to_string(),
            students: vec![
                "Bianchi Luca".to_string(),
                "Esposito Sara".to_string(),
                "Rossi Marco".to_string(),
            ],
            timetable: Some(timetable),
        }],
        subjects: vec![
            "Italiano".to_string(),
            "Matematica".to_string(),
            "Storia".to_string(),
            "Inglese".to_string(),
        ],
        teachers: vec!["Prof. Verdi".to_string(), "Prof. Neri".to_string()],
    }
}

pub fn example_entry(today: &str) -> Entry {
    Entry {
        course: EXAMPLE_COURSE.to_string(),
        date: today.to_string(),
        hour: "1".to_string(),
        subject: "Matematica".to_string(),
        teacher: "Prof. Verdi".to_string(),
        content: "Introduzione al corso".to_string(),
        absences: vec![],
        locked: false,
        created_at: None,
    }
}
