pub mod entry;
pub mod metadata;
pub mod seed;

pub use entry::{Entry, EntryPatch, NaturalKey, entry_id, is_entry_id};
pub use metadata::{Course, Metadata, MetadataPatch, Timetable, course_id, SLOTS_PER_DAY};
