mod file_record;

pub use file_record::{FileKind, FileRecord, NewFileRecord};
