pub mod types;

pub use types::{NewStudent, Student, StudentDoc, UpdateStudent, STUDENT_ID_PREFIX};
