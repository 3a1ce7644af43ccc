use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcademicYear {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Term {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassLevel {
    pub id: String,
    pub name: String,
    pub level: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub name: String,
    pub class_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub student_id_human: String,
    pub full_name: String,
    pub current_stream_id: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// A teacher's assignment to teach one subject to one stream in one
/// academic year. Display names are joined in by the selector; the
/// store rows only carry the ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeacherAllocation {
    pub id: String,
    pub teacher_id: String,
    pub subject_id: String,
    pub stream_id: String,
    pub academic_year_id: String,
    #[serde(default)]
    pub subject_name: Option<String>,
    #[serde(default)]
    pub stream_name: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub year_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssessmentType {
    #[serde(rename = "BOT")]
    BeginningOfTerm,
    #[serde(rename = "MOT")]
    MiddleOfTerm,
    #[serde(rename = "EOT")]
    EndOfTerm,
    Assignment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mark {
    pub id: String,
    pub student_id: String,
    pub teacher_allocation_id: String,
    pub term_id: String,
    pub assessment_type: AssessmentType,
    pub score: f64,
    #[serde(default)]
    pub comments: Option<String>,
}
