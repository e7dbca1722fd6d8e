use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Pagination {
    pub total: usize,
    pub pages: usize,
    pub page: usize,
    pub limit: usize,
}

impl Pagination {
    /// Everything fits on one page.
    pub fn single_page(total: usize) -> Self {
        Self {
            total,
            pages: 1,
            page: 1,
            limit: total,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Lesson {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub subtype: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Module {
    pub id: String,
    pub name: String,
    pub description: String,
    pub lessons: Vec<Lesson>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Course {
    pub id: String,
    pub name: String,
    pub modules: Vec<Module>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Section {
    pub name: String,
    pub courses: Vec<Course>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LearningPath {
    pub id: String,
    pub name: String,
    pub image_url: Option<String>,
    pub conditioned_courses: bool,
    pub conditioned_sections: bool,
    pub min_progress: u32,
    pub certificate_delivery: String,
    pub condition_delivery: String,
    pub welcome_message: String,
    pub is_gamified: bool,
    pub status: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub description: String,
    pub sections: Vec<Section>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LearningPathsResponse {
    pub data: Vec<LearningPath>,
    pub pagination: Pagination,
}

impl From<Vec<LearningPath>> for LearningPathsResponse {
    fn from(data: Vec<LearningPath>) -> Self {
        let pagination = Pagination::single_page(data.len());
        Self { data, pagination }
    }
}

// --- progress (all values on a 0-100 scale) ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LessonProgress {
    pub name: String,
    pub description: String,
    #[serde(rename = "userProgress")]
    pub user_progress: f64,
    #[serde(rename = "userScore")]
    pub user_score: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModuleProgress {
    pub name: String,
    pub description: String,
    pub progress: f64,
    pub score: f64,
    pub lessons: Vec<LessonProgress>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CourseProgress {
    pub id: String,
    pub name: String,
    pub inscription_date: DateTime<Utc>,
    pub progress: f64,
    pub score: f64,
    pub modules: Vec<ModuleProgress>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SectionProgress {
    pub name: String,
    pub progress: f64,
    pub courses: Vec<CourseProgress>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LearningPathProgress {
    pub lp_id: String,
    pub lp_name: String,
    pub description: String,
    pub lp_progress: f64,
    pub sections: Vec<SectionProgress>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserLmsProgressResponse {
    pub user_id: String,
    pub user_name: String,
    pub lps: Vec<LearningPathProgress>,
}

// --- redemption ---

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub card_codes: Vec<String>,
    pub first_name: String,
    pub last_name: String,
    pub user_email: String,
    pub due_date: NaiveDate,
    pub lpid: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RedeemData {
    pub lp_id: String,
    pub lp_name: String,
    pub user_id: String,
    #[serde(rename = "dueDate")]
    pub due_date: NaiveDate,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RedeemResponse {
    pub data: Vec<RedeemData>,
    pub status: String,
    pub mensaje: String,
    pub token: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TokenValidation {
    pub user_id: String,
    pub lp_id: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CursosQuery {
    #[serde(rename = "lp-id")]
    pub lp_id: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ProgressQuery {
    #[serde(rename = "user-id")]
    pub user_id: String,
    #[serde(rename = "lp-id")]
    pub lp_id: String,
}
