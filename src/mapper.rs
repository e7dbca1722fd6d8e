//! Pure reshaping of Moodle records into the public schema.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use crate::models::{
    Course, CourseProgress, LearningPath, LearningPathProgress, Section, SectionProgress,
};

/// Used wherever Moodle gives us no usable epoch.
pub fn fallback_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct MoodleFile {
    #[serde(default)]
    pub fileurl: Option<String>,
}

/// Course as returned by `core_course_get_courses_by_field` and
/// `core_enrol_get_users_courses`. Only `id` is mandatory.
#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct MoodleCourse {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: i64,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub shortname: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub startdate: Value,
    #[serde(default)]
    pub enddate: Value,
    #[serde(default)]
    pub timecreated: Value,
    #[serde(default)]
    pub timemodified: Value,
    #[serde(default)]
    pub visible: Value,
    #[serde(default)]
    pub courseimage: Option<String>,
    #[serde(default)]
    pub overviewfiles: Vec<MoodleFile>,
    #[serde(default)]
    pub progress: Value,
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct MoodleUser {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: i64,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
}

impl MoodleUser {
    pub fn display_name(&self) -> String {
        if let Some(full) = non_empty(self.fullname.as_deref()) {
            return full.to_string();
        }
        let parts: Vec<&str> = [self.firstname.as_deref(), self.lastname.as_deref()]
            .into_iter()
            .filter_map(non_empty)
            .collect();
        if parts.is_empty() {
            self.id.to_string()
        } else {
            parts.join(" ")
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Integer view of a JSON number or numeric string.
pub fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    let f: Option<f64> = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    f.filter(|f| f.is_finite())
}

/// Positive epoch seconds, if any.
pub fn epoch_to_datetime(v: &Value) -> Option<DateTime<Utc>> {
    as_i64(v)
        .filter(|secs| *secs > 0)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

/// Never fails: anything unusable becomes [`fallback_timestamp`].
pub fn timestamp_or_fallback(v: &Value) -> DateTime<Utc> {
    epoch_to_datetime(v).unwrap_or_else(fallback_timestamp)
}

pub fn course_name(course: &MoodleCourse) -> String {
    non_empty(course.fullname.as_deref())
        .or_else(|| non_empty(course.shortname.as_deref()))
        .map(str::to_string)
        .unwrap_or_else(|| course.id.to_string())
}

fn image_url(course: &MoodleCourse) -> Option<String> {
    non_empty(course.courseimage.as_deref())
        .map(str::to_string)
        .or_else(|| {
            course
                .overviewfiles
                .iter()
                .find_map(|f| non_empty(f.fileurl.as_deref()).map(str::to_string))
        })
}

pub fn course_summary(course: &MoodleCourse) -> Course {
    Course {
        id: course.id.to_string(),
        name: course_name(course),
        // module structure isn't exposed by the calls we use
        modules: Vec::new(),
    }
}

pub fn learning_path(course: &MoodleCourse) -> LearningPath {
    let name = course_name(course);
    let hidden = as_i64(&course.visible) == Some(0);
    LearningPath {
        id: course.id.to_string(),
        image_url: image_url(course),
        conditioned_courses: false,
        conditioned_sections: false,
        min_progress: 0,
        certificate_delivery: "LP ONLY".into(),
        condition_delivery: "LP END".into(),
        welcome_message: format!("Bienvenido a {name}"),
        is_gamified: false,
        status: if hidden { "hidden" } else { "active" }.into(),
        start_date: timestamp_or_fallback(&course.startdate),
        end_date: epoch_to_datetime(&course.enddate),
        created_at: timestamp_or_fallback(&course.timecreated),
        updated_at: timestamp_or_fallback(&course.timemodified),
        description: course.summary.clone().unwrap_or_default(),
        sections: vec![Section {
            name: name.clone(),
            courses: vec![course_summary(course)],
        }],
        name,
    }
}

fn clamp_progress(p: f64) -> f64 {
    p.clamp(0.0, 100.0)
}

fn percentage_in(v: &Value) -> Option<f64> {
    ["progress", "percentage"]
        .iter()
        .find_map(|k| v.get(*k).and_then(as_f64))
}

/// Per-course progress in 0-100: an explicit percentage wins, then the
/// `completed` flag, then 0.
pub fn course_progress_value(course: &MoodleCourse, completion: &Value) -> f64 {
    let status = completion.get("completionstatus").unwrap_or(&Value::Null);
    let explicit = percentage_in(completion)
        .or_else(|| percentage_in(status))
        .or_else(|| as_f64(&course.progress));
    if let Some(p) = explicit {
        return clamp_progress(p);
    }
    let completed = status
        .get("completed")
        .or_else(|| completion.get("completed"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if completed {
        100.0
    } else {
        0.0
    }
}

/// Arithmetic mean, 0 for an empty set.
pub fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub fn course_progress(course: &MoodleCourse, progress: f64) -> CourseProgress {
    CourseProgress {
        id: course.id.to_string(),
        name: course_name(course),
        inscription_date: timestamp_or_fallback(&course.startdate),
        progress,
        score: 0.0,
        modules: Vec::new(),
    }
}

/// One synthetic section per enrolled course.
pub fn learning_path_progress(
    lp_id: &str,
    lp_name: &str,
    courses: Vec<CourseProgress>,
) -> LearningPathProgress {
    let values: Vec<f64> = courses.iter().map(|c| c.progress).collect();
    let sections = courses
        .into_iter()
        .map(|c| SectionProgress {
            name: c.name.clone(),
            progress: c.progress,
            courses: vec![c],
        })
        .collect();
    LearningPathProgress {
        lp_id: lp_id.to_string(),
        lp_name: lp_name.to_string(),
        description: String::new(),
        lp_progress: average(&values),
        sections,
    }
}
