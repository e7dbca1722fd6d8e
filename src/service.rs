//! Per-endpoint sequences of Moodle calls. Each step short-circuits the
//! rest on failure; nothing already done upstream is rolled back.

use serde_json::Value;
use std::sync::Arc;

use crate::{
    config::AppConfig,
    error::{ApiError, ApiResult},
    mapper::{self, MoodleCourse, MoodleUser},
    models::{
        LearningPath, RedeemData, RedeemRequest, RedeemResponse, TokenValidation,
        UserLmsProgressResponse,
    },
    moodle::{MoodleClient, Params},
    util,
};

#[derive(Clone)]
pub struct LmsService {
    moodle: MoodleClient,
    config: Arc<AppConfig>,
}

impl LmsService {
    pub fn new(moodle: MoodleClient, config: Arc<AppConfig>) -> Self {
        Self { moodle, config }
    }

    /// Id of the category named `config.category_name`.
    pub async fn category_id(&self) -> ApiResult<i64> {
        let name = &self.config.category_name;
        let params = Params::new().records("criteria", [[("key", "name"), ("value", name.as_str())]]);
        let body = self.moodle.call("core_course_get_categories", params).await?;

        let categories = body
            .as_array()
            .ok_or_else(|| ApiError::BadGateway("unexpected category list from Moodle".into()))?;
        let category = categories
            .iter()
            .find(|c| c.get("name").and_then(Value::as_str) == Some(name.as_str()))
            .ok_or_else(|| ApiError::NotFound(format!("category {name:?} not found")))?;

        category
            .get("id")
            .and_then(mapper::as_i64)
            .ok_or_else(|| ApiError::BadGateway(format!("category {name:?} has no id")))
    }

    /// Courses under a category; may be empty, callers decide what that means.
    pub async fn category_courses(&self, category_id: i64) -> ApiResult<Vec<MoodleCourse>> {
        let params = Params::new()
            .set("field", "category")
            .set("value", category_id);
        let body = self
            .moodle
            .call("core_course_get_courses_by_field", params)
            .await?;

        let courses = body
            .get("courses")
            .cloned()
            .ok_or_else(|| ApiError::BadGateway("Moodle course list has no `courses`".into()))?;
        serde_json::from_value(courses)
            .map_err(|e| ApiError::BadGateway(format!("unexpected course record from Moodle: {e}")))
    }

    async fn catalogue(&self) -> ApiResult<Vec<MoodleCourse>> {
        let category_id = self.category_id().await?;
        self.category_courses(category_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn learning_paths(&self, lp_id: Option<&str>) -> ApiResult<Vec<LearningPath>> {
        let courses = self.catalogue().await?;
        if courses.is_empty() {
            return Err(ApiError::NotFound(format!(
                "category {:?} has no courses",
                self.config.category_name
            )));
        }

        let paths: Vec<LearningPath> = courses.iter().map(mapper::learning_path).collect();
        let Some(lp_id) = lp_id else {
            return Ok(paths);
        };
        let filtered: Vec<LearningPath> = paths.into_iter().filter(|p| p.id == lp_id).collect();
        if filtered.is_empty() {
            return Err(ApiError::NotFound(format!("learning path {lp_id} not found")));
        }
        Ok(filtered)
    }

    async fn users_by_field(&self, field: &str, value: &str) -> ApiResult<Vec<MoodleUser>> {
        let params = Params::new().set("field", field).list("values", [value]);
        let body = self
            .moodle
            .call("core_user_get_users_by_field", params)
            .await?;
        serde_json::from_value(body)
            .map_err(|e| ApiError::BadGateway(format!("unexpected user record from Moodle: {e}")))
    }

    /// `@` in the input means e-mail, anything else a Moodle user id.
    pub async fn find_user(&self, user: &str) -> ApiResult<Option<MoodleUser>> {
        let field = if user.contains('@') { "email" } else { "id" };
        Ok(self.users_by_field(field, user.trim()).await?.into_iter().next())
    }

    /// `users[0][...]` for `core_user_create_users`, with a fresh password.
    fn new_user_params(&self, req: &RedeemRequest) -> Params {
        let email = req.user_email.trim();
        let password = util::generate_password(self.config.password_length);
        let user = [
            ("username", email.to_lowercase()),
            ("auth", "manual".to_string()),
            ("password", password),
            ("firstname", req.first_name.clone()),
            ("lastname", req.last_name.clone()),
            ("email", email.to_string()),
        ];
        Params::new().records("users", [user])
    }

    async fn create_user(&self, req: &RedeemRequest) -> ApiResult<i64> {
        let body = self
            .moodle
            .call("core_user_create_users", self.new_user_params(req))
            .await?;

        let id = body
            .as_array()
            .and_then(|created| created.first())
            .and_then(|u| u.get("id"))
            .and_then(mapper::as_i64)
            .ok_or_else(|| ApiError::BadGateway("Moodle did not return the new user id".into()))?;
        tracing::info!(user_id = id, "created Moodle user");
        Ok(id)
    }

    async fn enrol(&self, user_id: i64, course_ids: &[i64]) -> ApiResult<()> {
        let role = self.config.student_role_id;
        let enrolments = course_ids.iter().map(|course| {
            [
                ("roleid", role.to_string()),
                ("userid", user_id.to_string()),
                ("courseid", course.to_string()),
            ]
        });
        self.moodle
            .call(
                "enrol_manual_enrol_users",
                Params::new().records("enrolments", enrolments),
            )
            .await?;
        tracing::info!(user_id, courses = course_ids.len(), "enrolled user");
        Ok(())
    }

    /// Resolve (or create) the redeemer and enrol them in every catalogue
    /// course. Card codes are accepted as given.
    #[tracing::instrument(skip(self, req), fields(lpid = %req.lpid))]
    pub async fn redeem(&self, req: &RedeemRequest) -> ApiResult<RedeemResponse> {
        let courses = self.catalogue().await?;
        if courses.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "category {:?} has no courses to enrol in",
                self.config.category_name
            )));
        }
        let course_ids: Vec<i64> = courses.iter().map(|c| c.id).collect();

        let existing = self.users_by_field("email", req.user_email.trim()).await?;
        let user_id = match existing.first() {
            Some(user) => user.id,
            None => self.create_user(req).await?,
        };
        self.enrol(user_id, &course_ids).await?;

        let lp_name = courses
            .iter()
            .find(|c| c.id.to_string() == req.lpid)
            .map(mapper::course_name)
            .unwrap_or_else(|| self.config.category_name.clone());

        Ok(RedeemResponse {
            data: vec![RedeemData {
                lp_id: req.lpid.clone(),
                lp_name,
                user_id: user_id.to_string(),
                due_date: req.due_date,
            }],
            status: "success".into(),
            mensaje: "Tarjetas redimidas".into(),
            token: self.config.static_token.clone(),
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn progress(&self, user: &str, lp_id: &str) -> ApiResult<UserLmsProgressResponse> {
        let found = self
            .find_user(user)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("user {user} not found")))?;

        let body = self
            .moodle
            .call(
                "core_enrol_get_users_courses",
                Params::new().set("userid", found.id),
            )
            .await?;
        let enrolled: Vec<MoodleCourse> = serde_json::from_value(body).map_err(|e| {
            ApiError::BadGateway(format!("unexpected enrolled-course list from Moodle: {e}"))
        })?;

        let mut courses = Vec::with_capacity(enrolled.len());
        for course in &enrolled {
            let completion = self
                .moodle
                .call(
                    "core_completion_get_course_completion_status",
                    Params::new()
                        .set("courseid", course.id)
                        .set("userid", found.id),
                )
                .await?;
            let value = mapper::course_progress_value(course, &completion);
            courses.push(mapper::course_progress(course, value));
        }

        Ok(UserLmsProgressResponse {
            user_id: found.id.to_string(),
            user_name: found.display_name(),
            lps: vec![mapper::learning_path_progress(
                lp_id,
                &self.config.category_name,
                courses,
            )],
        })
    }
}

/// Token checks live apart from the Moodle sequences: the static check
/// needs no I/O and the delegated one talks to a different service.
#[derive(Clone)]
pub struct TokenService {
    http: reqwest::Client,
    config: Arc<AppConfig>,
}

impl TokenService {
    pub fn new(http: reqwest::Client, config: Arc<AppConfig>) -> Self {
        Self { http, config }
    }

    pub fn validate_static(&self, token: Option<&str>) -> ApiResult<TokenValidation> {
        match token {
            Some(t) if !t.is_empty() && t == self.config.static_token => Ok(TokenValidation {
                user_id: "user-001".into(),
                lp_id: "lp-001".into(),
            }),
            _ => Err(ApiError::BadRequest("invalid or missing token".into())),
        }
    }

    /// Ask the external validator about `token`. Transport failures are
    /// gateway errors; any other non-200 or incomplete answer is 401.
    pub async fn validate_delegated(
        &self,
        validation_url: &str,
        token: &str,
    ) -> ApiResult<TokenValidation> {
        let res = self
            .http
            .get(validation_url)
            .query(&[("token", token)])
            .timeout(self.config.moodle_timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "token validator unreachable");
                ApiError::BadGateway(format!("could not reach token validator: {e}"))
            })?;

        if res.status() != reqwest::StatusCode::OK {
            return Err(ApiError::Unauthorized("token rejected".into()));
        }
        let body: Value = res
            .json()
            .await
            .map_err(|_| ApiError::Unauthorized("token rejected".into()))?;

        let field = |keys: [&str; 2]| {
            keys.iter().find_map(|k| match body.get(*k) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
        };
        match (field(["user_id", "userId"]), field(["lp_id", "lpId"])) {
            (Some(user_id), Some(lp_id)) => Ok(TokenValidation { user_id, lp_id }),
            _ => Err(ApiError::Unauthorized("token rejected".into())),
        }
    }
}
