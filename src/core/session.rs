use super::error::{AutomationError, Result};
use super::types::{CourseUser, Credentials};

/// State shared by every step of one pipeline run.
///
/// Fields start empty and are filled by earlier steps. Reading a field that no
/// step has populated yet fails with [`AutomationError::MissingSessionField`].
#[derive(Debug, Default)]
pub struct AutomationSession {
    credentials: Option<Credentials>,
    course_id: Option<String>,
    course_code: Option<String>,
    forum_email: Option<String>,
    course_users: Option<Vec<CourseUser>>,
    forum_start_date: Option<String>,
    forum_year: Option<i32>,
}

fn field<'a, T>(value: &'a Option<T>, name: &'static str) -> Result<&'a T> {
    value
        .as_ref()
        .ok_or(AutomationError::MissingSessionField(name))
}

impl AutomationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credentials(&self) -> Result<&Credentials> {
        field(&self.credentials, "credentials")
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    pub fn course_id(&self) -> Result<&str> {
        field(&self.course_id, "course_id").map(String::as_str)
    }

    pub fn set_course_id(&mut self, id: impl Into<String>) {
        self.course_id = Some(id.into());
    }

    pub fn course_code(&self) -> Result<&str> {
        field(&self.course_code, "course_code").map(String::as_str)
    }

    pub fn set_course_code(&mut self, code: impl Into<String>) {
        self.course_code = Some(code.into());
    }

    pub fn forum_email(&self) -> Result<&str> {
        field(&self.forum_email, "forum_email").map(String::as_str)
    }

    pub fn set_forum_email(&mut self, email: impl Into<String>) {
        self.forum_email = Some(email.into());
    }

    pub fn course_users(&self) -> Result<&[CourseUser]> {
        field(&self.course_users, "course_users").map(Vec::as_slice)
    }

    pub fn set_course_users(&mut self, users: Vec<CourseUser>) {
        self.course_users = Some(users);
    }

    pub fn forum_start_date(&self) -> Result<&str> {
        field(&self.forum_start_date, "forum_start_date").map(String::as_str)
    }

    pub fn set_forum_start_date(&mut self, date: impl Into<String>) {
        self.forum_start_date = Some(date.into());
    }

    pub fn forum_year(&self) -> Result<i32> {
        field(&self.forum_year, "forum_year").copied()
    }

    pub fn set_forum_year(&mut self, year: i32) {
        self.forum_year = Some(year);
    }
}
