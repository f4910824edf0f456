//! Cache key registry.
//!
//! Every key is `prefix:component:...` with `:` as separator, where `prefix`
//! comes from [`EntityKind::prefix`]. Invalidation patterns are built from
//! the same prefixes via [`KeyPattern`], so a key format change cannot leave
//! an invalidation rule silently pointing at a stale keyspace.

use crate::error::Result;
use regex::Regex;
use std::fmt::Display;

pub const SEPARATOR: char = ':';

/// Enumerated keyspaces. Each variant owns one key prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Course,
    CourseList,
    Teacher,
    Module,
    Chapter,
    Content,
    Quiz,
    QuizAttempt,
    Enrollment,
    Progress,
    Dashboard,
    Class,
    Activity,
}

impl EntityKind {
    pub const ALL: [EntityKind; 13] = [
        EntityKind::Course,
        EntityKind::CourseList,
        EntityKind::Teacher,
        EntityKind::Module,
        EntityKind::Chapter,
        EntityKind::Content,
        EntityKind::Quiz,
        EntityKind::QuizAttempt,
        EntityKind::Enrollment,
        EntityKind::Progress,
        EntityKind::Dashboard,
        EntityKind::Class,
        EntityKind::Activity,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::Course => "course",
            EntityKind::CourseList => "courses",
            EntityKind::Teacher => "teacher",
            EntityKind::Module => "module",
            EntityKind::Chapter => "chapter",
            EntityKind::Content => "content",
            EntityKind::Quiz => "quiz",
            EntityKind::QuizAttempt => "attempt",
            EntityKind::Enrollment => "enrollment",
            EntityKind::Progress => "progress",
            EntityKind::Dashboard => "dashboard",
            EntityKind::Class => "class",
            EntityKind::Activity => "activity",
        }
    }

    /// Kind owning `key`, if its prefix is registered.
    pub fn of_key(key: &str) -> Option<EntityKind> {
        let prefix = key.split(SEPARATOR).next()?;
        EntityKind::ALL.into_iter().find(|kind| kind.prefix() == prefix)
    }
}

/// Deterministic key builders, one per cached query.
pub struct CacheKeys;

impl CacheKeys {
    fn build(kind: EntityKind, parts: &[&dyn Display]) -> String {
        let mut key = kind.prefix().to_string();
        for part in parts {
            key.push(SEPARATOR);
            key.push_str(&part.to_string());
        }
        key
    }

    pub fn course(course_id: impl Display) -> String {
        Self::build(EntityKind::Course, &[&course_id])
    }

    /// Course with its modules and chapter outline.
    pub fn course_detail(course_id: impl Display) -> String {
        Self::build(EntityKind::Course, &[&course_id, &"detail"])
    }

    pub fn course_modules(course_id: impl Display) -> String {
        Self::build(EntityKind::Course, &[&course_id, &"modules"])
    }

    pub fn course_stats(course_id: impl Display) -> String {
        Self::build(EntityKind::Course, &[&course_id, &"stats"])
    }

    /// Enrolled students of a course.
    pub fn course_enrollments(course_id: impl Display) -> String {
        Self::build(EntityKind::Course, &[&course_id, &"enrollments"])
    }

    pub fn published_courses(page: u64, page_size: u64) -> String {
        Self::build(
            EntityKind::CourseList,
            &[&"published", &"page", &page, &"size", &page_size],
        )
    }

    pub fn teacher_courses(teacher_id: impl Display) -> String {
        Self::build(EntityKind::Teacher, &[&teacher_id, &"courses"])
    }

    pub fn module(module_id: impl Display) -> String {
        Self::build(EntityKind::Module, &[&module_id])
    }

    pub fn module_chapters(module_id: impl Display) -> String {
        Self::build(EntityKind::Module, &[&module_id, &"chapters"])
    }

    pub fn chapter(chapter_id: impl Display) -> String {
        Self::build(EntityKind::Chapter, &[&chapter_id])
    }

    pub fn chapter_contents(chapter_id: impl Display) -> String {
        Self::build(EntityKind::Chapter, &[&chapter_id, &"contents"])
    }

    pub fn content(content_id: impl Display) -> String {
        Self::build(EntityKind::Content, &[&content_id])
    }

    pub fn quiz(quiz_id: impl Display) -> String {
        Self::build(EntityKind::Quiz, &[&quiz_id])
    }

    pub fn quiz_questions(quiz_id: impl Display) -> String {
        Self::build(EntityKind::Quiz, &[&quiz_id, &"questions"])
    }

    pub fn quiz_attempts(student_id: impl Display, quiz_id: impl Display) -> String {
        Self::build(
            EntityKind::QuizAttempt,
            &[&"student", &student_id, &"quiz", &quiz_id],
        )
    }

    pub fn enrollment(student_id: impl Display, course_id: impl Display) -> String {
        Self::build(
            EntityKind::Enrollment,
            &[&"student", &student_id, &"course", &course_id],
        )
    }

    /// All enrollments of one student.
    pub fn student_enrollments(student_id: impl Display) -> String {
        Self::build(EntityKind::Enrollment, &[&"student", &student_id, &"list"])
    }

    pub fn progress(student_id: impl Display, course_id: impl Display) -> String {
        Self::build(
            EntityKind::Progress,
            &[&"student", &student_id, &"course", &course_id],
        )
    }

    pub fn progress_summary(student_id: impl Display) -> String {
        Self::build(EntityKind::Progress, &[&"student", &student_id, &"summary"])
    }

    pub fn student_dashboard(student_id: impl Display) -> String {
        Self::build(EntityKind::Dashboard, &[&"student", &student_id])
    }

    pub fn teacher_dashboard(teacher_id: impl Display) -> String {
        Self::build(EntityKind::Dashboard, &[&"teacher", &teacher_id])
    }

    pub fn class_members(class_id: impl Display) -> String {
        Self::build(EntityKind::Class, &[&class_id, &"members"])
    }

    /// One cursor window of a student's activity feed.
    pub fn activity_feed(
        student_id: impl Display,
        cursor: Option<impl Display>,
        limit: u64,
    ) -> String {
        let cursor = cursor.map_or_else(|| "start".to_string(), |c| c.to_string());
        Self::build(
            EntityKind::Activity,
            &[&"student", &student_id, &"after", &cursor, &"limit", &limit],
        )
    }

    /// Split a key into its components.
    pub fn parse(key: &str) -> Vec<&str> {
        key.split(SEPARATOR).collect()
    }
}

/// Enumerated invalidation patterns.
///
/// These are the only keyspaces that may be pattern-deleted. Each renders to
/// an anchored regex built from the owning [`EntityKind`] prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyPattern {
    /// Every key of one kind.
    Kind(EntityKind),
    /// `course:<id>` and every `course:<id>:*` key.
    Course(String),
    /// Every published-course list page.
    PublishedCourseLists,
    /// Every `progress:student:<id>:*` key.
    StudentProgress(String),
    /// Per-student progress rows of one course, across all students.
    CourseProgress(String),
    /// Every `enrollment:student:<id>:*` key.
    StudentEnrollments(String),
    /// Per-student enrollment rows of one course, across all students.
    CourseEnrollmentRows(String),
    /// Every attempt key of one student.
    StudentAttempts(String),
    /// Attempt keys of one quiz, across all students.
    QuizAttempts(String),
    /// Every cached activity window of one student.
    StudentActivity(String),
    /// Every student dashboard.
    StudentDashboards,
}

impl KeyPattern {
    pub fn course(course_id: impl Display) -> Self {
        KeyPattern::Course(course_id.to_string())
    }

    pub fn student_progress(student_id: impl Display) -> Self {
        KeyPattern::StudentProgress(student_id.to_string())
    }

    pub fn course_progress(course_id: impl Display) -> Self {
        KeyPattern::CourseProgress(course_id.to_string())
    }

    pub fn student_enrollments(student_id: impl Display) -> Self {
        KeyPattern::StudentEnrollments(student_id.to_string())
    }

    pub fn course_enrollment_rows(course_id: impl Display) -> Self {
        KeyPattern::CourseEnrollmentRows(course_id.to_string())
    }

    pub fn student_attempts(student_id: impl Display) -> Self {
        KeyPattern::StudentAttempts(student_id.to_string())
    }

    pub fn quiz_attempts(quiz_id: impl Display) -> Self {
        KeyPattern::QuizAttempts(quiz_id.to_string())
    }

    pub fn student_activity(student_id: impl Display) -> Self {
        KeyPattern::StudentActivity(student_id.to_string())
    }

    /// Anchored regex source for this pattern.
    pub fn as_regex_source(&self) -> String {
        let p = |kind: EntityKind| regex::escape(kind.prefix());

        match self {
            KeyPattern::Kind(kind) => format!("^{}(:|$)", p(*kind)),
            KeyPattern::Course(id) => format!("^{}:{}(:|$)", p(EntityKind::Course), regex::escape(id)),
            KeyPattern::PublishedCourseLists => {
                format!("^{}:published:", p(EntityKind::CourseList))
            }
            KeyPattern::StudentProgress(id) => {
                format!("^{}:student:{}:", p(EntityKind::Progress), regex::escape(id))
            }
            KeyPattern::CourseProgress(id) => format!(
                "^{}:student:[^:]+:course:{}$",
                p(EntityKind::Progress),
                regex::escape(id)
            ),
            KeyPattern::StudentEnrollments(id) => {
                format!("^{}:student:{}:", p(EntityKind::Enrollment), regex::escape(id))
            }
            KeyPattern::CourseEnrollmentRows(id) => format!(
                "^{}:student:[^:]+:course:{}$",
                p(EntityKind::Enrollment),
                regex::escape(id)
            ),
            KeyPattern::StudentAttempts(id) => {
                format!("^{}:student:{}:", p(EntityKind::QuizAttempt), regex::escape(id))
            }
            KeyPattern::QuizAttempts(id) => format!(
                "^{}:student:[^:]+:quiz:{}$",
                p(EntityKind::QuizAttempt),
                regex::escape(id)
            ),
            KeyPattern::StudentActivity(id) => {
                format!("^{}:student:{}:", p(EntityKind::Activity), regex::escape(id))
            }
            KeyPattern::StudentDashboards => {
                format!("^{}:student:", p(EntityKind::Dashboard))
            }
        }
    }

    /// Compile this pattern.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::Validation` if the rendered regex does not compile.
    pub fn to_regex(&self) -> Result<Regex> {
        Ok(Regex::new(&self.as_regex_source())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn all_keys() -> Vec<String> {
        vec![
            CacheKeys::course(1),
            CacheKeys::course_detail(1),
            CacheKeys::course_modules(1),
            CacheKeys::course_stats(1),
            CacheKeys::course_enrollments(1),
            CacheKeys::published_courses(1, 20),
            CacheKeys::published_courses(2, 20),
            CacheKeys::published_courses(1, 10),
            CacheKeys::teacher_courses(1),
            CacheKeys::module(1),
            CacheKeys::module_chapters(1),
            CacheKeys::chapter(1),
            CacheKeys::chapter_contents(1),
            CacheKeys::content(1),
            CacheKeys::quiz(1),
            CacheKeys::quiz_questions(1),
            CacheKeys::quiz_attempts(1, 1),
            CacheKeys::enrollment(1, 1),
            CacheKeys::student_enrollments(1),
            CacheKeys::progress(1, 1),
            CacheKeys::progress(1, 11),
            CacheKeys::progress(11, 1),
            CacheKeys::progress_summary(1),
            CacheKeys::student_dashboard(1),
            CacheKeys::teacher_dashboard(1),
            CacheKeys::class_members(1),
            CacheKeys::activity_feed(1, None::<u64>, 20),
            CacheKeys::activity_feed(1, Some(5), 20),
        ]
    }

    #[test]
    fn test_keys_are_unique() {
        let keys = all_keys();
        let unique: HashSet<&String> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
    }

    #[test]
    fn test_keys_are_deterministic() {
        assert_eq!(all_keys(), all_keys());
        assert_eq!(CacheKeys::progress(7, 3), "progress:student:7:course:3");
        assert_eq!(
            CacheKeys::published_courses(2, 20),
            "courses:published:page:2:size:20"
        );
    }

    #[test]
    fn test_every_key_has_registered_prefix() {
        for key in all_keys() {
            assert!(EntityKind::of_key(&key).is_some(), "unregistered: {}", key);
        }
        assert_eq!(EntityKind::of_key("unknown:1"), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            CacheKeys::parse(&CacheKeys::enrollment(4, 9)),
            vec!["enrollment", "student", "4", "course", "9"]
        );
    }

    #[test]
    fn test_course_pattern_does_not_match_neighbours() {
        let regex = KeyPattern::course(1).to_regex().unwrap();
        assert!(regex.is_match(&CacheKeys::course(1)));
        assert!(regex.is_match(&CacheKeys::course_modules(1)));
        assert!(!regex.is_match(&CacheKeys::course(10)));
        assert!(!regex.is_match(&CacheKeys::course_modules(12)));
    }

    #[test]
    fn test_student_progress_pattern() {
        let regex = KeyPattern::student_progress(7).to_regex().unwrap();
        assert!(regex.is_match(&CacheKeys::progress(7, 1)));
        assert!(regex.is_match(&CacheKeys::progress_summary(7)));
        assert!(!regex.is_match(&CacheKeys::progress(70, 1)));
        assert!(!regex.is_match(&CacheKeys::student_dashboard(7)));
    }

    #[test]
    fn test_course_progress_pattern() {
        let regex = KeyPattern::course_progress(3).to_regex().unwrap();
        assert!(regex.is_match(&CacheKeys::progress(1, 3)));
        assert!(regex.is_match(&CacheKeys::progress(2, 3)));
        assert!(!regex.is_match(&CacheKeys::progress(1, 33)));
        assert!(!regex.is_match(&CacheKeys::progress_summary(3)));
    }

    #[test]
    fn test_pattern_ids_are_escaped() {
        let regex = KeyPattern::course("a.b").to_regex().unwrap();
        assert!(regex.is_match("course:a.b"));
        assert!(!regex.is_match("course:axb"));
    }

    #[test]
    fn test_every_pattern_compiles() {
        let mut patterns: Vec<KeyPattern> =
            EntityKind::ALL.into_iter().map(KeyPattern::Kind).collect();
        patterns.extend([
            KeyPattern::course(1),
            KeyPattern::PublishedCourseLists,
            KeyPattern::student_progress(1),
            KeyPattern::course_progress(1),
            KeyPattern::student_enrollments(1),
            KeyPattern::course_enrollment_rows(1),
            KeyPattern::student_attempts(1),
            KeyPattern::quiz_attempts(1),
            KeyPattern::student_activity(1),
            KeyPattern::StudentDashboards,
        ]);
        for pattern in patterns {
            assert!(pattern.to_regex().is_ok(), "{:?}", pattern);
        }
    }
}
