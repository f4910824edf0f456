//! Invalidation rules, one routine per write event.
//!
//! The cache knows nothing about how entities relate, so each routine here
//! enumerates every key (and [`KeyPattern`]) whose cached result can change
//! when that write happens. All routines are idempotent and return the number
//! of entries actually removed.
//!
//! | Event | Removes |
//! |-------|---------|
//! | course created | teacher course list + dashboard, published lists |
//! | course updated | `course:<id>*`, published lists, teacher list + dashboard |
//! | course deleted | as updated, plus enrollment/progress rows of the course, student dashboards |
//! | module updated | module, its chapter list, course modules + detail |
//! | chapter updated | chapter, its contents, module chapter list |
//! | content updated | content, chapter contents |
//! | quiz updated | quiz, questions, every attempt of the quiz, chapter contents |
//! | quiz attempt | student's attempts, progress, dashboard, course stats |
//! | enrollment created/updated | enrollment rows, lists, stats, dashboard, progress |
//! | progress updated | `progress:student:<id>:*`, activity, dashboard, course stats |
//! | class assignment | class members, course enrollments + stats, each member's lists |

use crate::cache::ResultCache;
use crate::key::{CacheKeys, KeyPattern};
use std::fmt::Display;

/// Applies invalidation rules to a [`ResultCache`].
#[derive(Clone)]
pub struct Invalidator {
    cache: ResultCache,
}

impl Invalidator {
    pub fn new(cache: ResultCache) -> Self {
        Invalidator { cache }
    }

    fn delete_keys(&self, keys: &[String]) -> usize {
        keys.iter().filter(|key| self.cache.delete(key)).count()
    }

    fn delete_patterns(&self, patterns: &[KeyPattern]) -> usize {
        patterns
            .iter()
            .map(|pattern| match pattern.to_regex() {
                Ok(regex) => self.cache.delete_pattern(&regex),
                Err(e) => {
                    // Degrade to a no-op; stale entries still expire by TTL.
                    warn!("Skipping invalidation pattern {:?}: {}", pattern, e);
                    0
                }
            })
            .sum()
    }

    pub fn on_course_created(&self, teacher_id: impl Display) -> usize {
        let removed = self.delete_keys(&[
            CacheKeys::teacher_courses(&teacher_id),
            CacheKeys::teacher_dashboard(&teacher_id),
        ]) + self.delete_patterns(&[KeyPattern::PublishedCourseLists]);

        debug!("on_course_created(teacher={}) removed {}", teacher_id, removed);
        removed
    }

    pub fn on_course_update(
        &self,
        course_id: impl Display,
        teacher_id: Option<impl Display>,
    ) -> usize {
        let mut removed = self.delete_patterns(&[
            KeyPattern::course(&course_id),
            KeyPattern::PublishedCourseLists,
        ]);
        if let Some(teacher_id) = teacher_id {
            removed += self.delete_keys(&[
                CacheKeys::teacher_courses(&teacher_id),
                CacheKeys::teacher_dashboard(&teacher_id),
            ]);
        }

        debug!("on_course_update(course={}) removed {}", course_id, removed);
        removed
    }

    pub fn on_course_deleted(
        &self,
        course_id: impl Display,
        teacher_id: Option<impl Display>,
    ) -> usize {
        let removed = self.on_course_update(&course_id, teacher_id)
            + self.delete_patterns(&[
                KeyPattern::course_enrollment_rows(&course_id),
                KeyPattern::course_progress(&course_id),
                KeyPattern::StudentDashboards,
            ]);

        info!("Course {} deleted, {} cache entries invalidated", course_id, removed);
        removed
    }

    pub fn on_module_update(&self, module_id: impl Display, course_id: impl Display) -> usize {
        self.delete_keys(&[
            CacheKeys::module(&module_id),
            CacheKeys::module_chapters(&module_id),
            CacheKeys::course_modules(&course_id),
            CacheKeys::course_detail(&course_id),
        ])
    }

    /// Chapters appear in the course outline, so its detail entry goes too.
    pub fn on_chapter_update(
        &self,
        chapter_id: impl Display,
        module_id: impl Display,
        course_id: impl Display,
    ) -> usize {
        self.delete_keys(&[
            CacheKeys::chapter(&chapter_id),
            CacheKeys::chapter_contents(&chapter_id),
            CacheKeys::module_chapters(&module_id),
            CacheKeys::course_detail(&course_id),
        ])
    }

    pub fn on_content_update(&self, content_id: impl Display, chapter_id: impl Display) -> usize {
        self.delete_keys(&[
            CacheKeys::content(&content_id),
            CacheKeys::chapter_contents(&chapter_id),
        ])
    }

    pub fn on_quiz_update(&self, quiz_id: impl Display, chapter_id: Option<impl Display>) -> usize {
        let mut removed = self.delete_keys(&[
            CacheKeys::quiz(&quiz_id),
            CacheKeys::quiz_questions(&quiz_id),
        ]) + self.delete_patterns(&[KeyPattern::quiz_attempts(&quiz_id)]);

        if let Some(chapter_id) = chapter_id {
            removed += self.delete_keys(&[CacheKeys::chapter_contents(chapter_id)]);
        }
        removed
    }

    /// A student submitted an attempt for a quiz in `course_id`.
    pub fn on_quiz_attempt(
        &self,
        student_id: impl Display,
        quiz_id: impl Display,
        course_id: impl Display,
    ) -> usize {
        self.delete_keys(&[
            CacheKeys::quiz_attempts(&student_id, &quiz_id),
            CacheKeys::progress(&student_id, &course_id),
            CacheKeys::progress_summary(&student_id),
            CacheKeys::student_dashboard(&student_id),
            CacheKeys::course_stats(&course_id),
        ])
    }

    pub fn on_enrollment_created(&self, student_id: impl Display, course_id: impl Display) -> usize {
        let removed = self.delete_keys(&[
            CacheKeys::enrollment(&student_id, &course_id),
            CacheKeys::student_enrollments(&student_id),
            CacheKeys::course_enrollments(&course_id),
            CacheKeys::course_stats(&course_id),
            CacheKeys::student_dashboard(&student_id),
            CacheKeys::progress_summary(&student_id),
        ]);

        debug!(
            "on_enrollment_created(student={}, course={}) removed {}",
            student_id, course_id, removed
        );
        removed
    }

    /// Enrollment status changed or the enrollment was removed.
    pub fn on_enrollment_update(&self, student_id: impl Display, course_id: impl Display) -> usize {
        self.on_enrollment_created(&student_id, &course_id)
            + self.delete_keys(&[CacheKeys::progress(&student_id, &course_id)])
    }

    pub fn on_progress_update(&self, student_id: impl Display, course_id: impl Display) -> usize {
        self.delete_patterns(&[
            KeyPattern::student_progress(&student_id),
            KeyPattern::student_activity(&student_id),
        ]) + self.delete_keys(&[
            CacheKeys::student_dashboard(&student_id),
            CacheKeys::course_stats(&course_id),
        ])
    }

    /// Every member of a class was enrolled into `course_id`.
    pub fn on_class_assignment<S: Display>(
        &self,
        class_id: impl Display,
        course_id: impl Display,
        student_ids: &[S],
    ) -> usize {
        let mut removed = self.delete_keys(&[
            CacheKeys::class_members(&class_id),
            CacheKeys::course_enrollments(&course_id),
            CacheKeys::course_stats(&course_id),
        ]);
        for student_id in student_ids {
            removed += self.delete_keys(&[
                CacheKeys::enrollment(student_id, &course_id),
                CacheKeys::student_enrollments(student_id),
                CacheKeys::student_dashboard(student_id),
                CacheKeys::progress_summary(student_id),
            ]);
        }

        info!(
            "Class {} assigned to course {} ({} students), {} cache entries invalidated",
            class_id,
            course_id,
            student_ids.len(),
            removed
        );
        removed
    }
}
