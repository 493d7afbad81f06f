//! Caller identity passed explicitly into every operation.

use crate::models::CourseId;
use crate::store::CourseDirectory;
use crate::AttendanceError;
use serde::{Deserialize, Serialize};

/// Coarse role carried by an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Scans codes.
    Student,
    /// Runs sessions for courses they own.
    Instructor,
    /// Full access to every course.
    Admin,
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Account id.
    pub user_id: String,
    /// Role granted at authentication.
    pub role: Role,
}

impl Principal {
    /// Create a principal.
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    /// Shorthand for a student principal.
    pub fn student(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Student)
    }

    /// Shorthand for an instructor principal.
    pub fn instructor(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Instructor)
    }

    /// Shorthand for an admin principal.
    pub fn admin(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Admin)
    }

    /// Require the student role.
    pub fn require_student(&self) -> Result<(), AttendanceError> {
        match self.role {
            Role::Student => Ok(()),
            _ => Err(AttendanceError::Forbidden(
                "only students can submit scans".to_string(),
            )),
        }
    }

    /// Require control over a course: its owning instructor, or an admin.
    pub async fn require_course_control(
        &self,
        directory: &dyn CourseDirectory,
        course_id: CourseId,
    ) -> Result<(), AttendanceError> {
        let owns = match self.role {
            Role::Admin => return Ok(()),
            Role::Student => {
                return Err(AttendanceError::Forbidden(
                    "instructor access required".to_string(),
                ))
            }
            Role::Instructor => directory.course_owned_by(course_id, &self.user_id).await?,
        };
        if owns {
            Ok(())
        } else {
            Err(AttendanceError::Forbidden(
                "you do not own this course".to_string(),
            ))
        }
    }

    /// Require read access to a course's live stats: control, or an
    /// active enrollment.
    pub async fn require_course_view(
        &self,
        directory: &dyn CourseDirectory,
        course_id: CourseId,
    ) -> Result<(), AttendanceError> {
        let allowed = match self.role {
            Role::Admin => true,
            Role::Instructor => directory.course_owned_by(course_id, &self.user_id).await?,
            Role::Student => {
                directory
                    .find_active_enrollment(course_id, &self.user_id)
                    .await?
            }
        };
        if allowed {
            Ok(())
        } else {
            Err(AttendanceError::Forbidden(
                "no access to this course".to_string(),
            ))
        }
    }
}
