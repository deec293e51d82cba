//! Attendance statistics assembled from a repository.

use crate::calc::{
    self, AtRiskStudent, ClassOverview, DateRange, Granularity, PeriodAttendance, RatePolicy,
    StudentAttendance, DEFAULT_AT_RISK_THRESHOLD,
};
use crate::repo::{AttendanceRepository, RepoError, RepoResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttendanceSettings {
    pub at_risk_threshold: f64,
    pub policy: RatePolicy,
    pub default_granularity: Granularity,
}

impl Default for AttendanceSettings {
    fn default() -> Self {
        Self {
            at_risk_threshold: DEFAULT_AT_RISK_THRESHOLD,
            policy: RatePolicy::default(),
            default_granularity: Granularity::Week,
        }
    }
}

pub fn student_stats<R>(
    repo: &R,
    range: &DateRange,
    include_inactive: bool,
    settings: &AttendanceSettings,
) -> RepoResult<Vec<StudentAttendance>>
where
    R: AttendanceRepository + ?Sized,
{
    let students = repo.list_students(include_inactive)?;
    let ledger = repo.load_ledger(range)?;
    Ok(calc::summarize_students(&ledger, &students, &settings.policy))
}

/// Whole-roster periods, or one student's trend when `student_id` is given.
pub fn period_stats<R>(
    repo: &R,
    range: &DateRange,
    granularity: Granularity,
    student_id: Option<&str>,
    settings: &AttendanceSettings,
) -> RepoResult<Vec<PeriodAttendance>>
where
    R: AttendanceRepository + ?Sized,
{
    let ledger = repo.load_ledger(range)?;
    match student_id {
        Some(id) => {
            if repo.get_student(id)?.is_none() {
                return Err(RepoError::StudentNotFound(id.to_string()));
            }
            Ok(calc::student_periods(&ledger, id, granularity, &settings.policy))
        }
        None => Ok(calc::summarize_periods(&ledger, granularity, &settings.policy)),
    }
}

pub fn at_risk<R>(
    repo: &R,
    range: &DateRange,
    threshold: Option<f64>,
    settings: &AttendanceSettings,
) -> RepoResult<Vec<AtRiskStudent>>
where
    R: AttendanceRepository + ?Sized,
{
    let rows = student_stats(repo, range, false, settings)?;
    Ok(calc::at_risk_students(
        &rows,
        threshold.unwrap_or(settings.at_risk_threshold),
    ))
}

pub fn overview<R>(
    repo: &R,
    range: &DateRange,
    settings: &AttendanceSettings,
) -> RepoResult<ClassOverview>
where
    R: AttendanceRepository + ?Sized,
{
    let students = repo.list_students(false)?;
    let ledger = repo.load_ledger(range)?;
    Ok(calc::class_overview(
        &ledger,
        &students,
        &settings.policy,
        settings.at_risk_threshold,
    ))
}
