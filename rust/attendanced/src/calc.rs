use crate::model::{AttendanceRecord, AttendanceStatus, Student};
use chrono::{Datelike, Days, Months, NaiveDate};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_AT_RISK_THRESHOLD: f64 = 85.0;
pub const DEFAULT_TARDY_WEIGHT: f64 = 0.5;

/// What a student with no records reports as their rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ZeroRecordPolicy {
    /// `Some(0.0)`.
    #[default]
    Zero,
    /// `None`, meaning "no data" rather than 0%.
    NoData,
}

impl ZeroRecordPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "zero" => Some(Self::Zero),
            "noData" => Some(Self::NoData),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zero => "zero",
            Self::NoData => "noData",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatePolicy {
    pub tardy_weight: f64,
    pub zero_records: ZeroRecordPolicy,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            tardy_weight: DEFAULT_TARDY_WEIGHT,
            zero_records: ZeroRecordPolicy::Zero,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub present: usize,
    pub absent: usize,
    pub tardy: usize,
    pub excused: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::Tardy => self.tardy += 1,
            AttendanceStatus::Excused => self.excused += 1,
        }
    }

    pub fn merge(&mut self, other: &StatusCounts) {
        self.present += other.present;
        self.absent += other.absent;
        self.tardy += other.tardy;
        self.excused += other.excused;
    }

    pub fn total(&self) -> usize {
        self.present + self.absent + self.tardy + self.excused
    }
}

impl FromIterator<AttendanceStatus> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = AttendanceStatus>>(iter: I) -> Self {
        let mut counts = StatusCounts::default();
        for status in iter {
            counts.add(status);
        }
        counts
    }
}

/// `(present + excused + w * tardy) / total * 100`, with `w` the tardy weight
/// clamped to `[0, 1]`. Zero totals follow the policy.
pub fn attendance_rate(counts: &StatusCounts, policy: &RatePolicy) -> Option<f64> {
    let total = counts.total();
    if total == 0 {
        return match policy.zero_records {
            ZeroRecordPolicy::Zero => Some(0.0),
            ZeroRecordPolicy::NoData => None,
        };
    }
    let weight = if policy.tardy_weight.is_finite() {
        policy.tardy_weight.clamp(0.0, 1.0)
    } else {
        DEFAULT_TARDY_WEIGHT
    };
    let attended =
        counts.present as f64 + counts.excused as f64 + weight * (counts.tardy as f64);
    Some(100.0 * attended / (total as f64))
}

/// Inclusive date window; a missing bound is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn is_valid(&self) -> bool {
        match (self.from, self.to) {
            (Some(from), Some(to)) => from <= to,
            _ => true,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map(|f| date >= f).unwrap_or(true) && self.to.map(|t| date <= t).unwrap_or(true)
    }
}

/// Attendance keyed by `(student_id, date)`; at most one status per pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttendanceLedger {
    entries: BTreeMap<(String, NaiveDate), AttendanceStatus>,
}

impl AttendanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later records for the same student and day replace earlier ones.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = AttendanceRecord>,
    {
        let mut ledger = Self::new();
        for r in records {
            ledger.insert(&r.student_id, r.date, r.status);
        }
        ledger
    }

    /// Returns the status this insert replaced, if any.
    pub fn insert(
        &mut self,
        student_id: &str,
        date: NaiveDate,
        status: AttendanceStatus,
    ) -> Option<AttendanceStatus> {
        self.entries.insert((student_id.to_string(), date), status)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, NaiveDate, AttendanceStatus)> + '_ {
        self.entries
            .iter()
            .map(|((sid, date), status)| (sid.as_str(), *date, *status))
    }

    /// One student's entries in date order.
    pub fn for_student<'a>(
        &'a self,
        student_id: &str,
    ) -> impl Iterator<Item = (NaiveDate, AttendanceStatus)> + 'a {
        let lo = (student_id.to_string(), NaiveDate::MIN);
        let hi = (student_id.to_string(), NaiveDate::MAX);
        self.entries
            .range(lo..=hi)
            .map(|((_, date), status)| (*date, *status))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
}

impl Granularity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

/// First and last day (inclusive) of the period containing `date`.
/// Weeks start on Monday. Bounds that would fall outside the representable
/// calendar are clamped to `NaiveDate::MIN` / `NaiveDate::MAX`.
pub fn period_bounds(date: NaiveDate, granularity: Granularity) -> (NaiveDate, NaiveDate) {
    match granularity {
        Granularity::Day => (date, date),
        Granularity::Week => {
            let back = Days::new(u64::from(date.weekday().num_days_from_monday()));
            let start = date.checked_sub_days(back).unwrap_or(NaiveDate::MIN);
            let end = start.checked_add_days(Days::new(6)).unwrap_or(NaiveDate::MAX);
            (start, end)
        }
        Granularity::Month => {
            let start = date.with_day(1).unwrap_or(date);
            let end = start
                .checked_add_months(Months::new(1))
                .and_then(|next| next.pred_opt())
                .unwrap_or(NaiveDate::MAX);
            (start, end)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendance {
    pub student_id: String,
    pub name: String,
    pub counts: StatusCounts,
    pub total: usize,
    pub rate: Option<f64>,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

pub fn summarize_student(
    ledger: &AttendanceLedger,
    student: &Student,
    policy: &RatePolicy,
) -> StudentAttendance {
    let mut counts = StatusCounts::default();
    let mut first_date: Option<NaiveDate> = None;
    let mut last_date: Option<NaiveDate> = None;
    for (date, status) in ledger.for_student(&student.id) {
        counts.add(status);
        if first_date.is_none() {
            first_date = Some(date);
        }
        last_date = Some(date);
    }
    StudentAttendance {
        student_id: student.id.clone(),
        name: student.name.clone(),
        total: counts.total(),
        rate: attendance_rate(&counts, policy),
        counts,
        first_date,
        last_date,
    }
}

/// One summary per student, in the order given. Ledger entries for ids not in
/// `students` are ignored.
pub fn summarize_students(
    ledger: &AttendanceLedger,
    students: &[Student],
    policy: &RatePolicy,
) -> Vec<StudentAttendance> {
    students
        .iter()
        .map(|s| summarize_student(ledger, s, policy))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodAttendance {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub counts: StatusCounts,
    pub total: usize,
    pub rate: Option<f64>,
    pub student_count: usize,
}

fn group_periods<'a, I>(entries: I, granularity: Granularity, policy: &RatePolicy) -> Vec<PeriodAttendance>
where
    I: Iterator<Item = (&'a str, NaiveDate, AttendanceStatus)>,
{
    let mut buckets: BTreeMap<NaiveDate, (NaiveDate, StatusCounts, BTreeSet<&'a str>)> =
        BTreeMap::new();
    for (student_id, date, status) in entries {
        let (start, end) = period_bounds(date, granularity);
        let bucket = buckets
            .entry(start)
            .or_insert_with(|| (end, StatusCounts::default(), BTreeSet::new()));
        bucket.1.add(status);
        bucket.2.insert(student_id);
    }
    buckets
        .into_iter()
        .map(|(start, (end, counts, students))| PeriodAttendance {
            start,
            end,
            total: counts.total(),
            rate: attendance_rate(&counts, policy),
            counts,
            student_count: students.len(),
        })
        .collect()
}

/// Groups every ledger entry by period, ascending by period start. Periods
/// without records are not emitted.
pub fn summarize_periods(
    ledger: &AttendanceLedger,
    granularity: Granularity,
    policy: &RatePolicy,
) -> Vec<PeriodAttendance> {
    group_periods(ledger.iter(), granularity, policy)
}

pub fn student_periods(
    ledger: &AttendanceLedger,
    student_id: &str,
    granularity: Granularity,
    policy: &RatePolicy,
) -> Vec<PeriodAttendance> {
    group_periods(
        ledger
            .for_student(student_id)
            .map(|(date, status)| (student_id, date, status)),
        granularity,
        policy,
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtRiskStudent {
    pub student_id: String,
    pub name: String,
    pub rate: f64,
    pub total: usize,
    pub absent: usize,
}

/// At least one record and a rate strictly below `threshold`.
pub fn is_at_risk(summary: &StudentAttendance, threshold: f64) -> bool {
    summary.total > 0 && summary.rate.is_some_and(|rate| rate < threshold)
}

/// Students that are [`is_at_risk`], lowest rate first. Equal rates keep
/// input order.
pub fn at_risk_students(summaries: &[StudentAttendance], threshold: f64) -> Vec<AtRiskStudent> {
    let mut out: Vec<AtRiskStudent> = summaries
        .iter()
        .filter(|s| is_at_risk(s, threshold))
        .filter_map(|s| {
            Some(AtRiskStudent {
                student_id: s.student_id.clone(),
                name: s.name.clone(),
                rate: s.rate?,
                total: s.total,
                absent: s.counts.absent,
            })
        })
        .collect();
    out.sort_by(|a, b| a.rate.partial_cmp(&b.rate).unwrap_or(Ordering::Equal));
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassOverview {
    pub student_count: usize,
    pub students_with_data: usize,
    pub counts: StatusCounts,
    pub total: usize,
    pub rate: Option<f64>,
    pub mean_student_rate: Option<f64>,
    pub at_risk_count: usize,
    pub at_risk_threshold: f64,
}

/// Totals over the given students only. `mean_student_rate` averages the
/// rates of students that have records.
pub fn class_overview(
    ledger: &AttendanceLedger,
    students: &[Student],
    policy: &RatePolicy,
    threshold: f64,
) -> ClassOverview {
    let summaries = summarize_students(ledger, students, policy);
    let mut counts = StatusCounts::default();
    let mut rate_sum = 0.0;
    let mut with_data = 0usize;
    for s in &summaries {
        counts.merge(&s.counts);
        if s.total > 0 {
            with_data += 1;
            rate_sum += s.rate.unwrap_or(0.0);
        }
    }
    let mean_student_rate = if with_data > 0 {
        Some(rate_sum / with_data as f64)
    } else {
        None
    };
    let rate = if counts.total() > 0 {
        attendance_rate(&counts, policy)
    } else {
        None
    };
    ClassOverview {
        student_count: students.len(),
        students_with_data: with_data,
        total: counts.total(),
        counts,
        rate,
        mean_student_rate,
        at_risk_count: at_risk_students(&summaries, threshold).len(),
        at_risk_threshold: threshold,
    }
}
