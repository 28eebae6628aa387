use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::error::AnalyticsError;
use crate::models::{StudentRecord, StudentStatus};
use crate::social::{self, SocialFlags};

const UNKNOWN_REGION: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReportPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, AnalyticsError> {
        if start > end {
            return Err(AnalyticsError::InvalidPeriod { start, end });
        }
        Ok(Self { start, end })
    }

    /// January 1st to December 31st of the year `today` falls in.
    pub fn calendar_year(today: NaiveDate) -> Self {
        let year = today.year();
        Self {
            start: NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(today),
            end: NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(today),
        }
    }

    pub fn contains_year(&self, year: i32) -> bool {
        (self.start.year()..=self.end.year()).contains(&year)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FacultyStats {
    pub faculty: String,
    pub total: usize,
    pub active: usize,
    pub graduated: usize,
    pub expelled: usize,
    pub with_scholarship: usize,
    pub avg_grade: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusTotals {
    pub active: usize,
    pub graduated: usize,
    pub expelled: usize,
}

impl StatusTotals {
    fn record(&mut self, status: StudentStatus) {
        match status {
            StudentStatus::Active => self.active += 1,
            StudentStatus::Graduated => self.graduated += 1,
            StudentStatus::Expelled => self.expelled += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScholarshipTotals {
    pub with_scholarship: usize,
    pub without_scholarship: usize,
    pub social_scholarship: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SocialTotals {
    pub lost_breadwinner: usize,
    pub state_support: usize,
    pub orphan: usize,
    pub disabled: usize,
    pub none: usize,
}

impl SocialTotals {
    fn record(&mut self, flags: SocialFlags) {
        if flags.is_empty() {
            self.none += 1;
        }
        if flags.contains(SocialFlags::LOST_BREADWINNER) {
            self.lost_breadwinner += 1;
        }
        if flags.contains(SocialFlags::STATE_SUPPORT) {
            self.state_support += 1;
        }
        if flags.contains(SocialFlags::ORPHAN) {
            self.orphan += 1;
        }
        if flags.contains(SocialFlags::DISABLED) {
            self.disabled += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupCount {
    pub group: i32,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionCount {
    pub region: String,
    pub count: usize,
}

/// One exported student line, column order matches the CSV header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentRow {
    pub name: String,
    pub faculty: String,
    pub group: i32,
    pub admission_year: i32,
    pub status: StudentStatus,
    pub avg_grade: Option<f64>,
    pub scholarship: &'static str,
    pub social_status: String,
    pub region: String,
    pub city: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total_students: usize,
    pub avg_grade_all: f64,
    pub status: StatusTotals,
    pub scholarship: ScholarshipTotals,
    pub social: SocialTotals,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContingentReport {
    pub period: ReportPeriod,
    pub summary: ReportSummary,
    pub faculty_stats: Vec<FacultyStats>,
    pub group_stats: Vec<GroupCount>,
    pub region_stats: Vec<RegionCount>,
    pub students: Vec<StudentRow>,
}

#[derive(Default)]
struct GradeTally {
    sum: f64,
    count: usize,
}

impl GradeTally {
    fn add(&mut self, grade: Option<f64>) {
        if let Some(grade) = grade {
            self.sum += grade;
            self.count += 1;
        }
    }

    fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            round2(self.sum / self.count as f64)
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn build_contingent_report(
    students: &[StudentRecord],
    period: ReportPeriod,
) -> ContingentReport {
    let cohort: Vec<&StudentRecord> = students
        .iter()
        .filter(|student| period.contains_year(student.admission_year))
        .collect();

    let mut faculties: BTreeMap<&str, (FacultyStats, GradeTally)> = BTreeMap::new();
    let mut groups: BTreeMap<i32, usize> = BTreeMap::new();
    let mut regions: HashMap<&str, usize> = HashMap::new();
    let mut status = StatusTotals::default();
    let mut scholarship = ScholarshipTotals::default();
    let mut social = SocialTotals::default();
    let mut overall = GradeTally::default();

    for student in cohort.iter() {
        let (stats, grades) = faculties
            .entry(student.faculty.as_str())
            .or_insert_with(|| {
                (
                    FacultyStats {
                        faculty: student.faculty.clone(),
                        ..FacultyStats::default()
                    },
                    GradeTally::default(),
                )
            });
        stats.total += 1;
        match student.status {
            StudentStatus::Active => stats.active += 1,
            StudentStatus::Graduated => stats.graduated += 1,
            StudentStatus::Expelled => stats.expelled += 1,
        }
        if student.has_scholarship {
            stats.with_scholarship += 1;
        }
        grades.add(student.avg_grade);

        status.record(student.status);
        if student.has_scholarship {
            scholarship.with_scholarship += 1;
        } else {
            scholarship.without_scholarship += 1;
        }
        if student.has_social_flags() {
            scholarship.social_scholarship += 1;
        }
        social.record(student.social_status);
        overall.add(student.avg_grade);

        *groups.entry(student.group).or_insert(0) += 1;
        *regions.entry(region_label(student)).or_insert(0) += 1;
    }

    let faculty_stats = faculties
        .into_values()
        .map(|(mut stats, grades)| {
            stats.avg_grade = grades.average();
            stats
        })
        .collect();

    let group_stats = groups
        .into_iter()
        .map(|(group, count)| GroupCount { group, count })
        .collect();

    let mut region_stats: Vec<RegionCount> = regions
        .into_iter()
        .map(|(region, count)| RegionCount {
            region: region.to_string(),
            count,
        })
        .collect();
    region_stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.region.cmp(&b.region)));

    let rows = cohort.iter().map(|student| student_row(student)).collect();

    tracing::debug!(total = cohort.len(), "contingent report aggregated");

    ContingentReport {
        period,
        summary: ReportSummary {
            total_students: cohort.len(),
            avg_grade_all: overall.average(),
            status,
            scholarship,
            social,
        },
        faculty_stats,
        group_stats,
        region_stats,
        students: rows,
    }
}

fn region_label(student: &StudentRecord) -> &str {
    student
        .hometown
        .region
        .as_deref()
        .filter(|region| !region.trim().is_empty())
        .unwrap_or(UNKNOWN_REGION)
}

fn student_row(student: &StudentRecord) -> StudentRow {
    StudentRow {
        name: student.full_name(),
        faculty: student.faculty.clone(),
        group: student.group,
        admission_year: student.admission_year,
        status: student.status,
        avg_grade: student.avg_grade,
        scholarship: if student.has_scholarship { "yes" } else { "no" },
        social_status: social::decode(student.social_status),
        region: region_label(student).to_string(),
        city: student.hometown.city.clone(),
    }
}

pub fn build_report_markdown(report: &ContingentReport) -> String {
    let mut output = String::new();
    let summary = &report.summary;

    let _ = writeln!(output, "# Contingent Report");
    let _ = writeln!(
        output,
        "Admissions from {} to {}",
        report.period.start, report.period.end
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Total students: {}", summary.total_students);
    let _ = writeln!(output, "- Average grade: {:.2}", summary.avg_grade_all);
    let _ = writeln!(
        output,
        "- Status: {} active, {} graduated, {} expelled",
        summary.status.active, summary.status.graduated, summary.status.expelled
    );
    let _ = writeln!(
        output,
        "- Scholarships: {} with, {} without, {} social",
        summary.scholarship.with_scholarship,
        summary.scholarship.without_scholarship,
        summary.scholarship.social_scholarship
    );
    let _ = writeln!(
        output,
        "- Social status: {} lost breadwinner, {} state support, {} orphan, {} disabled, {} none",
        summary.social.lost_breadwinner,
        summary.social.state_support,
        summary.social.orphan,
        summary.social.disabled,
        summary.social.none
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Faculties");
    if report.faculty_stats.is_empty() {
        let _ = writeln!(output, "No students admitted in this period.");
    } else {
        let _ = writeln!(
            output,
            "| Faculty | Total | Active | Graduated | Expelled | With scholarship | Avg grade |"
        );
        let _ = writeln!(output, "|---|---|---|---|---|---|---|");
        for stats in report.faculty_stats.iter() {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} | {:.2} |",
                stats.faculty,
                stats.total,
                stats.active,
                stats.graduated,
                stats.expelled,
                stats.with_scholarship,
                stats.avg_grade
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Groups");
    for group in report.group_stats.iter() {
        let _ = writeln!(output, "- {}: {} students", group.group, group.count);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Regions");
    for region in report.region_stats.iter() {
        let _ = writeln!(output, "- {}: {} students", region.region, region.count);
    }

    output
}

pub fn write_students_csv<W: std::io::Write>(
    report: &ContingentReport,
    writer: W,
) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in report.students.iter() {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample_student;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn cohort() -> Vec<StudentRecord> {
        let mut physics = sample_student("Petr", 6.0, SocialFlags::ORPHAN | SocialFlags::DISABLED);
        physics.faculty = "Physics".to_string();
        physics.group = 201;
        physics.status = StudentStatus::Expelled;
        physics.has_scholarship = false;
        physics.hometown.region = None;

        let mut ungraded = sample_student("Olga", 0.0, SocialFlags::empty());
        ungraded.avg_grade = None;
        ungraded.group = 102;
        ungraded.status = StudentStatus::Graduated;

        let mut old = sample_student("Ivan", 9.0, SocialFlags::empty());
        old.admission_year = 2019;

        vec![
            sample_student("Anna", 8.0, SocialFlags::empty()),
            sample_student("Boris", 7.0, SocialFlags::STATE_SUPPORT),
            physics,
            ungraded,
            old,
        ]
    }

    #[test]
    fn rejects_reversed_period() {
        assert!(ReportPeriod::new(date(2025, 1, 1), date(2024, 1, 1)).is_err());
    }

    #[test]
    fn calendar_year_spans_whole_year() {
        let period = ReportPeriod::calendar_year(date(2026, 10, 18));
        assert_eq!(period.start, date(2026, 1, 1));
        assert_eq!(period.end, date(2026, 12, 31));
    }

    #[test]
    fn aggregates_students_admitted_in_period() {
        let period = ReportPeriod::new(date(2023, 1, 1), date(2024, 12, 31)).unwrap();
        let report = build_contingent_report(&cohort(), period);
        let summary = &report.summary;

        assert_eq!(summary.total_students, 4);
        assert_eq!(summary.avg_grade_all, 7.0);
        assert_eq!(
            summary.status,
            StatusTotals {
                active: 2,
                graduated: 1,
                expelled: 1
            }
        );
        assert_eq!(summary.scholarship.with_scholarship, 3);
        assert_eq!(summary.scholarship.without_scholarship, 1);
        assert_eq!(summary.scholarship.social_scholarship, 2);
        assert_eq!(summary.social.orphan, 1);
        assert_eq!(summary.social.disabled, 1);
        assert_eq!(summary.social.state_support, 1);
        assert_eq!(summary.social.none, 2);
    }

    #[test]
    fn faculty_groups_and_regions_are_ordered() {
        let period = ReportPeriod::new(date(2024, 1, 1), date(2024, 12, 31)).unwrap();
        let report = build_contingent_report(&cohort(), period);

        let faculties: Vec<&str> = report
            .faculty_stats
            .iter()
            .map(|f| f.faculty.as_str())
            .collect();
        assert_eq!(faculties, vec!["Mathematics", "Physics"]);
        assert_eq!(report.faculty_stats[0].avg_grade, 7.5);
        assert_eq!(report.faculty_stats[0].with_scholarship, 3);
        assert_eq!(report.faculty_stats[1].expelled, 1);

        let groups: Vec<i32> = report.group_stats.iter().map(|g| g.group).collect();
        assert_eq!(groups, vec![101, 102, 201]);

        assert_eq!(
            report.region_stats,
            vec![
                RegionCount {
                    region: "Tatarstan".to_string(),
                    count: 3
                },
                RegionCount {
                    region: "Unknown".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn empty_period_has_zero_average() {
        let period = ReportPeriod::new(date(2030, 1, 1), date(2030, 12, 31)).unwrap();
        let report = build_contingent_report(&cohort(), period);
        assert_eq!(report.summary.total_students, 0);
        assert_eq!(report.summary.avg_grade_all, 0.0);
        assert!(build_report_markdown(&report).contains("No students admitted in this period."));
    }

    #[test]
    fn csv_export_has_header_and_decoded_status() {
        let period = ReportPeriod::new(date(2024, 1, 1), date(2024, 12, 31)).unwrap();
        let report = build_contingent_report(&cohort(), period);
        let mut buffer = Vec::new();
        write_students_csv(&report, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some(concat!(
                "name,faculty,group,admission_year,status,",
                "avg_grade,scholarship,social_status,region,city"
            ))
        );
        assert!(text.contains(concat!(
            "Ivanova Petr,Physics,201,2024,expelled,6.0,no,",
            "\"Orphan, Disabled\",Unknown,Kazan"
        )));
        assert!(text.contains(
            "Ivanova Olga,Mathematics,102,2024,graduated,,yes,None,Tatarstan,Kazan"
        ));
    }

    #[test]
    fn markdown_lists_sections() {
        let period = ReportPeriod::new(date(2024, 1, 1), date(2024, 12, 31)).unwrap();
        let report = build_contingent_report(&cohort(), period);
        let markdown = build_report_markdown(&report);
        assert!(markdown.contains("- Total students: 4"));
        assert!(markdown.contains("| Physics | 1 | 0 | 0 | 1 | 0 | 6.00 |"));
        assert!(markdown.contains("- Tatarstan: 3 students"));
    }
}
