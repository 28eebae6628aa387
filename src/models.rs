use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

use crate::social::SocialFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    Active,
    Graduated,
    Expelled,
}

impl StudentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudentStatus::Active => "active",
            StudentStatus::Graduated => "graduated",
            StudentStatus::Expelled => "expelled",
        }
    }
}

impl fmt::Display for StudentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StudentStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(StudentStatus::Active),
            "graduated" => Ok(StudentStatus::Graduated),
            "expelled" => Ok(StudentStatus::Expelled),
            other => anyhow::bail!("unknown student status `{other}`"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hometown {
    pub city: String,
    pub region: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentRecord {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub faculty: String,
    pub group: i32,
    pub admission_year: i32,
    pub status: StudentStatus,
    pub avg_grade: Option<f64>,
    pub has_scholarship: bool,
    pub scholarship_amount: f64,
    pub social_status: SocialFlags,
    pub hometown: Hometown,
}

impl StudentRecord {
    /// Average grade with the missing-grade-is-zero convention applied.
    pub fn grade(&self) -> f64 {
        self.avg_grade.unwrap_or(0.0)
    }

    /// Amount currently paid out; zero when the scholarship flag is off.
    pub fn current_amount(&self) -> f64 {
        if self.has_scholarship {
            self.scholarship_amount
        } else {
            0.0
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.last_name, self.first_name)
    }

    pub fn has_social_flags(&self) -> bool {
        !self.social_status.is_empty()
    }
}

/// Conjunction of optional criteria understood by the record store.
#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub faculty: Option<String>,
    pub group: Option<i32>,
    pub status: Option<StudentStatus>,
    pub min_grade_exclusive: Option<f64>,
    pub has_scholarship: Option<bool>,
    pub admission_years: Option<(i32, i32)>,
    pub any_social_flags: Option<SocialFlags>,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Active".parse::<StudentStatus>().unwrap(), StudentStatus::Active);
        assert_eq!(" expelled ".parse::<StudentStatus>().unwrap(), StudentStatus::Expelled);
        assert!("dropped".parse::<StudentStatus>().is_err());
    }

    #[test]
    fn missing_grade_reads_as_zero() {
        let mut student = fixtures::sample_student("Anna", 7.0, SocialFlags::empty());
        student.avg_grade = None;
        assert_eq!(student.grade(), 0.0);
        assert_eq!(student.full_name(), "Ivanova Anna");
    }
}
