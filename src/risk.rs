use serde::Serialize;
use uuid::Uuid;

use crate::models::StudentRecord;

const SOCIAL_RISK_BONUS: f64 = 15.0;
const NO_ISSUES: &str = "No issues";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskScore {
    pub risk_index: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentRisk {
    pub id: Uuid,
    pub name: String,
    pub faculty: String,
    pub group: i32,
    pub avg_grade: Option<f64>,
    pub risk_index: i64,
    pub reason: String,
}

struct RiskRule {
    reason: &'static str,
    applies: fn(&StudentRecord) -> bool,
    bonus: f64,
}

const RULES: [RiskRule; 2] = [
    RiskRule {
        reason: "Low academic performance",
        applies: |student| student.grade() < 5.0,
        bonus: 0.0,
    },
    RiskRule {
        reason: "Social factors",
        applies: StudentRecord::has_social_flags,
        bonus: SOCIAL_RISK_BONUS,
    },
];

/// Dropout risk: inverse of the average grade on a 0-100 scale plus a flat
/// bonus for any social factor. Not clamped, so it can exceed 100.
pub fn score(student: &StudentRecord) -> RiskScore {
    let mut risk = (10.0 - student.grade()) * 10.0;
    let mut reasons = Vec::new();

    for rule in RULES.iter() {
        if (rule.applies)(student) {
            risk += rule.bonus;
            reasons.push(rule.reason);
        }
    }

    RiskScore {
        risk_index: risk.round() as i64,
        reason: if reasons.is_empty() {
            NO_ISSUES.to_string()
        } else {
            reasons.join(", ")
        },
    }
}

/// Scores a batch, highest risk first. Ties keep their input order.
pub fn score_students(students: &[StudentRecord]) -> Vec<StudentRisk> {
    let mut values: Vec<StudentRisk> = students
        .iter()
        .map(|student| {
            let RiskScore { risk_index, reason } = score(student);
            StudentRisk {
                id: student.id,
                name: student.full_name(),
                faculty: student.faculty.clone(),
                group: student.group,
                avg_grade: student.avg_grade,
                risk_index,
                reason,
            }
        })
        .collect();

    values.sort_by(|a, b| b.risk_index.cmp(&a.risk_index));
    values
}
