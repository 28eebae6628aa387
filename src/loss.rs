//! Scholarship-loss scenario analysis.
//!
//! Given the current scholarship holders and a proposed minimum average,
//! estimates who would lose their scholarship, how likely each of them is
//! to recover, and what the change does to the cohort as a whole.
//!
//! Degenerate divisions resolve to 0: an empty cohort, a cohort where nobody
//! falls short (`max_gap <= 0`) and an empty deprived set never produce NaN.

use serde::Serialize;
use uuid::Uuid;

use crate::error::{self, AnalyticsError};
use crate::histogram::{self, Histogram};
use crate::models::StudentRecord;
use crate::social;

const HIGH_IMPROVEMENT_THRESHOLD: f64 = 0.7;
const STABILITY_EPSILON: f64 = 0.05;
const RISK_WINDOW: f64 = 2.0;

#[derive(Debug, Clone, Serialize)]
pub struct LossScenario {
    pub min_avg: f64,
    pub buckets: usize,
}

impl LossScenario {
    pub fn validate(&self) -> Result<f64, AnalyticsError> {
        if self.buckets == 0 {
            return Err(AnalyticsError::InvalidParameter {
                name: "buckets",
                reason: "bucket count must be at least 1".to_string(),
            });
        }
        error::require_grade("min_avg", self.min_avg)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentLossMetrics {
    pub id: Uuid,
    pub name: String,
    pub faculty: String,
    pub group: i32,
    pub avg_grade: f64,
    pub has_scholarship: bool,
    pub scholarship_amount: f64,
    pub grade_gap: f64,
    pub risk_probability: f64,
    pub social_risk: f64,
    pub normalized_gap: f64,
    pub improvement_probability: f64,
}

impl StudentLossMetrics {
    /// Only a current holder can be deprived of a scholarship.
    pub fn is_deprived(&self) -> bool {
        self.has_scholarship && self.grade_gap > 0.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LossAnalysis {
    pub scenario: LossScenario,
    pub students: Vec<StudentLossMetrics>,
    pub total_holders: usize,
    pub deprived_count: usize,
    pub deprived_percentage: f64,
    pub payments_reduction: f64,
    pub high_improvement_share: f64,
    pub stability_index: f64,
    pub avg_loss_index: f64,
    pub improvement_histogram: Histogram,
    pub risk_histogram: Histogram,
}

pub fn analyze(
    students: &[StudentRecord],
    scenario: &LossScenario,
) -> Result<LossAnalysis, AnalyticsError> {
    let min_avg = scenario.validate()?;

    let max_gap = students
        .iter()
        .map(|student| min_avg - student.grade())
        .fold(f64::NEG_INFINITY, f64::max);

    let mut metrics: Vec<StudentLossMetrics> = students
        .iter()
        .map(|student| student_metrics(student, min_avg, max_gap))
        .collect();
    metrics.sort_by(|a, b| b.avg_grade.total_cmp(&a.avg_grade));

    let (deprived, kept): (Vec<&StudentLossMetrics>, Vec<&StudentLossMetrics>) = metrics
        .iter()
        .filter(|m| m.has_scholarship)
        .partition(|m| m.is_deprived());
    let total_holders = deprived.len() + kept.len();

    let deprived_percentage = if total_holders == 0 {
        0.0
    } else {
        (1.0 - kept.len() as f64 / total_holders as f64) * 100.0
    };

    let total_payments: f64 = metrics.iter().map(|m| m.scholarship_amount).sum();
    let kept_payments: f64 = kept.iter().map(|m| m.scholarship_amount).sum();

    let high_improvement_share = if deprived.is_empty() {
        0.0
    } else {
        let recoverable = deprived
            .iter()
            .filter(|m| m.improvement_probability > HIGH_IMPROVEMENT_THRESHOLD)
            .count();
        recoverable as f64 / deprived.len() as f64
    };

    let stability_index =
        (1.0 - deprived_percentage / 100.0) * (high_improvement_share + STABILITY_EPSILON).sqrt();

    let avg_loss_index = if deprived.is_empty() || min_avg <= 0.0 {
        0.0
    } else {
        deprived.iter().map(|m| m.grade_gap / min_avg).sum::<f64>() / deprived.len() as f64
    };

    let improvement: Vec<f64> = metrics.iter().map(|m| m.improvement_probability).collect();
    let risk: Vec<f64> = metrics.iter().map(|m| m.risk_probability).collect();
    let improvement_histogram = histogram::bucketize(&improvement, scenario.buckets)?;
    let risk_histogram = histogram::bucketize(&risk, scenario.buckets)?;

    let deprived_count = deprived.len();
    tracing::debug!(
        min_avg,
        total_holders,
        deprived_count,
        "scholarship loss scenario analyzed"
    );

    Ok(LossAnalysis {
        scenario: scenario.clone(),
        total_holders,
        deprived_count,
        deprived_percentage,
        payments_reduction: total_payments - kept_payments,
        high_improvement_share,
        stability_index,
        avg_loss_index,
        improvement_histogram,
        risk_histogram,
        students: metrics,
    })
}

fn student_metrics(student: &StudentRecord, min_avg: f64, max_gap: f64) -> StudentLossMetrics {
    let avg_grade = student.grade();
    let shortfall = min_avg - avg_grade;
    let grade_gap = shortfall.max(0.0);
    let social_risk = social::risk_weight(student.social_status);

    let normalized_gap = if max_gap > 0.0 {
        (1.0 - grade_gap / max_gap).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let improvement_probability = if grade_gap > 0.0 {
        normalized_gap * (1.0 - social_risk)
    } else {
        0.0
    };

    StudentLossMetrics {
        id: student.id,
        name: student.full_name(),
        faculty: student.faculty.clone(),
        group: student.group,
        avg_grade,
        has_scholarship: student.has_scholarship,
        scholarship_amount: student.current_amount(),
        grade_gap,
        risk_probability: (shortfall / RISK_WINDOW).clamp(0.0, 1.0),
        social_risk,
        normalized_gap,
        improvement_probability,
    }
}
