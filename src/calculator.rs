//! Scholarship assignment simulation.
//!
//! The simulation is side-effect free. Persisting its outcome is a separate
//! step (`db::apply_scholarship_changes`) that only touches the students the
//! simulation marked as changing.

use serde::Serialize;
use uuid::Uuid;

use crate::error::{self, AnalyticsError};
use crate::models::{StudentRecord, StudentStatus};

const EXCELLENT_GRADE: f64 = 9.0;
const GOOD_GRADE: f64 = 7.0;
const SOCIAL_MULTIPLIER: f64 = 1.3;

#[derive(Debug, Clone, Serialize)]
pub struct CalculationParams {
    pub min_grade: f64,
    pub base_amount: f64,
    pub excellent_coefficient: f64,
    pub good_coefficient: f64,
    pub faculty: Option<String>,
    pub group: Option<i32>,
}

impl CalculationParams {
    pub fn validate(&self) -> Result<(), AnalyticsError> {
        error::require_grade("min_grade", self.min_grade)?;
        error::require_non_negative("base_amount", self.base_amount)?;
        error::require_non_negative("excellent_coefficient", self.excellent_coefficient)?;
        error::require_non_negative("good_coefficient", self.good_coefficient)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScholarshipTier {
    Excellent,
    Good,
    Base,
    Social,
    None,
}

impl ScholarshipTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScholarshipTier::Excellent => "excellent",
            ScholarshipTier::Good => "good",
            ScholarshipTier::Base => "base",
            ScholarshipTier::Social => "social",
            ScholarshipTier::None => "none",
        }
    }
}

struct TierRule {
    matches: fn(f64, &CalculationParams) -> bool,
    tier: ScholarshipTier,
    amount: fn(&CalculationParams) -> f64,
}

/// Evaluated top-down, first match wins. The last rule always matches.
const TIER_RULES: [TierRule; 4] = [
    TierRule {
        matches: |grade, params| grade < params.min_grade,
        tier: ScholarshipTier::None,
        amount: |_| 0.0,
    },
    TierRule {
        matches: |grade, _| grade >= EXCELLENT_GRADE,
        tier: ScholarshipTier::Excellent,
        amount: |params| (params.base_amount * params.excellent_coefficient).round(),
    },
    TierRule {
        matches: |grade, _| grade >= GOOD_GRADE,
        tier: ScholarshipTier::Good,
        amount: |params| (params.base_amount * params.good_coefficient).round(),
    },
    TierRule {
        matches: |_, _| true,
        tier: ScholarshipTier::Base,
        amount: |params| params.base_amount,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierOutcome {
    pub tier: ScholarshipTier,
    pub amount: f64,
}

impl TierOutcome {
    pub fn has_scholarship(&self) -> bool {
        self.tier != ScholarshipTier::None
    }
}

/// Tier by grade, then the social override on top of any paying tier.
pub fn tier(grade: f64, has_social_flags: bool, params: &CalculationParams) -> TierOutcome {
    let mut outcome = TIER_RULES
        .iter()
        .find(|rule| (rule.matches)(grade, params))
        .map(|rule| TierOutcome {
            tier: rule.tier,
            amount: (rule.amount)(params),
        })
        .unwrap_or(TierOutcome {
            tier: ScholarshipTier::None,
            amount: 0.0,
        });

    if has_social_flags && outcome.has_scholarship() {
        outcome = TierOutcome {
            tier: ScholarshipTier::Social,
            amount: (outcome.amount * SOCIAL_MULTIPLIER).round(),
        };
    }

    outcome
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentCalculation {
    pub id: Uuid,
    pub name: String,
    pub faculty: String,
    pub group: i32,
    pub avg_grade: f64,
    pub current_has_scholarship: bool,
    pub current_scholarship: f64,
    pub calculated_has_scholarship: bool,
    pub calculated_scholarship: f64,
    pub scholarship_type: ScholarshipTier,
    pub will_change: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalculationSummary {
    pub total: usize,
    pub will_get_scholarship: usize,
    pub will_lose_scholarship: usize,
    pub will_change: usize,
    pub total_amount: f64,
    pub current_amount: f64,
    pub difference: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScholarshipCalculation {
    pub parameters: CalculationParams,
    pub results: Vec<StudentCalculation>,
    pub summary: CalculationSummary,
}

impl ScholarshipCalculation {
    pub fn changes(&self) -> impl Iterator<Item = &StudentCalculation> {
        self.results.iter().filter(|result| result.will_change)
    }
}

/// Simulates the assignment over active students only.
pub fn simulate(
    students: &[StudentRecord],
    params: &CalculationParams,
) -> Result<ScholarshipCalculation, AnalyticsError> {
    params.validate()?;

    let mut summary = CalculationSummary::default();
    let mut results = Vec::new();

    for student in students
        .iter()
        .filter(|student| student.status == StudentStatus::Active)
    {
        let outcome = tier(student.grade(), student.has_social_flags(), params);
        let calculated_has = outcome.has_scholarship();
        let will_change = calculated_has != student.has_scholarship
            || outcome.amount != student.scholarship_amount;

        summary.total += 1;
        if calculated_has {
            summary.will_get_scholarship += 1;
        }
        if student.has_scholarship && !calculated_has {
            summary.will_lose_scholarship += 1;
        }
        if will_change {
            summary.will_change += 1;
        }
        summary.total_amount += outcome.amount;
        summary.current_amount += student.current_amount();

        results.push(StudentCalculation {
            id: student.id,
            name: student.full_name(),
            faculty: student.faculty.clone(),
            group: student.group,
            avg_grade: student.grade(),
            current_has_scholarship: student.has_scholarship,
            current_scholarship: student.scholarship_amount,
            calculated_has_scholarship: calculated_has,
            calculated_scholarship: outcome.amount,
            scholarship_type: outcome.tier,
            will_change,
        });
    }
    summary.difference = summary.total_amount - summary.current_amount;

    tracing::debug!(
        total = summary.total,
        will_change = summary.will_change,
        "scholarship calculation simulated"
    );

    Ok(ScholarshipCalculation {
        parameters: params.clone(),
        results,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample_student;
    use crate::social::SocialFlags;

    fn params() -> CalculationParams {
        CalculationParams {
            min_grade: 5.0,
            base_amount: 2000.0,
            excellent_coefficient: 1.5,
            good_coefficient: 1.2,
            faculty: None,
            group: None,
        }
    }

    #[test]
    fn excellent_tier_and_social_override() {
        let plain = tier(9.5, false, &params());
        assert_eq!(plain.tier, ScholarshipTier::Excellent);
        assert_eq!(plain.amount, 3000.0);

        let social = tier(9.5, true, &params());
        assert_eq!(social.tier, ScholarshipTier::Social);
        assert_eq!(social.amount, 3900.0);
    }

    #[test]
    fn below_min_grade_wins_over_social_flags() {
        for social in [false, true] {
            let outcome = tier(4.0, social, &params());
            assert_eq!(outcome.tier, ScholarshipTier::None);
            assert_eq!(outcome.amount, 0.0);
        }
    }

    #[test]
    fn good_and_base_tiers() {
        let good = tier(7.0, false, &params());
        assert_eq!(good.tier, ScholarshipTier::Good);
        assert_eq!(good.amount, 2400.0);

        let base = tier(5.0, false, &params());
        assert_eq!(base.tier, ScholarshipTier::Base);
        assert_eq!(base.amount, 2000.0);

        let social_base = tier(6.0, true, &params());
        assert_eq!(social_base.tier, ScholarshipTier::Social);
        assert_eq!(social_base.amount, 2600.0);
    }

    #[test]
    fn high_min_grade_applies_before_excellent() {
        let strict = CalculationParams {
            min_grade: 9.8,
            ..params()
        };
        assert_eq!(tier(9.5, false, &strict).tier, ScholarshipTier::None);
    }

    #[test]
    fn summary_counts_changes() {
        let mut losing = sample_student("Losing", 4.0, SocialFlags::empty());
        losing.scholarship_amount = 2000.0;
        let mut unchanged = sample_student("Same", 6.0, SocialFlags::empty());
        unchanged.scholarship_amount = 2000.0;
        let mut gaining = sample_student("Gaining", 9.2, SocialFlags::ORPHAN);
        gaining.has_scholarship = false;
        gaining.scholarship_amount = 0.0;
        let mut graduated = sample_student("Graduated", 9.9, SocialFlags::empty());
        graduated.status = StudentStatus::Graduated;

        let calculation = simulate(&[losing, unchanged, gaining, graduated], &params()).unwrap();
        let summary = &calculation.summary;

        assert_eq!(summary.total, 3);
        assert_eq!(summary.will_get_scholarship, 2);
        assert_eq!(summary.will_lose_scholarship, 1);
        assert_eq!(summary.will_change, 2);
        assert_eq!(summary.total_amount, 2000.0 + 3900.0);
        assert_eq!(summary.current_amount, 4000.0);
        assert_eq!(summary.difference, 1900.0);

        let changed: Vec<&str> = calculation.changes().map(|c| c.name.as_str()).collect();
        assert_eq!(changed, vec!["Ivanova Losing", "Ivanova Gaining"]);
    }

    #[test]
    fn simulation_is_repeatable() {
        let students = vec![
            sample_student("A", 9.1, SocialFlags::empty()),
            sample_student("B", 4.5, SocialFlags::DISABLED),
            sample_student("C", 7.7, SocialFlags::empty()),
        ];
        let first = simulate(&students, &params()).unwrap();
        let second = simulate(&students, &params()).unwrap();

        let flags = |calc: &ScholarshipCalculation| -> Vec<bool> {
            calc.results.iter().map(|r| r.will_change).collect()
        };
        assert_eq!(flags(&first), flags(&second));
        assert_eq!(first.summary, second.summary);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let bad = CalculationParams {
            base_amount: -10.0,
            ..params()
        };
        assert!(simulate(&[], &bad).is_err());
    }
}
