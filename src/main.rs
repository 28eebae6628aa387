use std::path::PathBuf;

use anyhow::Context;
use chrono::{Datelike, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod calculator;
mod db;
mod error;
mod histogram;
mod loss;
mod map;
mod models;
mod report;
mod risk;
mod social;

use models::{StudentFilter, StudentStatus};
use social::SocialFlags;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Parser)]
#[command(name = "scholarship-analytics")]
#[command(about = "Student risk and scholarship analytics for university administration")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed students
    Seed,
    /// Import students from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Rank students by dropout risk
    Risk {
        #[arg(long)]
        faculty: Option<String>,
        #[arg(long)]
        group: Option<i32>,
        #[arg(long, value_enum)]
        status: Option<StudentStatus>,
        /// Only students whose average grade is above this value
        #[arg(long)]
        grade_above: Option<f64>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Simulate raising the minimum average for scholarship holders
    Loss {
        #[arg(long)]
        min_avg: f64,
        #[arg(long)]
        faculty: Option<String>,
        #[arg(long)]
        group: Option<i32>,
        /// List students without a scholarship too; they are never counted as deprived
        #[arg(long)]
        include_non_holders: bool,
        #[arg(long, default_value_t = histogram::DEFAULT_BUCKETS)]
        buckets: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Simulate scholarship assignment for active students, optionally applying it
    Calculate {
        #[arg(long, default_value_t = 5.0)]
        min_grade: f64,
        #[arg(long, default_value_t = 2000.0)]
        base_amount: f64,
        #[arg(long, default_value_t = 1.5)]
        excellent_coefficient: f64,
        #[arg(long, default_value_t = 1.2)]
        good_coefficient: f64,
        #[arg(long)]
        faculty: Option<String>,
        #[arg(long)]
        group: Option<i32>,
        /// Persist the simulated scholarships
        #[arg(long)]
        apply: bool,
        #[arg(long)]
        json: bool,
    },
    /// Generate the contingent report for an admission period
    Report {
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
        #[arg(long, default_value = "contingent-report.md")]
        out: PathBuf,
        /// Also export the per-student rows as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Bulk social scholarship management
    Social {
        #[command(subcommand)]
        action: SocialCommand,
    },
    /// Export student hometowns as GeoJSON
    Geojson {
        #[arg(long, default_value = "students.geojson")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum SocialCommand {
    /// List students matching any of the given social flags
    List {
        #[arg(long)]
        faculty: Option<String>,
        #[arg(long)]
        group: Option<i32>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..16))]
        flags: Option<u8>,
    },
    /// Assign a social scholarship, optionally replacing the social status
    Assign {
        #[arg(long, num_args = 1.., required = true)]
        ids: Vec<Uuid>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..16))]
        flags: Option<u8>,
    },
    /// Remove the scholarship from the given students
    Remove {
        #[arg(long, num_args = 1.., required = true)]
        ids: Vec<Uuid>,
    },
}

/// Where follow-up status lines go. Stdout stays a single JSON document in
/// `--json` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusOutput {
    Stdout,
    Log,
}

impl StatusOutput {
    fn for_json(json: bool) -> Self {
        if json {
            StatusOutput::Log
        } else {
            StatusOutput::Stdout
        }
    }

    fn emit(self, message: &str) {
        match self {
            StatusOutput::Stdout => println!("{message}"),
            StatusOutput::Log => tracing::info!("{message}"),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn max_connections() -> anyhow::Result<u32> {
    match std::env::var("DATABASE_MAX_CONNECTIONS") {
        Ok(value) => value
            .parse()
            .with_context(|| format!("DATABASE_MAX_CONNECTIONS must be a number, got `{value}`")),
        Err(_) => Ok(DEFAULT_MAX_CONNECTIONS),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(max_connections()?)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(&pool).await?;
            println!("Seed data inserted ({inserted} new students).");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            tracing::info!(inserted, path = %csv.display(), "students imported");
            println!("Inserted {inserted} students from {}.", csv.display());
        }
        Commands::Risk {
            faculty,
            group,
            status,
            grade_above,
            limit,
            json,
        } => {
            if let Some(grade) = grade_above {
                error::require_grade("grade_above", grade)?;
            }
            let filter = StudentFilter {
                faculty,
                group,
                status,
                min_grade_exclusive: grade_above,
                ..StudentFilter::default()
            };
            let students = db::fetch_students(&pool, &filter).await?;
            let scores = risk::score_students(&students);

            if json {
                println!("{}", serde_json::to_string_pretty(&scores)?);
                return Ok(());
            }
            if scores.is_empty() {
                println!("No students match these filters.");
                return Ok(());
            }

            println!("Students by risk index:");
            for score in scores.iter().take(limit) {
                println!(
                    "- {} ({}, group {}) risk {}: {}",
                    score.name, score.faculty, score.group, score.risk_index, score.reason
                );
            }
        }
        Commands::Loss {
            min_avg,
            faculty,
            group,
            include_non_holders,
            buckets,
            limit,
            json,
        } => {
            let scenario = loss::LossScenario { min_avg, buckets };
            scenario.validate()?;
            let filter = StudentFilter {
                faculty,
                group,
                has_scholarship: (!include_non_holders).then_some(true),
                ..StudentFilter::default()
            };
            let students = db::fetch_students(&pool, &filter).await?;
            let analysis = loss::analyze(&students, &scenario)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
                return Ok(());
            }
            print_loss_analysis(&analysis, limit);
        }
        Commands::Calculate {
            min_grade,
            base_amount,
            excellent_coefficient,
            good_coefficient,
            faculty,
            group,
            apply,
            json,
        } => {
            let params = calculator::CalculationParams {
                min_grade,
                base_amount,
                excellent_coefficient,
                good_coefficient,
                faculty: faculty.clone(),
                group,
            };
            params.validate()?;
            let filter = StudentFilter {
                faculty,
                group,
                status: Some(StudentStatus::Active),
                ..StudentFilter::default()
            };
            let students = db::fetch_students(&pool, &filter).await?;
            let calculation = calculator::simulate(&students, &params)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&calculation)?);
            } else {
                print_calculation(&calculation);
            }

            if apply {
                let output = StatusOutput::for_json(json);
                if calculation.summary.will_change == 0 {
                    output.emit("No changes to apply.");
                } else {
                    let applied = db::apply_scholarship_changes(&pool, &calculation).await?;
                    output.emit(&format!("Applied changes for {applied} students."));
                }
            }
        }
        Commands::Report {
            start_date,
            end_date,
            out,
            csv,
        } => {
            let current = report::ReportPeriod::calendar_year(Utc::now().date_naive());
            let period = report::ReportPeriod::new(
                start_date.unwrap_or(current.start),
                end_date.unwrap_or(current.end),
            )?;
            let filter = StudentFilter {
                admission_years: Some((period.start.year(), period.end.year())),
                ..StudentFilter::default()
            };
            let students = db::fetch_students(&pool, &filter).await?;
            let contingent = report::build_contingent_report(&students, period);

            std::fs::write(&out, report::build_report_markdown(&contingent))?;
            println!("Report written to {}.", out.display());

            if let Some(path) = csv {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                report::write_students_csv(&contingent, file)?;
                println!("Student rows written to {}.", path.display());
            }
        }
        Commands::Social { action } => run_social(&pool, action).await?,
        Commands::Geojson { out } => {
            let students = db::fetch_students(&pool, &StudentFilter::default()).await?;
            let geojson = map::hometowns_geojson(&students);
            std::fs::write(&out, serde_json::to_string(&geojson)?)?;
            println!("GeoJSON for {} students written to {}.", students.len(), out.display());
        }
    }

    Ok(())
}

async fn run_social(pool: &sqlx::PgPool, action: SocialCommand) -> anyhow::Result<()> {
    match action {
        SocialCommand::List {
            faculty,
            group,
            flags,
        } => {
            let filter = StudentFilter {
                faculty,
                group,
                any_social_flags: flags.map(SocialFlags::from_bits_truncate),
                ..StudentFilter::default()
            };
            let students = db::fetch_students(pool, &filter).await?;
            let faculties = db::distinct_faculties(pool).await?;
            let groups = db::distinct_groups(pool).await?;

            println!("Faculties: {}", faculties.join(", "));
            println!(
                "Groups: {}",
                groups
                    .iter()
                    .map(|group| group.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            if students.is_empty() {
                println!("No students found.");
                return Ok(());
            }
            for student in students.iter() {
                println!(
                    "- {} {} ({}, group {}) social: {} scholarship: {}",
                    student.id,
                    student.full_name(),
                    student.faculty,
                    student.group,
                    social::decode(student.social_status),
                    if student.has_scholarship { "yes" } else { "no" }
                );
            }
        }
        SocialCommand::Assign { ids, flags } => {
            let flags = flags
                .map(SocialFlags::from_bits_truncate)
                .filter(|flags| !flags.is_empty());
            if flags.is_none() {
                tracing::warn!(
                    count = ids.len(),
                    "assigning social scholarship without a social status"
                );
            }
            let updated =
                db::set_social_scholarship(pool, &ids, db::SocialScholarshipAction::Assign(flags))
                    .await?;
            tracing::info!(updated, "social scholarship assigned");
            println!("Social scholarship assigned to {updated} students.");
        }
        SocialCommand::Remove { ids } => {
            let updated =
                db::set_social_scholarship(pool, &ids, db::SocialScholarshipAction::Remove).await?;
            tracing::info!(updated, "social scholarship removed");
            println!("Scholarship removed from {updated} students.");
        }
    }

    Ok(())
}

fn print_loss_analysis(analysis: &loss::LossAnalysis, limit: usize) {
    println!(
        "Minimum average {:.2}: {} of {} holders would lose their scholarship.",
        analysis.scenario.min_avg, analysis.deprived_count, analysis.total_holders
    );
    println!("- Deprived share: {:.1}%", analysis.deprived_percentage);
    println!("- Payments reduction: {:.2}", analysis.payments_reduction);
    println!("- High improvement share: {:.2}", analysis.high_improvement_share);
    println!("- Stability index: {:.5}", analysis.stability_index);
    println!("- Average loss index: {:.5}", analysis.avg_loss_index);

    println!();
    println!("Students by average grade:");
    for student in analysis.students.iter().take(limit) {
        println!(
            concat!(
                "- {} ({}, group {}) avg {:.1} gap {:.1} risk {:.1} ",
                "social {:.1} norm {:.2} improve {:.2}"
            ),
            student.name,
            student.faculty,
            student.group,
            student.avg_grade,
            student.grade_gap,
            student.risk_probability,
            student.social_risk,
            student.normalized_gap,
            student.improvement_probability
        );
    }

    for (title, histogram) in [
        ("Improvement probability", &analysis.improvement_histogram),
        ("Risk probability", &analysis.risk_histogram),
    ] {
        println!();
        println!("{title}:");
        for (label, count) in histogram.labels.iter().zip(histogram.counts.iter()) {
            println!("  {label} {count}");
        }
    }
}

fn print_calculation(calculation: &calculator::ScholarshipCalculation) {
    let summary = &calculation.summary;
    let params = &calculation.parameters;

    println!(
        "Parameters: min grade {}, base {}, excellent x{}, good x{}",
        params.min_grade, params.base_amount, params.excellent_coefficient, params.good_coefficient
    );
    println!(
        "Students: {} total, {} will get, {} will lose, {} will change",
        summary.total,
        summary.will_get_scholarship,
        summary.will_lose_scholarship,
        summary.will_change
    );
    println!(
        "Amounts: current {:.0}, new {:.0}, difference {:+.0}",
        summary.current_amount, summary.total_amount, summary.difference
    );

    println!();
    for result in calculation.results.iter() {
        println!(
            "{} {} ({}, group {}) avg {:.2}: {:.0} -> {:.0} [{}]",
            if result.will_change { "*" } else { " " },
            result.name,
            result.faculty,
            result.group,
            result.avg_grade,
            result.current_scholarship,
            result.calculated_scholarship,
            result.scholarship_type.as_str()
        );
    }
}
