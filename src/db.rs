use anyhow::Context;
use chrono::{Datelike, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::calculator::ScholarshipCalculation;
use crate::models::{Hometown, StudentFilter, StudentRecord, StudentStatus};
use crate::social::SocialFlags;

const STUDENT_COLUMNS: &str = "SELECT id, first_name, last_name, faculty, group_number, \
     admission_year, status, avg_grade, has_scholarship, scholarship_amount, social_status, \
     city, region, longitude, latitude \
     FROM university.students";

const INSERT_STUDENT: &str = r#"
    INSERT INTO university.students
    (id, first_name, last_name, faculty, group_number, admission_year, status, avg_grade,
     has_scholarship, scholarship_amount, social_status, city, region, longitude, latitude,
     source_key)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
    ON CONFLICT (source_key) DO NOTHING
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialScholarshipAction {
    Assign(Option<SocialFlags>),
    Remove,
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Student as accepted at the ingestion boundary, before defaults.
#[derive(Debug, serde::Deserialize)]
struct StudentInput {
    first_name: String,
    last_name: String,
    faculty: String,
    group: i32,
    admission_year: Option<i32>,
    status: Option<String>,
    avg_grade: Option<f64>,
    has_scholarship: Option<bool>,
    scholarship_amount: Option<f64>,
    social_status: Option<i32>,
    city: String,
    region: Option<String>,
    longitude: f64,
    latitude: f64,
    source_key: Option<String>,
}

/// Student with every default filled, ready to insert.
#[derive(Debug, Clone, PartialEq)]
struct NewStudent {
    first_name: String,
    last_name: String,
    faculty: String,
    group: i32,
    admission_year: i32,
    status: StudentStatus,
    avg_grade: Option<f64>,
    has_scholarship: bool,
    scholarship_amount: f64,
    social_status: SocialFlags,
    city: String,
    region: Option<String>,
    longitude: f64,
    latitude: f64,
    source_key: String,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl StudentInput {
    /// Missing values are filled here and nowhere else. A missing grade stays
    /// `None`; readers apply the zero default through `StudentRecord::grade`.
    fn normalize(self, current_year: i32) -> anyhow::Result<NewStudent> {
        let status = match non_blank(self.status) {
            Some(value) => value.parse::<StudentStatus>()?,
            None => StudentStatus::Graduated,
        };
        let source_key =
            non_blank(self.source_key).unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        Ok(NewStudent {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            faculty: self.faculty.trim().to_string(),
            group: self.group,
            admission_year: self.admission_year.unwrap_or(current_year),
            status,
            avg_grade: self.avg_grade,
            has_scholarship: self.has_scholarship.unwrap_or(false),
            scholarship_amount: self.scholarship_amount.unwrap_or(0.0).max(0.0),
            social_status: SocialFlags::from_stored(self.social_status.unwrap_or(0)),
            city: self.city.trim().to_string(),
            region: non_blank(self.region),
            longitude: self.longitude,
            latitude: self.latitude,
            source_key,
        })
    }
}

async fn insert_student(pool: &PgPool, input: StudentInput) -> anyhow::Result<bool> {
    let student = input.normalize(Utc::now().year())?;

    let result = sqlx::query(INSERT_STUDENT)
        .bind(Uuid::new_v4())
        .bind(&student.first_name)
        .bind(&student.last_name)
        .bind(&student.faculty)
        .bind(student.group)
        .bind(student.admission_year)
        .bind(student.status.as_str())
        .bind(student.avg_grade)
        .bind(student.has_scholarship)
        .bind(student.scholarship_amount)
        .bind(student.social_status.to_stored())
        .bind(&student.city)
        .bind(&student.region)
        .bind(student.longitude)
        .bind(student.latitude)
        .bind(&student.source_key)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

struct SeedStudent {
    key: &'static str,
    name: (&'static str, &'static str),
    faculty: &'static str,
    group: i32,
    year: i32,
    status: &'static str,
    grade: Option<f64>,
    amount: f64,
    social: i32,
    home: (&'static str, &'static str, f64, f64),
}

const SEED_STUDENTS: [SeedStudent; 7] = [
    SeedStudent {
        key: "seed-001",
        name: ("Anna", "Sokolova"),
        faculty: "Mathematics",
        group: 101,
        year: 2024,
        status: "active",
        grade: Some(9.4),
        amount: 3000.0,
        social: 0,
        home: ("Kazan", "Tatarstan", 49.12, 55.79),
    },
    SeedStudent {
        key: "seed-002",
        name: ("Ilya", "Morozov"),
        faculty: "Mathematics",
        group: 101,
        year: 2024,
        status: "active",
        grade: Some(6.1),
        amount: 2000.0,
        social: 0x04,
        home: ("Samara", "Samara Oblast", 50.10, 53.20),
    },
    SeedStudent {
        key: "seed-003",
        name: ("Daria", "Volkova"),
        faculty: "Mathematics",
        group: 102,
        year: 2023,
        status: "active",
        grade: Some(4.6),
        amount: 2000.0,
        social: 0,
        home: ("Kazan", "Tatarstan", 49.12, 55.79),
    },
    SeedStudent {
        key: "seed-004",
        name: ("Timur", "Galiev"),
        faculty: "Physics",
        group: 201,
        year: 2024,
        status: "active",
        grade: Some(7.8),
        amount: 2400.0,
        social: 0x01,
        home: ("Ufa", "Bashkortostan", 55.97, 54.73),
    },
    SeedStudent {
        key: "seed-005",
        name: ("Elena", "Orlova"),
        faculty: "Physics",
        group: 201,
        year: 2022,
        status: "graduated",
        grade: Some(8.9),
        amount: 0.0,
        social: 0,
        home: ("Perm", "Perm Krai", 56.23, 58.01),
    },
    SeedStudent {
        key: "seed-006",
        name: ("Maksim", "Zaitsev"),
        faculty: "Physics",
        group: 202,
        year: 2023,
        status: "expelled",
        grade: Some(3.2),
        amount: 0.0,
        social: 0x0a,
        home: ("Kirov", "Kirov Oblast", 49.67, 58.60),
    },
    SeedStudent {
        key: "seed-007",
        name: ("Sofia", "Karimova"),
        faculty: "Chemistry",
        group: 301,
        year: 2025,
        status: "active",
        grade: None,
        amount: 0.0,
        social: 0x02,
        home: ("Kazan", "Tatarstan", 49.12, 55.79),
    },
];

impl SeedStudent {
    fn to_input(&self) -> StudentInput {
        let (first_name, last_name) = self.name;
        let (city, region, longitude, latitude) = self.home;
        StudentInput {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            faculty: self.faculty.to_string(),
            group: self.group,
            admission_year: Some(self.year),
            status: Some(self.status.to_string()),
            avg_grade: self.grade,
            has_scholarship: Some(self.amount > 0.0),
            scholarship_amount: Some(self.amount),
            social_status: Some(self.social),
            city: city.to_string(),
            region: Some(region.to_string()),
            longitude,
            latitude,
            source_key: Some(self.key.to_string()),
        }
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let mut inserted = 0usize;
    for student in SEED_STUDENTS.iter() {
        if insert_student(pool, student.to_input()).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<StudentInput>().enumerate() {
        let row = result.with_context(|| format!("invalid student row {}", line + 1))?;
        if insert_student(pool, row).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn fetch_students(
    pool: &PgPool,
    filter: &StudentFilter,
) -> anyhow::Result<Vec<StudentRecord>> {
    let mut query = QueryBuilder::<Postgres>::new(STUDENT_COLUMNS);
    query.push(" WHERE TRUE");

    if let Some(faculty) = &filter.faculty {
        query.push(" AND faculty = ").push_bind(faculty.clone());
    }
    if let Some(group) = filter.group {
        query.push(" AND group_number = ").push_bind(group);
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(min_grade) = filter.min_grade_exclusive {
        query.push(" AND avg_grade > ").push_bind(min_grade);
    }
    if let Some(has_scholarship) = filter.has_scholarship {
        query.push(" AND has_scholarship = ").push_bind(has_scholarship);
    }
    if let Some((start, end)) = filter.admission_years {
        query
            .push(" AND admission_year BETWEEN ")
            .push_bind(start)
            .push(" AND ")
            .push_bind(end);
    }
    if let Some(flags) = filter.any_social_flags.filter(|flags| !flags.is_empty()) {
        query
            .push(" AND (social_status & ")
            .push_bind(flags.to_stored())
            .push(") <> 0");
    }
    query.push(" ORDER BY last_name, first_name, id");

    let rows = query.build().fetch_all(pool).await?;
    tracing::debug!(count = rows.len(), ?filter, "students fetched");

    rows.iter().map(student_from_row).collect()
}

fn student_from_row(row: &PgRow) -> anyhow::Result<StudentRecord> {
    let status: String = row.try_get("status")?;
    Ok(StudentRecord {
        id: row.try_get("id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        faculty: row.try_get("faculty")?,
        group: row.try_get("group_number")?,
        admission_year: row.try_get("admission_year")?,
        status: status.parse()?,
        avg_grade: row.try_get("avg_grade")?,
        has_scholarship: row.try_get("has_scholarship")?,
        scholarship_amount: row.try_get("scholarship_amount")?,
        social_status: SocialFlags::from_stored(row.try_get("social_status")?),
        hometown: Hometown {
            city: row.try_get("city")?,
            region: row.try_get("region")?,
            longitude: row.try_get("longitude")?,
            latitude: row.try_get("latitude")?,
        },
    })
}

pub async fn distinct_faculties(pool: &PgPool) -> anyhow::Result<Vec<String>> {
    let rows = sqlx::query("SELECT DISTINCT faculty FROM university.students ORDER BY faculty")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|row| row.get("faculty")).collect())
}

pub async fn distinct_groups(pool: &PgPool) -> anyhow::Result<Vec<i32>> {
    let rows = sqlx::query(
        "SELECT DISTINCT group_number FROM university.students ORDER BY group_number",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|row| row.get("group_number")).collect())
}

pub async fn update_scholarship(
    pool: &PgPool,
    id: Uuid,
    has_scholarship: bool,
    amount: f64,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE university.students SET has_scholarship = $2, scholarship_amount = $3 \
         WHERE id = $1",
    )
    .bind(id)
    .bind(has_scholarship)
    .bind(amount)
    .execute(pool)
    .await?;
    Ok(())
}

/// Persists every changing student of a simulation, one update each.
///
/// Not atomic: if an update fails, the ones before it stay applied and the
/// error is returned. Re-running the simulation afterwards only reports the
/// students that still differ.
pub async fn apply_scholarship_changes(
    pool: &PgPool,
    calculation: &ScholarshipCalculation,
) -> anyhow::Result<usize> {
    let mut applied = 0usize;

    for change in calculation.changes() {
        if let Err(err) = update_scholarship(
            pool,
            change.id,
            change.calculated_has_scholarship,
            change.calculated_scholarship,
        )
        .await
        {
            tracing::warn!(applied, student = %change.id, "scholarship update failed mid-batch");
            return Err(err.context(format!(
                "failed to update scholarship for {} after {applied} updates",
                change.name
            )));
        }

        tracing::debug!(
            student = %change.id,
            amount = change.calculated_scholarship,
            tier = change.scholarship_type.as_str(),
            "scholarship updated"
        );
        applied += 1;
    }

    tracing::info!(applied, "scholarship changes applied");
    Ok(applied)
}

pub async fn set_social_scholarship(
    pool: &PgPool,
    ids: &[Uuid],
    action: SocialScholarshipAction,
) -> anyhow::Result<u64> {
    let result = match action {
        SocialScholarshipAction::Assign(Some(flags)) => {
            sqlx::query(
                "UPDATE university.students SET has_scholarship = TRUE, social_status = $2 \
                 WHERE id = ANY($1)",
            )
            .bind(ids)
            .bind(flags.to_stored())
            .execute(pool)
            .await?
        }
        SocialScholarshipAction::Assign(None) => {
            sqlx::query("UPDATE university.students SET has_scholarship = TRUE WHERE id = ANY($1)")
                .bind(ids)
                .execute(pool)
                .await?
        }
        SocialScholarshipAction::Remove => {
            sqlx::query(
                "UPDATE university.students SET has_scholarship = FALSE, scholarship_amount = 0 \
                 WHERE id = ANY($1)",
            )
            .bind(ids)
            .execute(pool)
            .await?
        }
    };

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> StudentInput {
        StudentInput {
            first_name: " Nikita ".to_string(),
            last_name: "Belov".to_string(),
            faculty: "Mathematics".to_string(),
            group: 102,
            admission_year: None,
            status: None,
            avg_grade: None,
            has_scholarship: None,
            scholarship_amount: None,
            social_status: None,
            city: "Kazan".to_string(),
            region: None,
            longitude: 49.12,
            latitude: 55.79,
            source_key: None,
        }
    }

    #[test]
    fn missing_values_get_defaults() {
        let student = input().normalize(2026).unwrap();

        assert_eq!(student.first_name, "Nikita");
        assert_eq!(student.admission_year, 2026);
        assert_eq!(student.status, StudentStatus::Graduated);
        assert_eq!(student.avg_grade, None);
        assert!(!student.has_scholarship);
        assert_eq!(student.scholarship_amount, 0.0);
        assert_eq!(student.social_status, SocialFlags::empty());
        assert_eq!(student.region, None);
        assert!(student.source_key.starts_with("import-"));
    }

    #[test]
    fn provided_values_are_kept_and_cleaned() {
        let student = StudentInput {
            admission_year: Some(2023),
            status: Some("Active".to_string()),
            avg_grade: Some(7.5),
            has_scholarship: Some(true),
            scholarship_amount: Some(2400.0),
            social_status: Some(0x05),
            region: Some(" Tatarstan ".to_string()),
            source_key: Some("csv-001".to_string()),
            ..input()
        }
        .normalize(2026)
        .unwrap();

        assert_eq!(student.admission_year, 2023);
        assert_eq!(student.status, StudentStatus::Active);
        assert_eq!(student.avg_grade, Some(7.5));
        assert!(student.has_scholarship);
        assert_eq!(student.scholarship_amount, 2400.0);
        assert_eq!(
            student.social_status,
            SocialFlags::LOST_BREADWINNER | SocialFlags::ORPHAN
        );
        assert_eq!(student.region.as_deref(), Some("Tatarstan"));
        assert_eq!(student.source_key, "csv-001");
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let student = StudentInput {
            status: Some("   ".to_string()),
            scholarship_amount: Some(-50.0),
            social_status: Some(-3),
            region: Some("  ".to_string()),
            source_key: Some(" ".to_string()),
            ..input()
        }
        .normalize(2026)
        .unwrap();

        assert_eq!(student.status, StudentStatus::Graduated);
        assert_eq!(student.scholarship_amount, 0.0);
        assert_eq!(student.social_status, SocialFlags::empty());
        assert_eq!(student.region, None);
        assert!(student.source_key.starts_with("import-"));
    }

    #[test]
    fn unknown_status_is_rejected() {
        let result = StudentInput {
            status: Some("dropped".to_string()),
            ..input()
        }
        .normalize(2026);
        assert!(result.is_err());
    }

    #[test]
    fn demo_csv_reads_empty_fields_as_missing() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/students.csv");
        let mut reader = csv::Reader::from_path(path).unwrap();
        let rows: Vec<StudentInput> = reader
            .deserialize()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].avg_grade, Some(8.3));
        assert_eq!(rows[1].social_status, Some(5));

        let ungraded = &rows[2];
        assert_eq!(ungraded.avg_grade, None);
        assert_eq!(ungraded.source_key, None);

        let student = rows.into_iter().nth(2).unwrap().normalize(2026).unwrap();
        assert_eq!(student.status, StudentStatus::Active);
        assert!(student.source_key.starts_with("import-"));
    }
}
