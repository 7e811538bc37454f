use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

text_enum!(ProgressStatus, "progress status", {
    NotStarted => "NOT_STARTED",
    InProgress => "IN_PROGRESS",
    Completed => "COMPLETED",
});

/// Progress of one student through one training module.
/// `completed_at` is set iff `status` is COMPLETED.
#[derive(Debug, Clone, FromRow)]
pub struct ProgressRecord {
    pub id: String,
    pub student_id: String,
    pub module_key: String,
    pub status: ProgressStatus,
    pub score: Option<i64>,
    pub practice_hours: f64,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct UpsertProgress {
    pub student_id: String,
    pub module_key: String,
    pub status: ProgressStatus,
    pub score: Option<i64>,
    pub practice_hours: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub total_modules: usize,
    pub completed_modules: usize,
    pub in_progress_modules: usize,
    pub average_score: Option<f64>,
    pub total_practice_hours: f64,
    /// Completed modules as a percentage of tracked modules.
    pub completion_rate: f64,
}

impl ProgressSummary {
    pub fn from_records(records: &[ProgressRecord]) -> Self {
        let total = records.len();
        let completed = records
            .iter()
            .filter(|r| r.status == ProgressStatus::Completed)
            .count();
        let in_progress = records
            .iter()
            .filter(|r| r.status == ProgressStatus::InProgress)
            .count();

        let scores: Vec<i64> = records.iter().filter_map(|r| r.score).collect();
        let average_score = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<i64>() as f64 / scores.len() as f64)
        };

        let completion_rate = if total == 0 {
            0.0
        } else {
            (completed as f64 / total as f64) * 100.0
        };

        Self {
            total_modules: total,
            completed_modules: completed,
            in_progress_modules: in_progress,
            average_score,
            total_practice_hours: records.iter().map(|r| r.practice_hours).sum(),
            completion_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(module: &str, status: ProgressStatus, score: Option<i64>, hours: f64) -> ProgressRecord {
        let now = Utc::now().naive_utc();
        ProgressRecord {
            id: module.to_string(),
            student_id: "s1".to_string(),
            module_key: module.to_string(),
            status,
            score,
            practice_hours: hours,
            completed_at: (status == ProgressStatus::Completed).then_some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn summary_of_empty_progress() {
        let summary = ProgressSummary::from_records(&[]);
        assert_eq!(summary.total_modules, 0);
        assert_eq!(summary.completion_rate, 0.0);
        assert_eq!(summary.average_score, None);
    }

    #[test]
    fn summary_counts_and_averages() {
        let records = vec![
            record("phase-1-history", ProgressStatus::Completed, Some(90), 4.0),
            record("phase-2-preparation", ProgressStatus::Completed, Some(70), 3.5),
            record("phase-3-assessment", ProgressStatus::InProgress, None, 1.5),
            record("phase-4-desensitization", ProgressStatus::NotStarted, None, 0.0),
        ];
        let summary = ProgressSummary::from_records(&records);
        assert_eq!(summary.total_modules, 4);
        assert_eq!(summary.completed_modules, 2);
        assert_eq!(summary.in_progress_modules, 1);
        assert_eq!(summary.average_score, Some(80.0));
        assert_eq!(summary.total_practice_hours, 9.0);
        assert_eq!(summary.completion_rate, 50.0);
    }
}
