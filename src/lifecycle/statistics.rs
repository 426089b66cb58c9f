use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Datelike;
use serde::Serialize;
use uuid::Uuid;

use crate::db::models::Document;
use crate::db::repository::DocumentRepository;
use crate::error::AppError;

/// Per-user counters over non-deleted documents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserStatistics {
    pub total_documents: usize,
    pub active_documents: usize,
    pub archived_documents: usize,
    /// Always computed over every year, regardless of the year filter.
    pub documents_by_year: BTreeMap<i32, usize>,
    /// Keyed `YYYY-MM`.
    pub documents_by_month: BTreeMap<String, usize>,
    pub total_comments: usize,
    /// Mean days between creation and archival, over archived documents.
    pub average_document_lifetime_days: f64,
}

pub struct StatisticsService {
    repo: Arc<dyn DocumentRepository>,
}

impl StatisticsService {
    pub fn new(repo: Arc<dyn DocumentRepository>) -> Self {
        Self { repo }
    }

    /// Statistics for `owner_id`, optionally restricted to documents created in `year`.
    pub async fn get_statistics(
        &self,
        owner_id: Uuid,
        year: Option<i32>,
    ) -> Result<UserStatistics, AppError> {
        let documents: Vec<Document> = self
            .repo
            .find_by_owner(owner_id)
            .await?
            .into_iter()
            .filter(|d| !d.is_deleted())
            .collect();

        let mut comment_counts = HashMap::new();
        for document in documents.iter().filter(|d| in_year(d, year)) {
            let count = self.repo.find_comments(document.id).await?.len();
            comment_counts.insert(document.id, count);
        }

        Ok(summarize(&documents, year, &comment_counts))
    }
}

fn in_year(document: &Document, year: Option<i32>) -> bool {
    year.map_or(true, |y| document.created_at.year() == y)
}

/// Aggregate already-loaded, non-deleted documents.
pub fn summarize(
    documents: &[Document],
    year: Option<i32>,
    comment_counts: &HashMap<Uuid, usize>,
) -> UserStatistics {
    let mut documents_by_year = BTreeMap::new();
    for document in documents {
        *documents_by_year.entry(document.created_at.year()).or_insert(0) += 1;
    }

    let filtered: Vec<&Document> = documents.iter().filter(|d| in_year(d, year)).collect();

    let mut documents_by_month = BTreeMap::new();
    for document in &filtered {
        let key = document.created_at.format("%Y-%m").to_string();
        *documents_by_month.entry(key).or_insert(0) += 1;
    }

    let lifetimes: Vec<f64> = filtered
        .iter()
        .filter_map(|d| d.archived_at().map(|at| at - d.created_at))
        .map(|lifetime| lifetime.num_milliseconds() as f64 / 86_400_000.0)
        .collect();
    let average = if lifetimes.is_empty() {
        0.0
    } else {
        lifetimes.iter().sum::<f64>() / lifetimes.len() as f64
    };

    UserStatistics {
        total_documents: filtered.len(),
        active_documents: filtered.iter().filter(|d| d.is_active()).count(),
        archived_documents: filtered.iter().filter(|d| d.is_archived()).count(),
        documents_by_year,
        documents_by_month,
        total_comments: filtered
            .iter()
            .map(|d| comment_counts.get(&d.id).copied().unwrap_or(0))
            .sum(),
        average_document_lifetime_days: (average * 100.0).round() / 100.0,
    }
}
