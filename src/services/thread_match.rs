//! Duplicate thread detection for email imports.

use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashSet;

use crate::error::Result;
use crate::models::EmailThread;
use crate::services::normalize::NormalizedImport;

/// Share of the smaller participant set that must overlap before two
/// threads with the same subject are treated as the same conversation.
pub const DUPLICATE_OVERLAP_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone)]
pub enum ThreadMatch {
    /// Same external thread key.
    ExactKey(EmailThread),
    /// Same subject and enough shared participants.
    Similar(EmailThread),
}

impl ThreadMatch {
    pub fn thread(&self) -> &EmailThread {
        match self {
            ThreadMatch::ExactKey(thread) | ThreadMatch::Similar(thread) => thread,
        }
    }
}

/// Whether two participant address sets overlap enough to be one thread.
pub fn overlap_matches(existing: &[String], incoming: &[String]) -> bool {
    let existing: HashSet<&str> = existing.iter().map(String::as_str).collect();
    let incoming: HashSet<&str> = incoming.iter().map(String::as_str).collect();

    let smaller = existing.len().min(incoming.len());
    if smaller == 0 {
        return false;
    }

    let overlap = existing.intersection(&incoming).count();
    overlap > 0 && overlap as f64 >= smaller as f64 * DUPLICATE_OVERLAP_THRESHOLD
}

pub async fn find_by_key(pool: &SqlitePool, thread_key: &str) -> Result<Option<EmailThread>> {
    let thread = sqlx::query_as::<_, EmailThread>("SELECT * FROM email_threads WHERE thread_key = ?")
        .bind(thread_key)
        .fetch_optional(pool)
        .await?;
    Ok(thread)
}

/// Look for a thread the import duplicates. An exact key match always
/// counts; the subject and participant heuristic only runs when
/// duplicates are not allowed.
pub async fn find_existing_thread(
    pool: &SqlitePool,
    import: &NormalizedImport,
    allow_duplicate: bool,
) -> Result<Option<ThreadMatch>> {
    if let Some(key) = &import.thread_key {
        if let Some(thread) = find_by_key(pool, key).await? {
            log::debug!("Import matches thread {} by key {}", thread.id, key);
            return Ok(Some(ThreadMatch::ExactKey(thread)));
        }
    }

    if allow_duplicate {
        return Ok(None);
    }

    let incoming = import.participant_emails();
    if incoming.is_empty() {
        return Ok(None);
    }

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT DISTINCT t.* FROM email_threads t \
         JOIN email_participants p ON p.thread_id = t.id \
         WHERE t.subject = ",
    );
    query.push_bind(&import.subject);
    query.push(" AND p.email IN (");
    let mut separated = query.separated(", ");
    for email in &incoming {
        separated.push_bind(email);
    }
    separated.push_unseparated(") ORDER BY t.created_at");

    let candidates = query.build_query_as::<EmailThread>().fetch_all(pool).await?;

    for candidate in candidates {
        let existing = sqlx::query_scalar::<_, String>(
            "SELECT email FROM email_participants WHERE thread_id = ?",
        )
        .bind(&candidate.id)
        .fetch_all(pool)
        .await?;

        if overlap_matches(&existing, &incoming) {
            log::debug!(
                "Import matches thread {} by subject and participant overlap",
                candidate.id
            );
            return Ok(Some(ThreadMatch::Similar(candidate)));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emails(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_identical_sets_match() {
        let a = emails(&["a@co.com", "b@co.com"]);
        assert!(overlap_matches(&a, &a));
    }

    #[test]
    fn test_threshold_uses_smaller_set() {
        let existing = emails(&["a@co.com", "b@co.com", "c@co.com", "d@co.com", "e@co.com"]);
        // 2 of the 2 incoming addresses are known: 100% of the smaller set.
        assert!(overlap_matches(&existing, &emails(&["a@co.com", "b@co.com"])));
        // 2 of 3: below 70%.
        assert!(!overlap_matches(&existing, &emails(&["a@co.com", "b@co.com", "x@co.com"])));
    }

    #[test]
    fn test_threshold_boundary() {
        let existing: Vec<String> = (0..10).map(|i| format!("u{}@co.com", i)).collect();
        let seven: Vec<String> = (0..7)
            .map(|i| format!("u{}@co.com", i))
            .chain((0..3).map(|i| format!("x{}@co.com", i)))
            .collect();
        let six: Vec<String> = (0..6)
            .map(|i| format!("u{}@co.com", i))
            .chain((0..4).map(|i| format!("x{}@co.com", i)))
            .collect();
        assert!(overlap_matches(&existing, &seven));
        assert!(!overlap_matches(&existing, &six));
    }

    #[test]
    fn test_empty_sets_never_match() {
        assert!(!overlap_matches(&[], &emails(&["a@co.com"])));
        assert!(!overlap_matches(&[], &[]));
    }

    #[test]
    fn test_duplicate_addresses_count_once() {
        let existing = emails(&["a@co.com", "a@co.com", "b@co.com"]);
        assert!(overlap_matches(&existing, &emails(&["a@co.com", "b@co.com"])));
    }
}
