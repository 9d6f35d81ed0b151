use serde::{Deserialize, Deserializer};

/// Distinguishes an absent field from an explicit `null` in update bodies.
///
/// Use as `#[serde(default, deserialize_with = "deserialize_some")]` on an
/// `Option<Option<T>>`: absent stays `None`, `null` becomes `Some(None)`.
pub fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Trim a string and drop it when nothing is left.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Page and limit from query params, clamped to sane bounds.
pub fn page_params(page: Option<i64>, limit: Option<i64>, default_limit: i64, max_limit: i64) -> (i64, i64) {
    let page = page.filter(|p| *p > 0).unwrap_or(1);
    let limit = limit.filter(|l| *l > 0).unwrap_or(default_limit).min(max_limit);
    (page, limit)
}

/// Rows to skip for a page. Saturates so an absurd page reads as past the end.
pub fn page_offset(page: i64, limit: i64) -> i64 {
    (page - 1).saturating_mul(limit)
}

pub fn page_count(total: i64, limit: i64) -> i64 {
    if limit <= 0 {
        return 0;
    }
    (total + limit - 1) / limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "deserialize_some")]
        task_id: Option<Option<String>>,
    }

    #[test]
    fn test_absent_null_and_value() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.task_id, None);

        let null: Patch = serde_json::from_str(r#"{"task_id": null}"#).unwrap();
        assert_eq!(null.task_id, Some(None));

        let set: Patch = serde_json::from_str(r#"{"task_id": "t1"}"#).unwrap();
        assert_eq!(set.task_id, Some(Some("t1".to_string())));
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  x ")), Some("x".to_string()));
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(None), None);
    }

    #[test]
    fn test_page_params() {
        assert_eq!(page_params(None, None, 50, 200), (1, 50));
        assert_eq!(page_params(Some(0), Some(-1), 20, 200), (1, 20));
        assert_eq!(page_params(Some(3), Some(1000), 20, 200), (3, 200));
        assert_eq!(page_params(Some(i64::MAX), Some(200), 20, 200), (i64::MAX, 200));
        assert_eq!(page_offset(1, 20), 0);
        assert_eq!(page_offset(3, 20), 40);
        assert_eq!(page_offset(i64::MAX, 200), i64::MAX);
        assert_eq!(page_count(0, 20), 0);
        assert_eq!(page_count(41, 20), 3);
    }
}
