//! Swipe feature model - storage adapter for the swipefeatures table
//!
//! The fixed feature schema below is the single source of truth: it is the
//! DB column list, the JSON validation set, and the classifier's feature
//! vector ordering (identity column excluded).

use std::collections::HashMap;

use serde_json::Value;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

/// Identity column; stored alongside the features, excluded from the vector
pub const USER_ID_COLUMN: &str = "userID";

/// Numeric feature columns, in canonical order
pub const FEATURE_COLUMNS: [&str; 30] = [
    "strokeDuration",
    "midStrokeArea",
    "midStrokePress",
    "dirEndToEnd",
    "aveDir",
    "aveVelo",
    "pairwiseVeloPercent",
    "startX",
    "startY",
    "stopX",
    "stopY",
    "touchArea",
    "maxVelo",
    "minVelo",
    "accel",
    "decel",
    "trajLength",
    "curvature",
    "veloVariance",
    "angleChangeRate",
    "maxPress",
    "minPress",
    "initPress",
    "pressChangeRate",
    "pressVariance",
    "maxIdleTime",
    "straightnessRatio",
    "xDisplacement",
    "yDisplacement",
    "aveTouchArea",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeatureError {
    #[error("invalid features provided: missing '{0}'")]
    Missing(String),

    #[error("invalid features provided: '{0}' is not numeric")]
    NotNumeric(String),
}

/// One gesture's extracted feature vector, attributed to a user.
/// Features are in `FEATURE_COLUMNS` order. Immutable after insert.
#[derive(Debug, Clone, PartialEq)]
pub struct SwipeSample {
    pub user_id: i64,
    pub features: Vec<f64>,
}

/// Consistent snapshot of stored strokes grouped by user
#[derive(Debug, Default)]
pub struct EligibleUsers {
    /// Users with at least `min_strokes` stored samples, ascending
    pub eligible: Vec<i64>,
    /// Every user's strokes, eligible or not
    pub strokes: HashMap<i64, Vec<Vec<f64>>>,
}

impl SwipeSample {
    /// Validate a JSON payload against the full schema
    pub fn from_json(payload: &Value) -> Result<Self, FeatureError> {
        Ok(Self {
            user_id: parse_user_id(payload)?,
            features: feature_vector(payload)?,
        })
    }

    pub async fn insert(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        let cols = FEATURE_COLUMNS.join(", ");
        let placeholders = vec!["?"; FEATURE_COLUMNS.len() + 1].join(", ");
        let sql = format!(
            "INSERT INTO swipefeatures ({USER_ID_COLUMN}, {cols}) VALUES ({placeholders})"
        );

        let mut query = sqlx::query(&sql).bind(self.user_id);
        for value in &self.features {
            query = query.bind(*value);
        }
        query.execute(pool).await?;

        Ok(())
    }
}

/// Extract the user identity; numeric strings are accepted the way the
/// mobile clients send them.
pub fn parse_user_id(payload: &Value) -> Result<i64, FeatureError> {
    let raw = payload
        .get(USER_ID_COLUMN)
        .ok_or_else(|| FeatureError::Missing(USER_ID_COLUMN.to_string()))?;

    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| FeatureError::NotNumeric(USER_ID_COLUMN.to_string())),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| FeatureError::NotNumeric(USER_ID_COLUMN.to_string())),
        _ => Err(FeatureError::NotNumeric(USER_ID_COLUMN.to_string())),
    }
}

/// Build the ordered feature vector (identity excluded), requiring every
/// schema key to be present and numeric.
pub fn feature_vector(payload: &Value) -> Result<Vec<f64>, FeatureError> {
    if payload.get(USER_ID_COLUMN).is_none() {
        return Err(FeatureError::Missing(USER_ID_COLUMN.to_string()));
    }

    let mut features = Vec::with_capacity(FEATURE_COLUMNS.len());
    for key in FEATURE_COLUMNS {
        let value = payload
            .get(key)
            .ok_or_else(|| FeatureError::Missing(key.to_string()))?;
        features.push(value_as_f64(value).ok_or_else(|| FeatureError::NotNumeric(key.to_string()))?);
    }

    Ok(features)
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub async fn count_for_user(pool: &SqlitePool, user_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM swipefeatures WHERE userID = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await
}

/// Snapshot every stored stroke grouped by user and compute eligibility.
/// One SELECT keeps the snapshot consistent across concurrent inserts.
pub async fn eligible_users(
    pool: &SqlitePool,
    min_strokes: u32,
) -> Result<EligibleUsers, sqlx::Error> {
    let cols = FEATURE_COLUMNS.join(", ");
    let sql = format!("SELECT {USER_ID_COLUMN}, {cols} FROM swipefeatures");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut strokes: HashMap<i64, Vec<Vec<f64>>> = HashMap::new();
    for row in &rows {
        let user_id: i64 = row.try_get(USER_ID_COLUMN)?;
        let mut features = Vec::with_capacity(FEATURE_COLUMNS.len());
        for col in FEATURE_COLUMNS {
            features.push(row.try_get::<f64, _>(col)?);
        }
        strokes.entry(user_id).or_default().push(features);
    }

    let mut eligible: Vec<i64> = strokes
        .iter()
        .filter(|(_, user_strokes)| user_strokes.len() >= min_strokes as usize)
        .map(|(&user_id, _)| user_id)
        .collect();
    eligible.sort_unstable();

    Ok(EligibleUsers { eligible, strokes })
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// A full-schema JSON payload with every feature set to `fill`
    pub fn sample_payload(user_id: i64, fill: f64) -> Value {
        let mut map = serde_json::Map::new();
        map.insert(USER_ID_COLUMN.to_string(), serde_json::json!(user_id));
        for key in FEATURE_COLUMNS {
            map.insert(key.to_string(), serde_json::json!(fill));
        }
        Value::Object(map)
    }

    pub async fn seed_user(pool: &SqlitePool, user_id: i64, fill: f64, count: usize) {
        for _ in 0..count {
            let sample = SwipeSample::from_json(&sample_payload(user_id, fill)).unwrap();
            sample.insert(pool).await.unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{sample_payload, seed_user};
    use super::*;
    use crate::db::test_pool;

    #[test]
    fn test_from_json_accepts_full_schema() {
        let sample = SwipeSample::from_json(&sample_payload(7, 1.5)).unwrap();
        assert_eq!(sample.user_id, 7);
        assert_eq!(sample.features.len(), FEATURE_COLUMNS.len());
        assert!(sample.features.iter().all(|&f| f == 1.5));
    }

    #[test]
    fn test_from_json_rejects_missing_feature() {
        let mut payload = sample_payload(7, 1.0);
        payload.as_object_mut().unwrap().remove("curvature");

        let err = SwipeSample::from_json(&payload).unwrap_err();
        assert_eq!(err, FeatureError::Missing("curvature".to_string()));
    }

    #[test]
    fn test_from_json_rejects_non_numeric_feature() {
        let mut payload = sample_payload(7, 1.0);
        payload.as_object_mut().unwrap()["maxPress"] = serde_json::json!("fast");

        let err = SwipeSample::from_json(&payload).unwrap_err();
        assert_eq!(err, FeatureError::NotNumeric("maxPress".to_string()));
    }

    #[test]
    fn test_user_id_accepts_numeric_string() {
        let mut payload = sample_payload(0, 1.0);
        payload.as_object_mut().unwrap()[USER_ID_COLUMN] = serde_json::json!("42");

        let sample = SwipeSample::from_json(&payload).unwrap();
        assert_eq!(sample.user_id, 42);
    }

    #[tokio::test]
    async fn test_insert_and_count_round_trip() {
        let pool = test_pool().await;

        assert_eq!(count_for_user(&pool, 1).await.unwrap(), 0);
        seed_user(&pool, 1, 0.5, 3).await;
        assert_eq!(count_for_user(&pool, 1).await.unwrap(), 3);
        assert_eq!(count_for_user(&pool, 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_eligibility_threshold() {
        let pool = test_pool().await;
        seed_user(&pool, 1, 0.1, 3).await;
        seed_user(&pool, 2, 0.9, 2).await;

        let snapshot = eligible_users(&pool, 3).await.unwrap();
        assert_eq!(snapshot.eligible, vec![1]);
        assert_eq!(snapshot.strokes[&1].len(), 3);
        assert_eq!(snapshot.strokes[&2].len(), 2);
        assert_eq!(snapshot.strokes[&1][0].len(), FEATURE_COLUMNS.len());
    }
}
