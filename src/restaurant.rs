use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::Engine;
use crate::limits::*;
use crate::maintenance;
use crate::notify::NotifyHub;

/// Manages per-restaurant engines. Each restaurant gets its own Engine + WAL
/// + compactor. Restaurant = database name from the pgwire connection; it is
/// treated as an opaque partition key.
pub struct RestaurantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    retention_days: u64,
}

impl RestaurantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, retention_days: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            retention_days,
        }
    }

    /// Get or lazily create an engine for the given restaurant.
    pub fn get_or_create(&self, restaurant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(restaurant) {
            return Ok(engine.value().clone());
        }
        if restaurant.len() > MAX_RESTAURANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "restaurant name too long",
            ));
        }
        if self.engines.len() >= MAX_RESTAURANTS {
            return Err(std::io::Error::other("too many restaurants"));
        }

        // Sanitize the name to prevent path traversal
        let safe_name: String = restaurant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty restaurant name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify, self.retention_days)?);

        // Spawn the WAL compactor for this restaurant
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            maintenance::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(restaurant.to_string(), engine.clone());
        metrics::gauge!(crate::observability::RESTAURANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("maitred_test_restaurant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn date(s: &str) -> chrono::NaiveDate {
        chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn restaurant_isolation() {
        let dir = test_data_dir("isolation");
        let rm = RestaurantManager::new(dir, 1000, 30);

        let eng_a = rm.get_or_create("bistro_a").unwrap();
        let eng_b = rm.get_or_create("bistro_b").unwrap();

        let tid = Ulid::new();

        // Create the same table ID in both restaurants
        eng_a
            .create_table(tid, "T1".into(), 4, String::new())
            .await
            .unwrap();
        eng_b
            .create_table(tid, "T1".into(), 4, String::new())
            .await
            .unwrap();

        // Confirm a booking in restaurant A only
        let b = eng_a
            .create_booking(
                Ulid::new(),
                BookingRequest {
                    date: date("2024-06-01"),
                    start: 1080,
                    end: None,
                    duration: None,
                    party_size: 4,
                    customer_name: "Ada".into(),
                    customer_email: "ada@example.com".into(),
                    customer_phone: None,
                    source: BookingSource::Online,
                    notes: String::new(),
                },
            )
            .await
            .unwrap();
        eng_a.confirm_booking(b.id, vec![tid]).await.unwrap();

        // Restaurant A's table is blocked for the slot, B's is not
        let free_a = eng_a
            .check_availability(date("2024-06-01"), 1080, 2, None, None)
            .await
            .unwrap();
        assert!(free_a.is_empty());
        let free_b = eng_b
            .check_availability(date("2024-06-01"), 1080, 2, None, None)
            .await
            .unwrap();
        assert_eq!(free_b.len(), 1);
    }

    #[tokio::test]
    async fn restaurant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let rm = RestaurantManager::new(dir.clone(), 1000, 30);

        // No WAL files should exist yet
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        // First contact creates the engine and its WAL
        let _eng = rm.get_or_create("trattoria").unwrap();

        assert!(dir.join("trattoria.wal").exists());
    }

    #[tokio::test]
    async fn restaurant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let rm = RestaurantManager::new(dir, 1000, 30);

        let eng1 = rm.get_or_create("foo").unwrap();
        let eng2 = rm.get_or_create("foo").unwrap();

        // Should be the same Arc
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn restaurant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let rm = RestaurantManager::new(dir.clone(), 1000, 30);

        // Path traversal attempt
        let _eng = rm.get_or_create("../evil").unwrap();
        // Should create "evil.wal", not "../evil.wal"
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        let result = rm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn restaurant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let rm = RestaurantManager::new(dir, 1000, 30);

        let long_name = "x".repeat(MAX_RESTAURANT_NAME_LEN + 1);
        let result = rm.get_or_create(&long_name);
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("restaurant name too long"));
    }

    #[tokio::test]
    async fn restaurant_count_limit() {
        let dir = test_data_dir("count_limit");
        let rm = RestaurantManager::new(dir, 1000, 30);

        for i in 0..MAX_RESTAURANTS {
            rm.get_or_create(&format!("r{i}")).unwrap();
        }
        let result = rm.get_or_create("one_more");
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("too many restaurants"));
    }
}
