use serde::{Deserialize, Serialize};

/// Static descriptor for one physical unit. Metadata lives outside this
/// service; the registry is loaded once at startup and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accommodation {
    pub id: String,
    pub name: String,
    pub capacity: i32,
    pub nightly_rate_cents: i64,
    pub deposit_cents: i64,
}

#[derive(Debug, Clone)]
pub struct AccommodationRegistry {
    units: Vec<Accommodation>,
}

impl AccommodationRegistry {
    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let units: Vec<Accommodation> = serde_json::from_str(s)?;
        for unit in &units {
            if unit.id.is_empty() {
                anyhow::bail!("accommodation with empty id");
            }
            if unit.capacity < 1 {
                anyhow::bail!("accommodation {} has capacity {}", unit.id, unit.capacity);
            }
        }
        Ok(Self { units })
    }

    /// Fallback registry used when no configuration is provided.
    pub fn default_units() -> Self {
        Self {
            units: vec![
                Accommodation {
                    id: "cabin-1".to_string(),
                    name: "Cabin 1".to_string(),
                    capacity: 4,
                    nightly_rate_cents: 12_000,
                    deposit_cents: 20_000,
                },
                Accommodation {
                    id: "cabin-2".to_string(),
                    name: "Cabin 2".to_string(),
                    capacity: 6,
                    nightly_rate_cents: 16_000,
                    deposit_cents: 20_000,
                },
            ],
        }
    }

    pub fn get(&self, id: &str) -> Option<&Accommodation> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn all(&self) -> &[Accommodation] {
        &self.units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_json() {
        let json = r#"[{"id":"u1","name":"Unit 1","capacity":2,"nightly_rate_cents":10000,"deposit_cents":15000}]"#;
        let reg = AccommodationRegistry::from_json(json).unwrap();
        assert_eq!(reg.all().len(), 1);
        assert_eq!(reg.get("u1").unwrap().capacity, 2);
        assert!(reg.get("u2").is_none());
    }

    #[test]
    fn test_parse_invalid_capacity() {
        let json = r#"[{"id":"u1","name":"Unit 1","capacity":0,"nightly_rate_cents":10000,"deposit_cents":15000}]"#;
        assert!(AccommodationRegistry::from_json(json).is_err());
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(AccommodationRegistry::from_json("not json").is_err());
    }
}
