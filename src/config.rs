use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub search: SearchConfig,
    pub limits: LimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Maximum number of values in a single set-membership clause; larger id
    /// filters are split into batches and the results unioned.
    pub clause_limit: usize,
    /// Upper bound for unpaged internal scans (streams, lexical candidate
    /// collection).
    pub large_page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Hard cap on closure computations (branch parent chains, relationship
    /// walks). Exceeding it is a fatal error for that operation.
    pub recursion_limit: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            limits: LimitConfig::default(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            clause_limit: 800,
            large_page_size: 10_000,
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 100,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional config file and
    /// environment variables.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = config::Config::builder();

        // Add default configuration
        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        // Add config file if it exists
        config = config.add_source(config::File::with_name("termbase").required(false));

        // Add environment variables with prefix "TERMBASE_". A double
        // underscore separates nesting levels so snake_case field names
        // stay addressable, e.g. TERMBASE_SEARCH__CLAUSE_LIMIT.
        config = config.add_source(
            config::Environment::with_prefix("TERMBASE")
                .separator("__")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_store_contract() {
        let config = AppConfig::default();
        assert_eq!(config.search.clause_limit, 800);
        assert_eq!(config.search.large_page_size, 10_000);
        assert_eq!(config.limits.recursion_limit, 100);
    }

    #[test]
    fn environment_overrides_one_field_and_keeps_the_rest() {
        std::env::set_var("TERMBASE_SEARCH__CLAUSE_LIMIT", "25");
        let config = AppConfig::load().unwrap();
        std::env::remove_var("TERMBASE_SEARCH__CLAUSE_LIMIT");
        assert_eq!(config.search.clause_limit, 25);
        assert_eq!(config.search.large_page_size, 10_000);
        assert_eq!(config.limits.recursion_limit, 100);
    }
}
