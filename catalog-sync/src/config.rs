use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use catalog_core::{Credentials, DEFAULT_ENDPOINT};
use url::Url;

use crate::sync::backoff::{Backoff, RetryPolicy};
use crate::sync::desired::DEFAULT_LEAF_KEY_PREFIX;
use crate::sync::slug::{is_absolute, normalize};

const DEFAULT_ROOT: &str = "/products";
const DEFAULT_LANGUAGE: &str = "en";
const DEFAULT_SOURCE_URL: &str = "https://dummyjson.com/products?limit=100";
const DEFAULT_FALLBACK_FILE: &str = "products.json";
const DEFAULT_MAX_ATTEMPTS: u64 = 4;
const DEFAULT_BACKOFF_BASE_MS: u64 = 250;
const DEFAULT_BACKOFF_MAX_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub credentials: Credentials,
    pub endpoint: Url,
    pub root: String,
    pub language: String,
    pub source_url: Url,
    pub fallback_file: PathBuf,
    pub leaf_key_prefix: String,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub protected_paths: HashSet<String>,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token_id = non_empty(lookup("CRYSTALLIZE_TOKEN_ID"))
            .context("CRYSTALLIZE_TOKEN_ID is not set")?;
        let token_secret = non_empty(lookup("CRYSTALLIZE_TOKEN_SECRET"))
            .context("CRYSTALLIZE_TOKEN_SECRET is not set")?;

        let endpoint = read_url(&lookup, "CATALOG_ENDPOINT", DEFAULT_ENDPOINT)?;
        let source_url = read_url(&lookup, "CATALOG_SOURCE_URL", DEFAULT_SOURCE_URL)?;

        let root = normalize(
            &non_empty(lookup("CATALOG_ROOT")).unwrap_or_else(|| DEFAULT_ROOT.to_string()),
        );
        anyhow::ensure!(is_absolute(&root), "CATALOG_ROOT must be absolute, got {root:?}");

        let language =
            non_empty(lookup("CATALOG_LANGUAGE")).unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
        let fallback_file = non_empty(lookup("CATALOG_FALLBACK_FILE"))
            .unwrap_or_else(|| DEFAULT_FALLBACK_FILE.to_string())
            .into();
        let leaf_key_prefix = non_empty(lookup("CATALOG_LEAF_KEY_PREFIX"))
            .unwrap_or_else(|| DEFAULT_LEAF_KEY_PREFIX.to_string());

        let max_attempts = u32::try_from(read_u64(&lookup, "CATALOG_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS))
            .unwrap_or(DEFAULT_MAX_ATTEMPTS as u32);
        let backoff_base = Duration::from_millis(read_u64(
            &lookup,
            "CATALOG_BACKOFF_BASE_MS",
            DEFAULT_BACKOFF_BASE_MS,
        ));
        let backoff_max = Duration::from_millis(read_u64(
            &lookup,
            "CATALOG_BACKOFF_MAX_MS",
            DEFAULT_BACKOFF_MAX_MS,
        ))
        .max(backoff_base);

        let protected_paths = lookup("CATALOG_PROTECTED_PATHS")
            .map(|value| parse_path_list(&value))
            .unwrap_or_default();

        Ok(Self {
            credentials: Credentials::new(token_id, token_secret),
            endpoint,
            root,
            language,
            source_url,
            fallback_file,
            leaf_key_prefix,
            max_attempts,
            backoff_base,
            backoff_max,
            protected_paths,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Backoff::new(self.backoff_base, self.backoff_max, true),
        )
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_url<F>(lookup: &F, name: &str, default: &str) -> anyhow::Result<Url>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = non_empty(lookup(name)).unwrap_or_else(|| default.to_string());
    Url::parse(&raw).with_context(|| format!("{name} is not a valid url: {raw}"))
}

fn parse_path_list(value: &str) -> HashSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(normalize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<SyncConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|name| env.get(name).cloned())
    }

    const TOKENS: [(&str, &str); 2] = [
        ("CRYSTALLIZE_TOKEN_ID", "id"),
        ("CRYSTALLIZE_TOKEN_SECRET", "secret"),
    ];

    #[test]
    fn defaults_apply_when_only_tokens_are_set() {
        let config = config_from(&TOKENS).unwrap();
        assert_eq!(config.endpoint.as_str(), DEFAULT_ENDPOINT);
        assert_eq!(config.root, "/products");
        assert_eq!(config.language, "en");
        assert_eq!(config.fallback_file, PathBuf::from("products.json"));
        assert_eq!(config.leaf_key_prefix, "dummyjson-");
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.backoff_base, Duration::from_millis(250));
        assert_eq!(config.backoff_max, Duration::from_secs(10));
        assert!(config.protected_paths.is_empty());
        assert_eq!(config.retry_policy().max_attempts(), 4);
    }

    #[test]
    fn missing_tokens_are_an_error() {
        let err = config_from(&[("CRYSTALLIZE_TOKEN_ID", "id")]).unwrap_err();
        assert!(err.to_string().contains("CRYSTALLIZE_TOKEN_SECRET"));
        assert!(config_from(&[("CRYSTALLIZE_TOKEN_ID", " "), TOKENS[1]]).is_err());
    }

    #[test]
    fn invalid_or_zero_numbers_fall_back_to_defaults() {
        let mut pairs = TOKENS.to_vec();
        pairs.push(("CATALOG_MAX_ATTEMPTS", "0"));
        pairs.push(("CATALOG_BACKOFF_BASE_MS", "soon"));
        pairs.push(("CATALOG_BACKOFF_MAX_MS", "100"));
        let config = config_from(&pairs).unwrap();
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.backoff_base, Duration::from_millis(250));
        assert_eq!(config.backoff_max, Duration::from_millis(250));
    }

    #[test]
    fn protected_paths_are_trimmed_and_normalized() {
        let mut pairs = TOKENS.to_vec();
        pairs.push((
            "CATALOG_PROTECTED_PATHS",
            " /products/categories/ ,, /products/keep",
        ));
        let config = config_from(&pairs).unwrap();
        let expected: HashSet<String> = ["/products/categories", "/products/keep"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(config.protected_paths, expected);
    }

    #[test]
    fn root_must_be_absolute() {
        let mut pairs = TOKENS.to_vec();
        pairs.push(("CATALOG_ROOT", "products"));
        assert!(config_from(&pairs).is_err());

        let mut pairs = TOKENS.to_vec();
        pairs.push(("CATALOG_ROOT", "/shop/"));
        assert_eq!(config_from(&pairs).unwrap().root, "/shop");
    }

    #[test]
    fn bad_endpoint_is_rejected() {
        let mut pairs = TOKENS.to_vec();
        pairs.push(("CATALOG_ENDPOINT", "not a url"));
        assert!(config_from(&pairs).is_err());
    }
}
