//! Conflict resolution between a locally held and a server-held record.

use chrono::DateTime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use offsync_common::{ConflictStrategy, Error, Result};

/// Fields checked, in order, for a record-level update timestamp.
const TIMESTAMP_FIELDS: [&str; 5] = ["updatedAt", "updated_at", "lastModified", "modifiedAt", "timestamp"];

/// Fields checked, in order, for a record version counter.
const VERSION_FIELDS: [&str; 2] = ["version", "_version"];

/// Object mapping field name to its last update time (epoch ms).
pub const FIELD_TIMESTAMPS_KEY: &str = "_fieldTimestamps";

/// Confidence when the newer side wins by timestamp.
const TIMESTAMP_WIN_CONFIDENCE: f64 = 0.9;

/// Confidence when merge has to guess because inputs are not objects.
const NON_OBJECT_MERGE_CONFIDENCE: f64 = 0.5;

type ResolverFn = dyn Fn(&Value, &Value) -> Value + Send + Sync;

/// A user-supplied resolution function, called with `(client, server)`.
#[derive(Clone)]
pub struct CustomResolver(Arc<ResolverFn>);

impl CustomResolver {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, client: &Value, server: &Value) -> Value {
        (self.0)(client, server)
    }
}

impl fmt::Debug for CustomResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomResolver(<fn>)")
    }
}

/// Process-wide conflict resolution settings.
///
/// `custom_resolvers` are process-local and never serialized; hosts register
/// them again after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConflictResolutionConfig {
    pub default_strategy: ConflictStrategy,
    pub enable_auto_resolution: bool,
    pub enable_user_choice: bool,
    /// Milliseconds under which two timestamps count as simultaneous.
    pub timestamp_threshold: u64,
    #[serde(skip)]
    pub custom_resolvers: HashMap<String, CustomResolver>,
}

impl ConflictResolutionConfig {
    /// Strategy actually applied for a requested one.
    ///
    /// `user-choice` needs the user-choice path; without it the default
    /// strategy applies, and `server-wins` if the default is `user-choice` too.
    pub fn effective_strategy(&self, requested: &ConflictStrategy) -> ConflictStrategy {
        match requested {
            ConflictStrategy::UserChoice if !self.enable_user_choice => {
                match &self.default_strategy {
                    ConflictStrategy::UserChoice => ConflictStrategy::ServerWins,
                    default => default.clone(),
                }
            }
            other => other.clone(),
        }
    }

    /// Serializable settings, without the resolver registry.
    pub fn to_settings(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl Default for ConflictResolutionConfig {
    fn default() -> Self {
        Self {
            default_strategy: ConflictStrategy::TimestampBased,
            enable_auto_resolution: true,
            enable_user_choice: false,
            timestamp_threshold: 1000,
            custom_resolvers: HashMap::new(),
        }
    }
}

/// Partial update merged into the live [`ConflictResolutionConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConflictConfigUpdate {
    pub default_strategy: Option<ConflictStrategy>,
    pub enable_auto_resolution: Option<bool>,
    pub enable_user_choice: Option<bool>,
    pub timestamp_threshold: Option<u64>,
}

impl ConflictConfigUpdate {
    pub fn apply(&self, base: &ConflictResolutionConfig) -> ConflictResolutionConfig {
        let mut config = base.clone();
        if let Some(strategy) = &self.default_strategy {
            config.default_strategy = strategy.clone();
        }
        if let Some(enabled) = self.enable_auto_resolution {
            config.enable_auto_resolution = enabled;
        }
        if let Some(enabled) = self.enable_user_choice {
            config.enable_user_choice = enabled;
        }
        if let Some(threshold) = self.timestamp_threshold {
            config.timestamp_threshold = threshold;
        }
        config
    }
}

/// Outcome of one resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolutionResult {
    pub strategy: ConflictStrategy,
    pub resolved: bool,
    /// 0.0 to 1.0.
    pub confidence: f64,
    pub final_value: Value,
}

impl ConflictResolutionResult {
    fn resolved(strategy: ConflictStrategy, final_value: Value, confidence: f64) -> Self {
        Self {
            strategy,
            resolved: true,
            confidence: confidence.clamp(0.0, 1.0),
            final_value,
        }
    }
}

/// Resolve a conflict against an explicit config.
///
/// Pure: the result depends only on the arguments.
pub fn resolve_with(
    config: &ConflictResolutionConfig,
    client: &Value,
    server: &Value,
    strategy: &ConflictStrategy,
) -> Result<ConflictResolutionResult> {
    let result = match strategy {
        ConflictStrategy::ServerWins => {
            ConflictResolutionResult::resolved(strategy.clone(), server.clone(), 1.0)
        }
        ConflictStrategy::ClientWins => {
            ConflictResolutionResult::resolved(strategy.clone(), client.clone(), 1.0)
        }
        ConflictStrategy::Merge => {
            let (value, confidence) = merge(client, server);
            ConflictResolutionResult::resolved(strategy.clone(), value, confidence)
        }
        ConflictStrategy::TimestampBased => {
            let (value, confidence) = timestamp_based(client, server, config.timestamp_threshold);
            ConflictResolutionResult::resolved(strategy.clone(), value, confidence)
        }
        ConflictStrategy::FieldLevel => {
            let (value, confidence) = field_level(client, server);
            ConflictResolutionResult::resolved(strategy.clone(), value, confidence)
        }
        ConflictStrategy::VersionBased => {
            let (value, confidence) = version_based(client, server);
            ConflictResolutionResult::resolved(strategy.clone(), value, confidence)
        }
        ConflictStrategy::UserChoice => ConflictResolutionResult {
            strategy: strategy.clone(),
            resolved: false,
            confidence: 0.0,
            final_value: Value::Null,
        },
        ConflictStrategy::Custom(key) => {
            let resolver = config.custom_resolvers.get(key).ok_or_else(|| {
                Error::Configuration(format!("No custom resolver registered for '{}'", key))
            })?;
            ConflictResolutionResult::resolved(strategy.clone(), resolver.call(client, server), 1.0)
        }
    };

    Ok(result)
}

/// Shallow merge; server fields win on collision, client-only fields survive.
fn merge(client: &Value, server: &Value) -> (Value, f64) {
    let (Some(client_fields), Some(server_fields)) = (client.as_object(), server.as_object()) else {
        return (server.clone(), NON_OBJECT_MERGE_CONFIDENCE);
    };

    let mut merged = client_fields.clone();
    let mut collisions = 0usize;
    for (key, server_value) in server_fields {
        if client_fields.get(key).is_some_and(|v| v != server_value) {
            collisions += 1;
        }
        merged.insert(key.clone(), server_value.clone());
    }

    let confidence = if merged.is_empty() {
        1.0
    } else {
        (merged.len() - collisions) as f64 / merged.len() as f64
    };

    (Value::Object(merged), confidence)
}

fn timestamp_based(client: &Value, server: &Value, threshold_ms: u64) -> (Value, f64) {
    let (Some(client_ts), Some(server_ts)) = (extract_timestamp(client), extract_timestamp(server)) else {
        debug!("Timestamp missing on one side; merging");
        let (value, confidence) = merge(client, server);
        return (value, confidence / 2.0);
    };

    let diff = server_ts.saturating_sub(client_ts);
    if diff.unsigned_abs() > threshold_ms {
        let winner = if diff > 0 { server } else { client };
        (winner.clone(), TIMESTAMP_WIN_CONFIDENCE)
    } else {
        let (value, confidence) = merge(client, server);
        (value, confidence / 2.0)
    }
}

fn field_level(client: &Value, server: &Value) -> (Value, f64) {
    let (Some(client_fields), Some(server_fields)) = (client.as_object(), server.as_object()) else {
        return (server.clone(), NON_OBJECT_MERGE_CONFIDENCE);
    };

    let client_times = field_timestamps(client_fields);
    let server_times = field_timestamps(server_fields);

    let keys: BTreeSet<&String> = client_fields
        .keys()
        .chain(server_fields.keys())
        .filter(|k| k.as_str() != FIELD_TIMESTAMPS_KEY)
        .collect();

    let mut merged = Map::new();
    let mut merged_times = Map::new();
    let mut decided = 0usize;

    for key in &keys {
        let value = match (client_fields.get(*key), server_fields.get(*key)) {
            (Some(c), Some(s)) if c == s => {
                decided += 1;
                s
            }
            (Some(c), Some(s)) => match (client_times.get(*key), server_times.get(*key)) {
                (Some(ct), Some(st)) if ct > st => {
                    decided += 1;
                    c
                }
                (Some(ct), Some(st)) if st > ct => {
                    decided += 1;
                    s
                }
                _ => s,
            },
            (Some(c), None) => {
                decided += 1;
                c
            }
            (None, Some(s)) => {
                decided += 1;
                s
            }
            (None, None) => continue,
        };
        merged.insert((*key).clone(), value.clone());

        // None orders below Some, so this keeps whichever timestamp exists.
        if let Some(ts) = client_times.get(*key).max(server_times.get(*key)).copied() {
            merged_times.insert((*key).clone(), Value::from(ts));
        }
    }

    if !merged_times.is_empty() {
        merged.insert(FIELD_TIMESTAMPS_KEY.to_string(), Value::Object(merged_times));
    }

    let confidence = if keys.is_empty() {
        1.0
    } else {
        decided as f64 / keys.len() as f64
    };

    (Value::Object(merged), confidence)
}

fn version_based(client: &Value, server: &Value) -> (Value, f64) {
    match (extract_version(client), extract_version(server)) {
        (Some(c), Some(s)) if c > s => (client.clone(), 1.0),
        (Some(c), Some(s)) if s > c => (server.clone(), 1.0),
        (Some(_), Some(_)) => merge(client, server),
        _ => {
            let (value, confidence) = merge(client, server);
            (value, confidence / 2.0)
        }
    }
}

/// Record-level update time in epoch milliseconds.
///
/// Numbers are taken as milliseconds, strings are parsed as RFC 3339.
pub fn extract_timestamp(value: &Value) -> Option<i64> {
    TIMESTAMP_FIELDS.iter().find_map(|field| {
        let raw = value.get(field)?;
        raw.as_i64().or_else(|| {
            raw.as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.timestamp_millis())
        })
    })
}

fn extract_version(value: &Value) -> Option<i64> {
    VERSION_FIELDS
        .iter()
        .find_map(|field| value.get(field).and_then(Value::as_i64))
}

fn field_timestamps(fields: &Map<String, Value>) -> HashMap<String, i64> {
    fields
        .get(FIELD_TIMESTAMPS_KEY)
        .and_then(Value::as_object)
        .map(|times| {
            times
                .iter()
                .filter_map(|(k, v)| v.as_i64().map(|ts| (k.clone(), ts)))
                .collect()
        })
        .unwrap_or_default()
}

/// Conflict resolver holding the live configuration.
///
/// The config is swapped as a whole on every write, so a resolution always
/// sees one consistent snapshot.
pub struct ConflictResolver {
    config: RwLock<Arc<ConflictResolutionConfig>>,
}

impl ConflictResolver {
    pub fn new(config: ConflictResolutionConfig) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
        }
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<ConflictResolutionConfig> {
        self.config.read().clone()
    }

    /// Merge a partial update into the live configuration.
    ///
    /// Applied under the write lock, so resolvers registered or removed
    /// concurrently are never reverted.
    pub fn update(&self, update: &ConflictConfigUpdate) -> Arc<ConflictResolutionConfig> {
        let mut guard = self.config.write();
        let config = Arc::new(update.apply(&guard));
        *guard = config.clone();
        config
    }

    /// Register (or replace) the resolver for `key`.
    pub fn add_custom_resolver(&self, key: impl Into<String>, resolver: CustomResolver) {
        let mut guard = self.config.write();
        let mut config = ConflictResolutionConfig::clone(&guard);
        config.custom_resolvers.insert(key.into(), resolver);
        *guard = Arc::new(config);
    }

    /// Unregister the resolver for `key`. Returns whether one was registered.
    pub fn remove_custom_resolver(&self, key: &str) -> bool {
        let mut guard = self.config.write();
        if !guard.custom_resolvers.contains_key(key) {
            return false;
        }
        let mut config = ConflictResolutionConfig::clone(&guard);
        config.custom_resolvers.remove(key);
        *guard = Arc::new(config);
        true
    }

    /// Resolve with an explicit strategy against the current snapshot.
    pub fn resolve(
        &self,
        client: &Value,
        server: &Value,
        strategy: &ConflictStrategy,
    ) -> Result<ConflictResolutionResult> {
        resolve_with(&self.config(), client, server, strategy)
    }

    /// Resolve the way the scheduler does: `user-choice` availability applied,
    /// configuration errors surfaced.
    pub fn resolve_effective(
        &self,
        client: &Value,
        server: &Value,
        requested: &ConflictStrategy,
    ) -> Result<ConflictResolutionResult> {
        let config = self.config();
        let strategy = config.effective_strategy(requested);
        resolve_with(&config, client, server, &strategy)
    }

    /// Resolve without failing.
    ///
    /// A configuration error falls back to the default strategy, and then to
    /// `server-wins`. The first error is returned alongside the result.
    pub fn resolve_with_fallback(
        &self,
        client: &Value,
        server: &Value,
        requested: &ConflictStrategy,
    ) -> (ConflictResolutionResult, Option<Error>) {
        let config = self.config();
        let strategy = config.effective_strategy(requested);

        let err = match resolve_with(&config, client, server, &strategy) {
            Ok(result) => return (result, None),
            Err(err) => err,
        };

        let fallback = config.effective_strategy(&config.default_strategy);
        warn!("{}; falling back to default strategy {}", err, fallback);

        let result = resolve_with(&config, client, server, &fallback).unwrap_or_else(|default_err| {
            warn!("{}; falling back to server-wins", default_err);
            ConflictResolutionResult::resolved(ConflictStrategy::ServerWins, server.clone(), 1.0)
        });

        (result, Some(err))
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(ConflictResolutionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn resolver() -> ConflictResolver {
        ConflictResolver::default()
    }

    #[test]
    fn test_server_and_client_wins() {
        let r = resolver();
        let client = json!({"price": 10});
        let server = json!({"price": 12});

        let result = r.resolve(&client, &server, &ConflictStrategy::ServerWins).unwrap();
        assert_eq!(result.final_value, server);
        assert_eq!(result.confidence, 1.0);
        assert!(result.resolved);

        let result = r.resolve(&client, &server, &ConflictStrategy::ClientWins).unwrap();
        assert_eq!(result.final_value, client);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_merge_disjoint_and_colliding() {
        let r = resolver();
        let result = r
            .resolve(&json!({"a": 1}), &json!({"b": 2}), &ConflictStrategy::Merge)
            .unwrap();
        assert_eq!(result.final_value, json!({"a": 1, "b": 2}));
        assert_eq!(result.confidence, 1.0);

        let result = r
            .resolve(&json!({"a": 1}), &json!({"a": 2}), &ConflictStrategy::Merge)
            .unwrap();
        assert_eq!(result.final_value, json!({"a": 2}));
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_merge_confidence_is_fraction_of_clean_fields() {
        let result = resolver()
            .resolve(
                &json!({"a": 1, "b": 1, "c": 1}),
                &json!({"a": 2, "b": 1, "d": 1}),
                &ConflictStrategy::Merge,
            )
            .unwrap();
        assert_eq!(result.final_value, json!({"a": 2, "b": 1, "c": 1, "d": 1}));
        assert_eq!(result.confidence, 0.75);
    }

    #[test]
    fn test_merge_non_objects_prefers_server() {
        let result = resolver()
            .resolve(&json!([1]), &json!("server"), &ConflictStrategy::Merge)
            .unwrap();
        assert_eq!(result.final_value, json!("server"));
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn test_timestamp_threshold_edges() {
        let r = resolver();
        let threshold = r.config().timestamp_threshold as i64;
        let t = 1_700_000_000_000i64;
        let client = json!({"updatedAt": t, "qty": 1});

        let server = json!({"updatedAt": t + threshold + 1, "qty": 2});
        let result = r.resolve(&client, &server, &ConflictStrategy::TimestampBased).unwrap();
        assert_eq!(result.final_value, server);

        let server = json!({"updatedAt": t + threshold - 1, "qty": 2, "note": "x"});
        let result = r.resolve(&client, &server, &ConflictStrategy::TimestampBased).unwrap();
        let (merged, merge_confidence) = merge(&client, &server);
        assert_eq!(result.final_value, merged);
        assert_eq!(result.confidence, merge_confidence / 2.0);
    }

    #[test]
    fn test_timestamp_client_newer_and_rfc3339() {
        let client = json!({"updatedAt": "2024-05-01T12:00:10Z", "v": "client"});
        let server = json!({"updatedAt": "2024-05-01T12:00:00Z", "v": "server"});
        let result = resolver()
            .resolve(&client, &server, &ConflictStrategy::TimestampBased)
            .unwrap();
        assert_eq!(result.final_value, client);
        assert_eq!(result.confidence, TIMESTAMP_WIN_CONFIDENCE);
    }

    #[test]
    fn test_field_level_uses_field_timestamps() {
        let client = json!({
            "name": "Pikachu holo",
            "price": 40,
            "notes": "mint",
            "_fieldTimestamps": {"name": 200, "price": 100}
        });
        let server = json!({
            "name": "Pikachu",
            "price": 55,
            "graded": true,
            "_fieldTimestamps": {"name": 100, "price": 300}
        });

        let result = resolver()
            .resolve(&client, &server, &ConflictStrategy::FieldLevel)
            .unwrap();
        assert_eq!(
            result.final_value,
            json!({
                "name": "Pikachu holo",
                "price": 55,
                "notes": "mint",
                "graded": true,
                "_fieldTimestamps": {"name": 200, "price": 300}
            })
        );
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_field_level_defaults_to_server() {
        let result = resolver()
            .resolve(&json!({"a": 1, "b": 1}), &json!({"a": 2, "b": 1}), &ConflictStrategy::FieldLevel)
            .unwrap();
        assert_eq!(result.final_value, json!({"a": 2, "b": 1}));
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn test_version_based() {
        let r = resolver();
        let client = json!({"version": 4, "qty": 1});
        let server = json!({"version": 3, "qty": 2});
        let result = r.resolve(&client, &server, &ConflictStrategy::VersionBased).unwrap();
        assert_eq!(result.final_value, client);

        let server = json!({"version": 4, "extra": true});
        let result = r.resolve(&client, &server, &ConflictStrategy::VersionBased).unwrap();
        assert_eq!(result.final_value, json!({"version": 4, "qty": 1, "extra": true}));
    }

    #[test]
    fn test_user_choice_is_unresolved() {
        let result = resolver()
            .resolve(&json!({"a": 1}), &json!({"a": 2}), &ConflictStrategy::UserChoice)
            .unwrap();
        assert!(!result.resolved);
        assert_eq!(result.final_value, Value::Null);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_effective_strategy_without_user_choice() {
        let r = resolver();
        let result = r
            .resolve_effective(&json!({"a": 1}), &json!({"a": 2}), &ConflictStrategy::UserChoice)
            .unwrap();
        assert_eq!(result.strategy, ConflictStrategy::TimestampBased);

        r.update(&ConflictConfigUpdate {
            default_strategy: Some(ConflictStrategy::UserChoice),
            ..ConflictConfigUpdate::default()
        });
        let result = r
            .resolve_effective(&json!({"a": 1}), &json!({"a": 2}), &ConflictStrategy::UserChoice)
            .unwrap();
        assert_eq!(result.strategy, ConflictStrategy::ServerWins);

        r.update(&ConflictConfigUpdate {
            enable_user_choice: Some(true),
            ..ConflictConfigUpdate::default()
        });
        let result = r
            .resolve_effective(&json!({"a": 1}), &json!({"a": 2}), &ConflictStrategy::UserChoice)
            .unwrap();
        assert!(!result.resolved);
    }

    #[test]
    fn test_custom_resolver_registry() {
        let r = resolver();
        let strategy = ConflictStrategy::custom("max-qty");

        assert!(matches!(
            r.resolve(&json!({"qty": 1}), &json!({"qty": 5}), &strategy),
            Err(Error::Configuration(_))
        ));

        r.add_custom_resolver(
            "max-qty",
            CustomResolver::new(|client, server| {
                let c = client["qty"].as_i64().unwrap_or(0);
                let s = server["qty"].as_i64().unwrap_or(0);
                json!({"qty": c.max(s)})
            }),
        );
        let result = r.resolve(&json!({"qty": 7}), &json!({"qty": 5}), &strategy).unwrap();
        assert_eq!(result.final_value, json!({"qty": 7}));
        assert_eq!(result.strategy, strategy);

        assert!(r.remove_custom_resolver("max-qty"));
        assert!(!r.remove_custom_resolver("max-qty"));
    }

    #[test]
    fn test_missing_custom_resolver_falls_back_to_default() {
        let r = ConflictResolver::new(ConflictResolutionConfig {
            default_strategy: ConflictStrategy::ClientWins,
            ..ConflictResolutionConfig::default()
        });

        let (result, err) = r.resolve_with_fallback(
            &json!({"a": 1}),
            &json!({"a": 2}),
            &ConflictStrategy::custom("missing"),
        );
        assert!(matches!(err, Some(Error::Configuration(_))));
        assert_eq!(result.strategy, ConflictStrategy::ClientWins);
        assert_eq!(result.final_value, json!({"a": 1}));
    }

    #[test]
    fn test_update_keeps_resolvers() {
        let r = resolver();
        r.add_custom_resolver("keep", CustomResolver::new(|c, _| c.clone()));

        let config = r.update(&ConflictConfigUpdate {
            default_strategy: Some(ConflictStrategy::Merge),
            timestamp_threshold: Some(50),
            ..ConflictConfigUpdate::default()
        });

        assert_eq!(config.default_strategy, ConflictStrategy::Merge);
        assert_eq!(config.timestamp_threshold, 50);
        assert!(config.custom_resolvers.contains_key("keep"));
        assert_eq!(r.config().default_strategy, ConflictStrategy::Merge);
    }

    #[test]
    fn test_settings_exclude_resolvers() {
        let r = resolver();
        r.add_custom_resolver("k", CustomResolver::new(|c, _| c.clone()));
        let settings = r.config().to_settings().unwrap();
        assert!(settings.get("customResolvers").is_none());
        assert_eq!(settings["defaultStrategy"], "timestamp-based");
    }

    fn small_object() -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[a-e]", 0i64..5, 0..5).prop_map(|fields| {
            Value::Object(fields.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
        })
    }

    fn any_strategy() -> impl Strategy<Value = ConflictStrategy> {
        prop_oneof![
            Just(ConflictStrategy::ServerWins),
            Just(ConflictStrategy::ClientWins),
            Just(ConflictStrategy::Merge),
            Just(ConflictStrategy::TimestampBased),
            Just(ConflictStrategy::FieldLevel),
            Just(ConflictStrategy::VersionBased),
            Just(ConflictStrategy::UserChoice),
        ]
    }

    proptest! {
        #[test]
        fn prop_resolve_is_deterministic(
            client in small_object(),
            server in small_object(),
            strategy in any_strategy(),
        ) {
            let r = resolver();
            let first = r.resolve(&client, &server, &strategy).unwrap();
            let second = r.resolve(&client, &server, &strategy).unwrap();
            prop_assert_eq!(first.clone(), second);
            prop_assert!((0.0..=1.0).contains(&first.confidence));
        }

        #[test]
        fn prop_merge_keeps_every_key(client in small_object(), server in small_object()) {
            let (merged, _) = merge(&client, &server);
            let merged = merged.as_object().unwrap().clone();
            for (key, value) in server.as_object().unwrap() {
                prop_assert_eq!(merged.get(key), Some(value));
            }
            for key in client.as_object().unwrap().keys() {
                prop_assert!(merged.contains_key(key));
            }
        }
    }
}
