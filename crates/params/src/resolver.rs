use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use tracing::{debug, instrument};

use refundry_core::MerchantId;
use refundry_state::{KeyKind, StateKey, StateStore};

use crate::definition::ParameterDefinition;
use crate::hierarchy::HierarchyProvider;
use crate::record::{EntityLevel, Parameter};
use crate::value::ParameterValue;
use crate::ParamError;

/// Which hierarchy level produced a resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Merchant,
    Organization,
    Bank,
    Program,
    /// The definition's built-in default.
    Default,
}

/// A resolved parameter value together with its source level.
#[derive(Debug, Clone)]
pub struct ResolvedParameter {
    pub value: ParameterValue,
    pub source: ValueSource,
}

/// Configuration for the resolver's read-through cache.
#[derive(Debug, Clone)]
pub struct ParameterResolverConfig {
    /// TTL bounding staleness after an uncoordinated write. Default 300 s.
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
}

impl Default for ParameterResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 10_000,
        }
    }
}

/// Separator between the name and merchant segments of a cache key. Never
/// appears in parameter names, so prefix invalidation cannot over-match.
const CACHE_KEY_SEP: char = '\u{1f}';

/// Resolves effective parameter values across the four-level hierarchy.
///
/// Records are read from the shared state store; resolution results are
/// cached per `(name, merchant)` with a TTL. A write to any level
/// pattern-invalidates every cached entry for that name across all merchants.
pub struct ParameterResolver {
    state: Arc<dyn StateStore>,
    hierarchy: Arc<dyn HierarchyProvider>,
    definitions: HashMap<String, ParameterDefinition>,
    cache: Cache<String, ResolvedParameter>,
}

impl ParameterResolver {
    /// Create a resolver with the given definitions.
    pub fn new(
        state: Arc<dyn StateStore>,
        hierarchy: Arc<dyn HierarchyProvider>,
        definitions: Vec<ParameterDefinition>,
        config: ParameterResolverConfig,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl)
            .support_invalidation_closures()
            .build();
        Self {
            state,
            hierarchy,
            definitions: definitions
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
            cache,
        }
    }

    /// Look up a registered definition.
    #[must_use]
    pub fn definition(&self, name: &str) -> Option<&ParameterDefinition> {
        self.definitions.get(name)
    }

    fn cache_key(name: &str, merchant: &MerchantId) -> String {
        format!("{name}{CACHE_KEY_SEP}{merchant}")
    }

    fn record_key(entity_id: &str, name: &str) -> StateKey {
        StateKey::new(entity_id, KeyKind::Parameter, name)
    }

    /// Load all versioned records for one `(entity, name)` pair.
    async fn load_records(
        &self,
        entity_id: &str,
        name: &str,
    ) -> Result<Vec<Parameter>, ParamError> {
        let key = Self::record_key(entity_id, name);
        match self
            .state
            .get(&key)
            .await
            .map_err(|e| ParamError::State(e.to_string()))?
        {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| ParamError::Serialization(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    /// Find the record effective at `at` for one `(entity, name)` pair.
    async fn effective_record(
        &self,
        entity_id: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Parameter>, ParamError> {
        let records = self.load_records(entity_id, name).await?;
        Ok(records.into_iter().find(|r| r.is_effective(at)))
    }

    /// Resolve the effective value of `name` for `merchant` at the current
    /// instant. See [`resolve_at`](Self::resolve_at).
    pub async fn resolve(
        &self,
        name: &str,
        merchant: &MerchantId,
    ) -> Result<ResolvedParameter, ParamError> {
        self.resolve_at(name, merchant, Utc::now()).await
    }

    /// Resolve the effective value of `name` for `merchant` at instant `at`.
    ///
    /// Walks the hierarchy root-first (Program → Bank → Organization →
    /// Merchant). A more specific record overrides a more general one, but a
    /// record with `overridable = false` pins the value for every level
    /// below it. Falls back to the definition's default when no record is
    /// effective anywhere in the chain.
    #[instrument(skip(self), fields(name, merchant = %merchant))]
    pub async fn resolve_at(
        &self,
        name: &str,
        merchant: &MerchantId,
        at: DateTime<Utc>,
    ) -> Result<ResolvedParameter, ParamError> {
        let cache_key = Self::cache_key(name, merchant);
        if let Some(cached) = self.cache.get(&cache_key).await {
            return Ok(cached);
        }

        let definition = self
            .definitions
            .get(name)
            .ok_or_else(|| ParamError::Unknown(name.to_owned()))?;

        let chain = self.hierarchy.chain(merchant).await?;

        // Root-first walk; the last hit wins unless a record pins itself.
        let levels: [(&str, ValueSource); 4] = [
            ("PROGRAM", ValueSource::Program),
            (chain.bank_id.as_str(), ValueSource::Bank),
            (chain.organization_id.as_str(), ValueSource::Organization),
            (chain.merchant_id.as_str(), ValueSource::Merchant),
        ];

        let mut selected: Option<(Parameter, ValueSource)> = None;
        for (entity_id, source) in levels {
            if let Some(record) = self.effective_record(entity_id, name, at).await? {
                let pinned = !record.overridable;
                selected = Some((record, source));
                if pinned {
                    break;
                }
            }
        }

        let resolved = match selected {
            Some((record, source)) => ResolvedParameter {
                value: record.value,
                source,
            },
            None => {
                let default = definition
                    .default
                    .clone()
                    .ok_or_else(|| ParamError::Unresolved(name.to_owned()))?;
                ResolvedParameter {
                    value: default,
                    source: ValueSource::Default,
                }
            }
        };

        debug!(source = ?resolved.source, "parameter resolved");
        self.cache.insert(cache_key, resolved.clone()).await;
        Ok(resolved)
    }

    /// Write a parameter record at some hierarchy level.
    ///
    /// Enforces definition validation, `(name, level, entity,
    /// effective_date)` uniqueness, and the one-effective-record-per-instant
    /// invariant. On success every cached resolution of `name` is dropped
    /// across all merchants.
    #[instrument(skip(self, record), fields(name = %record.name, entity = %record.entity_id))]
    pub async fn write(&self, record: Parameter) -> Result<(), ParamError> {
        let definition = self
            .definitions
            .get(&record.name)
            .ok_or_else(|| ParamError::Unknown(record.name.clone()))?;
        definition.validate(&record.value)?;

        let mut records = self.load_records(&record.entity_id, &record.name).await?;

        for existing in &records {
            if existing.effective_date == record.effective_date {
                return Err(ParamError::Conflict(format!(
                    "{} at {} already has a record effective {}",
                    record.name, record.entity_id, record.effective_date
                )));
            }
            if existing.overlaps(&record) {
                return Err(ParamError::Conflict(format!(
                    "{} at {} would have two effective records between {} and {:?}",
                    record.name, record.entity_id, record.effective_date, record.expiration_date
                )));
            }
        }

        let name = record.name.clone();
        let entity_id = record.entity_id.clone();
        records.push(record);

        let raw = serde_json::to_string(&records)
            .map_err(|e| ParamError::Serialization(e.to_string()))?;
        self.state
            .set(&Self::record_key(&entity_id, &name), &raw, None)
            .await
            .map_err(|e| ParamError::State(e.to_string()))?;

        // Pattern invalidation: drop every cached entry for this name.
        let prefix = format!("{name}{CACHE_KEY_SEP}");
        self.cache
            .invalidate_entries_if(move |k, _| k.starts_with(&prefix))
            .map_err(|e| ParamError::State(e.to_string()))?;

        Ok(())
    }

    /// List all records stored for one entity, across parameter names.
    pub async fn list_for_entity(
        &self,
        entity_id: &str,
    ) -> Result<Vec<Parameter>, ParamError> {
        let entries = self
            .state
            .scan_keys(entity_id, KeyKind::Parameter, None)
            .await
            .map_err(|e| ParamError::State(e.to_string()))?;

        let mut all = Vec::new();
        for (_, raw) in entries {
            let mut records: Vec<Parameter> = serde_json::from_str(&raw)
                .map_err(|e| ParamError::Serialization(e.to_string()))?;
            all.append(&mut records);
        }
        Ok(all)
    }
}

impl std::fmt::Debug for ParameterResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterResolver")
            .field("definitions", &self.definitions.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ParameterDefinition;
    use crate::hierarchy::StaticHierarchy;
    use crate::value::DataType;
    use chrono::Duration as ChronoDuration;
    use refundry_state_memory::MemoryStateStore;

    const PARAM: &str = "maxRefundAgeDays";

    async fn resolver_with(records: Vec<Parameter>) -> ParameterResolver {
        let state = Arc::new(MemoryStateStore::new());
        let hierarchy =
            Arc::new(StaticHierarchy::new().with_merchant("m-1", "org-1", "bank-1"));
        let resolver = ParameterResolver::new(
            state,
            hierarchy,
            vec![
                ParameterDefinition::new(PARAM, DataType::Number)
                    .with_default(ParameterValue::Number(90)),
            ],
            ParameterResolverConfig::default(),
        );
        for record in records {
            resolver
                .write(record)
                .await
                .expect("seed write should succeed");
        }
        resolver
    }

    fn record(level: EntityLevel, entity: &str, value: i64, overridable: bool) -> Parameter {
        Parameter {
            name: PARAM.into(),
            entity_level: level,
            entity_id: entity.into(),
            value: ParameterValue::Number(value),
            effective_date: Utc::now() - ChronoDuration::hours(1),
            expiration_date: None,
            overridable,
            version: 1,
            created_at: Utc::now(),
            created_by: "test".into(),
        }
    }

    #[tokio::test]
    async fn merchant_record_wins() {
        let resolver = resolver_with(vec![
            record(EntityLevel::Program, "PROGRAM", 365, true),
            record(EntityLevel::Merchant, "m-1", 30, true),
        ])
        .await;

        let resolved = resolver
            .resolve(PARAM, &MerchantId::from("m-1"))
            .await
            .unwrap();
        assert_eq!(resolved.value.as_i64(), Some(30));
        assert_eq!(resolved.source, ValueSource::Merchant);
    }

    #[tokio::test]
    async fn falls_back_through_hierarchy() {
        let resolver = resolver_with(vec![record(EntityLevel::Bank, "bank-1", 180, true)]).await;

        let resolved = resolver
            .resolve(PARAM, &MerchantId::from("m-1"))
            .await
            .unwrap();
        assert_eq!(resolved.value.as_i64(), Some(180));
        assert_eq!(resolved.source, ValueSource::Bank);
    }

    #[tokio::test]
    async fn default_when_nothing_configured() {
        let resolver = resolver_with(vec![]).await;

        let resolved = resolver
            .resolve(PARAM, &MerchantId::from("m-1"))
            .await
            .unwrap();
        assert_eq!(resolved.value.as_i64(), Some(90));
        assert_eq!(resolved.source, ValueSource::Default);
    }

    #[tokio::test]
    async fn non_overridable_ancestor_pins_value() {
        let resolver = resolver_with(vec![
            record(EntityLevel::Bank, "bank-1", 60, false),
            record(EntityLevel::Merchant, "m-1", 365, true),
        ])
        .await;

        let resolved = resolver
            .resolve(PARAM, &MerchantId::from("m-1"))
            .await
            .unwrap();
        assert_eq!(
            resolved.value.as_i64(),
            Some(60),
            "non-overridable bank record must win over merchant record"
        );
        assert_eq!(resolved.source, ValueSource::Bank);
    }

    #[tokio::test]
    async fn expired_record_is_skipped() {
        let mut expired = record(EntityLevel::Merchant, "m-1", 10, true);
        expired.effective_date = Utc::now() - ChronoDuration::days(10);
        expired.expiration_date = Some(Utc::now() - ChronoDuration::days(1));
        let resolver = resolver_with(vec![expired]).await;

        let resolved = resolver
            .resolve(PARAM, &MerchantId::from("m-1"))
            .await
            .unwrap();
        assert_eq!(resolved.source, ValueSource::Default);
    }

    #[tokio::test]
    async fn unknown_parameter_fails() {
        let resolver = resolver_with(vec![]).await;
        let err = resolver
            .resolve("noSuchParameter", &MerchantId::from("m-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ParamError::Unknown(_)));
    }

    #[tokio::test]
    async fn write_invalidates_cached_resolution() {
        let resolver = resolver_with(vec![]).await;
        let merchant = MerchantId::from("m-1");

        // Prime the cache with the default.
        let first = resolver.resolve(PARAM, &merchant).await.unwrap();
        assert_eq!(first.source, ValueSource::Default);

        // Write a merchant-level record; the cache entry must be dropped.
        resolver
            .write(record(EntityLevel::Merchant, "m-1", 14, true))
            .await
            .unwrap();

        // moka's invalidation closures run eagerly on read paths, but give
        // the maintenance task a tick to settle.
        tokio::task::yield_now().await;

        let second = resolver.resolve(PARAM, &merchant).await.unwrap();
        assert_eq!(second.value.as_i64(), Some(14));
        assert_eq!(second.source, ValueSource::Merchant);
    }

    #[tokio::test]
    async fn duplicate_effective_date_conflicts() {
        let resolver = resolver_with(vec![]).await;
        let r = record(EntityLevel::Merchant, "m-1", 14, true);
        let mut dup = r.clone();
        dup.value = ParameterValue::Number(21);

        resolver.write(r).await.unwrap();
        let err = resolver.write(dup).await.unwrap_err();
        assert!(matches!(err, ParamError::Conflict(_)));
    }

    #[tokio::test]
    async fn overlapping_windows_conflict() {
        let resolver = resolver_with(vec![]).await;
        let mut first = record(EntityLevel::Merchant, "m-1", 14, true);
        first.effective_date = Utc::now() - ChronoDuration::days(2);
        first.expiration_date = None;

        let mut second = record(EntityLevel::Merchant, "m-1", 21, true);
        second.effective_date = Utc::now() - ChronoDuration::days(1);

        resolver.write(first).await.unwrap();
        let err = resolver.write(second).await.unwrap_err();
        assert!(matches!(err, ParamError::Conflict(_)));
    }

    #[tokio::test]
    async fn write_validates_against_definition() {
        let resolver = resolver_with(vec![]).await;
        let mut bad = record(EntityLevel::Merchant, "m-1", 14, true);
        bad.value = ParameterValue::String("fourteen".into());

        let err = resolver.write(bad).await.unwrap_err();
        assert!(matches!(err, ParamError::Invalid { .. }));
    }
}
