//! Transform phase: the streaming join engine.
//!
//! For every primary row the transformer resolves the transformation's
//! `select` list. A select key either copies a value straight from the
//! primary record or pulls it from a joined additional source. Joins form a
//! dependency graph: an `on` clause can reference the primary or a join that
//! only becomes available in a later iteration, so resolution runs as a
//! fixed point that keeps iterating while it makes progress. Join lookups go
//! through a shared accessor per target, deduplicated by the fingerprint
//! cache.

use crate::rowflow::cache::KeyValueCache;
use crate::rowflow::datasource::accessor::{accessor_for, DataAccessor};
use crate::rowflow::datasource::request::Request;
use crate::rowflow::error::{EtlError, EtlResult};
use crate::rowflow::metadata::{DataTransformation, Field, Metadata};
use crate::rowflow::record::{Record, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A fully projected row bearing its destination transformation name; the
/// unit on the `transformed` topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transformed {
    pub transformation_name: String,
    pub record: Record,
}

/// Applies transformation rules to primary rows
pub struct Transformer {
    metadata: Arc<Metadata>,
    cache: Option<Arc<KeyValueCache>>,
    /// One shared accessor per join target, built lazily under the lock
    accessors: Mutex<HashMap<String, Arc<dyn DataAccessor>>>,
}

impl Transformer {
    pub fn new(metadata: Arc<Metadata>, cache: Option<Arc<KeyValueCache>>) -> Self {
        Transformer {
            metadata,
            cache,
            accessors: Mutex::new(HashMap::new()),
        }
    }

    /// Pre-register an accessor for a join target, bypassing driver
    /// construction
    pub async fn register_accessor(&self, target: &str, accessor: Arc<dyn DataAccessor>) {
        self.accessors
            .lock()
            .await
            .insert(target.to_string(), accessor);
    }

    /// Resolve the whole select list of a transformation against one primary
    /// record (named shape). Produces all keys or fails; partially resolved
    /// rows are never emitted.
    pub async fn transform(
        &self,
        transformation_name: &str,
        primary: &Record,
    ) -> EtlResult<Transformed> {
        let transformation = self
            .metadata
            .transform
            .get(transformation_name)
            .ok_or_else(|| {
                EtlError::bad_metadata(format!(
                    "invalid transformation with name '{}' in metadata",
                    transformation_name
                ))
            })?;

        let mut joins: HashMap<String, Record> = HashMap::new();
        let mut produced: HashMap<String, Value> = HashMap::new();

        loop {
            let pending: Vec<&String> = transformation
                .select
                .keys()
                .filter(|key| !produced.contains_key(*key))
                .collect();

            for key in &pending {
                let clause = &transformation.select[*key];
                let (alias, field_name) = clause.parse()?;

                if alias == transformation.from {
                    let value = primary.get_named(&field_name).map_err(|_| {
                        EtlError::missing_field(
                            &field_name,
                            format!("primary datasource values of '{}'", transformation.from),
                        )
                    })?;
                    produced.insert((*key).clone(), value.clone());
                } else {
                    match self
                        .join(&mut joins, transformation, &alias, primary)
                        .await
                    {
                        Ok(()) => {}
                        Err(EtlError::TemporaryUnavailableJoin { alias }) => {
                            log::debug!(
                                "join '{}' is not resolvable yet; leaving it for a later iteration",
                                alias
                            );
                            continue;
                        }
                        Err(err) => return Err(err),
                    }
                    let joined = match joins.get(&alias) {
                        Some(joined) => joined,
                        None => continue,
                    };
                    let value = joined.get_named(&field_name).map_err(|_| {
                        EtlError::missing_field(&field_name, format!("joined datasource '{}'", alias))
                    })?;
                    produced.insert((*key).clone(), value.clone());
                }
            }

            let total = transformation.select.len();
            let remaining = total - produced.len();
            let keep_looking = remaining > 0 && remaining < pending.len();
            if !keep_looking {
                break;
            }
        }

        if produced.len() < transformation.select.len() {
            let mut missing: Vec<String> = transformation
                .select
                .keys()
                .filter(|key| !produced.contains_key(*key))
                .cloned()
                .collect();
            missing.sort();
            return Err(EtlError::unsatisfiable_joins(transformation_name, missing));
        }

        let mut record = Record::new_named();
        for (key, value) in produced {
            record.set_named(&key, value)?;
        }
        Ok(Transformed {
            transformation_name: transformation_name.to_string(),
            record,
        })
    }

    /// Resolve one join alias for the current row, if its dependencies allow.
    ///
    /// Every on clause needs one side that is already known (the primary or a
    /// previously resolved join); the other side names the field to filter on
    /// the target. When no side is known yet the internal
    /// `TemporaryUnavailableJoin` sentinel defers the join to a later
    /// iteration of the fixed point.
    async fn join(
        &self,
        joins: &mut HashMap<String, Record>,
        transformation: &DataTransformation,
        alias: &str,
        primary: &Record,
    ) -> EtlResult<()> {
        if joins.contains_key(alias) {
            return Ok(());
        }
        let join = transformation.joins.get(alias).ok_or_else(|| {
            EtlError::bad_metadata(format!("join '{}' not found in metadata", alias))
        })?;
        let target = self
            .metadata
            .extract
            .additional
            .get(&join.to)
            .ok_or_else(|| {
                EtlError::unknown_data_source(
                    join.to.clone(),
                    "additional datasource not found in metadata",
                )
            })?;
        let accessor = self.accessor(&join.to, target).await?;

        let mut filters: BTreeMap<Field, Value> = BTreeMap::new();
        for on_clause in &join.on {
            let (left, right) = on_clause.parse()?;
            let (left_alias, left_field) = left.parse()?;
            let (right_alias, right_field) = right.parse()?;

            if join.to != left_alias && join.to != right_alias {
                return Err(EtlError::bad_metadata(format!(
                    "wrong join on clause '{}': neither side matches the target '{}' of join '{}'",
                    on_clause, join.to, alias
                )));
            }

            let (existing_alias, existing_field, pending_field) =
                if left_alias == transformation.from || joins.contains_key(&left_alias) {
                    (left_alias, left_field, right_field)
                } else if right_alias == transformation.from || joins.contains_key(&right_alias) {
                    (right_alias, right_field, left_field)
                } else {
                    return Err(EtlError::temporary_unavailable(alias));
                };

            let field = target.find_field(&pending_field)?.clone();
            let value = if existing_alias == transformation.from {
                primary
                    .get_named(&existing_field)
                    .map_err(|_| {
                        EtlError::missing_field(
                            &existing_field,
                            format!("primary datasource values of '{}'", transformation.from),
                        )
                    })?
                    .clone()
            } else {
                joins[&existing_alias]
                    .get_named(&existing_field)
                    .map_err(|_| {
                        EtlError::missing_field(
                            &existing_field,
                            format!("joined datasource '{}'", existing_alias),
                        )
                    })?
                    .clone()
            };
            filters.insert(field, value);
        }

        let request = Request::new(target.object_identifier.clone(), filters);
        let record = self.fetch_join(alias, accessor, request).await?;
        joins.insert(alias.to_string(), record);
        Ok(())
    }

    /// Get or build the shared accessor for a join target. The lock is held
    /// across construction so exactly one accessor is ever built per target.
    async fn accessor(
        &self,
        target_name: &str,
        endpoint: &crate::rowflow::metadata::DataEndpoint,
    ) -> EtlResult<Arc<dyn DataAccessor>> {
        let mut accessors = self.accessors.lock().await;
        if let Some(existing) = accessors.get(target_name) {
            return Ok(Arc::clone(existing));
        }
        let built = accessor_for(endpoint).await?;
        accessors.insert(target_name.to_string(), Arc::clone(&built));
        Ok(built)
    }

    /// Fetch a join record through the fingerprint cache. The cache key is
    /// the join alias plus the request fingerprint; record GUIDs are not part
    /// of it, so hits are content-equivalent across rows.
    async fn fetch_join(
        &self,
        alias: &str,
        accessor: Arc<dyn DataAccessor>,
        request: Request,
    ) -> EtlResult<Record> {
        match &self.cache {
            Some(cache) => {
                let cache_key = format!("{}->{}", alias, request.fingerprint());
                let fetch_request = request.clone();
                let encoded = cache
                    .retrieve(&cache_key, || async move {
                        let record = accessor.fetch(fetch_request.clone()).await?.ok_or_else(|| {
                            missing_join_record(&fetch_request)
                        })?;
                        Ok(serde_json::to_value(&record)?)
                    })
                    .await?;
                let record: Record = serde_json::from_str(&encoded)?;
                Ok(record)
            }
            None => accessor
                .fetch(request.clone())
                .await?
                .ok_or_else(|| missing_join_record(&request)),
        }
    }
}

fn missing_join_record(request: &Request) -> EtlError {
    EtlError::bad_record(
        format!("no record matches join filters {}", request.fingerprint()),
        None,
    )
}
