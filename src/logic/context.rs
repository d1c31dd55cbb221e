use crate::error::EngineResult;
use crate::model::{ServerContext, TypeRegistry};
use crate::store::Store;

/// Everything an engine operation needs to know about its surroundings:
/// who we are, what the types look like, and the two repositories.
#[derive(Clone, Copy)]
pub struct EngineContext<'a> {
    pub registry: &'a TypeRegistry,
    pub server: &'a ServerContext,
    /// Working copies: every record, dataset, structure, event and subscription
    pub draft: &'a dyn Store,
    /// Published copies of released datasets
    pub materialized: &'a dyn Store,
}

impl<'a> EngineContext<'a> {
    pub fn new(
        registry: &'a TypeRegistry,
        server: &'a ServerContext,
        draft: &'a dyn Store,
        materialized: &'a dyn Store,
    ) -> Self {
        Self {
            registry,
            server,
            draft,
            materialized,
        }
    }
}

/// Run `f` inside a transaction on every store; any error rolls all of them back
pub fn atomically<T, F>(stores: &[&dyn Store], f: F) -> EngineResult<T>
where
    F: FnOnce() -> EngineResult<T>,
{
    for (opened, store) in stores.iter().enumerate() {
        if let Err(e) = store.begin() {
            for store in &stores[..opened] {
                store.rollback().ok();
            }
            return Err(e);
        }
    }
    match f() {
        Ok(value) => {
            for store in stores {
                store.commit()?;
            }
            Ok(value)
        }
        Err(e) => {
            for store in stores {
                if let Err(rollback_error) = store.rollback() {
                    log::error!("Rollback failed: {}", rollback_error);
                }
            }
            Err(e)
        }
    }
}
