use reqwest::Url;

use crate::error::{EngineError, EngineResult};
use crate::logic::catalog::namespace_for;
use crate::logic::EngineContext;
use crate::model::{scalar_to_text, Id, Record, ServerContext, SYSTEM_NAMESPACE};
use crate::store::Store;

/// The pieces of `scheme://host/namespace/Type/idValue`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUri {
    /// Everything before the namespace segment; the owning server's URI
    pub base: String,
    pub namespace: String,
    pub type_name: String,
    pub id_value: String,
}

/// Outcome of looking a URI up in one store
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Local(Record),
    /// Not stored here and minted by another server
    External(ParsedUri),
    NotFound,
}

fn build_uri(base: &str, segments: &[&str]) -> String {
    if let Ok(mut url) = Url::parse(base) {
        let extended = match url.path_segments_mut() {
            Ok(mut path) => {
                path.pop_if_empty().extend(segments);
                true
            }
            Err(()) => false,
        };
        if extended {
            return url.to_string();
        }
    }
    log::warn!("Server URI {} is not a base URL, joining URI segments by hand", base);
    format!("{}/{}", base.trim_end_matches('/'), segments.join("/"))
}

/// URI for an engine entity (dataset, structure) in the system namespace
pub fn system_uri(server: &ServerContext, kind: &str, id: &Id) -> String {
    build_uri(server.uri(), &[SYSTEM_NAMESPACE, kind, id.as_str()])
}

/// Mint the URI for a record; never fails, falling back to the primary key
/// and the default namespace when metadata is missing.
pub fn generate_uri(ctx: &EngineContext, record: &Record) -> String {
    let id_value = ctx
        .registry
        .get(&record.type_name)
        .and_then(|t| t.id_field.as_deref())
        .and_then(|field| record.field(field))
        .filter(|v| !v.is_null())
        .map(scalar_to_text)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| record.id.clone());

    let namespace = namespace_for(ctx, &record.type_name);
    build_uri(
        ctx.server.uri(),
        &[namespace.as_str(), record.type_name.as_str(), id_value.as_str()],
    )
}

pub fn parse_uri(uri: &str) -> EngineResult<ParsedUri> {
    let url = Url::parse(uri).map_err(|e| EngineError::Format(format!("Invalid URI {}: {}", uri, e)))?;
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    if segments.len() < 3 {
        return Err(EngineError::Format(format!(
            "URI {} does not have the form scheme://host/namespace/Type/id",
            uri
        )));
    }
    let tail = &segments[segments.len() - 3..];
    let prefix = &segments[..segments.len() - 3];

    let mut base = url.origin().ascii_serialization();
    for segment in prefix {
        base.push('/');
        base.push_str(segment);
    }
    Ok(ParsedUri {
        base,
        namespace: tail[0].to_string(),
        type_name: tail[1].to_string(),
        id_value: tail[2].to_string(),
    })
}

/// Was this URI minted by this server?
pub fn is_local(server: &ServerContext, uri: &str) -> bool {
    match parse_uri(uri) {
        Ok(parsed) => server.owns(&parsed.base),
        Err(_) => uri.starts_with(&format!("{}/", server.uri())),
    }
}

/// Look up by own URI first, then by provenance
pub fn resolve(ctx: &EngineContext, store: &dyn Store, uri: &str) -> EngineResult<Resolution> {
    if let Some(record) = store.get_record_by_uri(uri)? {
        return Ok(Resolution::Local(record));
    }
    if let Some(record) = store.get_record_imported_from(uri)? {
        return Ok(Resolution::Local(record));
    }
    if is_local(ctx.server, uri) {
        return Ok(Resolution::NotFound);
    }
    match parse_uri(uri) {
        Ok(parsed) => Ok(Resolution::External(parsed)),
        Err(_) => Ok(Resolution::NotFound),
    }
}

/// Save a record, assigning its URI on the first save. Once set the URI never changes.
///
/// When the identifying field yields a URI already held by another record
/// (a new version of the same entity) the primary key is used instead.
pub fn persist(ctx: &EngineContext, store: &dyn Store, mut record: Record) -> EngineResult<Record> {
    if record.uri.is_empty() {
        let mut uri = generate_uri(ctx, &record);
        if store
            .get_record_by_uri(&uri)?
            .is_some_and(|other| other.id != record.id)
        {
            let namespace = namespace_for(ctx, &record.type_name);
            uri = build_uri(
                ctx.server.uri(),
                &[namespace.as_str(), record.type_name.as_str(), record.id.as_str()],
            );
        }
        record.uri = uri;
        log::debug!("Assigned URI {}", record.uri);
    }
    record.touch();
    store.save_record(record.clone())?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataType, TypeDef, TypeRegistry};
    use crate::store::{MemoryStore, RecordStore};

    fn fixtures() -> (TypeRegistry, ServerContext, MemoryStore, MemoryStore) {
        let registry = TypeRegistry::new()
            .with(TypeDef::new("License").field("short_name", DataType::String).identified_by("short_name"));
        let server = ServerContext::new("http://ks.example.org", "Example", "geo");
        (registry, server, MemoryStore::new("draft"), MemoryStore::new("materialized"))
    }

    #[test]
    fn test_generate_uri_uses_default_namespace_and_primary_key() {
        let (registry, server, draft, materialized) = fixtures();
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);
        let record = Record::new("Continent");
        assert_eq!(
            generate_uri(&ctx, &record),
            format!("http://ks.example.org/geo/Continent/{}", record.id)
        );
    }

    #[test]
    fn test_generate_uri_uses_id_field() {
        let (registry, server, draft, materialized) = fixtures();
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);
        let record = Record::new("License").with_field("short_name", "CC-BY");
        assert_eq!(generate_uri(&ctx, &record), "http://ks.example.org/geo/License/CC-BY");
    }

    #[test]
    fn test_parse_uri() {
        let parsed = parse_uri("https://other.org/ks-a/geo/State/42").unwrap();
        assert_eq!(parsed.base, "https://other.org/ks-a");
        assert_eq!(parsed.namespace, "geo");
        assert_eq!(parsed.type_name, "State");
        assert_eq!(parsed.id_value, "42");
        assert!(parse_uri("https://other.org/State").is_err());
        assert!(parse_uri("not a uri").is_err());
    }

    #[test]
    fn test_persist_assigns_uri_once() {
        let (registry, server, draft, materialized) = fixtures();
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);
        let saved = persist(&ctx, &draft, Record::new("Continent")).unwrap();
        assert!(!saved.uri.is_empty());
        let again = persist(&ctx, &draft, saved.clone()).unwrap();
        assert_eq!(again.uri, saved.uri);
    }

    #[test]
    fn test_persist_falls_back_to_primary_key_on_taken_uri() {
        let (registry, server, draft, materialized) = fixtures();
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);
        let first = persist(&ctx, &draft, Record::new("License").with_field("short_name", "MIT")).unwrap();
        let second = persist(&ctx, &draft, Record::new("License").with_field("short_name", "MIT")).unwrap();
        assert_eq!(first.uri, "http://ks.example.org/geo/License/MIT");
        assert_eq!(second.uri, format!("http://ks.example.org/geo/License/{}", second.id));
    }

    #[test]
    fn test_resolve_local_imported_and_external() {
        let (registry, server, draft, materialized) = fixtures();
        let ctx = EngineContext::new(&registry, &server, &draft, &materialized);

        let mut imported = Record::new("State");
        imported.uri = "http://ks.example.org/geo/State/7".to_string();
        imported.imported_from_uri = Some("http://other.org/geo/State/1".to_string());
        draft.save_record(imported.clone()).unwrap();

        match resolve(&ctx, &draft, "http://other.org/geo/State/1").unwrap() {
            Resolution::Local(r) => assert_eq!(r.id, imported.id),
            other => panic!("expected local record, got {:?}", other),
        }
        assert!(matches!(
            resolve(&ctx, &draft, "http://other.org/geo/State/2").unwrap(),
            Resolution::External(_)
        ));
        assert_eq!(
            resolve(&ctx, &draft, "http://ks.example.org/geo/State/99").unwrap(),
            Resolution::NotFound
        );
    }
}
