use crate::engine::KnowledgeEngine;
use crate::logic::{FieldPath, FilterExpr, NewDataSet};
use crate::model::{DataSet, DataSetStructure, DataType, Id, Record, RecordFilter, TypeDef, TypeRegistry};
use crate::store::Store;
use anyhow::Result;

/// Type registry used when no registry file is configured: world
/// geography plus a license catalog
pub fn default_registry() -> TypeRegistry {
    TypeRegistry::new()
        .with(
            TypeDef::new("Continent")
                .field("name", DataType::String)
                .collection("sub_continents", "SubContinent", Some("continent"))
                .collection("states", "State", Some("continent")),
        )
        .with(
            TypeDef::new("SubContinent")
                .field("name", DataType::String)
                .reference("continent", "Continent"),
        )
        .with(
            TypeDef::new("State")
                .field("name", DataType::String)
                .field("population", DataType::Integer)
                .reference("continent", "Continent")
                .reference("sub_continent", "SubContinent")
                .reference("license", "License"),
        )
        .with(
            TypeDef::new("License")
                .field("short_name", DataType::String)
                .field("full_name", DataType::String)
                .field("legalcode", DataType::String)
                .display("short_name")
                .identified_by("short_name"),
        )
}

/// Continent -> sub continents and states; a state's license is external
pub fn continents_structure() -> DataSetStructure {
    let mut structure = DataSetStructure::new("Continents", "geo").describe("Continents with their states");
    let root = structure.add_root("Continent");
    structure.add_child(root, "SubContinent", "sub_continents", true, false);
    let states = structure.add_child(root, "State", "states", true, false);
    structure.add_child(states, "License", "license", false, true);
    structure
}

/// One license per dataset; every released version stays published
pub fn licenses_structure() -> DataSetStructure {
    let mut structure = DataSetStructure::new("Licenses", "legal")
        .describe("Content licenses")
        .multiple_releases();
    structure.add_root("License");
    structure
}

/// Filtered selection of states across every released continent
pub fn states_view_structure() -> DataSetStructure {
    let mut structure = DataSetStructure::new("StatesView", "geo")
        .describe("States selected by a filter")
        .view();
    structure.add_root("State");
    structure
}

pub struct SeedSummary {
    pub licenses: Vec<DataSet>,
    pub continents: DataSet,
    pub large_states: DataSet,
}

pub fn load_seed_data<S: Store>(engine: &KnowledgeEngine<S>) -> Result<SeedSummary> {
    for structure in [continents_structure(), licenses_structure(), states_view_structure()] {
        let structure = engine.register_structure(structure)?;
        log::info!("Registered structure {} ({})", structure.name, structure.uri);
    }

    let licenses = load_licenses(engine)?;
    let license = licenses
        .first()
        .and_then(|dataset| dataset.root.clone())
        .ok_or_else(|| anyhow::anyhow!("license catalog is empty"))?;
    let continents = load_europe(engine, &license)?;

    let large_states = engine.create_view(
        "StatesView",
        RecordFilter::of_type("State").matching(FilterExpr::Gte {
            gte: (FieldPath::new("$.population"), serde_json::json!(50_000_000)),
        }),
        Some("States with at least fifty million inhabitants".to_string()),
    )?;

    Ok(SeedSummary {
        licenses,
        continents,
        large_states,
    })
}

fn load_licenses<S: Store>(engine: &KnowledgeEngine<S>) -> Result<Vec<DataSet>> {
    let catalog = [
        (
            "CC-BY-4.0",
            "Creative Commons Attribution 4.0 International",
            "https://creativecommons.org/licenses/by/4.0/legalcode",
        ),
        (
            "CC0-1.0",
            "Creative Commons Zero v1.0 Universal",
            "https://creativecommons.org/publicdomain/zero/1.0/legalcode",
        ),
    ];

    let mut datasets = Vec::new();
    for (short_name, full_name, legalcode) in catalog {
        let license = engine.save_record(
            Record::new("License")
                .with_field("short_name", short_name)
                .with_field("full_name", full_name)
                .with_field("legalcode", legalcode),
        )?;
        let dataset = engine.create_dataset(
            "Licenses",
            NewDataSet {
                root: license.id,
                description: Some(full_name.to_string()),
                ..Default::default()
            },
        )?;
        engine.release(&dataset.id)?;
        datasets.push(dataset);
    }
    Ok(datasets)
}

fn load_europe<S: Store>(engine: &KnowledgeEngine<S>, license: &Id) -> Result<DataSet> {
    let south = engine.save_record(Record::new("SubContinent").with_field("name", "Southern Europe"))?;
    let west = engine.save_record(Record::new("SubContinent").with_field("name", "Western Europe"))?;

    let states = [
        ("Italy", 59_000_000, &south),
        ("Spain", 48_000_000, &south),
        ("France", 68_000_000, &west),
    ];
    let mut state_ids = Vec::new();
    for (name, population, sub_continent) in states {
        let state = engine.save_record(
            Record::new("State")
                .with_field("name", name)
                .with_field("population", population)
                .with_link("sub_continent", &sub_continent.id)
                .with_link("license", license),
        )?;
        state_ids.push(state.id);
    }

    let europe = engine.save_record(
        Record::new("Continent")
            .with_field("name", "Europe")
            .with_links("sub_continents", vec![south.id, west.id])
            .with_links("states", state_ids),
    )?;
    let dataset = engine.create_dataset(
        "Continents",
        NewDataSet {
            root: europe.id,
            description: Some("Europe".to_string()),
            version_description: Some("Initial import".to_string()),
            ..Default::default()
        },
    )?;
    let outcome = engine.release(&dataset.id)?;
    log::info!(
        "Seeded {} with {} changed types",
        outcome.dataset.uri,
        outcome.changes.changed_types().len()
    );
    Ok(outcome.dataset)
}
