//! Relations and the dependency/selection resolver.
//!
//! A relation is a table, CTAS-derived table, or view managed by the ETL.
//! Relations declare their dependencies as a flat list of identifiers; the
//! resolver turns a relation set into a total execution order and computes
//! the subset ("dirty set") to act on for a given selection.

pub mod design;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::config::EtlConfig;
use crate::error::{EtlError, Result};
use crate::names::{TableName, TableSelector};

pub use design::{ColumnDef, Distribution, TableAttributes, TableConstraint, TableDesign};

/// The kind of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Backed by upstream data copied via manifest.
    #[default]
    Data,
    /// Derived from a query, materialized as a table.
    Ctas,
    /// Derived from a query, installed as a view.
    View,
}

/// On-disk descriptor shape for one relation (a YAML design file).
#[derive(Debug, Clone, Deserialize)]
pub struct RelationDescriptor {
    /// Target `schema.table`.
    pub name: TableName,

    /// Name of the source this relation is extracted from (or, for derived
    /// relations, the schema grouping it belongs to).
    pub source_name: String,

    /// Upstream table name; defaults to the target name.
    #[serde(default)]
    pub source_table_name: Option<TableName>,

    #[serde(default)]
    pub kind: RelationKind,

    /// Required relations abort a whole-schema load when they fail.
    #[serde(default)]
    pub required: bool,

    /// Identifiers of relations this one depends on. May name relations
    /// outside the current selection; those are treated as already satisfied.
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(flatten)]
    pub design: TableDesign,
}

/// A fully-resolved relation. Constructed once per run and immutable
/// thereafter; the orchestrators only reorder and filter collections of them.
#[derive(Debug, Clone)]
pub struct Relation {
    pub source_name: String,
    pub source_table_name: TableName,
    pub target_table_name: TableName,
    pub kind: RelationKind,
    pub is_required: bool,
    pub dependencies: Vec<String>,
    pub design: TableDesign,
    /// Present iff kind is CTAS or VIEW.
    pub query_stmt: Option<String>,
    pub bucket_name: String,
    pub manifest_file_name: String,
    pub sql_file_name: String,
}

impl Relation {
    /// Build a relation from its descriptor, enforcing the kind/query
    /// invariant.
    pub fn from_descriptor(
        descriptor: RelationDescriptor,
        query_stmt: Option<String>,
        config: &EtlConfig,
    ) -> Result<Self> {
        let identifier = descriptor.name.identifier();
        match descriptor.kind {
            RelationKind::Data if query_stmt.is_some() => {
                return Err(EtlError::Config(format!(
                    "Relation '{}' is upstream-backed but carries a query statement",
                    identifier
                )));
            }
            RelationKind::Ctas | RelationKind::View if query_stmt.is_none() => {
                return Err(EtlError::MissingQuery(identifier));
            }
            _ => {}
        }

        let name = &descriptor.name;
        let file_stem = format!("{}-{}", name.schema, name.table);
        let manifest_file_name = format!(
            "{}/data/{}/{}.manifest",
            config.prefix, descriptor.source_name, file_stem
        );
        let sql_file_name = format!(
            "{}/schemas/{}/{}.sql",
            config.prefix, descriptor.source_name, file_stem
        );

        Ok(Relation {
            source_table_name: descriptor
                .source_table_name
                .unwrap_or_else(|| descriptor.name.clone()),
            target_table_name: descriptor.name,
            source_name: descriptor.source_name,
            kind: descriptor.kind,
            is_required: descriptor.required,
            dependencies: descriptor.depends_on,
            design: descriptor.design,
            query_stmt,
            bucket_name: config.bucket_name.clone(),
            manifest_file_name,
            sql_file_name,
        })
    }

    /// The globally unique `schema.table` identifier of the target.
    pub fn identifier(&self) -> String {
        self.target_table_name.identifier()
    }

    /// Key prefix under which this relation's partition files live.
    pub fn csv_prefix(&self) -> String {
        let base = self
            .manifest_file_name
            .strip_suffix(".manifest")
            .unwrap_or(&self.manifest_file_name);
        format!("{}/csv", base)
    }

    pub fn is_data(&self) -> bool {
        self.kind == RelationKind::Data
    }

    pub fn is_ctas(&self) -> bool {
        self.kind == RelationKind::Ctas
    }

    pub fn is_view(&self) -> bool {
        self.kind == RelationKind::View
    }
}

/// Load relations from a directory of YAML design files.
///
/// CTAS and view designs must have a sibling `.sql` file with the same stem
/// holding the defining query (without a trailing semicolon).
pub fn load_relations(dir: impl AsRef<Path>, config: &EtlConfig) -> Result<Vec<Relation>> {
    let dir = dir.as_ref();
    let mut design_paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
            design_paths.push(path);
        }
    }
    design_paths.sort();

    let mut relations = Vec::with_capacity(design_paths.len());
    for path in design_paths {
        let contents = std::fs::read_to_string(&path)?;
        let descriptor: RelationDescriptor = serde_yaml::from_str(&contents).map_err(|e| {
            EtlError::Config(format!("Bad design file {:?}: {}", path, e))
        })?;
        let query_stmt = match descriptor.kind {
            RelationKind::Ctas | RelationKind::View => {
                let sql_path = path.with_extension("sql");
                if sql_path.exists() {
                    Some(std::fs::read_to_string(&sql_path)?.trim().to_string())
                } else {
                    None
                }
            }
            RelationKind::Data => None,
        };
        relations.push(Relation::from_descriptor(descriptor, query_stmt, config)?);
    }
    info!("Loaded {} relation(s) from {:?}", relations.len(), dir);
    Ok(relations)
}

/// Order relations such that every relation appears after all of its in-set
/// dependencies (Kahn's algorithm).
///
/// Dependencies naming relations outside the set are treated as already
/// satisfied. Ties are broken by identifier so the order is reproducible.
pub fn order_by_dependencies(relations: Vec<Relation>) -> Result<Vec<Relation>> {
    let mut by_identifier: HashMap<String, Relation> = HashMap::with_capacity(relations.len());
    for relation in relations {
        let identifier = relation.identifier();
        if by_identifier.insert(identifier.clone(), relation).is_some() {
            return Err(EtlError::Config(format!(
                "Duplicate relation identifier: '{}'",
                identifier
            )));
        }
    }

    let mut indegree: HashMap<String, usize> = HashMap::with_capacity(by_identifier.len());
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    for (identifier, relation) in &by_identifier {
        let in_set: BTreeSet<&String> = relation
            .dependencies
            .iter()
            .filter(|d| by_identifier.contains_key(*d))
            .collect();
        indegree.insert(identifier.clone(), in_set.len());
        for dependency in in_set {
            dependents
                .entry(dependency.clone())
                .or_default()
                .push(identifier.clone());
        }
    }

    let mut ready: BTreeSet<String> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(identifier, _)| identifier.clone())
        .collect();

    let mut ordered = Vec::with_capacity(by_identifier.len());
    while let Some(identifier) = ready.iter().next().cloned() {
        ready.remove(&identifier);
        if let Some(downstream) = dependents.get(&identifier) {
            for dependent in downstream {
                let degree = indegree
                    .get_mut(dependent)
                    .expect("dependent is in the relation set");
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(dependent.clone());
                }
            }
        }
        let relation = by_identifier
            .remove(&identifier)
            .expect("identifier came from the relation set");
        ordered.push(relation);
    }

    if !by_identifier.is_empty() {
        let stuck = by_identifier
            .keys()
            .min()
            .cloned()
            .expect("remaining set is non-empty");
        return Err(EtlError::CyclicDependency(stuck));
    }
    Ok(ordered)
}

/// Relations in `order` whose target matches the selector, preserving order.
pub fn find_matches(order: &[Relation], selector: &TableSelector) -> Vec<Relation> {
    order
        .iter()
        .filter(|r| selector.matches(&r.target_table_name))
        .cloned()
        .collect()
}

/// Transitive dependents of the seed relations within `order`, computed to a
/// fixed point. The seeds themselves are excluded from the result.
pub fn find_dependents(order: &[Relation], seeds: &[Relation]) -> Vec<Relation> {
    let seed_identifiers: HashSet<String> = seeds.iter().map(|r| r.identifier()).collect();
    let mut reached = seed_identifiers.clone();
    loop {
        let mut changed = false;
        for relation in order {
            let identifier = relation.identifier();
            if !reached.contains(&identifier)
                && relation.dependencies.iter().any(|d| reached.contains(d))
            {
                reached.insert(identifier);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    order
        .iter()
        .filter(|r| {
            let identifier = r.identifier();
            reached.contains(&identifier) && !seed_identifiers.contains(&identifier)
        })
        .cloned()
        .collect()
}

/// Resolve the worklist and touched schemas for one invocation.
///
/// The dirty set is the selector's matches plus their transitive dependents,
/// unless `only_first` restricts it to exactly one match (no propagation).
/// With `whole_schemas`, every relation whose target schema intersects the
/// dirty set's schemas is added as well. The worklist is the full execution
/// order filtered to the dirty set, never re-sorted.
pub fn evaluate_execution_order(
    relations: Vec<Relation>,
    selector: &TableSelector,
    only_first: bool,
    whole_schemas: bool,
) -> Result<(Vec<Relation>, BTreeSet<String>)> {
    if only_first && whole_schemas {
        return Err(EtlError::InvalidArgument(
            "Cannot elect to pick both, entire schemas and only first relation".to_string(),
        ));
    }

    let complete_sequence = order_by_dependencies(relations)?;
    let selected = find_matches(&complete_sequence, selector);
    let mut dirty: HashSet<String> = selected.iter().map(|r| r.identifier()).collect();

    if only_first {
        if selected.len() != 1 {
            return Err(EtlError::InvalidArgument(format!(
                "Bad selector, should result in a single relation being selected (matched {})",
                selected.len()
            )));
        }
    } else {
        dirty.extend(
            find_dependents(&complete_sequence, &selected)
                .iter()
                .map(|r| r.identifier()),
        );
    }

    let touched_schemas = |dirty: &HashSet<String>| -> BTreeSet<String> {
        complete_sequence
            .iter()
            .filter(|r| dirty.contains(&r.identifier()))
            .map(|r| r.target_table_name.schema.clone())
            .collect()
    };

    let mut schemas = touched_schemas(&dirty);
    if whole_schemas {
        for relation in &complete_sequence {
            if schemas.contains(&relation.target_table_name.schema) {
                dirty.insert(relation.identifier());
            }
        }
        schemas = touched_schemas(&dirty);
    }

    if dirty.len() == complete_sequence.len() {
        info!("Decided on updating ALL {} relation(s)", dirty.len());
    } else {
        info!(
            "Decided on updating {} of {} relation(s)",
            dirty.len(),
            complete_sequence.len()
        );
    }

    let worklist = complete_sequence
        .into_iter()
        .filter(|r| dirty.contains(&r.identifier()))
        .collect();
    Ok((worklist, schemas))
}

/// Render the execution order for a selection, marking each relation as
/// directly selected, immediately affected (views over a selected relation),
/// or downstream, and flagging required relations.
pub fn show_dependents(relations: Vec<Relation>, selector: &TableSelector) -> Result<String> {
    let (execution_order, schemas) =
        evaluate_execution_order(relations, selector, false, false)?;
    if execution_order.is_empty() {
        return Ok(format!("Found no matching relations for: {}", selector));
    }

    let selected: HashSet<String> = execution_order
        .iter()
        .filter(|r| selector.matches(&r.target_table_name))
        .map(|r| r.identifier())
        .collect();

    let mut affected = selected.clone();
    for relation in &execution_order {
        if relation.is_view() && relation.dependencies.iter().any(|d| affected.contains(d)) {
            affected.insert(relation.identifier());
        }
    }

    let width = execution_order
        .iter()
        .map(|r| r.identifier().len())
        .max()
        .unwrap_or(0);

    let mut report = String::new();
    writeln!(
        report,
        "Involved schemas: {}",
        schemas.iter().cloned().collect::<Vec<_>>().join(", ")
    )
    .expect("writing to a string");
    for (index, relation) in execution_order.iter().enumerate() {
        let identifier = relation.identifier();
        let kind = match relation.kind {
            RelationKind::Data => "DATA",
            RelationKind::Ctas => "CTAS",
            RelationKind::View => "VIEW",
        };
        let mut flag = if selected.contains(&identifier) {
            "selected".to_string()
        } else if affected.contains(&identifier) {
            "immediate".to_string()
        } else {
            "downstream".to_string()
        };
        if relation.is_required {
            flag.push_str(", required");
        }
        writeln!(
            report,
            "{:4} {:width$} ({}) ({})",
            index + 1,
            identifier,
            kind,
            flag,
            width = width
        )
        .expect("writing to a string");
    }
    Ok(report)
}


#[cfg(test)]
mod tests {
    use super::testing::{identifiers, relation, relation_with};
    use super::*;

    fn selector(patterns: &[&str]) -> TableSelector {
        let owned: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        TableSelector::new(&owned).unwrap()
    }

    #[test]
    fn test_order_places_dependencies_first() {
        let relations = vec![
            relation("www.c", &["www.b"]),
            relation("www.a", &[]),
            relation("www.b", &["www.a"]),
        ];
        let ordered = order_by_dependencies(relations).unwrap();
        assert_eq!(identifiers(&ordered), vec!["www.a", "www.b", "www.c"]);
    }

    #[test]
    fn test_order_ignores_unknown_dependencies() {
        let relations = vec![relation("www.a", &["elsewhere.x"]), relation("www.b", &[])];
        let ordered = order_by_dependencies(relations).unwrap();
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn test_order_is_deterministic_for_ties() {
        let build = || {
            vec![
                relation("www.zeta", &[]),
                relation("www.alpha", &[]),
                relation("www.mid", &[]),
            ]
        };
        let first = identifiers(&order_by_dependencies(build()).unwrap());
        let second = identifiers(&order_by_dependencies(build()).unwrap());
        assert_eq!(first, second);
        assert_eq!(first, vec!["www.alpha", "www.mid", "www.zeta"]);
    }

    #[test]
    fn test_cycle_is_fatal_and_names_a_relation() {
        let relations = vec![
            relation("www.a", &["www.b"]),
            relation("www.b", &["www.a"]),
            relation("www.c", &[]),
        ];
        match order_by_dependencies(relations) {
            Err(EtlError::CyclicDependency(name)) => {
                assert!(name == "www.a" || name == "www.b");
            }
            other => panic!("expected cyclic dependency error, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_identifiers_rejected() {
        let relations = vec![relation("www.a", &[]), relation("www.a", &[])];
        assert!(matches!(
            order_by_dependencies(relations),
            Err(EtlError::Config(_))
        ));
    }

    #[test]
    fn test_find_dependents_fixed_point() {
        let order = order_by_dependencies(vec![
            relation("www.a", &[]),
            relation("www.b", &["www.a"]),
            relation("www.c", &["www.b"]),
            relation("www.d", &[]),
        ])
        .unwrap();
        let seeds = vec![order[0].clone()];
        let dependents = find_dependents(&order, &seeds);
        assert_eq!(identifiers(&dependents), vec!["www.b", "www.c"]);

        // Monotonic: running again over seeds + result yields nothing new.
        let mut widened = seeds;
        widened.extend(dependents);
        assert!(find_dependents(&order, &widened).is_empty());
    }

    #[test]
    fn test_evaluate_with_propagation() {
        let relations = vec![
            relation("www.a", &[]),
            relation("www.b", &["www.a"]),
            relation("www.c", &["www.b"]),
        ];
        let (worklist, schemas) =
            evaluate_execution_order(relations, &selector(&["www.b"]), false, false).unwrap();
        assert_eq!(identifiers(&worklist), vec!["www.b", "www.c"]);
        assert_eq!(schemas.into_iter().collect::<Vec<_>>(), vec!["www"]);
    }

    #[test]
    fn test_evaluate_only_first_skips_propagation() {
        let relations = vec![
            relation("www.a", &[]),
            relation("www.b", &["www.a"]),
            relation("www.c", &["www.b"]),
        ];
        let (worklist, _) =
            evaluate_execution_order(relations, &selector(&["www.b"]), true, false).unwrap();
        assert_eq!(identifiers(&worklist), vec!["www.b"]);
    }

    #[test]
    fn test_evaluate_only_first_requires_single_match() {
        let relations = vec![relation("www.a", &[]), relation("www.b", &[])];
        assert!(matches!(
            evaluate_execution_order(relations, &selector(&["www.*"]), true, false),
            Err(EtlError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_evaluate_rejects_only_first_with_whole_schemas() {
        let relations = vec![relation("www.a", &[])];
        assert!(matches!(
            evaluate_execution_order(relations, &selector(&["www.a"]), true, true),
            Err(EtlError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_evaluate_whole_schemas_widens_to_schema() {
        let relations = vec![
            relation("www.a", &[]),
            relation("www.b", &[]),
            relation("analytics.c", &["www.a"]),
            relation("erp.untouched", &[]),
        ];
        let (worklist, schemas) =
            evaluate_execution_order(relations, &selector(&["www.a"]), false, true).unwrap();
        // www.a selected; analytics.c is a dependent; widening pulls in www.b
        // (schema www) but not erp.untouched.
        let mut got = identifiers(&worklist);
        got.sort();
        assert_eq!(got, vec!["analytics.c", "www.a", "www.b"]);
        assert_eq!(
            schemas.into_iter().collect::<Vec<_>>(),
            vec!["analytics", "www"]
        );
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let build = || {
            vec![
                relation("www.a", &[]),
                relation("www.b", &["www.a"]),
                relation("analytics.c", &["www.b"]),
            ]
        };
        let first = evaluate_execution_order(build(), &selector(&["www.*"]), false, false).unwrap();
        let second =
            evaluate_execution_order(build(), &selector(&["www.*"]), false, false).unwrap();
        assert_eq!(identifiers(&first.0), identifiers(&second.0));
        assert_eq!(first.1, second.1);
    }

    #[test]
    fn test_worklist_preserves_execution_order() {
        // www.b is unrelated to the selection; selecting z before a must not
        // reorder the worklist away from the execution order.
        let relations = vec![
            relation("www.b", &[]),
            relation("www.a", &[]),
            relation("www.z", &["www.b"]),
        ];
        let (worklist, _) =
            evaluate_execution_order(relations, &selector(&["www.z", "www.a"]), false, false)
                .unwrap();
        assert_eq!(identifiers(&worklist), vec!["www.a", "www.z"]);
    }

    #[test]
    fn test_show_dependents_marks_flags() {
        let relations = vec![
            relation("www.a", &[]),
            relation_with("www.v", &["www.a"], RelationKind::View, false),
            relation_with("www.c", &["www.v"], RelationKind::Ctas, true),
        ];
        let report = show_dependents(relations, &selector(&["www.a"])).unwrap();
        assert!(report.contains("www.a"));
        assert!(report.contains("(selected)"));
        assert!(report.contains("immediate"));
        assert!(report.contains("required"));
    }

    #[test]
    fn test_load_relations_from_directory() {
        let config: EtlConfig = serde_yaml::from_str(
            r#"
warehouse: {host: h, database: d, user: u, password: p}
iam_role: arn:aws:iam::1:role/etl
bucket_name: example-etl
schemas: [{name: www, owner: etl}, {name: analytics, owner: etl}]
"#,
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("www-orders.yaml"),
            "name: www.orders\nsource_name: www\ncolumns:\n  - name: id\n    type: int\n    sql_type: bigint\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("analytics-orders.yaml"),
            "name: analytics.orders\nsource_name: analytics\nkind: view\ndepends_on: [www.orders]\ncolumns:\n  - name: id\n    type: int\n    sql_type: bigint\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("analytics-orders.sql"),
            "SELECT id FROM www.orders\n",
        )
        .unwrap();

        let relations = load_relations(dir.path(), &config).unwrap();
        assert_eq!(
            identifiers(&relations),
            vec!["analytics.orders", "www.orders"]
        );
        assert!(relations[0].is_view());
        assert_eq!(
            relations[0].query_stmt.as_deref(),
            Some("SELECT id FROM www.orders")
        );
        assert_eq!(relations[0].dependencies, vec!["www.orders"]);

        // A view without its sibling .sql file is rejected.
        std::fs::remove_file(dir.path().join("analytics-orders.sql")).unwrap();
        assert!(matches!(
            load_relations(dir.path(), &config),
            Err(EtlError::MissingQuery(_))
        ));
    }

    #[test]
    fn test_descriptor_invariants() {
        let config: EtlConfig = serde_yaml::from_str(
            r#"
warehouse: {host: h, database: d, user: u, password: p}
iam_role: arn:aws:iam::1:role/etl
bucket_name: example-etl
schemas: [{name: www, owner: etl}]
"#,
        )
        .unwrap();
        let descriptor: RelationDescriptor = serde_yaml::from_str(
            r#"
name: www.orders
source_name: www
kind: ctas
columns:
  - name: id
    type: int
    sql_type: bigint
"#,
        )
        .unwrap();
        // CTAS without a query is an error.
        assert!(matches!(
            Relation::from_descriptor(descriptor.clone(), None, &config),
            Err(EtlError::MissingQuery(_))
        ));
        let relation =
            Relation::from_descriptor(descriptor, Some("SELECT 1".to_string()), &config).unwrap();
        assert_eq!(relation.identifier(), "www.orders");
        assert_eq!(
            relation.manifest_file_name,
            "production/data/www/www-orders.manifest"
        );
        assert_eq!(
            relation.csv_prefix(),
            "production/data/www/www-orders/csv"
        );
    }
}
