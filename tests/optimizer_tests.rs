mod common;

use common::{Library, minimal_server};
use memorm::query::{Expr, ParameterContext, Provider};
use memorm::storage::{DelayedQuery, QueryExecutor};
use memorm::{DomainConfiguration, OrmError, Tuple, Value};
use proptest::prelude::*;
use std::sync::Arc;

/// Books 1..=count with titles `Book n` and years cycling over a decade.
fn seed_books(library: &Library, count: i64) {
    for id in 1..=count {
        library.seed(
            "Book",
            id,
            &[
                ("Title", Value::from(format!("Book {id}"))),
                ("Year", Value::Integer(2000 + id % 10)),
            ],
        );
    }
}

fn column(library: &Library, field: &str) -> usize {
    library.model.field_of(library.type_id("Book"), field).unwrap().columns[0]
}

fn book_scan(library: &Library, predicate: Expr) -> Arc<Provider> {
    let primary = library.model.hierarchy(library.type_id("Book")).primary_index;
    Provider::filter(Provider::index(primary), predicate)
}

fn sorted(mut rows: Vec<Tuple>) -> Vec<Tuple> {
    rows.sort();
    rows
}

#[test]
fn test_primary_key_predicate_becomes_range_scan() -> anyhow::Result<()> {
    let library = Library::new()?;
    seed_books(&library, 50);
    let session = library.domain.open_session();
    let id = column(&library, "Id");

    let provider = book_scan(&library, Expr::column(id).eq(Expr::literal(17)));
    let optimized = library
        .domain
        .optimizer()
        .optimize(&provider, library.storage.as_ref(), session.server_info(), None);

    assert!(!Arc::ptr_eq(&provider, &optimized));
    let Provider::Filter(node) = optimized.as_ref() else {
        panic!("filter expected on top, got {}", optimized);
    };
    assert!(matches!(node.source.as_ref(), Provider::RangeSet(_)));

    let rows = library.storage.execute(&optimized, &ParameterContext::new())?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(id), Some(&Value::Integer(17)));
    Ok(())
}

#[test]
fn test_secondary_index_returns_same_rows() -> anyhow::Result<()> {
    let library = Library::new()?;
    seed_books(&library, 50);
    let session = library.domain.open_session();
    let title = column(&library, "Title");

    let provider = book_scan(&library, Expr::column(title).eq(Expr::literal("Book 23")));
    let optimized = library
        .domain
        .optimizer()
        .optimize(&provider, library.storage.as_ref(), session.server_info(), None);
    assert!(!Arc::ptr_eq(&provider, &optimized));
    let Provider::Filter(node) = optimized.as_ref() else {
        panic!("filter expected on top, got {}", optimized);
    };
    assert!(matches!(node.source.as_ref(), Provider::Select(_)));

    let parameters = ParameterContext::new();
    let expected = library.storage.execute(&provider, &parameters)?;
    assert_eq!(expected.len(), 1);
    assert_eq!(library.storage.execute(&optimized, &parameters)?, expected);
    assert_eq!(session.query(&provider, &parameters)?, expected);
    Ok(())
}

#[test]
fn test_unindexed_predicate_keeps_tree() -> anyhow::Result<()> {
    let library = Library::new()?;
    seed_books(&library, 20);
    let session = library.domain.open_session();
    let summary = column(&library, "Summary");

    let provider = book_scan(&library, Expr::column(summary).eq(Expr::literal("none")));
    let optimized = library
        .domain
        .optimizer()
        .optimize(&provider, library.storage.as_ref(), session.server_info(), None);
    assert!(Arc::ptr_eq(&provider, &optimized));

    // one unindexed disjunct forces a full scan
    let year = column(&library, "Year");
    let mixed = book_scan(
        &library,
        Expr::column(year)
            .eq(Expr::literal(2003))
            .or(Expr::column(summary).is_null()),
    );
    let optimized = library
        .domain
        .optimizer()
        .optimize(&mixed, library.storage.as_ref(), session.server_info(), None);
    assert!(Arc::ptr_eq(&mixed, &optimized));
    Ok(())
}

#[test]
fn test_disabled_optimizer_keeps_tree() -> anyhow::Result<()> {
    let config = DomainConfiguration::default().optimizer_enabled(false);
    let library = Library::with(common::full_server()?, config)?;
    seed_books(&library, 20);
    let session = library.domain.open_session();
    let id = column(&library, "Id");

    let provider = book_scan(&library, Expr::column(id).eq(Expr::literal(3)));
    let optimized = library
        .domain
        .optimizer()
        .optimize(&provider, library.storage.as_ref(), session.server_info(), None);
    assert!(Arc::ptr_eq(&provider, &optimized));
    Ok(())
}

#[test]
fn test_overly_complex_predicate_is_left_alone() -> anyhow::Result<()> {
    let config = DomainConfiguration::default().max_normalized_terms(4);
    let library = Library::with(common::full_server()?, config)?;
    seed_books(&library, 20);
    let session = library.domain.open_session();
    let (id, year) = (column(&library, "Id"), column(&library, "Year"));

    // (a or b) and (c or d) and (e or f) expands to eight disjuncts
    let pair = |n: i64| {
        Expr::column(id)
            .eq(Expr::literal(n))
            .or(Expr::column(year).eq(Expr::literal(2000 + n)))
    };
    let provider = book_scan(&library, pair(1).and(pair(2)).and(pair(3)));
    let optimized = library
        .domain
        .optimizer()
        .optimize(&provider, library.storage.as_ref(), session.server_info(), None);
    assert!(Arc::ptr_eq(&provider, &optimized));
    Ok(())
}

#[test]
fn test_extraction_is_cached_per_predicate() -> anyhow::Result<()> {
    let library = Library::new()?;
    seed_books(&library, 20);
    let session = library.domain.open_session();
    let optimizer = library.domain.optimizer();
    let year = column(&library, "Year");
    optimizer.clear_cache();

    let provider = book_scan(&library, Expr::column(year).gt(Expr::literal(2007)));
    optimizer.optimize(&provider, library.storage.as_ref(), session.server_info(), None);
    optimizer.optimize(&provider, library.storage.as_ref(), session.server_info(), None);
    assert_eq!(optimizer.cached_plan_count(), 1);

    // ranges stay symbolic, so parameter values do not matter
    let parametrized = book_scan(&library, Expr::column(year).eq(Expr::parameter("year")));
    for value in [2004, 2005] {
        let parameters = ParameterContext::new().with("year", value);
        let server = session.server_info();
        optimizer.optimize(&parametrized, library.storage.as_ref(), server, Some(&parameters));
    }
    assert_eq!(optimizer.cached_plan_count(), 2);
    Ok(())
}

#[test]
fn test_cached_predicate_is_costed_against_current_statistics() -> anyhow::Result<()> {
    let library = Library::new()?;
    let session = library.domain.open_session();
    let optimizer = library.domain.optimizer();
    let title = column(&library, "Title");
    let provider = book_scan(&library, Expr::column(title).eq(Expr::literal("Book 23")));

    // nothing to gain on an empty table
    let optimized =
        optimizer.optimize(&provider, library.storage.as_ref(), session.server_info(), None);
    assert!(Arc::ptr_eq(&provider, &optimized));

    seed_books(&library, 500);
    let optimized =
        optimizer.optimize(&provider, library.storage.as_ref(), session.server_info(), None);
    assert_eq!(optimizer.cached_plan_count(), 1);
    let Provider::Filter(node) = optimized.as_ref() else {
        panic!("filter expected on top, got {}", optimized);
    };
    assert!(matches!(node.source.as_ref(), Provider::Select(_)));
    assert_eq!(library.storage.execute(&optimized, &ParameterContext::new())?.len(), 1);
    Ok(())
}

#[test]
fn test_compile_renders_optimized_tree() -> anyhow::Result<()> {
    let library = Library::new()?;
    seed_books(&library, 10);
    let session = library.domain.open_session();
    let year = column(&library, "Year");

    let provider = book_scan(&library, Expr::column(year).eq(Expr::parameter("year")));
    let compiled = session.compile(&provider, &ParameterContext::new().with("year", 2004))?;
    assert!(compiled.sql.starts_with("SELECT"));
    assert!(compiled.sql.contains("\"Book\""));
    assert!(compiled.parameters.iter().any(|name| name == "year"));
    Ok(())
}

#[test]
fn test_compile_reports_unsupported_construct_as_translation_error() -> anyhow::Result<()> {
    let library = Library::with(minimal_server()?, DomainConfiguration::default())?;
    let session = library.domain.open_session();
    let primary = library.model.hierarchy(library.type_id("Book")).primary_index;

    let provider = Provider::take(Provider::index(primary), 5);
    let error = session
        .compile(&provider, &ParameterContext::new())
        .expect_err("paging is not available");
    assert!(matches!(error, OrmError::Translation { .. }));
    assert!(matches!(error.root_cause(), OrmError::UnsupportedOperation(_)));

    let executed = session.query(&provider, &ParameterContext::new());
    assert!(matches!(executed, Err(OrmError::UnsupportedOperation(_))));
    Ok(())
}

#[test]
fn test_storage_without_batches_rejects_batch() -> anyhow::Result<()> {
    let library = Library::with(minimal_server()?, DomainConfiguration::default())?;
    seed_books(&library, 3);
    let primary = library.model.hierarchy(library.type_id("Book")).primary_index;
    let query = || DelayedQuery::new(Provider::index(primary), ParameterContext::new());

    let single = library.storage.execute_batch(&[query()])?;
    assert_eq!(single[0].len(), 3);
    let result = library.storage.execute_batch(&[query(), query()]);
    assert!(matches!(result, Err(OrmError::UnsupportedOperation(_))));
    Ok(())
}

#[derive(Debug, Clone)]
enum Term {
    Id(&'static str, i64),
    Year(&'static str, i64),
}

fn term() -> impl Strategy<Value = Term> {
    let op = prop_oneof![Just("="), Just("<"), Just("<="), Just(">"), Just(">="), Just("<>")];
    prop_oneof![
        (op.clone(), 0..45i64).prop_map(|(op, n)| Term::Id(op, n)),
        (op, 1998..2012i64).prop_map(|(op, n)| Term::Year(op, n)),
    ]
}

fn compare(column: usize, op: &str, value: i64) -> Expr {
    let left = Expr::column(column);
    let right = Expr::literal(value);
    match op {
        "=" => left.eq(right),
        "<" => left.lt(right),
        "<=" => left.lt_eq(right),
        ">" => left.gt(right),
        ">=" => left.gt_eq(right),
        _ => left.not_eq(right),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_optimized_tree_returns_same_rows(
        disjuncts in proptest::collection::vec(proptest::collection::vec(term(), 1..3), 1..4)
    ) {
        let library = Library::new().unwrap();
        seed_books(&library, 40);
        let session = library.domain.open_session();
        let (id, year) = (column(&library, "Id"), column(&library, "Year"));

        let predicate = Expr::any(disjuncts.iter().map(|terms| {
            Expr::all(terms.iter().map(|term| match term {
                Term::Id(op, n) => compare(id, op, *n),
                Term::Year(op, n) => compare(year, op, *n),
            }))
        }));
        let provider = book_scan(&library, predicate);
        let optimized = library
            .domain
            .optimizer()
            .optimize(&provider, library.storage.as_ref(), session.server_info(), None);

        let parameters = ParameterContext::new();
        let expected = sorted(library.storage.execute(&provider, &parameters).unwrap());
        let actual = sorted(library.storage.execute(&optimized, &parameters).unwrap());
        prop_assert_eq!(actual, expected);
    }
}
