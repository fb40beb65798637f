//! Benchmarks for confidence scoring
//!
//! Scoring runs once per provider candidate, so title searches that return
//! many documents score many times per request.

use bookforged::resolver::scoring::{
    publication_year, score, Evidence, ScoreQuery, ScoringProfile,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn authors(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn bench_title_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("score_by_title");
    let profile = ScoringProfile::default();
    let orwell = authors(&["George Orwell"]);

    let cases = [
        ("exact", "Nineteen Eighty-Four"),
        ("contains", "Nineteen Eighty-Four: A Novel (Penguin Modern Classics)"),
        ("fuzzy", "Ninteen Eighty Four"),
        ("unrelated", "The Left Hand of Darkness"),
    ];

    for (name, found_title) in cases {
        let evidence = Evidence {
            title: found_title,
            authors: &orwell,
            has_description: true,
            has_subjects: true,
            has_cover: true,
            published_date: Some("June 8, 1949"),
        };
        let query = ScoreQuery::ByTitle {
            title: "Nineteen Eighty-Four",
            author: Some("Orwell"),
        };
        group.bench_with_input(BenchmarkId::from_parameter(name), &evidence, |b, ev| {
            b.iter(|| score(black_box(&profile), black_box(query), black_box(ev)));
        });
    }

    group.finish();
}

fn bench_identifier_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("score_by_identifier");
    let archival = ScoringProfile::archival();
    let many_authors = authors(&[
        "Terry Pratchett",
        "Neil Gaiman",
        "Stephen Briggs",
        "Paul Kidby",
    ]);

    let evidence = Evidence {
        title: "Good Omens",
        authors: &many_authors,
        has_description: false,
        has_subjects: true,
        has_cover: false,
        published_date: Some("1923"),
    };

    group.bench_function("archival_profile", |b| {
        b.iter(|| {
            score(
                black_box(&archival),
                black_box(ScoreQuery::ByIdentifier),
                black_box(&evidence),
            )
        });
    });

    group.finish();
}

fn bench_publication_year(c: &mut Criterion) {
    let mut group = c.benchmark_group("publication_year");

    for date in ["1949", "1949-06-08", "June 8, 1949", "c. 1890?", "unknown"] {
        group.bench_with_input(BenchmarkId::from_parameter(date), &date, |b, d| {
            b.iter(|| publication_year(black_box(d)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_title_queries,
    bench_identifier_queries,
    bench_publication_year
);
criterion_main!(benches);
