use chess_analysis_core::{DistributionCache, MoveDistribution, OpeningBook, Position};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const FIRST_MOVES: [&str; 4] = ["e2e4", "d2d4", "c2c4", "g1f3"];
const REPLIES: [&str; 4] = ["e7e5", "c7c5", "d7d5", "g8f6"];
const THIRD_MOVES: [&str; 4] = ["g1f3", "b1c3", "f1c4", "c2c3"];

fn generate_book_lines() -> Vec<String> {
    let mut lines = Vec::new();
    for first in FIRST_MOVES {
        for reply in REPLIES {
            for third in THIRD_MOVES {
                for length in 0..8 {
                    let mut line = format!("{} {} {}", first, reply, third);
                    for filler in 0..length {
                        line.push_str(if filler % 2 == 0 { " a2a3" } else { " a7a6" });
                    }
                    lines.push(line);
                }
            }
        }
    }
    lines
}

fn benchmark_book_lookup(c: &mut Criterion) {
    let book = OpeningBook::from_lines(generate_book_lines());
    let start = Position::start();
    let deep = Position::new("d2d4 g8f6 c2c3");

    c.bench_function("book_find_start", |b| b.iter(|| black_box(book.find(&start))));
    c.bench_function("book_find_ranked_deep", |b| {
        b.iter(|| black_box(book.find_ranked(&deep)))
    });
    c.bench_function("book_miss", |b| {
        let miss = Position::new("h2h4");
        b.iter(|| black_box(book.contains(&miss)))
    });
}

fn benchmark_distribution_cache(c: &mut Criterion) {
    let cache = DistributionCache::in_memory();
    let positions: Vec<Position> = FIRST_MOVES
        .iter()
        .flat_map(|first| {
            REPLIES
                .iter()
                .map(move |reply| Position::new(&format!("{} {}", first, reply)))
        })
        .collect();

    for position in &positions {
        let distribution: MoveDistribution = THIRD_MOVES.iter().map(|mv| (*mv, 25u64)).collect();
        let _ = cache.insert(position, &distribution);
    }

    c.bench_function("distribution_cache_hit", |b| {
        b.iter(|| {
            for position in &positions {
                black_box(cache.get_or_compute(position, || Ok(MoveDistribution::new())).ok());
            }
        })
    });

    c.bench_function("distribution_share", |b| {
        let distribution = cache.get(&positions[0]).unwrap_or_default();
        b.iter(|| black_box(distribution.share("g1f3")))
    });
}

criterion_group!(benches, benchmark_book_lookup, benchmark_distribution_cache);
criterion_main!(benches);
