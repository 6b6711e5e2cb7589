//! Benchmarks for the cache hot paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use handle_cache::cache::lru::LruCache;
use handle_cache::cache::record::CacheRecord;
use handle_cache::fetch::parser::{parse_metric_string, ChannelPageParser, PageParser};

fn bench_lru_insert_evict(c: &mut Criterion) {
    c.bench_function("lru_insert_10k_into_1k", |b| {
        b.iter(|| {
            let mut lru = LruCache::new(1000);
            for i in 0..10_000 {
                lru.insert(CacheRecord::new(format!("@user{i}"), "Name", 1000));
            }
            black_box(lru.len());
        })
    });
}

fn bench_lru_hit_path(c: &mut Criterion) {
    let mut lru = LruCache::new(1000);
    for i in 0..1000 {
        lru.insert(CacheRecord::new(format!("@user{i}"), "Name", 1000));
    }

    c.bench_function("lru_get_hot_1k", |b| {
        b.iter(|| {
            for i in 0..1000 {
                black_box(lru.get(&format!("@user{i}")));
            }
        })
    });
}

fn bench_page_parse(c: &mut Criterion) {
    let parser = ChannelPageParser::new();

    // Synthetic profile page with the interesting bits buried mid-document.
    let mut page = String::with_capacity(64 * 1024);
    page.push_str("<html><head>");
    page.push_str(r#"<meta property="og:title" content="Benchmark Channel - YouTube">"#);
    page.push_str("</head><body>");
    for _ in 0..500 {
        page.push_str("<div class=\"filler\">lorem ipsum dolor sit amet</div>");
    }
    page.push_str(r#"{"subscriberCountText":{"simpleText":"1.23M subscribers"}}"#);
    page.push_str("</body></html>");

    c.bench_function("parse_profile_page_64kb", |b| {
        b.iter(|| {
            black_box(parser.parse(black_box(&page)));
        })
    });
}

fn bench_metric_parse(c: &mut Criterion) {
    let samples = ["1.2M", "3,400", "5.1萬", "987K", "2B", "12,345,678"];

    c.bench_function("parse_metric_strings", |b| {
        b.iter(|| {
            for sample in samples {
                black_box(parse_metric_string(black_box(sample)));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_lru_insert_evict,
    bench_lru_hit_path,
    bench_page_parse,
    bench_metric_parse,
);
criterion_main!(benches);
