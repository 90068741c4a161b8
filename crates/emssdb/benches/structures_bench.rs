use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use emssdb::{Config, Db, Options};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use std::time::Duration;
use tempfile::TempDir;

fn open_db() -> (Db, TempDir) {
    let dir = TempDir::new().unwrap();
    let options = Options::new(Config::relaxed()).expire_interval(Duration::from_secs(3600));
    let db = Db::open(dir.path(), options).unwrap();
    (db, dir)
}

fn bench_hash(c: &mut Criterion) {
    let (db, _dir) = open_db();
    let mut rng = StdRng::seed_from_u64(1);

    c.bench_function("hset_random_field", |b| {
        b.iter(|| {
            let field = format!("field-{}", rng.gen_range(0..10_000));
            black_box(db.hset(b"bench", field.as_bytes(), b"value").unwrap());
        });
    });

    c.bench_function("hget_hit", |b| {
        db.hset(b"bench", b"hot", b"value").unwrap();
        b.iter(|| black_box(db.hget(b"bench", b"hot").unwrap()));
    });
}

fn bench_zset(c: &mut Criterion) {
    let (db, _dir) = open_db();
    let mut rng = StdRng::seed_from_u64(2);
    for i in 0..10_000 {
        db.zset(b"board", format!("m{}", i).as_bytes(), rng.gen_range(-1_000_000..1_000_000)).unwrap();
    }

    c.bench_function("zincr_existing", |b| {
        b.iter(|| {
            let member = format!("m{}", rng.gen_range(0..10_000));
            black_box(db.zincr(b"board", member.as_bytes(), 1).unwrap());
        });
    });

    c.bench_function("zscan_100", |b| {
        b.iter(|| black_box(db.zscan(b"board", 0, i64::MAX).unwrap().take(100).count()));
    });
}

fn bench_queue(c: &mut Criterion) {
    c.bench_function("qpush_back_then_pop_front_1k", |b| {
        b.iter_batched(
            open_db,
            |(db, _dir)| {
                for i in 0..1000u32 {
                    db.qpush_back(b"q", &i.to_be_bytes()).unwrap();
                }
                while db.qpop_front(b"q").is_ok() {}
            },
            BatchSize::PerIteration,
        );
    });
}

criterion_group!(benches, bench_hash, bench_zset, bench_queue);
criterion_main!(benches);
