use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rindb_bson::{decode_document, doc, encode_to_vec, Document};

fn sample_document() -> Document {
    doc! {
        "name": "benchmark",
        "count": 123456,
        "ratio": 0.7251,
        "tags": ["alpha", "beta", "gamma"],
        "nested": {
            "level": 2,
            "items": [1, 2, 3, 4, 5, 6, 7, 8],
            "flag": true,
        },
    }
}

fn bench_encode(c: &mut Criterion) {
    let doc = sample_document();
    c.bench_function("encode_document", |b| {
        b.iter(|| encode_to_vec(black_box(&doc)).unwrap())
    });
}

fn bench_decode(c: &mut Criterion) {
    let bytes = encode_to_vec(&sample_document()).unwrap();
    c.bench_function("decode_document", |b| {
        b.iter(|| decode_document(black_box(&bytes)).unwrap())
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
