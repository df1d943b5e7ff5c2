use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vellum_core::{
    compare_record, serialize_record, unpack_record, KeyInfo, Value,
};

fn sample_rows() -> Vec<Vec<Value>> {
    (0..64)
        .map(|i| {
            vec![
                Value::Integer(i),
                Value::build_text(&format!("user-{:04}", i)),
                Value::Float(i as f64 * 1.5),
                Value::build_blob(vec![0xab; 16]),
            ]
        })
        .collect()
}

fn bench(criterion: &mut Criterion) {
    let rows = sample_rows();

    criterion.bench_function("serialize_record", |b| {
        b.iter(|| {
            for row in &rows {
                black_box(serialize_record(black_box(row), 4));
            }
        });
    });

    let payloads: Vec<Rc<[u8]>> = rows
        .iter()
        .map(|row| Rc::from(serialize_record(row, 4).into_boxed_slice()))
        .collect();

    criterion.bench_function("read_record", |b| {
        b.iter(|| {
            for payload in &payloads {
                black_box(vellum_core::read_record(black_box(payload)).unwrap());
            }
        });
    });

    let key_info = Rc::new(KeyInfo::binary(4));
    let probe = unpack_record(key_info, &payloads[32]).unwrap();

    criterion.bench_function("compare_record", |b| {
        b.iter(|| {
            for payload in &payloads {
                black_box(compare_record(black_box(payload), &probe).unwrap());
            }
        });
    });
}

criterion_group!(benches, bench);
criterion_main!(benches);
