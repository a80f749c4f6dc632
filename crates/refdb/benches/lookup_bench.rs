use criterion::{black_box, criterion_group, criterion_main, Criterion};

use refdb::{ListBuilder, Ref, RefList, RefName, Storage};
use refdb_hash::ObjectId;

fn sample_list(n: usize) -> RefList<Ref> {
    let mut b = ListBuilder::new();
    for i in 0..n {
        let name = RefName::new(format!("refs/heads/branch-{i:06}")).unwrap();
        let id = ObjectId::from_hex(&format!("{i:0>40x}")).unwrap();
        b.push(Ref::unpeeled(Storage::Packed, name, Some(id)));
    }
    b.sort();
    b.to_ref_list()
}

fn packed_file(n: usize) -> Vec<u8> {
    let mut out = b"# pack-refs with: peeled\n".to_vec();
    for i in 0..n {
        out.extend_from_slice(format!("{i:0>40x} refs/heads/branch-{i:06}\n").as_bytes());
    }
    out
}

fn bench_find(c: &mut Criterion) {
    let list = sample_list(10_000);
    c.bench_function("reflist_find_10k", |b| {
        b.iter(|| {
            for i in (0..10_000).step_by(37) {
                let name = format!("refs/heads/branch-{i:06}");
                black_box(list.find(&name).unwrap());
            }
        })
    });
}

fn bench_put(c: &mut Criterion) {
    let list = sample_list(1_000);
    let name = RefName::new("refs/heads/branch-000500").unwrap();
    let id = ObjectId::from_hex(&"ab".repeat(20)).unwrap();
    c.bench_function("reflist_put_1k", |b| {
        b.iter(|| {
            let r = Ref::unpeeled(Storage::Loose, name.clone(), Some(id));
            black_box(list.put(r));
        })
    });
}

fn bench_parse_packed(c: &mut Criterion) {
    let data = packed_file(10_000);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("packed-refs");
    std::fs::write(&path, &data).unwrap();

    let db = refdb::RefDirectory::new(dir.path());
    c.bench_function("packed_refresh_10k", |b| {
        b.iter(|| {
            db.refresh();
            black_box(db.get_refs("refs/heads/").unwrap().len());
        })
    });
}

criterion_group!(benches, bench_find, bench_put, bench_parse_packed);
criterion_main!(benches);
