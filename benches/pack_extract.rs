use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::NamedTempFile;
use zpack::ZPack;

fn generate_compressible_data(size: usize) -> Vec<u8> {
    let pattern = b"The quick brown fox jumps over the lazy dog. ";
    let mut data = Vec::with_capacity(size);
    while data.len() < size {
        data.extend_from_slice(pattern);
    }
    data.truncate(size);
    data
}

fn bench_pack(c: &mut Criterion) {
    let sizes = vec![1024, 100 * 1024, 1024 * 1024, 8 * 1024 * 1024];

    let mut group = c.benchmark_group("pack_item");
    for size in sizes {
        let data = generate_compressible_data(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| {
                let temp = NamedTempFile::new().unwrap();
                let mut archive = ZPack::open(temp.path(), true).unwrap();
                archive.pack_item("bench", black_box(data), "", "").unwrap();
                archive.write().unwrap();
            });
        });
    }
    group.finish();
}

fn bench_extract(c: &mut Criterion) {
    let sizes = vec![1024, 100 * 1024, 1024 * 1024, 8 * 1024 * 1024];

    let mut group = c.benchmark_group("extract_str");
    for size in sizes {
        let data = generate_compressible_data(size);
        let temp = NamedTempFile::new().unwrap();
        let mut archive = ZPack::open(temp.path(), true).unwrap();
        archive.pack_item("bench", &data, "", "").unwrap();
        archive.write().unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                black_box(archive.extract_str("bench"));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pack, bench_extract);
criterion_main!(benches);
