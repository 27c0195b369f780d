use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rerar::crc::{combine, crc32};
use rerar::header::FileHeader;
use rerar::io_stream::VolumeWriter;
use rerar::params::{FormatVersion, HostOs};
use rerar::recovery::RecoveryData;
use std::io::Cursor;

fn bench_crc(c: &mut Criterion) {
    let data = vec![0xA5u8; 1024 * 1024];

    c.bench_function("crc32_1mb", |b| b.iter(|| crc32(black_box(&data))));
    c.bench_function("combine_15mb", |b| {
        b.iter(|| combine(black_box(0x1234_5678), black_box(0x9ABC_DEF0), black_box(15_000_000)))
    });
}

fn bench_recovery(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024];

    c.bench_function("recovery_1mb_13_sectors", |b| {
        b.iter(|| RecoveryData::compute(&mut Cursor::new(black_box(&data)), 13, data.len() as u64).unwrap())
    });
}

fn bench_volume(c: &mut Criterion) {
    let data = vec![7u8; 1024 * 1024];

    c.bench_function("volume_1mb_with_recovery", |b| {
        b.iter(|| {
            let mut w = VolumeWriter::new(Cursor::new(Vec::with_capacity(data.len() + 16 * 1024)));
            w.write_signature().unwrap();
            let header = FileHeader::stored(0, data.len() as u64, data.len() as u64, b"bench.bin".to_vec(), None);
            w.write_file(header, &mut Cursor::new(black_box(&data))).unwrap();
            w.write_recovery(FormatVersion::Rar3, HostOs::Windows, 13).unwrap();
            w.finish().unwrap()
        })
    });
}

criterion_group!(benches, bench_crc, bench_recovery, bench_volume);
criterion_main!(benches);
