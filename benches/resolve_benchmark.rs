//! Benchmarks for device name and IRQ plan resolution
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nodetune::system::strip_partition;
use nodetune::system::topology::parse_cpu_list;
use nodetune::tuning::distribute;
use nodetune::tuning::irq::cpus_mask;

fn bench_strip_partition(c: &mut Criterion) {
    let names = [
        "nvme0n1p1",
        "nvme12n3p15",
        "sda1",
        "xvdf",
        "mmcblk0p2",
        "md127",
        "dm-3",
        "loop0",
    ];

    c.bench_function("strip_partition", |b| {
        b.iter(|| {
            for name in &names {
                black_box(strip_partition(black_box(name)));
            }
        });
    });
}

fn bench_distribute(c: &mut Criterion) {
    let mut group = c.benchmark_group("irq_distribute");

    for cpus in [8usize, 64, 256].iter() {
        let cpu_list: Vec<usize> = (0..*cpus).collect();
        let irqs: Vec<u32> = (100..100 + *cpus as u32 * 2).collect();

        group.throughput(Throughput::Elements(irqs.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(cpus), cpus, |b, _| {
            b.iter(|| black_box(distribute(black_box(&irqs), black_box(&cpu_list))));
        });
    }

    group.finish();
}

fn bench_masks(c: &mut Criterion) {
    let cpus = parse_cpu_list("1-63,65-127,200-255");

    c.bench_function("cpus_mask_wide", |b| {
        b.iter(|| black_box(cpus_mask(black_box(&cpus))));
    });

    c.bench_function("parse_cpu_list", |b| {
        b.iter(|| black_box(parse_cpu_list(black_box("0-3,8-11,16,18,20-127"))));
    });
}

criterion_group!(benches, bench_strip_partition, bench_distribute, bench_masks);
criterion_main!(benches);
