use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tis_camera::capture::{AcquisitionConfig, Camera, DeviceSelector, FrameTimeout, Recording};
use tis_camera::driver::SimulatedDriver;

fn bench_get_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_frame");
    for (width, height) in [(640u32, 480u32), (1280, 960), (1920, 1080)] {
        let mut camera = Camera::open(SimulatedDriver::single(), DeviceSelector::Index(0)).unwrap();
        camera
            .configure(&AcquisitionConfig::new().with_resolution(width, height))
            .unwrap();
        camera.start().unwrap();

        group.throughput(Throughput::Bytes(2 * u64::from(width) * u64::from(height)));
        group.bench_function(BenchmarkId::from_parameter(format!("{width}x{height}")), |b| {
            b.iter(|| black_box(camera.get_frame(FrameTimeout::default()).unwrap()))
        });
    }
    group.finish();
}

fn bench_record_into(c: &mut Criterion) {
    let mut camera = Camera::open(SimulatedDriver::single(), DeviceSelector::Index(0)).unwrap();
    camera
        .configure(&AcquisitionConfig::new().with_resolution(640, 480))
        .unwrap();
    let mut recording = Recording::new(10, 640, 480);

    c.bench_function("record_into 10x640x480", |b| {
        b.iter(|| camera.record_into(black_box(&mut recording)).unwrap())
    });
}

criterion_group!(benches, bench_get_frame, bench_record_into);
criterion_main!(benches);
