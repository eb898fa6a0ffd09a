//! Packet codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use sftp_pipe::protocol::{
    charset::Utf8Decoder, FileAttrs, Item, Packet, Request, Response, DEFAULT_MAX_PACKET_SIZE,
};

fn bench_encode_open_request(c: &mut Criterion) {
    let req = Request::Open {
        path: "/home/user/projects/test.txt".to_string(),
        flags: sftp_pipe::OpenFlags::READ,
        attrs: FileAttrs::new(),
    };

    c.bench_function("encode_open_request", |b| {
        b.iter(|| black_box(req.encode(7, DEFAULT_MAX_PACKET_SIZE).unwrap()))
    });
}

fn bench_decode_open_request(c: &mut Criterion) {
    let req = Request::Open {
        path: "/home/user/projects/test.txt".to_string(),
        flags: sftp_pipe::OpenFlags::READ,
        attrs: FileAttrs::new(),
    };
    let encoded = req.encode(7, DEFAULT_MAX_PACKET_SIZE).unwrap();

    c.bench_function("decode_open_request", |b| {
        b.iter(|| {
            let packet = Packet::parse(encoded.clone()).unwrap();
            black_box(Request::decode(&packet).unwrap())
        })
    });
}

fn bench_data_response(c: &mut Criterion) {
    let resp = Response::Data(vec![0u8; 32 * 1024]);
    let encoded = resp.encode(1, DEFAULT_MAX_PACKET_SIZE).unwrap();

    let mut group = c.benchmark_group("data_response_32kb");
    group.throughput(Throughput::Bytes(32 * 1024));
    group.bench_function("encode", |b| {
        b.iter(|| black_box(resp.encode(1, DEFAULT_MAX_PACKET_SIZE).unwrap()))
    });
    group.bench_function("decode", |b| {
        b.iter(|| {
            let packet = Packet::parse(encoded.clone()).unwrap();
            black_box(Response::decode(&packet).unwrap())
        })
    });
    group.finish();
}

fn bench_name_response(c: &mut Criterion) {
    let items: Vec<Item> = (0..100)
        .map(|i| {
            let attrs = FileAttrs::new()
                .with_size(i * 1000)
                .with_permissions(0o100644)
                .with_owner(1000, 1000)
                .with_times(1_700_000_000, 1_700_000_000);
            Item::new(format!("file_{:04}.txt", i), attrs)
        })
        .collect();
    let resp = Response::Name(items);

    c.bench_function("encode_name_response_100", |b| {
        b.iter(|| black_box(resp.encode(1, DEFAULT_MAX_PACKET_SIZE).unwrap()))
    });
}

fn bench_utf8_stream_decode(c: &mut Criterion) {
    let text = "héllo wörld ✓ 日本語 ".repeat(2000);
    let bytes = text.as_bytes();

    let mut group = c.benchmark_group("utf8_stream_decode");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("chunks_of_7", |b| {
        b.iter(|| {
            let mut decoder = Utf8Decoder::new();
            let mut out = String::with_capacity(bytes.len());
            for chunk in bytes.chunks(7) {
                decoder.write(chunk, &mut out);
            }
            decoder.finish(&mut out);
            black_box(out)
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_encode_open_request,
    bench_decode_open_request,
    bench_data_response,
    bench_name_response,
    bench_utf8_stream_decode,
);
criterion_main!(benches);
