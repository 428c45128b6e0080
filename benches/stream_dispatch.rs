use askdocs::core::chat_stream::{parse_flush, FrameDecoder, StreamChunk, StreamMessage};
use askdocs::core::session::StreamSession;
use askdocs::core::store::ConversationStore;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn make_flushes(n_chunks: usize, coalesce: usize) -> Vec<Vec<u8>> {
    let mut frames = vec![
        r#"{"type":"sources","content":[{"url":"https://nextjs.org/docs/app","title":"App Router","content_preview":"..."}]}"#
            .to_string(),
    ];
    for i in 0..n_chunks {
        frames.push(format!(
            r#"{{"type":"markdown","content":"token {i} of a fairly ordinary answer, "}}"#
        ));
    }
    frames.push(r#"{"type":"end"}"#.to_string());

    frames
        .chunks(coalesce)
        .map(|group| {
            let mut flush = String::new();
            for frame in group {
                flush.push_str(frame);
                flush.push('\n');
            }
            flush.into_bytes()
        })
        .collect()
}

fn dispatch_all(flushes: &[Vec<u8>]) -> usize {
    let mut store = ConversationStore::new();
    let mut session = StreamSession::new(1, Some("chat-1".into()));
    session.start(&mut store);
    let mut decoder = FrameDecoder::new();

    for bytes in flushes {
        let text = decoder.decode(bytes);
        for chunk in parse_flush(&text) {
            session.apply(StreamMessage::Chunk(chunk), &mut store);
        }
    }
    store.messages().len()
}

fn bench_stream_dispatch(c: &mut Criterion) {
    for &n_chunks in &[200usize, 2000usize] {
        let mut group = c.benchmark_group(format!("stream_dispatch_chunks{n_chunks}"));
        group.throughput(Throughput::Elements(n_chunks as u64));

        for &coalesce in &[1usize, 8usize] {
            let flushes = make_flushes(n_chunks, coalesce);
            group.bench_function(BenchmarkId::new("coalesce", coalesce), |b| {
                b.iter(|| dispatch_all(&flushes))
            });
        }

        group.bench_function("parse_frame_only", |b| {
            let flushes = make_flushes(n_chunks, 1);
            b.iter(|| {
                flushes
                    .iter()
                    .filter_map(|bytes| std::str::from_utf8(bytes).ok())
                    .flat_map(parse_flush)
                    .filter(|chunk| matches!(chunk, StreamChunk::Markdown(_)))
                    .count()
            })
        });

        group.finish();
    }
}

criterion_group!(benches, bench_stream_dispatch);
criterion_main!(benches);
