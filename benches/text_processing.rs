use criterion::{black_box, criterion_group, criterion_main, Criterion};
use transcript_graph::config::SegmentationConfig;
use transcript_graph::extraction::KeywordExtractor;
use transcript_graph::segmentation::{classify, parse_turns, Segmenter};

fn sample_transcript(turns: usize) -> String {
    let lines = [
        ("Anna Weber", "Germany demand looks weaker than we expected this quarter."),
        ("Luis Diaz", "We decided to deprioritize Germany and focus on Brazil."),
        ("Mei Chen", "Can you send the updated forecast to finance by Friday?"),
        ("Anna Weber", "Moving on to hiring, the Berlin office needs two engineers."),
    ];
    (0..turns)
        .map(|i| {
            let (speaker, text) = lines[i % lines.len()];
            format!("{}  10:{:02}\n{}\n", speaker, i % 60, text)
        })
        .collect()
}

fn turn_parsing_benchmark(c: &mut Criterion) {
    let text = sample_transcript(400);

    c.bench_function("parse_turns_400", |b| {
        b.iter(|| {
            let turns = parse_turns(black_box(&text));
            black_box(turns.len());
        });
    });
}

fn segmentation_benchmark(c: &mut Criterion) {
    let segmenter = Segmenter::new(&SegmentationConfig::default());
    let transcript = sample_transcript(400);
    let prose = "Rust ingestion pipelines chunk plain documents into windows ".repeat(400);

    c.bench_function("segment_transcript_400_turns", |b| {
        b.iter(|| {
            let segmentation = segmenter.segment(black_box(&transcript));
            black_box(segmentation.segments.len());
        });
    });

    c.bench_function("segment_fallback_prose", |b| {
        b.iter(|| {
            let segmentation = segmenter.segment(black_box(&prose));
            black_box(segmentation.segments.len());
        });
    });
}

fn classification_benchmark(c: &mut Criterion) {
    let texts = [
        "We decided to deprioritize Germany",
        "Luis will send the memo by Friday",
        "I think the pricing looks risky",
        "What is the timeline for Brazil?",
        "Lunch was good today",
    ];

    c.bench_function("classify_hot_path", |b| {
        b.iter(|| {
            for text in &texts {
                black_box(classify(black_box(text)));
            }
        });
    });
}

fn keyword_benchmark(c: &mut Criterion) {
    let extractor = KeywordExtractor::new();
    let text = sample_transcript(100);

    c.bench_function("keyword_extraction_dense_text", |b| {
        b.iter(|| {
            let keywords = extractor.extract(black_box(&text));
            black_box(keywords.len());
        });
    });
}

criterion_group!(
    text_processing,
    turn_parsing_benchmark,
    segmentation_benchmark,
    classification_benchmark,
    keyword_benchmark
);
criterion_main!(text_processing);
