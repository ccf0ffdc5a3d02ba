use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use image::{ImageFormat, Rgb, RgbImage};
use inference::{
    FrameMessage, config::CropRegion, postprocessing::PostProcessor,
    preprocessing::PreProcessor,
};
use ndarray::{Array, IxDyn};
use std::io::Cursor;

/// Base64 JPEG of a mid-gray frame, as carried in frame messages
fn create_test_frame(width: u32, height: u32) -> FrameMessage {
    let image = RgbImage::from_pixel(width, height, Rgb([128, 128, 128]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .unwrap();

    FrameMessage {
        device_id: "cam2".to_string(),
        name: "bench".to_string(),
        timestamp: 0.0,
        width,
        height,
        img: STANDARD.encode(bytes),
    }
}

/// Create mock DETR output with N confident detections of one class
fn create_mock_detr_output(
    num_queries: usize,
    num_detections: usize,
) -> (ndarray::ArrayD<f32>, ndarray::ArrayD<f32>) {
    let mut logit_data = Vec::with_capacity(num_queries * 2);
    let mut box_data = Vec::with_capacity(num_queries * 4);

    for i in 0..num_queries {
        let class_logit = if i < num_detections { 6.0 } else { -6.0 };
        logit_data.extend_from_slice(&[class_logit, 0.0]);
        box_data.extend_from_slice(&[0.5, 0.5, 0.1, 0.1]);
    }

    let logits = Array::from_shape_vec(IxDyn(&[1, num_queries, 2]), logit_data).unwrap();
    let boxes = Array::from_shape_vec(IxDyn(&[1, num_queries, 4]), box_data).unwrap();

    (logits, boxes)
}

fn benchmark_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let resolutions = [(1280, 720), (1920, 1080)];

    for (width, height) in resolutions.iter() {
        let frame = create_test_frame(*width, *height);

        group.bench_with_input(
            BenchmarkId::new("base64_jpeg", format!("{}x{}", width, height)),
            &frame,
            |b, frame| b.iter(|| black_box(frame).decode_image().unwrap()),
        );
    }

    group.finish();
}

fn benchmark_preprocessing(c: &mut Criterion) {
    let mut group = c.benchmark_group("preprocessing");
    let preprocessor = PreProcessor::new(CropRegion::default());

    let resolutions = [(1280, 720), (1920, 1080)];

    for (width, height) in resolutions.iter() {
        let image = RgbImage::from_pixel(*width, *height, Rgb([128, 128, 128]));

        group.bench_with_input(
            BenchmarkId::new("crop_normalize", format!("{}x{}", width, height)),
            &image,
            |b, image| b.iter(|| preprocessor.preprocess_frame(black_box(image)).unwrap()),
        );
    }

    group.finish();
}

fn benchmark_postprocessing(c: &mut Criterion) {
    let mut group = c.benchmark_group("postprocessing");
    let post_processor = PostProcessor::new(0.7, CropRegion::default());

    let detection_counts = [0, 1, 5, 20];

    for num_detections in detection_counts.iter() {
        let (logits, boxes) = create_mock_detr_output(100, *num_detections);

        group.bench_with_input(
            BenchmarkId::new("parse_detections", num_detections),
            &(logits, boxes),
            |b, (logits, boxes)| {
                b.iter(|| {
                    post_processor
                        .parse_detections(black_box(&logits.view()), black_box(&boxes.view()))
                        .unwrap()
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_decode,
    benchmark_preprocessing,
    benchmark_postprocessing
);
criterion_main!(benches);
