use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::{ImageFormat, Rgb, RgbImage, RgbaImage};
use photo_enhance::{
    ArtifactStore, BackgroundRemover, CanvasLayout, CreditStore, EnhanceService,
    EnhancementFactors, Error, FileCreditStore, FitMode, Pipeline, PipelineConfig,
    RemovalFallback, RemovalOutcome, ServiceConfig, ShadowConfig, UnavailableRemover, Upload,
};

/// Clears near-white pixels and records what it was given.
#[derive(Default)]
struct WhiteKeyRemover {
    calls: AtomicUsize,
    seen: Mutex<Vec<(u32, u32)>>,
}

impl BackgroundRemover for WhiteKeyRemover {
    fn name(&self) -> &'static str {
        "white-key"
    }

    fn remove(&self, encoded: &[u8]) -> RemovalOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Ok(img) = image::load_from_memory(encoded) else {
            return RemovalOutcome::failed("undecodable");
        };
        let mut rgba = img.to_rgba8();
        self.seen.lock().unwrap().push(rgba.dimensions());
        for px in rgba.pixels_mut() {
            if px[0] > 230 && px[1] > 230 && px[2] > 230 {
                px[3] = 0;
            }
        }
        RemovalOutcome::Cutout(rgba)
    }
}

/// Dark rectangle on a white studio background.
fn product_shot(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let inside = x > width / 4 && x < 3 * width / 4 && y > height / 4 && y < 3 * height / 4;
        if inside {
            Rgb([40, 70, 120])
        } else {
            Rgb([255, 255, 255])
        }
    })
}

fn encode(img: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

fn service_with(
    config: PipelineConfig,
    remover: Arc<dyn BackgroundRemover>,
) -> (tempfile::TempDir, EnhanceService) {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(dir.path().join("artifacts")).unwrap();
    let pipeline = Pipeline::new(config, remover).unwrap();
    let service = EnhanceService::new(pipeline, store, None, ServiceConfig::default()).unwrap();
    (dir, service)
}

fn upload(bytes: Vec<u8>, content_type: &str) -> Upload {
    Upload {
        bytes,
        content_type: content_type.into(),
        ..Upload::default()
    }
}

#[test]
fn large_jpeg_becomes_square_png_with_white_border() {
    let config = PipelineConfig {
        enhancement: EnhancementFactors {
            brightness: 1.20,
            contrast: 1.25,
            color: 1.25,
            sharpness: 1.20,
        },
        ..PipelineConfig::default()
    };
    let remover = Arc::new(WhiteKeyRemover::default());
    let (_dir, service) = service_with(config, remover.clone());

    let jpeg = encode(&product_shot(3000, 2000), ImageFormat::Jpeg);
    let response = service.enhance(upload(jpeg, "image/jpeg")).unwrap();

    assert_eq!(response.status, "success");
    assert_eq!(response.filename, format!("{}.png", response.id));
    assert_eq!(response.url, format!("/image/{}", response.filename));

    // Pre-downscaled before removal.
    assert_eq!(remover.seen.lock().unwrap().as_slice(), &[(1500, 1000)]);

    let stored = service.fetch(&response.filename).unwrap();
    assert_eq!(
        image::guess_format(&stored).unwrap(),
        ImageFormat::Png
    );
    let out = image::load_from_memory(&stored).unwrap().to_rgb8();
    assert_eq!(out.dimensions(), (1080, 1080));

    for (x, y) in [(0, 0), (1079, 0), (0, 1079), (1079, 1079), (540, 10)] {
        let px = out.get_pixel(x, y);
        assert!(px.0.iter().all(|&c| c >= 250), "({x},{y}) = {px:?}");
    }
    let center = out.get_pixel(540, 540);
    assert!(center.0.iter().any(|&c| c < 200), "center = {center:?}");
}

#[test]
fn gif_is_rejected_before_any_work() {
    let remover = Arc::new(WhiteKeyRemover::default());
    let (dir, service) = service_with(PipelineConfig::default(), remover.clone());

    let err = service
        .enhance(upload(b"GIF89a\x01\x00\x01\x00".to_vec(), "image/gif"))
        .unwrap_err();

    assert!(matches!(err, Error::UnsupportedFormat(_)));
    assert_eq!(err.status_code(), 400);
    assert_eq!(remover.calls.load(Ordering::SeqCst), 0);
    let stored = std::fs::read_dir(dir.path().join("artifacts")).unwrap().count();
    assert_eq!(stored, 0);
}

#[test]
fn gif_bytes_declared_as_png_are_rejected() {
    let remover = Arc::new(WhiteKeyRemover::default());
    let (dir, service) = service_with(PipelineConfig::default(), remover.clone());

    let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec();
    let err = service.enhance(upload(gif, "image/png")).unwrap_err();

    assert!(matches!(err, Error::UnsupportedFormat(_)));
    assert_eq!(err.status_code(), 400);
    assert_eq!(remover.calls.load(Ordering::SeqCst), 0);
    let stored = std::fs::read_dir(dir.path().join("artifacts")).unwrap().count();
    assert_eq!(stored, 0);
}

#[test]
fn original_fit_returns_source_resolution() {
    let config = PipelineConfig {
        fit: FitMode::Original,
        ..PipelineConfig::default()
    };
    let (_dir, service) = service_with(config, Arc::new(WhiteKeyRemover::default()));
    let png = encode(&product_shot(640, 480), ImageFormat::Png);

    let response = service.enhance(upload(png, "image/png")).unwrap();
    let out = image::load_from_memory(&service.fetch(&response.filename).unwrap()).unwrap();
    assert_eq!((out.width(), out.height()), (640, 480));
}

#[test]
fn oversize_upload_is_rejected() {
    let config = PipelineConfig {
        max_upload_bytes: 1024,
        ..PipelineConfig::default()
    };
    let remover = Arc::new(WhiteKeyRemover::default());
    let (_dir, service) = service_with(config, remover.clone());

    let err = service
        .enhance(upload(vec![0xFF; 1025], "image/png"))
        .unwrap_err();
    assert!(matches!(err, Error::PayloadTooLarge { size: 1025, limit: 1024 }));
    assert_eq!(err.status_code(), 413);
    assert_eq!(remover.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn removal_failure_fails_request_by_default() {
    let (dir, service) = service_with(PipelineConfig::default(), Arc::new(UnavailableRemover));
    let png = encode(&product_shot(120, 80), ImageFormat::Png);

    let err = service.enhance(upload(png, "image/png")).unwrap_err();
    assert!(matches!(err, Error::BackgroundRemovalFailed(_)));
    assert_eq!(err.status_code(), 500);
    let stored = std::fs::read_dir(dir.path().join("artifacts")).unwrap().count();
    assert_eq!(stored, 0);
}

#[test]
fn opaque_fallback_still_produces_output() {
    let config = PipelineConfig {
        fallback: RemovalFallback::Opaque,
        target_size: 256,
        ..PipelineConfig::default()
    };
    let (_dir, service) = service_with(config, Arc::new(UnavailableRemover));
    let png = encode(&product_shot(120, 80), ImageFormat::Png);

    let response = service.enhance(upload(png, "image/png")).unwrap();
    let out = image::load_from_memory(&service.fetch(&response.filename).unwrap()).unwrap();
    assert_eq!((out.width(), out.height()), (256, 256));
}

#[test]
fn shadow_darkens_canvas_below_subject() {
    let layout = CanvasLayout::Centered { size: 200 };
    let plain = PipelineConfig {
        layout,
        pre_downscale: None,
        fit: FitMode::Box(100),
        target_size: 200,
        enhancement: EnhancementFactors {
            brightness: 1.0,
            contrast: 1.0,
            color: 1.0,
            sharpness: 1.0,
        },
        ..PipelineConfig::default()
    };
    let shadowed = PipelineConfig {
        shadow: Some(ShadowConfig {
            blur_radius: 4.0,
            offset_x: 0,
            offset_y: 12,
            opacity: 0.8,
        }),
        ..plain.clone()
    };

    let src = encode(&product_shot(100, 100), ImageFormat::Png);
    let render = |config: PipelineConfig| {
        let pipeline = Pipeline::new(config, Arc::new(WhiteKeyRemover::default())).unwrap();
        let png = pipeline.process(src.clone(), "image/png").unwrap();
        image::load_from_memory(&png).unwrap().to_rgb8()
    };
    let without = render(plain);
    let with = render(shadowed);

    // The subject spans 26..75 inside a 100px cutout centered at 50..150,
    // so row 130 is background just below it.
    assert_eq!(without.get_pixel(100, 130), &Rgb([255, 255, 255]));
    assert!(with.get_pixel(100, 130)[0] < 200);
    assert_eq!(with.get_pixel(5, 5), &Rgb([255, 255, 255]));
}

#[test]
fn credits_gate_and_debit() {
    let dir = tempfile::tempdir().unwrap();
    let credits = Arc::new(FileCreditStore::open(dir.path().join("credits.json")).unwrap());
    credits.grant("shop@example.com", 1).unwrap();
    let ledger: Arc<dyn CreditStore> = credits.clone();

    let pipeline = Pipeline::new(
        PipelineConfig {
            target_size: 64,
            ..PipelineConfig::default()
        },
        Arc::new(WhiteKeyRemover::default()),
    )
    .unwrap();
    let store = ArtifactStore::open(dir.path().join("artifacts")).unwrap();
    let config = ServiceConfig {
        api_key: Some("secret".into()),
        require_credits: true,
    };
    let service = EnhanceService::new(pipeline, store, Some(ledger), config).unwrap();

    let png = encode(&product_shot(60, 40), ImageFormat::Png);
    let request = |key: Option<&str>| Upload {
        bytes: png.clone(),
        content_type: "image/png".into(),
        api_key: key.map(str::to_string),
        email: Some("shop@example.com".into()),
    };

    let err = service.enhance(request(Some("wrong"))).unwrap_err();
    assert_eq!(err.status_code(), 401);

    service.enhance(request(Some("secret"))).unwrap();
    assert_eq!(credits.balance("shop@example.com").unwrap(), 0);

    let err = service.enhance(request(Some("secret"))).unwrap_err();
    assert!(matches!(err, Error::InsufficientCredits(_)));
    assert_eq!(err.status_code(), 402);
}

#[test]
fn unknown_artifact_is_not_found() {
    let (_dir, service) = service_with(PipelineConfig::default(), Arc::new(UnavailableRemover));
    let err = service.fetch("../credits.json").unwrap_err();
    assert_eq!(err.status_code(), 404);
    let err = service
        .fetch("6f1c2a8e-0b7d-4c3e-9a51-2d4f8e6b7c90.png")
        .unwrap_err();
    assert!(matches!(err, Error::ArtifactNotFound(_)));
}

#[test]
fn config_file_drives_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.toml");
    std::fs::write(
        &path,
        r#"
target_size = 300
fallback = "opaque"

[layout]
centered = { size = 400 }

[enhancement]
brightness = 1.0
"#,
    )
    .unwrap();

    let config = PipelineConfig::load(&path).unwrap();
    assert_eq!(config.layout, CanvasLayout::Centered { size: 400 });
    assert_eq!(config.fit, FitMode::Box(900));
    assert!((config.enhancement.contrast - 1.15).abs() < f32::EPSILON);

    let pipeline = Pipeline::new(config, Arc::new(UnavailableRemover)).unwrap();
    let png = encode(&product_shot(80, 60), ImageFormat::Png);
    let out = image::load_from_memory(&pipeline.process(png, "image/png").unwrap()).unwrap();
    assert_eq!((out.width(), out.height()), (300, 300));
}

#[test]
fn directory_batch_reports_each_file() {
    let remover = Arc::new(WhiteKeyRemover::default());
    let (dir, service) = service_with(
        PipelineConfig {
            target_size: 64,
            ..PipelineConfig::default()
        },
        remover.clone(),
    );
    let input = dir.path().join("in");
    std::fs::create_dir(&input).unwrap();
    std::fs::write(
        input.join("a.png"),
        encode(&product_shot(40, 40), ImageFormat::Png),
    )
    .unwrap();
    std::fs::write(
        input.join("b.jpg"),
        encode(&product_shot(40, 30), ImageFormat::Jpeg),
    )
    .unwrap();
    std::fs::write(input.join("notes.txt"), "skip me").unwrap();
    std::fs::write(input.join("broken.png"), "not a png").unwrap();

    let mut results = service.process_directory(&input);
    results.sort_by(|a, b| a.path.cmp(&b.path));

    assert_eq!(results.len(), 3);
    // a.png, b.jpg, broken.png
    assert!(results[0].success, "{}", results[0].message);
    assert!(results[1].success, "{}", results[1].message);
    assert!(!results[2].success);
    assert_eq!(remover.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn health_reports_engine() {
    let (_dir, service) = service_with(
        PipelineConfig::default(),
        Arc::new(WhiteKeyRemover::default()),
    );
    let health = service.health();
    assert_eq!(health.status, "running");
    assert_eq!(health.remover, "white-key");
    assert!(health.remover_available);

    let (_dir, service) = service_with(PipelineConfig::default(), Arc::new(UnavailableRemover));
    assert!(!service.health().remover_available);
}

#[test]
fn cutout_alpha_reaches_canvas() {
    let remover = Arc::new(WhiteKeyRemover::default());
    let pipeline = Pipeline::new(PipelineConfig::default(), remover).unwrap();
    let cutout: RgbaImage = pipeline.cut_out(&product_shot(40, 40)).unwrap();
    assert_eq!(cutout.get_pixel(0, 0)[3], 0);
    assert_eq!(cutout.get_pixel(20, 20)[3], 255);
}
