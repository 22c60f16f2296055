//! End-to-end pipeline tests with a scripted generator: retry behavior,
//! validation of generated output, and concurrent rendering.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use plot_sandbox_rs::{
    GenerateError, Policy, RenderError, Renderer, RetryPolicy, SandboxConfig, ScriptGenerator,
};

const PLOT_SCRIPT: &str = r#"
import math
xs = [i / 20 for i in range(0, 126)]
plt.plot(xs, [math.sin(x) for x in xs])
plt.savefig("wave.png")
"#;

struct ScriptedGenerator {
    responses: Mutex<Vec<Result<String, GenerateError>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedGenerator {
    fn new(responses: Vec<Result<String, GenerateError>>, calls: Arc<AtomicUsize>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls,
        }
    }
}

#[async_trait]
impl ScriptGenerator for ScriptedGenerator {
    async fn generate(&self, _description: &str) -> Result<String, GenerateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Err(GenerateError::Transient("no responses left".into()))
        } else {
            responses.remove(0)
        }
    }

    fn description(&self) -> String {
        "scripted (test)".to_string()
    }
}

fn renderer_with(
    responses: Vec<Result<String, GenerateError>>,
    calls: Arc<AtomicUsize>,
    temp_dir: &std::path::Path,
) -> Renderer {
    let config = SandboxConfig::builder()
        .temp_dir(temp_dir)
        .timeout(Duration::from_secs(30))
        .build();
    Renderer::new(
        Box::new(ScriptedGenerator::new(responses, calls)),
        Policy::default(),
        config,
    )
    .unwrap()
    .with_retry(RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    })
}

#[tokio::test]
async fn test_render_succeeds_after_transient_failures() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let renderer = renderer_with(
        vec![
            Err(GenerateError::Transient("overloaded".into())),
            Err(GenerateError::Transient("overloaded".into())),
            Ok(PLOT_SCRIPT.to_string()),
        ],
        Arc::clone(&calls),
        dir.path(),
    );

    let bytes = renderer.render("a sine wave").await.unwrap();
    assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_quota_exhaustion_stops_after_one_call() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let renderer = renderer_with(
        vec![Err(GenerateError::QuotaExceeded)],
        Arc::clone(&calls),
        dir.path(),
    );

    let err = renderer.render("a sine wave").await.unwrap_err();
    assert!(matches!(err, RenderError::UpstreamQuotaExceeded));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transient_exhaustion_reports_last_reason() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let renderer = renderer_with(
        vec![
            Err(GenerateError::Transient("first".into())),
            Err(GenerateError::Transient("second".into())),
            Err(GenerateError::Transient("third".into())),
        ],
        Arc::clone(&calls),
        dir.path(),
    );

    let err = renderer.render("a sine wave").await.unwrap_err();
    match err {
        RenderError::UpstreamTransient(reason) => assert_eq!(reason, "third"),
        other => panic!("expected transient error, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_generated_script_still_goes_through_validation() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let renderer = renderer_with(
        vec![Ok("import subprocess\nsubprocess.run(['ls'])".to_string())],
        Arc::clone(&calls),
        dir.path(),
    );

    let err = renderer.render("list my files").await.unwrap_err();
    assert!(err.is_validation());
    // A rejected script is not a generation failure; no retry happens.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_identical_scripts_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let renderer = renderer_with(vec![], Arc::clone(&calls), dir.path());

    let (a, b, c) = tokio::join!(
        renderer.render_script(PLOT_SCRIPT),
        renderer.render_script(PLOT_SCRIPT),
        renderer.render_script(PLOT_SCRIPT),
    );

    for bytes in [a.unwrap(), b.unwrap(), c.unwrap()] {
        assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    let leftover: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert!(leftover.is_empty(), "temp dir not cleaned: {leftover:?}");
}
