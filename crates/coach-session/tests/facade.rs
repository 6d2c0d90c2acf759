mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use coach_session::{
    CancellationToken, FinishReason, InferenceError, InferenceFacade, PromptBuilder,
    UNAVAILABLE_MESSAGE,
};
use common::{model_dir, test_config, Recorder, Script, ScriptedLoader};
use tokio::time::timeout;

const CONTEXT: &str = "Steps: 8547 (goal 10000)";
const QUESTION: &str = "How's my activity?";

fn facade(script: Script, config: coach_session::SessionConfig) -> (InferenceFacade, Arc<Recorder>) {
    let loader = ScriptedLoader::new(script);
    let recorder = Arc::clone(&loader.recorder);
    let facade = InferenceFacade::spawn_with_loader(config, Arc::new(loader)).unwrap();
    (facade, recorder)
}

fn slow_endless(reply: &str) -> Script {
    let mut script = Script::new(reply);
    script.endless = true;
    script.step_delay = Duration::from_millis(10);
    script
}

async fn wait_until_generating(facade: &InferenceFacade) {
    let mut rx = facade.subscribe();
    let started = matches!(
        timeout(Duration::from_secs(5), rx.wait_for(|s| s.is_generating)).await,
        Ok(Ok(_))
    );
    assert!(started, "generation never started");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_coach_scenario() {
    let dir = model_dir();
    let reply = "You're close to your goal, a short walk after dinner will get you there.";
    let mut script = Script::new(reply);
    script.step_delay = Duration::from_millis(5);
    let config = test_config(dir.path()).with_system_instruction("You are a helpful coach");
    let (facade, _) = facade(script, config);

    // The borrow returned by wait_for must not outlive the check, or the
    // worker blocks publishing the next status.
    let mut rx = facade.subscribe();
    let watcher = async {
        matches!(
            timeout(Duration::from_secs(5), rx.wait_for(|s| s.is_generating)).await,
            Ok(Ok(_))
        )
    };
    let (generation, seen) = tokio::join!(facade.generate(QUESTION, CONTEXT), watcher);

    assert!(seen, "is_generating was never published");
    let g = generation.unwrap();
    assert!(!g.text.is_empty());
    assert_eq!(g.text, reply);
    assert!(!PromptBuilder::contains_marker(&g.text));

    let status = facade.status();
    assert!(!status.is_generating);
    assert!(status.is_model_loaded);
    assert_eq!(status.last_error, None);
}

#[tokio::test]
async fn test_missing_artifact_is_published() {
    let dir = tempfile::tempdir().unwrap();
    let (facade, _) = facade(Script::new("ok"), test_config(dir.path()));

    let err = facade.generate(QUESTION, CONTEXT).await.unwrap_err();
    assert!(matches!(err, InferenceError::ModelNotFound { .. }));

    let status = facade.status();
    assert!(!status.is_model_loaded);
    assert!(!status.is_generating);
    assert_eq!(status.last_error, Some(err.to_string()));

    assert_eq!(facade.reply(QUESTION, CONTEXT).await, UNAVAILABLE_MESSAGE);
}

#[tokio::test]
async fn test_successful_load_clears_last_error() {
    let dir = tempfile::tempdir().unwrap();
    let (facade, _) = facade(Script::new("ok"), test_config(dir.path()));

    assert!(facade.load_if_needed().await.is_err());
    assert!(facade.status().last_error.is_some());

    std::fs::write(dir.path().join("model.gguf"), b"").unwrap();
    facade.load_if_needed().await.unwrap();
    let status = facade.status();
    assert!(status.is_model_loaded);
    assert_eq!(status.last_error, None);
}

#[tokio::test]
async fn test_load_is_idempotent_and_reports_progress() {
    let dir = model_dir();
    let (facade, recorder) = facade(Script::new("ok"), test_config(dir.path()));

    facade.load_if_needed().await.unwrap();
    facade.load_if_needed().await.unwrap();
    assert_eq!(recorder.loads.load(Ordering::SeqCst), 1);

    let status = facade.status();
    assert!(status.is_model_loaded);
    assert_eq!(status.loading_progress, 1.0);
    assert_eq!(status.loading_status, "Ready");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_calls_queue_in_order() {
    let dir = model_dir();
    let mut script = Script::new("Hydrate and stretch.");
    script.step_delay = Duration::from_millis(2);
    let (facade, recorder) = facade(script, test_config(dir.path()));
    let facade = Arc::new(facade);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let facade = Arc::clone(&facade);
            tokio::spawn(async move { facade.generate(&format!("question {i}"), CONTEXT).await })
        })
        .collect();

    for handle in handles {
        let g = handle.await.unwrap().unwrap();
        assert_eq!(g.text, "Hydrate and stretch.");
        assert_eq!(g.finish, FinishReason::EndOfGeneration);
    }
    assert_eq!(recorder.loads.load(Ordering::SeqCst), 1);
    assert!(!facade.status().is_generating);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_try_generate_is_busy_while_in_flight() {
    let dir = model_dir();
    let (facade, _) = facade(slow_endless("go"), test_config(dir.path()).with_max_new_tokens(10_000));
    let facade = Arc::new(facade);

    let running = {
        let facade = Arc::clone(&facade);
        tokio::spawn(async move { facade.generate(QUESTION, CONTEXT).await })
    };
    wait_until_generating(&facade).await;

    assert_eq!(
        facade.try_generate(QUESTION, CONTEXT).await.unwrap_err(),
        InferenceError::Busy
    );

    facade.cancel();
    let err = running.await.unwrap().unwrap_err();
    assert_eq!(err, InferenceError::Cancelled);
    assert_eq!(facade.status().last_error, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_then_next_call_succeeds() {
    let dir = model_dir();
    let config = test_config(dir.path()).with_max_new_tokens(6);
    let (facade, _) = facade(slow_endless("ab"), config);
    let facade = Arc::new(facade);

    let running = {
        let facade = Arc::clone(&facade);
        tokio::spawn(async move { facade.reply(QUESTION, CONTEXT).await })
    };
    wait_until_generating(&facade).await;
    facade.cancel();
    assert_eq!(running.await.unwrap(), "");

    let g = facade.generate(QUESTION, CONTEXT).await.unwrap();
    assert_eq!(g.text, "ababab");
    assert_eq!(g.finish, FinishReason::MaxTokens);
}

#[tokio::test]
async fn test_generate_with_cancelled_token() {
    let dir = model_dir();
    let (facade, _) = facade(Script::new("ok"), test_config(dir.path()));

    let token = CancellationToken::new();
    token.cancel();
    let err = facade.generate_with(QUESTION, CONTEXT, token).await.unwrap_err();
    assert_eq!(err, InferenceError::Cancelled);
    assert!(facade.status().is_model_loaded);
}

#[tokio::test]
async fn test_partial_reply_keeps_text() {
    let dir = model_dir();
    let mut script = Script::new("keep it up");
    script.endless = true;
    let (facade, _) = facade(script, test_config(dir.path()).with_max_new_tokens(4));
    assert_eq!(facade.reply(QUESTION, CONTEXT).await, "keep");
}

#[tokio::test]
async fn test_unload_and_reload() {
    let dir = model_dir();
    let (facade, recorder) = facade(Script::new("ok"), test_config(dir.path()));

    facade.generate(QUESTION, CONTEXT).await.unwrap();
    facade.unload().await.unwrap();
    assert!(!facade.status().is_model_loaded);
    assert_eq!(recorder.drops.load(Ordering::SeqCst), 1);

    facade.unload().await.unwrap();
    assert_eq!(recorder.drops.load(Ordering::SeqCst), 1);

    facade.generate(QUESTION, CONTEXT).await.unwrap();
    assert_eq!(recorder.loads.load(Ordering::SeqCst), 2);
    assert!(facade.status().is_model_loaded);
}

#[tokio::test]
async fn test_drop_releases_model() {
    let dir = model_dir();
    let (facade, recorder) = facade(Script::new("ok"), test_config(dir.path()));
    facade.load_if_needed().await.unwrap();

    drop(facade);
    assert_eq!(recorder.drops.load(Ordering::SeqCst), 1);
}

/// GGUF v3 header whose first metadata key claims `u64::MAX` bytes.
fn corrupt_artifact() -> Vec<u8> {
    let mut bytes = b"GGUF".to_vec();
    bytes.extend_from_slice(&3u32.to_le_bytes());
    bytes.extend_from_slice(&0u64.to_le_bytes());
    bytes.extend_from_slice(&1u64.to_le_bytes());
    bytes.extend_from_slice(&u64::MAX.to_le_bytes());
    bytes.extend_from_slice(b"general.architecture");
    bytes
}

#[tokio::test]
async fn test_corrupt_artifact_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("coach-model.gguf");
    std::fs::write(&artifact, corrupt_artifact()).unwrap();
    let facade = InferenceFacade::spawn(test_config(dir.path())).unwrap();

    let err = facade.load_if_needed().await.unwrap_err();
    match &err {
        InferenceError::ModelLoad(msg) => assert!(msg.contains("malformed"), "{msg}"),
        other => panic!("expected ModelLoad, got {other:?}"),
    }
    let status = facade.status();
    assert!(!status.is_model_loaded);
    assert_eq!(status.last_error, Some(err.to_string()));
    assert_eq!(status.loading_status, "Failed");

    // The worker is still serving.
    std::fs::remove_file(&artifact).unwrap();
    let err = facade.load_if_needed().await.unwrap_err();
    assert!(matches!(err, InferenceError::ModelNotFound { .. }));
    assert_eq!(facade.reply(QUESTION, CONTEXT).await, UNAVAILABLE_MESSAGE);
}

#[tokio::test]
async fn test_worker_survives_load_panic() {
    let dir = model_dir();
    let mut loader = ScriptedLoader::new(Script::new("ok"));
    loader.panic_first_load = true;
    let recorder = Arc::clone(&loader.recorder);
    let facade = InferenceFacade::spawn_with_loader(test_config(dir.path()), Arc::new(loader)).unwrap();

    let err = facade.load_if_needed().await.unwrap_err();
    assert!(matches!(err, InferenceError::ModelLoad(_)), "{err:?}");
    assert!(facade.status().last_error.is_some());
    assert!(!facade.status().is_model_loaded);

    let g = facade.generate(QUESTION, CONTEXT).await.unwrap();
    assert_eq!(g.text, "ok");
    assert_eq!(recorder.loads.load(Ordering::SeqCst), 1);
    let status = facade.status();
    assert!(status.is_model_loaded);
    assert_eq!(status.last_error, None);
}

#[tokio::test]
async fn test_worker_survives_decode_panic() {
    let dir = model_dir();
    let mut script = Script::new("fine");
    script.panic_once_at = Some(0);
    let (facade, recorder) = facade(script, test_config(dir.path()));

    let err = facade.generate(QUESTION, CONTEXT).await.unwrap_err();
    assert!(matches!(err, InferenceError::DecodeStep(_)), "{err:?}");
    let status = facade.status();
    assert!(!status.is_generating);
    assert!(!status.is_model_loaded, "a panicked session is released");
    assert_eq!(recorder.drops.load(Ordering::SeqCst), 1);

    let g = facade.generate(QUESTION, CONTEXT).await.unwrap();
    assert_eq!(g.text, "fine");
    assert_eq!(recorder.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_abandoned_call_does_not_hold_up_the_queue() {
    let dir = model_dir();
    let config = test_config(dir.path()).with_max_new_tokens(100);
    let (facade, recorder) = facade(slow_endless("go"), config);

    let abandoned = timeout(Duration::from_millis(100), facade.generate(QUESTION, CONTEXT)).await;
    assert!(abandoned.is_err(), "first call should still be running");

    let g = facade.generate(QUESTION, CONTEXT).await.unwrap();
    assert_eq!(g.finish, FinishReason::MaxTokens);
    assert_eq!(g.generated_tokens, 100);

    // The second call decodes 99 single-token steps; the abandoned one stopped
    // at its next boundary instead of running its own 99.
    let steps = recorder.steps();
    assert!(steps < 150, "abandoned generation kept running: {steps} steps");
    assert!(!facade.status().is_generating);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dropped_queued_call_is_skipped() {
    let dir = model_dir();
    let (facade, recorder) = facade(slow_endless("go"), test_config(dir.path()).with_max_new_tokens(10_000));
    let facade = Arc::new(facade);

    let running = {
        let facade = Arc::clone(&facade);
        tokio::spawn(async move { facade.generate(QUESTION, CONTEXT).await })
    };
    wait_until_generating(&facade).await;

    let queued = {
        let facade = Arc::clone(&facade);
        tokio::spawn(async move { facade.generate(QUESTION, CONTEXT).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    queued.abort();
    assert!(queued.await.unwrap_err().is_cancelled());

    facade.cancel();
    assert_eq!(running.await.unwrap().unwrap_err(), InferenceError::Cancelled);
    facade.unload().await.unwrap();

    // Only the first call ever started a prompt.
    let prompts = recorder.batches().iter().filter(|b| b[0].pos == 0).count();
    assert_eq!(prompts, 1);
}
