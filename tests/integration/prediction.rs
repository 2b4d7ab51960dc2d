//! End-to-end prediction runs over the bundled identity bank.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ctr_studio::engine::predictor::partition_sizes;
use ctr_studio::engine::ClickPredictor;
use ctr_studio::llm::{mock, ProviderClient};
use ctr_studio::sampler::{sample_identities, IdentityBank};
use ctr_studio::types::{compute_ctr, ExecutionMode, FailureReason, IdentityProfile, Platform};

use crate::scripted_backend::{ScriptedBackend, Reply};

const AD: &str = "Special 0% APR credit card offer for travel rewards";

fn bank_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data/identity_bank.json")
}

fn population(n: usize, seed: u64) -> Vec<IdentityProfile> {
    let bank = IdentityBank::load(bank_path()).expect("bundled identity bank");
    sample_identities(n, &bank, Some(seed)).unwrap()
}

fn predictor(
    backend: &Arc<ScriptedBackend>,
    batch_size: usize,
    mode: ExecutionMode,
) -> ClickPredictor {
    ClickPredictor::with_client(
        ProviderClient::with_backend("openai", "gpt-4o-mini", backend.clone()),
        batch_size,
        mode,
    )
}

fn expected_parity(people: &[IdentityProfile]) -> Vec<u8> {
    people.iter().map(|p| (p.age % 2) as u8).collect()
}

#[tokio::test]
async fn test_bundled_bank_samples_reproducibly() {
    let a = population(300, 42);
    let b = population(300, 42);
    let c = population(300, 43);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.iter().all(|p| (18..=85).contains(&p.age)));
    assert!(a
        .iter()
        .all(|p| p.illness.is_none() || p.health_status));
}

#[tokio::test]
async fn test_sequential_and_concurrent_agree() {
    let people = population(237, 42);

    let seq_backend = ScriptedBackend::new(Reply::AgeParity).into_arc();
    let sequential = predictor(&seq_backend, 50, ExecutionMode::Sequential)
        .predict_clicks(AD, &people, Platform::Facebook)
        .await;

    let conc_backend = ScriptedBackend::new(Reply::AgeParity).into_arc();
    let concurrent = predictor(&conc_backend, 50, ExecutionMode::Concurrent)
        .predict_clicks(AD, &people, Platform::Facebook)
        .await;

    assert_eq!(sequential.len(), 237);
    assert_eq!(sequential, concurrent);
    assert_eq!(sequential, expected_parity(&people));
    assert_eq!(seq_backend.calls(), 5);
    assert_eq!(conc_backend.calls(), 5);
    assert_eq!(seq_backend.peak_in_flight(), 1);
}

#[tokio::test]
async fn test_concurrent_output_ordered_despite_latency() {
    let people = population(60, 7);
    // Earlier calls finish last.
    let backend = ScriptedBackend::new(Reply::AgeParity)
        .with_delay(|i| Duration::from_millis(10 * (6 - i.min(5)) as u64))
        .into_arc();
    let report = predictor(&backend, 10, ExecutionMode::Concurrent)
        .predict_clicks_detailed(AD, &people, Platform::TikTok)
        .await;

    assert_eq!(report.decisions, expected_parity(&people));
    assert_eq!(report.batches, 6);
    assert_eq!(report.degraded_batches, 0);
    assert!(backend.peak_in_flight() > 1);
}

#[tokio::test]
async fn test_max_in_flight_caps_fan_out() {
    let people = population(80, 1);
    let backend = ScriptedBackend::new(Reply::All(1))
        .with_delay(|_| Duration::from_millis(15))
        .into_arc();
    let decisions = predictor(&backend, 10, ExecutionMode::Concurrent)
        .with_max_in_flight(2)
        .predict_clicks(AD, &people, Platform::Amazon)
        .await;

    assert_eq!(decisions, vec![1; 80]);
    assert_eq!(backend.calls(), 8);
    assert!(backend.peak_in_flight() <= 2);
}

#[tokio::test]
async fn test_failures_degrade_only_their_batch() {
    let people = population(50, 9);
    let backend = ScriptedBackend::new(Reply::All(0))
        .with_queue(vec![
            Reply::All(0),
            Reply::Fail("HTTP 429".into()),
            Reply::Raw("Sorry, I can't help with that.".into()),
            Reply::Raw("[1, 1, 1]".into()),
            Reply::Raw("```json\n[0,0,0,0,0,0,0,0,0,0,1,1]\n```".into()),
        ])
        .into_arc();
    let report = predictor(&backend, 10, ExecutionMode::Sequential)
        .predict_clicks_detailed(AD, &people, Platform::Facebook)
        .await;

    assert_eq!(report.decisions.len(), 50);
    assert_eq!(&report.decisions[..10], &[0; 10]);
    assert_eq!(&report.decisions[10..20], mock::mock_batch(AD, &people[10..20]).as_slice());
    assert_eq!(&report.decisions[20..30], mock::mock_batch(AD, &people[20..30]).as_slice());
    assert_eq!(&report.decisions[30..33], &[1, 1, 1]);
    assert_eq!(&report.decisions[33..40], mock::mock_batch(AD, &people[33..40]).as_slice());
    assert_eq!(&report.decisions[40..], &[0; 10]);

    assert_eq!(report.degraded_batches, 3);
    assert_eq!(report.failures.get(&FailureReason::ApiCallFailed), Some(&1));
    assert_eq!(report.failures.get(&FailureReason::ResponseMalformed), Some(&1));
    assert_eq!(report.failures.get(&FailureReason::LengthMismatch), Some(&2));
}

#[tokio::test]
async fn test_prompts_carry_ad_and_platform() {
    let people = population(12, 3);
    let backend = ScriptedBackend::new(Reply::Alternating).into_arc();
    predictor(&backend, 5, ExecutionMode::Sequential)
        .predict_clicks(AD, &people, Platform::Amazon)
        .await;

    let prompts = backend.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts.iter().all(|p| p.contains(AD) && p.contains("PLATFORM: amazon")));
    assert!(prompts[2].contains("PEOPLE (2):"));
}

#[tokio::test]
async fn test_missing_credential_runs_offline() {
    let people = population(1000, 42);
    let predictor = ClickPredictor::with_client(
        ProviderClient::without_credential("deepseek", "deepseek-chat"),
        50,
        ExecutionMode::Concurrent,
    );
    let report = predictor
        .predict_clicks_detailed(AD, &people, Platform::Facebook)
        .await;

    assert_eq!(report.decisions.len(), 1000);
    assert_eq!(report.batches, partition_sizes(1000, 50).len());
    assert_eq!(report.degraded_batches, 20);
    assert_eq!(report.failures.get(&FailureReason::ApiKeyMissing), Some(&20));
    let ctr = compute_ctr(&report.decisions);
    assert!((0.0..=1.0).contains(&ctr));
    assert!((ctr - report.ctr()).abs() < f64::EPSILON);
}

#[test]
fn test_mock_predictor_with_blocking_runtime() {
    let people = population(150, 11);
    let predictor = ClickPredictor::mock(50);
    let first = tokio_test::block_on(predictor.predict_clicks(AD, &people, Platform::Facebook));
    let second = tokio_test::block_on(predictor.predict_clicks(AD, &people, Platform::Facebook));
    assert_eq!(first, second);
    assert_eq!(first, mock::mock_batch(AD, &people));
}
