use std::sync::Arc;
use std::time::Duration;

use mailrun::{
    AttemptStatus, ChannelSink, GenerationPipeline, HttpResponse, Lead, MockHttpClient,
    PipelineConfig, ProgressEvent, ResultSet,
};
use tokio_util::sync::CancellationToken;

const GENERATE_KEY: &str = "POST /generate-email";

fn test_config() -> PipelineConfig {
    PipelineConfig {
        endpoint: "https://generator.example.com".to_string(),
        batch_size: 5,
        max_concurrent: 3,
        max_retries: 1,
        retry_delay: Duration::ZERO,
        timeout: Duration::from_secs(5),
        inter_batch_delay: Duration::ZERO,
        ..Default::default()
    }
}

fn leads(count: usize) -> Vec<Lead> {
    (0..count)
        .map(|i| Lead::new(format!("lead-{i}"), format!("Lead {i}")).with_field("title", "CTO"))
        .collect()
}

fn ok_response() -> mailrun::Result<HttpResponse> {
    Ok(HttpResponse {
        status: 200,
        body: r#"{"subject":"Hello","body":"Hi there"}"#.to_string(),
    })
}

fn server_error() -> mailrun::Result<HttpResponse> {
    Ok(HttpResponse {
        status: 500,
        body: "internal server error".to_string(),
    })
}

#[test_log::test(tokio::test)]
async fn single_lead_completes_on_first_attempt() {
    let http_client = Arc::new(MockHttpClient::new());
    http_client.add_response(GENERATE_KEY, ok_response());

    let pipeline = GenerationPipeline::new(http_client.clone(), test_config()).unwrap();
    let input = leads(1);
    let results = pipeline.run(&input).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results.success_count(), 1);

    let record = results.get(&input[0].lead_id).unwrap();
    assert!(record.is_success());
    assert_eq!(record.attempts.len(), 1);
    assert_eq!(record.attempts[0].status, AttemptStatus::Success);
    assert_eq!(
        record.final_result.as_deref(),
        Some(r#"{"subject":"Hello","body":"Hi there"}"#)
    );
    assert!(record.last_error.is_none());

    assert_eq!(http_client.call_count(), 1);
    let calls = http_client.get_calls();
    assert_eq!(calls[0].path, "/generate-email");
    assert!(calls[0].body.contains("lead-0"));
}

#[test_log::test(tokio::test)]
async fn timeout_then_success_records_both_attempts() {
    // First attempt times out, second succeeds; max_retries = 2 leaves one
    // attempt unused.
    let http_client = Arc::new(MockHttpClient::new());
    http_client.add_response(
        GENERATE_KEY,
        Err(mailrun::MailrunError::Other(anyhow::anyhow!(
            "request timed out"
        ))),
    );
    http_client.add_response(GENERATE_KEY, ok_response());

    let config = PipelineConfig {
        max_retries: 2,
        ..test_config()
    };
    let pipeline = GenerationPipeline::new(http_client.clone(), config).unwrap();
    let input = leads(1);
    let results = pipeline.run(&input).await;

    let record = results.get(&input[0].lead_id).unwrap();
    assert!(record.is_success());
    assert_eq!(record.attempts.len(), 2);
    assert_eq!(record.attempts[0].status, AttemptStatus::Failed);
    assert!(
        record.attempts[0]
            .error
            .as_deref()
            .unwrap()
            .contains("timed out")
    );
    // Exactly one success attempt and it is the last
    assert_eq!(record.attempts[1].status, AttemptStatus::Success);
    assert_eq!(record.attempts[1].attempt_number, 2);
    assert_eq!(
        record.final_result.as_deref(),
        Some(r#"{"subject":"Hello","body":"Hi there"}"#)
    );
    assert_eq!(http_client.call_count(), 2);
}

#[test_log::test(tokio::test)]
async fn twelve_items_all_failing_exhaust_retries_batch_by_batch() {
    // 12 items, batch_size 5, max_concurrent 3, max_retries 1, all calls
    // HTTP 500: 3 batches (5, 5, 2), every item gets exactly 2 attempts,
    // 0 successes and 12 failures.
    let http_client = Arc::new(MockHttpClient::new());
    for _ in 0..24 {
        http_client.add_response(GENERATE_KEY, server_error());
    }

    let (sink, mut rx) = ChannelSink::new();
    let pipeline = GenerationPipeline::new(http_client.clone(), test_config())
        .unwrap()
        .with_progress(Arc::new(sink));

    let input = leads(12);
    let results = pipeline.run(&input).await;

    assert_eq!(results.len(), 12);
    assert_eq!(results.success_count(), 0);
    assert_eq!(results.failure_count(), 12);
    assert_eq!(http_client.call_count(), 24);

    for lead in &input {
        let record = results.get(&lead.lead_id).unwrap();
        assert_eq!(record.attempts.len(), 2);
        assert!(record.attempts.iter().all(|a| a.status == AttemptStatus::Failed));
        assert!(record.last_error.as_deref().unwrap().contains("HTTP 500"));
        assert!(record.final_result.is_none());
    }

    // The failed subset feeds resume mode
    assert_eq!(results.failed_leads().len(), 12);

    // Batches were announced in order with sizes 5, 5, 2
    let mut batch_sizes = Vec::new();
    let mut last_percent = 0.0;
    while let Ok(event) = rx.try_recv() {
        match event {
            ProgressEvent::BatchStarted { batch_size, .. } => batch_sizes.push(batch_size),
            ProgressEvent::BatchCompleted { percent_complete, .. } => {
                last_percent = percent_complete
            }
            _ => {}
        }
    }
    assert_eq!(batch_sizes, vec![5, 5, 2]);
    assert!((last_percent - 100.0).abs() < f64::EPSILON);
}

#[test_log::test(tokio::test)]
async fn resume_overwrites_by_identifier_and_keeps_prior_successes() {
    let http_client = Arc::new(MockHttpClient::new());

    // First run: A succeeds, B fails its only attempt
    http_client.add_response(
        GENERATE_KEY,
        Ok(HttpResponse {
            status: 200,
            body: r#"{"subject":"A","body":"first run"}"#.to_string(),
        }),
    );
    http_client.add_response(GENERATE_KEY, server_error());

    let config = PipelineConfig {
        max_retries: 0,
        batch_size: 1, // sequential batches keep the response queue aligned with input order
        ..test_config()
    };
    let pipeline = GenerationPipeline::new(http_client.clone(), config).unwrap();

    let lead_a = Lead::new("a", "Lead A");
    let lead_b = Lead::new("b", "Lead B");
    let lead_c = Lead::new("c", "Lead C");

    let prior = pipeline.run(&[lead_a.clone(), lead_b.clone()]).await;
    assert!(prior.get(&lead_a.lead_id).unwrap().is_success());
    assert!(!prior.get(&lead_b.lead_id).unwrap().is_success());

    // Second run over {B, C}: both succeed
    http_client.clear_calls();
    http_client.add_response(
        GENERATE_KEY,
        Ok(HttpResponse {
            status: 200,
            body: r#"{"subject":"B","body":"second run"}"#.to_string(),
        }),
    );
    http_client.add_response(
        GENERATE_KEY,
        Ok(HttpResponse {
            status: 200,
            body: r#"{"subject":"C","body":"second run"}"#.to_string(),
        }),
    );

    let merged = pipeline
        .resume(&[lead_b.clone(), lead_c.clone()], prior)
        .await;

    assert_eq!(merged.len(), 3);
    // A is untouched
    let a = merged.get(&lead_a.lead_id).unwrap();
    assert_eq!(a.final_result.as_deref(), Some(r#"{"subject":"A","body":"first run"}"#));
    // B is fully replaced, not combined: one fresh attempt
    let b = merged.get(&lead_b.lead_id).unwrap();
    assert!(b.is_success());
    assert_eq!(b.attempts.len(), 1);
    // C is new
    assert!(merged.get(&lead_c.lead_id).unwrap().is_success());
}

#[test_log::test(tokio::test)]
async fn concurrency_cap_is_never_exceeded_within_a_batch() {
    let http_client = Arc::new(MockHttpClient::new());

    let mut triggers = Vec::new();
    for _ in 0..5 {
        triggers.push(http_client.add_response_with_trigger(GENERATE_KEY, ok_response()));
    }

    let config = PipelineConfig {
        batch_size: 5,
        max_concurrent: 2,
        ..test_config()
    };
    let pipeline = GenerationPipeline::new(http_client.clone(), config).unwrap();

    let input = leads(5);
    let handle = tokio::spawn(async move { pipeline.run(&input).await });

    // With all responses gated, exactly `max_concurrent` requests are
    // in flight.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(http_client.in_flight_count(), 2);

    for trigger in triggers {
        assert!(http_client.in_flight_count() <= 2);
        let _ = trigger.send(());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let results = handle.await.unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(results.success_count(), 5);
    assert_eq!(http_client.call_count(), 5);
}

#[test_log::test(tokio::test)]
async fn cancellation_stops_new_batches_and_keeps_completed_outcomes() {
    let http_client = Arc::new(MockHttpClient::new());
    // Only the first batch gets responses; the run is cancelled during the
    // inter-batch pause.
    http_client.add_response(GENERATE_KEY, ok_response());
    http_client.add_response(GENERATE_KEY, ok_response());

    let (sink, mut rx) = ChannelSink::new();
    let token = CancellationToken::new();
    let config = PipelineConfig {
        batch_size: 2,
        inter_batch_delay: Duration::from_secs(30),
        ..test_config()
    };
    let pipeline = GenerationPipeline::new(http_client.clone(), config)
        .unwrap()
        .with_progress(Arc::new(sink))
        .with_cancel_token(token.clone());

    let input = leads(4);
    let handle = tokio::spawn(async move { pipeline.run(&input).await });

    // Wait for the first batch to finish, then stop the run.
    loop {
        match rx.recv().await {
            Some(ProgressEvent::BatchCompleted { batch_index: 0, .. }) => break,
            Some(_) => {}
            None => panic!("progress channel closed before first batch completed"),
        }
    }
    token.cancel();

    let results = handle.await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results.success_count(), 2);
    // No calls were made for the second batch
    assert_eq!(http_client.call_count(), 2);
}

#[test_log::test(tokio::test)]
async fn abandoned_in_flight_item_is_recoverable_via_resume() {
    let http_client = Arc::new(MockHttpClient::new());
    let first = http_client.add_response_with_trigger(GENERATE_KEY, ok_response());
    let _second = http_client.add_response_with_trigger(GENERATE_KEY, ok_response());

    let token = CancellationToken::new();
    let config = PipelineConfig {
        batch_size: 2,
        max_concurrent: 2,
        ..test_config()
    };
    let pipeline = GenerationPipeline::new(http_client.clone(), config)
        .unwrap()
        .with_cancel_token(token.clone());

    let input = leads(2);
    let run_input = input.clone();
    let handle = tokio::spawn(async move { pipeline.run(&run_input).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(http_client.in_flight_count(), 2);

    // Let one item finish, abandon the other mid-flight.
    let _ = first.send(());
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let partial = handle.await.unwrap();
    assert_eq!(partial.len(), 1);
    assert_eq!(partial.success_count(), 1);

    // The abandoned lead has no record and gets reprocessed on resume.
    let missing: Vec<Lead> = input
        .iter()
        .filter(|l| partial.get(&l.lead_id).is_none())
        .cloned()
        .collect();
    assert_eq!(missing.len(), 1);

    http_client.add_response(GENERATE_KEY, ok_response());
    let pipeline = GenerationPipeline::new(http_client.clone(), test_config()).unwrap();
    let merged = pipeline.resume(&missing, partial).await;
    assert_eq!(merged.len(), 2);
    assert_eq!(merged.success_count(), 2);
}

#[test_log::test(tokio::test)]
async fn empty_input_completes_immediately() {
    let http_client = Arc::new(MockHttpClient::new());
    let pipeline = GenerationPipeline::new(http_client.clone(), test_config()).unwrap();

    let results = pipeline.run(&[]).await;
    assert!(results.is_empty());
    assert_eq!(http_client.call_count(), 0);

    // Resume over an empty failed subset is also a no-op.
    let mut seed = ResultSet::new();
    let prior = pipeline.run(&leads(0)).await;
    seed.merge(prior);
    let resumed = pipeline.resume(&[], seed).await;
    assert!(resumed.is_empty());
}

#[test_log::test(tokio::test)]
async fn malformed_success_body_counts_as_failed_attempt() {
    let http_client = Arc::new(MockHttpClient::new());
    http_client.add_response(
        GENERATE_KEY,
        Ok(HttpResponse {
            status: 200,
            body: "<html>not json</html>".to_string(),
        }),
    );
    http_client.add_response(GENERATE_KEY, ok_response());

    let pipeline = GenerationPipeline::new(http_client.clone(), test_config()).unwrap();
    let input = leads(1);
    let results = pipeline.run(&input).await;

    let record = results.get(&input[0].lead_id).unwrap();
    assert!(record.is_success());
    assert_eq!(record.attempts.len(), 2);
    assert!(
        record.attempts[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Malformed response body")
    );
}

#[tokio::test]
async fn malformed_configuration_is_rejected_before_any_call() {
    let http_client = Arc::new(MockHttpClient::new());
    let config = PipelineConfig {
        max_concurrent: 0,
        ..test_config()
    };
    let err = GenerationPipeline::new(http_client.clone(), config).unwrap_err();
    assert!(matches!(err, mailrun::MailrunError::Validation(_)));
    assert_eq!(http_client.call_count(), 0);
}
