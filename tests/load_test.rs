//! Load testing for the gateway.

use std::time::Instant;

use reqwest::StatusCode;

mod common;

use common::{base_config, client, route, start_gateway, start_mock_backend};

#[tokio::test]
async fn test_load_performance() {
    let backend = start_mock_backend(200, r#"{"hello":"backend"}"#).await;
    let mut clientes = route("clientes", "/api/v1/clientes", &backend.url());
    clientes.metadata.rate_limit = Some(1_000);
    let gateway = start_gateway(base_config(vec![clientes])).await;

    let concurrency = 20;
    let requests_per_task = 25;
    let total_requests = concurrency * requests_per_task;

    let http = client();
    let url = gateway.url("/api/v1/clientes");
    let start = Instant::now();

    let mut tasks = Vec::new();
    for task_id in 0..concurrency {
        let http = http.clone();
        let url = url.clone();
        tasks.push(tokio::spawn(async move {
            let forwarded = format!("10.0.0.{}", task_id + 1);
            let mut latencies = Vec::new();
            for _ in 0..requests_per_task {
                let req_start = Instant::now();
                if let Ok(res) = http.get(&url).header("x-forwarded-for", &forwarded).send().await {
                    if res.status().is_success() {
                        latencies.push(req_start.elapsed());
                    }
                }
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }

    let duration = start.elapsed();
    let rps = total_requests as f64 / duration.as_secs_f64();
    assert_eq!(all_latencies.len(), total_requests, "every request should succeed");

    all_latencies.sort();
    let p50 = all_latencies[all_latencies.len() / 2];
    let p95 = all_latencies[(all_latencies.len() as f64 * 0.95) as usize];
    let p99 = all_latencies[(all_latencies.len() as f64 * 0.99) as usize];

    println!("\n--- Load Test Results ---");
    println!("Total Requests: {}", total_requests);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", duration);
    println!("Requests/sec:   {:.2}", rps);
    println!("P50 Latency:    {:?}", p50);
    println!("P95 Latency:    {:?}", p95);
    println!("P99 Latency:    {:?}", p99);
    println!("-------------------------\n");

    assert_eq!(backend.hits(), total_requests);
}

#[tokio::test]
async fn test_quota_is_exact_under_concurrency() {
    let backend = start_mock_backend(200, "{}").await;
    let mut facturas = route("facturas", "/api/v1/facturas", &backend.url());
    facturas.metadata.rate_limit = Some(50);
    let gateway = start_gateway(base_config(vec![facturas])).await;

    let http = client();
    let url = gateway.url("/api/v1/facturas");
    let mut tasks = Vec::new();
    for _ in 0..80 {
        let http = http.clone();
        let url = url.clone();
        tasks.push(tokio::spawn(async move {
            http.get(&url)
                .header("x-forwarded-for", "203.0.113.9")
                .send()
                .await
                .unwrap()
                .status()
        }));
    }

    let mut allowed = 0;
    let mut denied = 0;
    for task in tasks {
        match task.await.unwrap() {
            StatusCode::OK => allowed += 1,
            StatusCode::TOO_MANY_REQUESTS => denied += 1,
            other => panic!("unexpected status {}", other),
        }
    }

    assert_eq!(allowed, 50);
    assert_eq!(denied, 30);
    assert_eq!(backend.hits(), 50);
}
