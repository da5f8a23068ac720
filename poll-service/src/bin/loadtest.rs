use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use rand::{seq::SliceRandom, thread_rng};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use poll_service::utils::env_parse;

async fn issue_token(
    client: &Client,
    base_url: &str,
    secret: &str,
    user_id: &str,
) -> anyhow::Result<String> {
    let body: Value = client
        .post(format!("{}/auth/token", base_url))
        .header("x-auth-secret", secret)
        .json(&json!({ "userId": user_id }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    body["token"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("token missing in response: {}", body))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Quick-and-dirty CLI via envs
    let base_url =
        std::env::var("BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());
    let secret = std::env::var("AUTH_SECRET")
        .map_err(|_| anyhow::anyhow!("AUTH_SECRET env is required"))?;
    let voters: usize = env_parse("VOTERS", 200);
    let votes_per_voter: usize = env_parse("VOTES_PER_VOTER", 5);
    let concurrency: usize = env_parse("CONCURRENCY", 64);
    let option_count: usize = env_parse::<usize>("OPTIONS", 4).max(2);

    println!("BASE_URL={}", base_url);
    println!(
        "VOTERS={} VOTES_PER_VOTER={} CONCURRENCY={} OPTIONS={}",
        voters, votes_per_voter, concurrency, option_count
    );

    let client = Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(10_000)
        .tcp_nodelay(true)
        .timeout(Duration::from_secs(15))
        .build()?;

    // Fresh poll owned by a dedicated creator
    let creator = issue_token(&client, &base_url, &secret, "loadtest-creator").await?;
    let options: Vec<String> = (1..=option_count).map(|i| format!("Option {}", i)).collect();
    let poll: Value = client
        .post(format!("{}/polls", base_url))
        .bearer_auth(&creator)
        .json(&json!({ "question": "Load test poll", "options": options }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let poll_id = poll["id"]
        .as_i64()
        .ok_or_else(|| anyhow::anyhow!("poll id missing in response: {}", poll))?;
    let option_ids: Vec<i64> = poll["options"]
        .as_array()
        .map(|opts| opts.iter().filter_map(|o| o["id"].as_i64()).collect())
        .unwrap_or_default();
    if option_ids.len() != option_count {
        anyhow::bail!("poll {} came back with {} options", poll_id, option_ids.len());
    }
    println!("Created poll {} with options {:?}", poll_id, option_ids);

    let mut tokens = Vec::with_capacity(voters);
    for i in 0..voters {
        let user_id = format!("loadtest-voter-{}", i);
        tokens.push((user_id.clone(), issue_token(&client, &base_url, &secret, &user_id).await?));
    }

    // Each voter votes several times, interleaved with everyone else
    let mut plan: Vec<usize> = (0..voters)
        .flat_map(|v| std::iter::repeat(v).take(votes_per_voter))
        .collect();
    let mut rng = thread_rng();
    plan.shuffle(&mut rng);

    let start_at = Instant::now();
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let issued = Arc::new(AtomicU64::new(0));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(Option<String>, u16, u128)>();

    let stats_handle = tokio::spawn(async move {
        let mut ok = 0u64;
        let mut err = 0u64;
        let mut conflicts = 0u64;
        let mut voted: HashSet<String> = HashSet::new();
        let mut latencies_ms: Vec<u128> = Vec::new();
        while let Some((user, status, ms)) = rx.recv().await {
            match user {
                Some(user) => {
                    ok += 1;
                    voted.insert(user);
                }
                None => {
                    err += 1;
                    if status == 409 {
                        conflicts += 1;
                    }
                }
            }
            latencies_ms.push(ms);
        }
        latencies_ms.sort_unstable();
        let p = |q: f64| -> u128 {
            if latencies_ms.is_empty() {
                return 0;
            }
            let idx = ((latencies_ms.len() as f64 - 1.0) * q).round() as usize;
            latencies_ms[idx]
        };
        let elapsed = start_at.elapsed().as_secs_f64();
        let completed = ok + err;
        let qps = if elapsed > 0.0 { completed as f64 / elapsed } else { 0.0 };
        println!(
            "Summary: completed={} ok={} err={} conflicts={} p50={}ms p90={}ms p99={}ms qps={:.1}",
            completed,
            ok,
            err,
            conflicts,
            p(0.50),
            p(0.90),
            p(0.99),
            qps
        );
        voted
    });

    let mut tasks = Vec::with_capacity(plan.len());
    for voter in plan {
        let permit = sem.clone().acquire_owned().await?;
        issued.fetch_add(1, Ordering::Relaxed);
        let option_id = *option_ids
            .choose(&mut rng)
            .ok_or_else(|| anyhow::anyhow!("no options"))?;
        let (user_id, token) = tokens[voter].clone();
        let client_ref = client.clone();
        let tx_ref = tx.clone();
        let url = format!("{}/votes", base_url);

        tasks.push(tokio::spawn(async move {
            let started = Instant::now();
            let resp = client_ref
                .post(&url)
                .bearer_auth(&token)
                .json(&json!({ "pollId": poll_id, "optionId": option_id }))
                .send()
                .await;
            let elapsed = started.elapsed().as_millis();
            drop(permit);
            match resp {
                Ok(r) if r.status().is_success() => {
                    let _ = tx_ref.send((Some(user_id), r.status().as_u16(), elapsed));
                }
                Ok(r) => {
                    eprintln!("err {}ms {} status={}", elapsed, user_id, r.status());
                    let _ = tx_ref.send((None, r.status().as_u16(), elapsed));
                }
                Err(e) => {
                    eprintln!("err {}ms {} net={}", elapsed, user_id, e);
                    let _ = tx_ref.send((None, 0, elapsed));
                }
            }
        }));
    }

    // Close the stats channel so the summary prints
    drop(tx);
    for t in tasks {
        let _ = t.await;
    }
    let voted = stats_handle.await?;
    println!("Issued {} votes", issued.load(Ordering::Relaxed));

    // One ballot per voter who got at least one vote through
    let ballots: Vec<Value> = client
        .get(format!("{}/votes/poll/{}", base_url, poll_id))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let tally: Value = client
        .get(format!("{}/polls/{}/tally", base_url, poll_id))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let tally_total: u64 = tally["options"]
        .as_array()
        .map(|opts| opts.iter().filter_map(|o| o["count"].as_u64()).sum())
        .unwrap_or(0);

    println!(
        "Ledger check: voters_with_success={} ballots={} tally_total={}",
        voted.len(),
        ballots.len(),
        tally_total
    );
    if ballots.len() != voted.len() || tally_total != voted.len() as u64 {
        anyhow::bail!("ledger invariant violated");
    }
    println!("OK: one ballot per voter");

    Ok(())
}
