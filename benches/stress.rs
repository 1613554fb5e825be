use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(format!("bench_{}", Ulid::new()))
        .user("bemanning")
        .password("bemanning");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// `YYYY-MM-DD` for day `n` of 2024 (wraps within the year).
fn date(n: u32) -> String {
    let month_lengths = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut day = n % 366;
    for (m, len) in month_lengths.iter().enumerate() {
        if day < *len {
            return format!("2024-{:02}-{:02}", m + 1, day + 1);
        }
        day -= len;
    }
    "2024-12-31".into()
}

/// One leader, `n_workers` team members and one project in this client's tenant.
async fn seed_team(client: &tokio_postgres::Client, n_workers: usize) -> (Ulid, Vec<Ulid>, Ulid) {
    let leader = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO workers (id, name, role) VALUES ('{leader}', 'Leader', 'project-leader')"
        ))
        .await
        .unwrap();
    let mut workers = Vec::with_capacity(n_workers);
    for i in 0..n_workers {
        let w = Ulid::new();
        client
            .batch_execute(&format!(
                "INSERT INTO workers (id, name, role, project_leader_id) VALUES ('{w}', 'Worker {i}', 'worker', '{leader}')"
            ))
            .await
            .unwrap();
        workers.push(w);
    }
    let project = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO projects (id, name, amount, a_konto_percent, billing_type, status) \
             VALUES ('{project}', 'Bench', 1000000, 10, 'a-konto', 'active')"
        ))
        .await
        .unwrap();
    (leader, workers, project)
}

async fn insert_assignment(client: &tokio_postgres::Client, project: Ulid, worker: Ulid, start: u32, len: u32) {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO assignments VALUES ('{id}', '{project}', '{worker}', '{}', '{}')",
            date(start),
            date(start + len)
        ))
        .await
        .unwrap();
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let (_, workers, project) = seed_team(&client, 1).await;
    let worker = workers[0];

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as u32 {
        let t = Instant::now();
        insert_assignment(&client, project, worker, i % 300, i % 7).await;
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} assignments in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_batch(host: &str, port: u16) {
    let client = connect(host, port).await;
    let (_, workers, project) = seed_team(&client, 10).await;

    let n_batches = 20;
    let per_batch = 100;
    let start = Instant::now();
    for b in 0..n_batches {
        let values: Vec<String> = (0..per_batch)
            .map(|i| {
                let w = workers[i % workers.len()];
                let s = ((b * per_batch + i) % 300) as u32;
                format!("('{}', '{project}', '{w}', '{}', '{}')", Ulid::new(), date(s), date(s + 3))
            })
            .collect();
        client
            .batch_execute(&format!("INSERT INTO assignments VALUES {}", values.join(", ")))
            .await
            .unwrap();
    }
    let elapsed = start.elapsed();
    let total = n_batches * per_batch;
    println!(
        "  {n_batches} batches x {per_batch} = {total} assignments in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
}

async fn phase3_lanes_under_load(host: &str, port: u16) {
    let stop = Arc::new(AtomicBool::new(false));

    // Writers hammer their own tenants in the background.
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let (_, workers, project) = seed_team(&client, 1).await;
            let mut i = 0u32;
            while !stop.load(Ordering::Relaxed) {
                insert_assignment(&client, project, workers[0], i % 300, 2).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 300;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let (leader, workers, project) = seed_team(&client, 8).await;
            for (k, w) in workers.iter().enumerate() {
                for j in 0..40u32 {
                    insert_assignment(&client, project, *w, (j * 3 + k as u32) % 60, j % 9).await;
                }
            }

            let mut worker_lat = Vec::with_capacity(reads_per_reader);
            let mut team_lat = Vec::with_capacity(reads_per_reader);
            for r in 0..reads_per_reader {
                let w = workers[r % workers.len()];
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM lanes WHERE worker_id = '{w}' AND start_date >= '2024-01-01' AND end_date <= '2024-03-31'"
                    ))
                    .await
                    .unwrap();
                worker_lat.push(t.elapsed());

                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM lanes WHERE project_leader_id = '{leader}' AND start_date >= '2024-01-01' AND end_date <= '2024-03-31'"
                    ))
                    .await
                    .unwrap();
                team_lat.push(t.elapsed());
            }
            (worker_lat, team_lat)
        }));
    }

    let mut worker_all = Vec::new();
    let mut team_all = Vec::new();
    for h in reader_handles {
        let (w, t) = h.await.unwrap();
        worker_all.extend(w);
        team_all.extend(t);
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("worker lanes", &mut worker_all);
    print_latency("team calendar (9 workers)", &mut team_all);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let (_, workers, project) = seed_team(&client, 1).await;
            for i in 0..ops_per_conn {
                insert_assignment(&client, project, workers[0], i * 2, 1).await;
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("BEMANNING_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("BEMANNING_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid BEMANNING_PORT");

    println!("=== bemanning stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Every connection gets its own tenant (unique dbname).

    println!("[phase 1] sequential assignment writes");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] batched assignment writes");
    phase2_batch(&host, port).await;

    println!("\n[phase 3] lane queries under write load");
    phase3_lanes_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
