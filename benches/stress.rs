use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(format!("bench_{}", Ulid::new()))
        .user("maitred")
        .password("maitred");

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
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// Service date for iteration `i`: 12 dinner slots per day, one day per 12
/// bookings, so slots never collide.
fn slot_for(i: usize) -> (String, String) {
    let base = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
    let date = base.checked_add_days(Days::new((i / 12) as u64)).unwrap();
    let hour = 10 + (i % 12);
    (date.to_string(), format!("{hour:02}:00"))
}

async fn seed_table(client: &tokio_postgres::Client, capacity: u32) -> Ulid {
    let tid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO tables (id, name, capacity) VALUES ('{tid}', 'T{capacity}', {capacity})"
        ))
        .await
        .unwrap();
    tid
}

/// Create a booking and immediately confirm it on `tid`.
async fn book_and_confirm(client: &tokio_postgres::Client, tid: Ulid, i: usize) {
    let bid = Ulid::new();
    let (date, time) = slot_for(i);
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, date, start_time, party_size, customer_name, customer_email, \
             customer_phone, duration_minutes) \
             VALUES ('{bid}', '{date}', '{time}', 2, 'Bench', 'bench@example.com', NULL, 30)"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'confirmed', table_ids = '{tid}' WHERE id = '{bid}'"
        ))
        .await
        .unwrap();
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let tid = seed_table(&client, 4).await;

    let n = 1000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        book_and_confirm(&client, tid, i).await;
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = (n * 2) as f64 / elapsed.as_secs_f64();
    println!(
        "  {n} create+confirm pairs in {:.2}s = {ops:.0} statements/sec",
        elapsed.as_secs_f64()
    );
    print_latency("create+confirm latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 100;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            // Each task gets its own restaurant (unique dbname from connect())
            let client = connect(&host, port).await;
            let tid = seed_table(&client, 4).await;
            for i in 0..n_per_task {
                book_and_confirm(&client, tid, i).await;
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} bookings/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(host: &str, port: u16) {
    // Writer tasks: continuously book in their own restaurants
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let tid = seed_table(&client, 10).await;
            let mut i = 0usize;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                book_and_confirm(&client, tid, i).await;
                i += 1;
            }
        }));
    }

    // Reader tasks: availability queries against their own seeded floor
    let n_readers = 10;
    let reads_per_reader = 300;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for cap in [2, 2, 4, 4, 6, 8] {
                seed_table(&client, cap).await;
            }
            for i in 0..50 {
                let tid = seed_table(&client, 4).await;
                book_and_confirm(&client, tid, i).await;
            }

            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .batch_execute(
                        "SELECT * FROM availability WHERE date = '2030-01-01' AND time = '19:00' AND party_size = 4",
                    )
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let tid = seed_table(&client, 4).await;
            for i in 0..ops_per_conn {
                book_and_confirm(&client, tid, i).await;
            }
            success.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} bookings each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("MAITRED_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("MAITRED_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid MAITRED_PORT");

    println!("=== maitred stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own restaurant (unique dbname) to avoid interference

    println!("[phase 1] sequential create+confirm throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] concurrent booking throughput");
    phase2_concurrent(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
