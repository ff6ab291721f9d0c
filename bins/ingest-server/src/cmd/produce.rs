use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use stream_api::BackendError;
use stream_file::FileTopicWriter;

use crate::backend;
use crate::config::{IngestConfig, ProduceArgs};
use crate::error::ServerError;

// ═══════════════════════════════════════════════════════════════
//  Sample records
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct Person {
    pub name: String,
    pub address: String,
    pub age: u32,
    pub hobbies: Vec<String>,
}

const NAMES: &[&str] = &["Ian", "Ada", "Olga", "Raj", "Mei", "Tomas", "Zoe", "Pavel"];
const STREETS: &[&str] = &["Main St", "Oak Ave", "Pine Rd", "Lake Dr", "Hill Ln"];
const HOBBIES: &[&str] = &["ski", "boat", "fly", "chess", "run", "climb", "paint"];

impl Person {
    pub fn random(rng: &mut Rng) -> Self {
        Self {
            name: rng.pick(NAMES).to_string(),
            address: format!("{} {}", rng.range(1, 1000), rng.pick(STREETS)),
            age: rng.range(18, 78) as u32,
            hobbies: (0..rng.range(1, 4)).map(|_| rng.pick(HOBBIES).to_string()).collect(),
        }
    }
}

/// xorshift64; seed 0 takes the clock.
pub struct Rng(u64);

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self(if seed == 0 { now_nanos() | 1 } else { seed })
    }

    fn step(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform-ish in `lo..hi`.
    pub fn range(&mut self, lo: u64, hi: u64) -> u64 {
        lo + self.step() % (hi - lo).max(1)
    }

    pub fn pick<'a>(&mut self, items: &[&'a str]) -> &'a str {
        items[self.range(0, items.len() as u64) as usize]
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

fn encode<T: Serialize>(value: &T) -> Result<String, ServerError> {
    serde_json::to_string(value).map_err(|e| ServerError::Backend(BackendError::from(e)))
}

/// Payload number `i`: a person as JSON, or every `malformed_every`-th a
/// line the worker cannot decode.
pub fn payload(rng: &mut Rng, i: u64, malformed_every: u64) -> Result<String, ServerError> {
    if malformed_every > 0 && (i + 1) % malformed_every == 0 {
        return Ok(format!("person #{i}: not json"));
    }
    encode(&Person::random(rng))
}

// ═══════════════════════════════════════════════════════════════
//  produce
// ═══════════════════════════════════════════════════════════════

pub async fn run(args: ProduceArgs) -> Result<(), ServerError> {
    let config = IngestConfig::load(&args.config)?;
    let topic = args.topic.clone().unwrap_or_else(|| config.consumer.topic.clone());
    if topic.is_empty() {
        return Err(ServerError::Config {
            context: "produce",
            detail: "no topic: pass --topic or set consumer.topic".into(),
        });
    }
    let data_dir = backend::stream_data_dir(&config)?;

    let mut writer = FileTopicWriter::open(&data_dir, &topic)?;
    let mut rng = Rng::new(args.seed);
    println!("Publishing to topic: {topic}");

    let interval = (args.rate > 0.0).then(|| Duration::from_secs_f64(1.0 / args.rate));
    let start = Instant::now();

    for i in 0..args.count {
        let value = payload(&mut rng, i, args.malformed_every)?;
        let sent_at = now_nanos();
        let offset = writer.append(Some(sent_at.to_string()), value)?;
        tracing::debug!(
            topic = %writer.topic(),
            offset,
            delay_s = now_nanos().saturating_sub(sent_at) as f64 / 1e9,
            "sent"
        );

        if (i + 1) % 500 == 0 {
            writer.flush()?;
            let elapsed = start.elapsed().as_secs_f64();
            tracing::info!(sent = i + 1, total = args.count, rate = (i + 1) as f64 / elapsed.max(1e-9), "progress");
        }
        if let Some(interval) = interval {
            if i + 1 < args.count {
                tokio::time::sleep(interval).await;
            }
        }
    }
    writer.flush()?;

    tracing::info!(
        count = args.count,
        next_offset = writer.next_offset(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "published"
    );
    println!("Published {} messages.", args.count);
    Ok(())
}
