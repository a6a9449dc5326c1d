/// Image challenge gating OTP sends
///
/// Challenges are single-use: `validate` removes the challenge whether or
/// not the answer matches, so each id gets exactly one guess.
use crate::clock::Clock;
use crate::config::CaptchaSettings;
use crate::error::Result;
use crate::security::OtpHasher;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use redis::AsyncCommands;
use redis_utils::{connection, with_timeout, SharedConnectionManager};
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// No 0/O, 1/I/L lookalikes
const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const WIDTH: u32 = 160;
const HEIGHT: u32 = 56;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaChallenge {
    pub id: String,
    /// `data:image/svg+xml;base64,...`
    pub image: String,
    pub expires_in: u64,
}

#[async_trait]
pub trait CaptchaStore: Send + Sync {
    async fn put(&self, id: &str, answer_hash: &str, ttl_secs: u64) -> Result<()>;

    /// Remove and return the stored hash; expired or unknown ids yield `None`
    async fn take(&self, id: &str) -> Result<Option<String>>;
}

pub struct RedisCaptchaStore {
    redis: SharedConnectionManager,
}

impl RedisCaptchaStore {
    pub fn new(redis: SharedConnectionManager) -> Self {
        Self { redis }
    }

    fn key(id: &str) -> String {
        redis_utils::key("phone_auth:captcha", &[id])
    }
}

#[async_trait]
impl CaptchaStore for RedisCaptchaStore {
    async fn put(&self, id: &str, answer_hash: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = connection(&self.redis).await;
        let _: () = with_timeout(conn.set_ex(Self::key(id), answer_hash, ttl_secs)).await?;
        Ok(())
    }

    async fn take(&self, id: &str) -> Result<Option<String>> {
        let mut conn = connection(&self.redis).await;
        let hash: Option<String> =
            with_timeout(redis::cmd("GETDEL").arg(Self::key(id)).query_async(&mut conn)).await?;
        Ok(hash)
    }
}

pub struct MemoryCaptchaStore {
    entries: DashMap<String, (String, DateTime<Utc>)>,
    clock: Arc<dyn Clock>,
}

impl MemoryCaptchaStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }
}

#[async_trait]
impl CaptchaStore for MemoryCaptchaStore {
    async fn put(&self, id: &str, answer_hash: &str, ttl_secs: u64) -> Result<()> {
        let expires_at = self.clock.now() + Duration::seconds(ttl_secs as i64);
        self.entries
            .insert(id.to_string(), (answer_hash.to_string(), expires_at));
        Ok(())
    }

    async fn take(&self, id: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        Ok(self
            .entries
            .remove(id)
            .and_then(|(_, (hash, expires_at))| (expires_at > now).then_some(hash)))
    }
}

pub struct CaptchaService {
    store: Arc<dyn CaptchaStore>,
    hasher: OtpHasher,
    settings: CaptchaSettings,
}

impl CaptchaService {
    pub fn new(store: Arc<dyn CaptchaStore>, settings: CaptchaSettings) -> Self {
        let hasher = OtpHasher::new(&settings.hash_key);
        Self {
            store,
            hasher,
            settings,
        }
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    pub async fn issue(&self) -> Result<CaptchaChallenge> {
        let answer = crypto_core::token::random_from_alphabet(ALPHABET, self.settings.length);
        self.issue_with_answer(&answer).await
    }

    async fn issue_with_answer(&self, answer: &str) -> Result<CaptchaChallenge> {
        let id = Uuid::new_v4().to_string();
        let hash = self.hasher.hash(&id, &normalize(answer));
        self.store.put(&id, &hash, self.settings.ttl_secs).await?;

        let svg = render_svg(answer);
        Ok(CaptchaChallenge {
            id,
            image: format!("data:image/svg+xml;base64,{}", BASE64.encode(svg)),
            expires_in: self.settings.ttl_secs,
        })
    }

    /// Check an answer, consuming the challenge regardless of the result
    pub async fn validate(&self, id: &str, value: &str) -> Result<bool> {
        let Some(hash) = self.store.take(id).await? else {
            debug!("Captcha challenge unknown or expired");
            return Ok(false);
        };
        Ok(self.hasher.verify(id, &normalize(value), &hash))
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_ascii_uppercase()
}

/// Distorted glyphs over noise; glyphs are emitted in shuffled document order
fn render_svg(answer: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut svg = String::with_capacity(2048);
    let _ = write!(
        svg,
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><rect width="100%" height="100%" fill="#f4f4f4"/>"##,
        w = WIDTH,
        h = HEIGHT
    );

    for _ in 0..6 {
        let _ = write!(
            svg,
            r#"<path d="M{} {} Q{} {} {} {}" stroke="{}" stroke-width="{}" fill="none"/>"#,
            rng.gen_range(0..WIDTH / 4),
            rng.gen_range(0..HEIGHT),
            rng.gen_range(0..WIDTH),
            rng.gen_range(0..HEIGHT),
            rng.gen_range(WIDTH * 3 / 4..WIDTH),
            rng.gen_range(0..HEIGHT),
            random_color(&mut rng),
            rng.gen_range(1..3)
        );
    }

    let count = answer.chars().count().max(1) as u32;
    let step = (WIDTH - 20) / count;
    let mut glyphs: Vec<(u32, char)> = answer
        .chars()
        .enumerate()
        .map(|(i, c)| (10 + i as u32 * step + rng.gen_range(0..step / 3 + 1), c))
        .collect();
    glyphs.shuffle(&mut rng);

    for (x, c) in glyphs {
        let y = rng.gen_range(HEIGHT / 2 + 4..HEIGHT - 8);
        let _ = write!(
            svg,
            r#"<text x="{x}" y="{y}" font-family="monospace" font-size="{size}" font-weight="bold" fill="{color}" transform="rotate({angle} {x} {y})">{c}</text>"#,
            x = x,
            y = y,
            size = rng.gen_range(24..32),
            color = random_color(&mut rng),
            angle = rng.gen_range(-25..25),
            c = c
        );
    }

    for _ in 0..30 {
        let _ = write!(
            svg,
            r#"<circle cx="{}" cy="{}" r="1" fill="{}"/>"#,
            rng.gen_range(0..WIDTH),
            rng.gen_range(0..HEIGHT),
            random_color(&mut rng)
        );
    }

    svg.push_str("</svg>");
    svg
}

fn random_color(rng: &mut impl Rng) -> String {
    format!(
        "rgb({},{},{})",
        rng.gen_range(40..160),
        rng.gen_range(40..160),
        rng.gen_range(40..160)
    )
}
