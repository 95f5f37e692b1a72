//! Connectivity probe. Lists a small page of issues on each platform and
//! reports whether it answered; never opens the mapping store.

use std::fmt;
use std::time::Instant;

use serde::Serialize;

use crate::platform::{Category, Platform, Side};

/// Items requested per platform during a probe.
pub const DEFAULT_PROBE_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct PlatformProbe {
    pub side: Side,
    pub name: String,
    pub identifier: String,
    pub ok: bool,
    pub items_seen: usize,
    pub latency_ms: u128,
    pub error_kind: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub platforms: Vec<PlatformProbe>,
}

impl ProbeReport {
    pub fn all_ok(&self) -> bool {
        self.platforms.iter().all(|p| p.ok)
    }

    pub fn any_ok(&self) -> bool {
        self.platforms.iter().any(|p| p.ok)
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.platforms {
            if p.ok {
                writeln!(
                    f,
                    "[{}] {} {}: ok ({} issues seen, {} ms)",
                    p.side, p.name, p.identifier, p.items_seen, p.latency_ms
                )?;
            } else {
                writeln!(
                    f,
                    "[{}] {} {}: FAILED [{}] {}",
                    p.side,
                    p.name,
                    p.identifier,
                    p.error_kind.as_deref().unwrap_or("unknown"),
                    p.error.as_deref().unwrap_or("")
                )?;
            }
        }
        Ok(())
    }
}

async fn probe_one(platform: &dyn Platform, limit: usize) -> PlatformProbe {
    let started = Instant::now();
    let result = platform.list_items(Category::Issues, Some(limit)).await;
    let latency_ms = started.elapsed().as_millis();

    let mut probe = PlatformProbe {
        side: platform.side(),
        name: platform.name().to_string(),
        identifier: platform.identifier(),
        ok: false,
        items_seen: 0,
        latency_ms,
        error_kind: None,
        error: None,
    };
    match result {
        Ok(items) => {
            log::info!("{} reachable in {latency_ms} ms", probe.name);
            probe.ok = true;
            probe.items_seen = items.len();
        }
        Err(e) => {
            log::warn!("{} probe failed: {e}", probe.name);
            probe.error_kind = Some(e.kind().to_string());
            probe.error = Some(e.to_string());
        }
    }
    probe
}

/// Probe both platforms concurrently.
pub async fn probe(a: &dyn Platform, b: &dyn Platform, limit: usize) -> ProbeReport {
    let (a, b) = futures::join!(probe_one(a, limit), probe_one(b, limit));
    ProbeReport { platforms: vec![a, b] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::MemoryPlatform;
    use crate::platform::RemoteItem;

    fn seeded(side: Side, name: &str, n: usize) -> MemoryPlatform {
        let items = (1..=n)
            .map(|i| RemoteItem::new(i.to_string(), format!("issue {i}")))
            .collect();
        MemoryPlatform::new(side, name).with_items(items)
    }

    #[tokio::test]
    async fn test_probe_both_reachable() {
        let a = seeded(Side::A, "radicle", 8);
        let b = seeded(Side::B, "github", 2);
        let report = probe(&a, &b, DEFAULT_PROBE_LIMIT).await;
        assert!(report.all_ok());
        assert_eq!(report.platforms[0].items_seen, DEFAULT_PROBE_LIMIT);
        assert_eq!(report.platforms[1].items_seen, 2);
        assert_eq!(a.create_calls() + b.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_probe_reports_failure_per_platform() {
        let a = seeded(Side::A, "radicle", 1);
        let b = seeded(Side::B, "github", 1);
        b.set_unavailable(true);

        let report = probe(&a, &b, DEFAULT_PROBE_LIMIT).await;
        assert!(!report.all_ok());
        assert!(report.any_ok());
        assert_eq!(report.platforms[1].error_kind.as_deref(), Some("remote_unavailable"));

        let text = report.to_string();
        assert!(text.contains("github memory:github: FAILED [remote_unavailable]"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["platforms"][0]["ok"], true);
        assert_eq!(json["platforms"][1]["ok"], false);
    }
}
